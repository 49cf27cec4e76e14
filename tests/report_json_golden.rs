use setupwiz::core::{Finding, OsInfo, ReportSummary, RequirementsReport, Severity};

#[test]
fn report_json_matches_golden() {
    let findings = vec![
        Finding {
            name: "memory_limit".to_string(),
            severity: Severity::Warning,
            message: "memory_limit が推奨値 512M 未満です（現在: 384M）".to_string(),
        },
        Finding {
            name: "config_dir_writable".to_string(),
            severity: Severity::Ok,
            message: "設定ディレクトリに書き込みできます".to_string(),
        },
    ];
    let report = RequirementsReport {
        schema_version: "1.0".to_string(),
        tool_version: "0.1.0".to_string(),
        os: OsInfo {
            name: "Linux".to_string(),
            version: "6.1.0".to_string(),
        },
        generated_at: "2026-01-01T00:00:00Z".to_string(),
        summary: ReportSummary::from_findings(&findings, vec!["note-1".to_string()]),
        findings,
    };

    let actual = serde_json::to_value(&report).expect("serialize report");
    let expected: serde_json::Value =
        serde_json::from_str(include_str!("golden/report.json")).expect("parse golden json");

    assert_eq!(actual, expected);
}
