use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::Finding;
use crate::install::InstallSummary;
use crate::wizard::{FieldValues, WizardMode};

#[derive(Debug, Serialize)]
struct InstallLog<'a> {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    started_at: String,
    finished_at: String,
    mode: WizardMode,
    dry_run: bool,
    status: &'static str,
    steps_completed: &'a [String],
    values: &'a FieldValues,
    #[serde(skip_serializing_if = "no_findings")]
    findings: &'a [Finding],
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a InstallSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug)]
pub struct InstallLogEntry<'a> {
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub mode: WizardMode,
    pub dry_run: bool,
    pub steps_completed: &'a [String],
    /// Must already have secrets masked.
    pub values: &'a FieldValues,
    pub findings: &'a [Finding],
    pub summary: Option<&'a InstallSummary>,
    pub error: Option<String>,
}

fn no_findings(findings: &&[Finding]) -> bool {
    findings.is_empty()
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/setupwiz/logs")
}

pub fn write_install_log(home_dir: &Path, entry: &InstallLogEntry<'_>) -> Result<PathBuf> {
    let dir = logs_dir(home_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("ログディレクトリの作成に失敗しました: {}", dir.display()))?;

    let pid = std::process::id();
    let ts = entry.finished_at.unix_timestamp_nanos();
    let path = dir.join(format!("install-{pid}-{ts}.json"));

    let log = InstallLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command: "install",
        started_at: format_ts(entry.started_at),
        finished_at: format_ts(entry.finished_at),
        mode: entry.mode,
        dry_run: entry.dry_run,
        status: if entry.error.is_none() { "ok" } else { "error" },
        steps_completed: entry.steps_completed,
        values: entry.values,
        findings: entry.findings,
        summary: entry.summary,
        error: entry.error.clone(),
    };

    let buf = serde_json::to_vec_pretty(&log).context("ログ(JSON)のシリアライズに失敗しました")?;
    std::fs::write(&path, buf)
        .with_context(|| format!("ログの書き込みに失敗しました: {}", path.display()))?;
    Ok(path)
}

pub fn log_hint(path: &Path, home_dir: &Path) -> String {
    path.strip_prefix(home_dir)
        .map(|p| format!("~/{p}", p = p.display()))
        .unwrap_or_else(|_| path.display().to_string())
}

fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_log_is_written_as_json() {
        let home = std::env::temp_dir().join(format!("setupwiz-logs-unit-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&home);

        let mut values = FieldValues::new();
        values.insert("user.password".to_string(), "********".to_string());
        let steps = vec!["check".to_string(), "doctrine".to_string()];
        let now = OffsetDateTime::now_utc();
        let path = write_install_log(
            &home,
            &InstallLogEntry {
                started_at: now,
                finished_at: now,
                mode: WizardMode::Install,
                dry_run: false,
                steps_completed: &steps,
                values: &values,
                findings: &[],
                summary: None,
                error: Some("boom".to_string()),
            },
        )
        .unwrap();

        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["mode"], "install");
        assert_eq!(v["values"]["user.password"], "********");
        assert!(v.get("findings").is_none());
        assert!(log_hint(&path, &home).starts_with("~/.config/setupwiz/logs/install-"));
        let _ = std::fs::remove_dir_all(&home);
    }
}
