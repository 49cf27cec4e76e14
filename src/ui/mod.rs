use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{Finding, RequirementsReport, Severity};
use crate::install::InstallSummary;
use crate::wizard::{FieldError, StepDefinition};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 動作環境を確認するには `setupwiz check` を実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `setupwiz --help` を参照してください"
    );
}

pub fn print_requirements(report: &RequirementsReport, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "概要: OK={}  WARNING={}  BLOCKING={}  （{} {}）",
        report.summary.ok,
        report.summary.warnings,
        report.summary.blocking,
        report.os.name,
        report.os.version
    );
    if cfg.verbose {
        for note in &report.summary.notes {
            let _ = writeln!(out, "- {note}");
        }
    }

    let total = report.findings.len();
    let rows = cfg.max_table_rows.max(1).min(total);

    let _ = writeln!(out);
    if total > rows {
        let _ = writeln!(out, "確認結果（{rows}件表示 / 全{total}件）:");
    } else {
        let _ = writeln!(out, "確認結果:");
    }
    print_findings_table(&mut out, &report.findings, rows, cfg.color);

    let _ = writeln!(out);
    match report.worst_severity() {
        Severity::Blocking => {
            let _ = writeln!(
                out,
                "インストールを続行できません。BLOCKING の項目を解消してください。"
            );
        }
        Severity::Warning => {
            let _ = writeln!(out, "インストールは可能ですが、WARNING の項目の見直しを推奨します。");
        }
        Severity::Ok => {
            let _ = writeln!(out, "すべての要件を満たしています。");
        }
    }
}

pub fn print_steps(steps: &[StepDefinition], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    for (idx, step) in steps.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}（{}）", idx + 1, step.title, step.id);
        if step.fields.is_empty() {
            let _ = writeln!(out, "  - 入力項目なし");
        }
        for field in &step.fields {
            let mut tags = vec![if field.required { "必須" } else { "任意" }];
            if field.secret {
                tags.push("秘匿");
            }
            let default = field
                .default
                .as_deref()
                .map(|d| format!(" 既定={d}"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  - {}: {} [{}]{default}",
                field.key,
                field.label,
                tags.join(",")
            );
            if cfg.verbose {
                for v in &field.validators {
                    let _ = writeln!(out, "    - 検証: {}", v.message);
                }
            }
        }
        if step.is_terminal() {
            let _ = writeln!(out, "  → 完了");
        } else if let Some(next) = &step.next_step_id {
            let _ = writeln!(out, "  → {next}");
        }
    }
}

pub fn print_field_errors(step: &StepDefinition, errors: &[FieldError]) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{}（{}）の入力内容にエラーがあります:", step.title, step.id);
    for err in errors {
        let label = step
            .fields
            .iter()
            .find(|f| f.key == err.field)
            .map(|f| f.label.as_str())
            .unwrap_or(err.field.as_str());
        let _ = writeln!(stderr, "  - {label}（{}）: {}", err.field, err.message);
    }
}

pub fn print_install_summary(summary: &InstallSummary, log_hint: Option<&str>, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    if summary.written {
        let _ = writeln!(
            out,
            "setupwiz: アプリケーションがインストールされました（the application is installed, mode={}）",
            summary.mode
        );
    } else {
        let _ = writeln!(
            out,
            "setupwiz: dry-run のため書き込みは行いません（mode={}）",
            summary.mode
        );
    }
    let _ = writeln!(out, "- ローカル設定: {}", summary.local_config_path);
    if let Some(backup) = &summary.backup_path {
        let _ = writeln!(out, "- バックアップ: {backup}");
    }
    let _ = writeln!(
        out,
        "- 管理者: {} <{}>",
        summary.admin_username, summary.admin_email
    );
    let _ = writeln!(out, "- データベース: {}@{}", summary.db_name, summary.db_host);
    if let Some(hint) = log_hint {
        let _ = writeln!(out, "- ログ: {hint}");
    }
}

fn print_findings_table(out: &mut dyn Write, findings: &[Finding], rows: usize, color: bool) {
    let label_severity = "判定";
    let label_name = "項目";
    let label_message = "内容";

    let severity_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(f.severity.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_severity));
    let name_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(&f.name))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_name));
    let message_w = visible_width_ansi(label_message).max(4);

    let _ = writeln!(
        out,
        "{}  {}  {}",
        pad_end_display(label_severity, severity_w),
        pad_end_display(label_name, name_w),
        label_message
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(severity_w),
        "-".repeat(name_w),
        "-".repeat(message_w)
    );

    for finding in findings.iter().take(rows) {
        let severity = pad_end_display(&format_severity(finding.severity, color), severity_w);
        let name = pad_end_display(&finding.name, name_w);
        let _ = writeln!(out, "{severity}  {name}  {}", finding.message);
    }
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.as_str();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Ok => "32",
        Severity::Warning => "33",
        Severity::Blocking => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
