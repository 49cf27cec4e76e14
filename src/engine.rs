use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{Finding, OsInfo, ReportSummary, RequirementsReport};
use crate::platform::{self, ProbeOptions};
use crate::requirements::{self, Environment, Thresholds};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub timeout: Duration,
    pub thresholds: Thresholds,
    pub local_config_path: PathBuf,
    pub show_progress: bool,
}

#[derive(Clone)]
pub struct Engine {
    opts: EngineOptions,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Self {
        Self { opts }
    }

    pub fn local_config_path(&self) -> &std::path::Path {
        &self.opts.local_config_path
    }

    pub fn probe(&self) -> Environment {
        use std::io::IsTerminal;
        let progress_enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message("動作環境を確認中...");
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let env = platform::probe_environment(&ProbeOptions {
            local_config_path: self.opts.local_config_path.clone(),
            timeout: std::cmp::min(self.opts.timeout, Duration::from_secs(2)),
        });

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        env
    }

    pub fn check(&self) -> Result<RequirementsReport> {
        let env = self.probe();
        Ok(self.report_from_environment(&env))
    }

    pub fn report_from_environment(&self, env: &Environment) -> RequirementsReport {
        let findings = requirements::check_requirements(env, &self.opts.thresholds);
        let mut notes = vec![format!(
            "しきい値: memory_limit 最小={} 推奨={} / disk_free 最小={} 推奨={}",
            requirements::format_size(self.opts.thresholds.memory_limit.minimum),
            requirements::format_size(self.opts.thresholds.memory_limit.recommended),
            requirements::format_size(self.opts.thresholds.disk_free.minimum),
            requirements::format_size(self.opts.thresholds.disk_free.recommended),
        )];
        if std::env::var_os(platform::MEMORY_LIMIT_OVERRIDE_ENV).is_some() {
            notes.push(format!(
                "memory_limit は {} で上書きされています",
                platform::MEMORY_LIMIT_OVERRIDE_ENV
            ));
        }
        if std::env::var_os(platform::DISK_FREE_OVERRIDE_ENV).is_some() {
            notes.push(format!(
                "disk_free は {} で上書きされています",
                platform::DISK_FREE_OVERRIDE_ENV
            ));
        }

        build_report(findings, os_from_environment(env), notes)
    }
}

pub fn build_report(findings: Vec<Finding>, os: OsInfo, mut notes: Vec<String>) -> RequirementsReport {
    notes.sort();
    notes.dedup();

    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    RequirementsReport {
        schema_version: "1.0".to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        os,
        generated_at,
        summary: ReportSummary::from_findings(&findings, notes),
        findings,
    }
}

fn os_from_environment(env: &Environment) -> OsInfo {
    let text = match env.get(requirements::OS) {
        Some(requirements::EnvValue::Text(s)) => s.as_str(),
        _ => "",
    };
    let mut parts = text.splitn(2, ' ');
    let name = parts.next().filter(|s| !s.is_empty()).unwrap_or("unknown");
    let version = parts.next().filter(|s| !s.is_empty()).unwrap_or("unknown");
    OsInfo {
        name: name.to_string(),
        version: version.to_string(),
    }
}
