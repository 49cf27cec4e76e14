use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::EffectiveConfig;
use crate::core::Severity;
use crate::engine::{Engine, EngineOptions};
use crate::install::{self, Answers, InstallDefaults, InstallSummary, LocalConfigWriter};
use crate::logs::{self, InstallLogEntry};
use crate::ui::UiConfig;
use crate::wizard::{FieldValues, StepAdvance, SubmitError, WizardController, WizardMode};

mod interactive;

#[derive(Debug, Parser)]
#[command(
    name = "setupwiz",
    version,
    about = "動作環境を確認し、対話式または回答ファイルでアプリケーションの初期設定を行う"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Check(CheckArgs),
    Steps(StepsArgs),
    Install(InstallArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {}

#[derive(Debug, Args)]
pub struct StepsArgs {}

#[derive(Debug, Args)]
pub struct InstallArgs {
    #[arg(long)]
    pub answers: Option<PathBuf>,
    #[arg(long)]
    pub mode: Option<WizardMode>,
    #[arg(long)]
    pub interactive: bool,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("SETUPWIZ_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;
    let thresholds = cfg.thresholds().map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let engine = Engine::new(EngineOptions {
        timeout: Duration::from_secs(cli.timeout),
        thresholds,
        local_config_path: cfg.local_config_path(&home_dir),
        show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
    });

    match cli.command {
        Commands::Check(_args) => {
            let report = engine.check()?;
            if cli.json {
                write_json(&report)?;
            } else {
                crate::ui::print_requirements(&report, &ui_cfg);
            }
            if report.is_blocked() {
                return Err(crate::exit::requirements_blocked(format!(
                    "動作要件を満たしていません（BLOCKING {}件）",
                    report.summary.blocking
                )));
            }
        }
        Commands::Steps(_args) => {
            let steps = install::install_wizard(&install_defaults(&cfg));
            if cli.json {
                write_json(&steps)?;
            } else {
                crate::ui::print_steps(&steps, &ui_cfg);
            }
        }
        Commands::Install(args) => {
            let run = InstallRun {
                engine: &engine,
                cfg: &cfg,
                ui_cfg: &ui_cfg,
                home_dir: &home_dir,
                json: cli.json,
                dry_run: cli.dry_run,
            };
            run.execute(args)?;
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "setupwiz", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `setupwiz config --show` を使用してください");
            }
        }
    }

    Ok(())
}

fn install_defaults(cfg: &EffectiveConfig) -> InstallDefaults {
    InstallDefaults {
        backup_tables: cfg.install.backup_tables_default,
    }
}

struct InstallRun<'a> {
    engine: &'a Engine,
    cfg: &'a EffectiveConfig,
    ui_cfg: &'a UiConfig,
    home_dir: &'a Path,
    json: bool,
    dry_run: bool,
}

impl InstallRun<'_> {
    fn execute(&self, args: InstallArgs) -> Result<()> {
        let mode = args.mode.unwrap_or(self.cfg.install.mode);

        if args.interactive {
            if self.json {
                return Err(crate::exit::invalid_args(
                    "install --interactive は --json と併用できません",
                ));
            }
            if !(self.ui_cfg.stdin_is_tty && self.ui_cfg.stderr_is_tty) {
                return Err(crate::exit::invalid_args(
                    "install --interactive は TTY が必要です（stdin + stderr）",
                ));
            }
        }
        let answers = match (&args.answers, args.interactive) {
            (Some(path), _) => install::load_answers(path).map_err(crate::exit::invalid_args_err)?,
            (None, true) => Answers::new(),
            (None, false) => {
                return Err(crate::exit::invalid_args(
                    "install には --answers <FILE> または --interactive を指定してください",
                ));
            }
        };

        let started_at = OffsetDateTime::now_utc();
        let report = self.engine.check()?;
        if report.is_blocked() {
            if !self.json {
                crate::ui::print_requirements(&report, self.ui_cfg);
            }
            return Err(crate::exit::requirements_blocked(format!(
                "動作要件を満たしていないためインストールできません（BLOCKING {}件）",
                report.summary.blocking
            )));
        }
        if !self.json && (self.ui_cfg.verbose || report.worst_severity() >= Severity::Warning) {
            crate::ui::print_requirements(&report, self.ui_cfg);
        }

        let local_config_path = self.engine.local_config_path();
        install::ensure_not_locked(local_config_path, mode)
            .map_err(crate::exit::install_failed_err)?;

        if args.interactive
            && mode == WizardMode::Reinstall
            && local_config_path.exists()
            && !self.dry_run
            && !confirm_exact(
                "既存のローカル設定を置き換えます。続行するには 'reinstall' と入力してください: ",
                "reinstall",
            )?
        {
            if !self.ui_cfg.quiet {
                eprintln!("キャンセルしました。");
            }
            return Ok(());
        }

        let steps = install::install_wizard(&install_defaults(self.cfg));
        let writer = LocalConfigWriter::new(local_config_path).dry_run(self.dry_run);
        let mut wizard = WizardController::new(steps, mode, writer)?;
        let secret_keys = install::secret_keys(wizard.steps());

        let mut steps_completed: Vec<String> = Vec::new();
        let outcome: Result<InstallSummary> = loop {
            let Some(step) = wizard.current_step().cloned() else {
                break Err(anyhow!("ウィザードは既に完了しています"));
            };

            let values = if args.interactive {
                match interactive::prompt_step(&step)? {
                    Some(values) => values,
                    None => {
                        return Err(crate::exit::invalid_args(
                            "入力が終了したためインストールを中止しました",
                        ));
                    }
                }
            } else {
                answers.get(&step.id).cloned().unwrap_or_else(FieldValues::new)
            };

            match wizard.submit(&step.id, &values) {
                Ok(StepAdvance::Next { .. }) => steps_completed.push(step.id.clone()),
                Ok(StepAdvance::Completed(summary)) => {
                    steps_completed.push(step.id.clone());
                    break Ok(summary);
                }
                Ok(StepAdvance::AlreadyCompleted) => {
                    break Err(anyhow!("ウィザードは既に完了しています"));
                }
                Err(SubmitError::Validation(errors)) => {
                    crate::ui::print_field_errors(&step, &errors);
                    if args.interactive {
                        continue;
                    }
                    return Err(crate::exit::invalid_args(format!(
                        "回答ファイルの [{}] に {} 件のエラーがあります",
                        step.id,
                        errors.len()
                    )));
                }
                Err(SubmitError::CompletionFailed(err)) => break Err(err),
                Err(err @ SubmitError::InvalidStep { .. }) => break Err(err.into()),
            }
        };

        let masked = install::mask_secrets(&wizard.session().collected_values, &secret_keys);
        let log_path = logs::write_install_log(
            self.home_dir,
            &InstallLogEntry {
                started_at,
                finished_at: OffsetDateTime::now_utc(),
                mode: wizard.mode(),
                dry_run: self.dry_run,
                steps_completed: &steps_completed,
                values: &masked,
                findings: &report.findings,
                summary: outcome.as_ref().ok(),
                error: outcome.as_ref().err().map(|err| format!("{err:#}")),
            },
        );
        let log_hint = match log_path {
            Ok(path) => Some(logs::log_hint(&path, self.home_dir)),
            Err(err) => {
                if !self.ui_cfg.quiet {
                    eprintln!("警告: インストールログを書き込めませんでした: {err:#}");
                }
                None
            }
        };

        let summary = outcome.map_err(crate::exit::install_failed_err)?;
        if self.json {
            write_json(&summary)?;
        } else {
            crate::ui::print_install_summary(&summary, log_hint.as_deref(), self.ui_cfg);
        }
        Ok(())
    }
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn confirm_exact(prompt: &str, expected: &str) -> Result<bool> {
    use std::io::{BufRead, Write};

    let mut stderr = std::io::stderr().lock();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = std::io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(false);
    }
    Ok(input.trim() == expected)
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_shell_accepts_known_shells() {
        assert_eq!(parse_shell(" Bash ").unwrap(), clap_complete::Shell::Bash);
        assert_eq!(parse_shell("zsh").unwrap(), clap_complete::Shell::Zsh);
        let err = parse_shell("powershell").unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn cli_parses_install_flags() {
        let cli = Cli::try_parse_from([
            "setupwiz",
            "--dry-run",
            "install",
            "--answers",
            "answers.toml",
            "--mode",
            "reinstall",
        ])
        .unwrap();
        assert!(cli.dry_run);
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.answers, Some(PathBuf::from("answers.toml")));
        assert_eq!(args.mode, Some(WizardMode::Reinstall));
        assert!(!args.interactive);
    }

    #[test]
    fn cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["setupwiz", "install", "--mode", "upgrade"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
