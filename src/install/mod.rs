//! The concrete installation wizard: its three steps, the answers file format
//! and the completion hook that persists the local configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::wizard::{
    CompletionHook, FieldSpec, FieldValues, Rule, StepDefinition, WizardMode, parse_bool,
    qualified_key,
};

pub const STEP_CHECK: &str = "check";
pub const STEP_DOCTRINE: &str = "doctrine";
pub const STEP_USER: &str = "user";

pub const DB_DRIVERS: [&str; 2] = ["pdo_mysql", "pdo_pgsql"];

#[derive(Debug, Clone)]
pub struct InstallDefaults {
    pub backup_tables: bool,
}

impl Default for InstallDefaults {
    fn default() -> Self {
        Self {
            backup_tables: true,
        }
    }
}

pub fn install_wizard(defaults: &InstallDefaults) -> Vec<StepDefinition> {
    vec![
        StepDefinition::new(STEP_CHECK, "動作環境の確認").next(STEP_DOCTRINE),
        StepDefinition::new(STEP_DOCTRINE, "データベース設定")
            .field(
                FieldSpec::optional("driver", "ドライバー")
                    .default_value(DB_DRIVERS[0])
                    .rule(Rule::OneOf {
                        choices: DB_DRIVERS.iter().map(|d| d.to_string()).collect(),
                    }),
            )
            .field(FieldSpec::required("host", "ホスト"))
            .field(
                FieldSpec::required("port", "ポート")
                    .default_value("3306")
                    .rule(Rule::Integer { min: 1, max: 65535 }),
            )
            .field(FieldSpec::required("name", "データベース名"))
            .field(FieldSpec::required("user", "ユーザー"))
            .field(FieldSpec::optional("password", "パスワード").secret())
            .field(
                FieldSpec::optional("backup_tables", "既存テーブルをバックアップ")
                    .default_value(if defaults.backup_tables { "1" } else { "0" })
                    .rule(Rule::Boolean),
            )
            .next(STEP_USER),
        StepDefinition::new(STEP_USER, "管理者ユーザー")
            .field(FieldSpec::required("username", "ユーザー名"))
            .field(
                FieldSpec::required("password", "パスワード")
                    .secret()
                    .rule(Rule::MinLength { min: 6 }),
            )
            .field(FieldSpec::required("firstname", "名"))
            .field(FieldSpec::required("lastname", "姓"))
            .field(FieldSpec::required("email", "メールアドレス").rule(Rule::Email)),
    ]
}

/// Qualified keys (`<step>.<field>`) of every secret field.
pub fn secret_keys(steps: &[StepDefinition]) -> Vec<String> {
    steps
        .iter()
        .flat_map(|s| {
            s.fields
                .iter()
                .filter(|f| f.secret)
                .map(move |f| qualified_key(&s.id, &f.key))
        })
        .collect()
}

pub fn mask_secrets(values: &FieldValues, secret_keys: &[String]) -> FieldValues {
    values
        .iter()
        .map(|(k, v)| {
            if secret_keys.contains(k) {
                (k.clone(), "********".to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    pub installed_at: String,
    pub mode: WizardMode,
    pub db: DbConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub backup_tables: bool,
}

/// The admin password is handed to the host application, never written here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
}

impl LocalConfig {
    pub fn from_values(values: &FieldValues, mode: WizardMode, installed_at: String) -> Result<Self> {
        let get = |step: &str, field: &str| -> Result<String> {
            values
                .get(&qualified_key(step, field))
                .cloned()
                .ok_or_else(|| anyhow!("値がありません: {}", qualified_key(step, field)))
        };

        let port = get(STEP_DOCTRINE, "port")?;
        let backup_tables = get(STEP_DOCTRINE, "backup_tables")?;

        Ok(Self {
            installed_at,
            mode,
            db: DbConfig {
                driver: get(STEP_DOCTRINE, "driver")?,
                host: get(STEP_DOCTRINE, "host")?,
                port: port
                    .parse::<u16>()
                    .with_context(|| format!("ポートが不正です: {port}"))?,
                name: get(STEP_DOCTRINE, "name")?,
                user: get(STEP_DOCTRINE, "user")?,
                password: values
                    .get(&qualified_key(STEP_DOCTRINE, "password"))
                    .cloned(),
                backup_tables: parse_bool(&backup_tables)
                    .ok_or_else(|| anyhow!("真偽値が不正です: {backup_tables}"))?,
            },
            admin: AdminConfig {
                username: get(STEP_USER, "username")?,
                firstname: get(STEP_USER, "firstname")?,
                lastname: get(STEP_USER, "lastname")?,
                email: get(STEP_USER, "email")?,
            },
        })
    }
}

/// Payload of the terminal "installed" event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallSummary {
    pub mode: WizardMode,
    pub local_config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    pub admin_username: String,
    pub admin_email: String,
    pub db_host: String,
    pub db_name: String,
    pub written: bool,
}

/// Completion hook that writes the local configuration file.
#[derive(Debug, Clone)]
pub struct LocalConfigWriter {
    path: PathBuf,
    dry_run: bool,
}

impl LocalConfigWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl CompletionHook for LocalConfigWriter {
    type Summary = InstallSummary;

    fn on_complete(&mut self, mode: WizardMode, values: &FieldValues) -> Result<InstallSummary> {
        ensure_not_locked(&self.path, mode)?;

        let installed_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let config = LocalConfig::from_values(values, mode, installed_at)?;

        let mut summary = InstallSummary {
            mode,
            local_config_path: self.path.display().to_string(),
            backup_path: None,
            admin_username: config.admin.username.clone(),
            admin_email: config.admin.email.clone(),
            db_host: config.db.host.clone(),
            db_name: config.db.name.clone(),
            written: false,
        };
        if self.dry_run {
            return Ok(summary);
        }

        summary.backup_path = write_local_config(&self.path, &config)?
            .map(|p| p.display().to_string());
        summary.written = true;
        Ok(summary)
    }
}

/// In `install` mode an existing local config means the application is
/// already installed.
pub fn ensure_not_locked(path: &Path, mode: WizardMode) -> Result<()> {
    if mode == WizardMode::Install && path.exists() {
        bail!(
            "既にインストール済みです（ローカル設定が存在します: {}）。再設定するには --mode reinstall を指定してください",
            path.display()
        );
    }
    Ok(())
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".bak");
    PathBuf::from(s)
}

/// Writes via a temp file and rename. Returns the backup path when an existing
/// file was preserved.
fn write_local_config(path: &Path, config: &LocalConfig) -> Result<Option<PathBuf>> {
    let body = toml::to_string_pretty(config).context("ローカル設定(TOML)のシリアライズに失敗しました")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("ディレクトリの作成に失敗しました: {}", parent.display()))?;
    }

    let backup = if path.exists() {
        let backup = backup_path(path);
        std::fs::copy(path, &backup)
            .with_context(|| format!("バックアップに失敗しました: {}", backup.display()))?;
        Some(backup)
    } else {
        None
    };

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp-{}", std::process::id()));
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, body)
        .with_context(|| format!("ローカル設定の書き込みに失敗しました: {}", tmp.display()))?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err)
            .with_context(|| format!("ローカル設定の配置に失敗しました: {}", path.display()));
    }
    Ok(backup)
}

/// Answers for a non-interactive run, keyed by step id.
pub type Answers = BTreeMap<String, FieldValues>;

/// Reads an answers file made of one TOML table per step.
///
/// Integers and booleans are accepted and converted to the strings the
/// validators expect.
pub fn load_answers(path: &Path) -> Result<Answers> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("回答ファイルの読み取りに失敗しました: {}", path.display()))?;
    parse_answers(&s).with_context(|| format!("回答ファイルが不正です: {}", path.display()))
}

pub fn parse_answers(s: &str) -> Result<Answers> {
    let table: toml::Table = toml::from_str(s).context("回答ファイル(TOML)の解析に失敗しました")?;

    let mut answers = Answers::new();
    for (step, value) in table {
        let toml::Value::Table(fields) = value else {
            bail!("[{step}] はテーブルである必要があります");
        };
        let mut values = FieldValues::new();
        for (key, v) in fields {
            let v = match v {
                toml::Value::String(s) => s,
                toml::Value::Integer(n) => n.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => (if b { "1" } else { "0" }).to_string(),
                other => bail!("{step}.{key} の型は未対応です: {}", other.type_str()),
            };
            values.insert(key, v);
        }
        answers.insert(step, values);
    }
    Ok(answers)
}
