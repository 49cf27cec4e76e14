use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::requirements::{self, Threshold, Thresholds};
use crate::wizard::WizardMode;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub requirements: RequirementsConfig,
    pub install: InstallConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

/// Thresholds are kept as size strings (`512M`) so `config --show` echoes what
/// the user wrote.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementsConfig {
    pub min_memory_limit: String,
    pub recommended_memory_limit: String,
    pub min_disk_free: String,
    pub recommended_disk_free: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallConfig {
    pub local_config_path: String,
    pub mode: WizardMode,
    pub backup_tables_default: bool,
}

impl EffectiveConfig {
    pub fn defaults(home_dir: &Path) -> Self {
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            requirements: RequirementsConfig {
                min_memory_limit: requirements::DEFAULT_MIN_MEMORY_LIMIT.to_string(),
                recommended_memory_limit: requirements::DEFAULT_RECOMMENDED_MEMORY_LIMIT
                    .to_string(),
                min_disk_free: requirements::DEFAULT_MIN_DISK_FREE.to_string(),
                recommended_disk_free: requirements::DEFAULT_RECOMMENDED_DISK_FREE.to_string(),
            },
            install: InstallConfig {
                local_config_path: default_local_config_path(home_dir).display().to_string(),
                mode: WizardMode::Install,
                backup_tables_default: true,
            },
            config_path: None,
        }
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        let r = &self.requirements;
        Ok(Thresholds {
            memory_limit: threshold(
                &r.min_memory_limit,
                &r.recommended_memory_limit,
                "requirements.min_memory_limit",
                "requirements.recommended_memory_limit",
            )?,
            disk_free: threshold(
                &r.min_disk_free,
                &r.recommended_disk_free,
                "requirements.min_disk_free",
                "requirements.recommended_disk_free",
            )?,
        })
    }

    pub fn local_config_path(&self, home_dir: &Path) -> PathBuf {
        expand_home(&self.install.local_config_path, home_dir)
    }
}

fn threshold(min: &str, recommended: &str, min_key: &str, rec_key: &str) -> Result<Threshold> {
    let minimum = requirements::parse_size(min).with_context(|| min_key.to_string())?;
    let recommended =
        requirements::parse_size(recommended).with_context(|| rec_key.to_string())?;
    if recommended < minimum {
        anyhow::bail!("{rec_key} は {min_key} 以上である必要があります（{recommended} < {minimum}）");
    }
    Ok(Threshold {
        minimum,
        recommended,
    })
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    requirements: Option<RawRequirementsConfig>,
    install: Option<RawInstallConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawRequirementsConfig {
    min_memory_limit: Option<RawSize>,
    recommended_memory_limit: Option<RawSize>,
    min_disk_free: Option<RawSize>,
    recommended_disk_free: Option<RawSize>,
}

#[derive(Debug, Deserialize)]
struct RawInstallConfig {
    local_config_path: Option<String>,
    mode: Option<WizardMode>,
    backup_tables_default: Option<bool>,
}

/// Sizes may be written as `"512M"` or as a bare byte count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSize {
    Text(String),
    Bytes(i64),
}

impl RawSize {
    fn into_string(self) -> String {
        match self {
            RawSize::Text(s) => s,
            RawSize::Bytes(n) => n.to_string(),
        }
    }
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/setupwiz/config.toml")
}

pub fn default_local_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/setupwiz/local.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::defaults(home_dir);

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;
    cfg.thresholds()?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(req) = raw.requirements {
        if let Some(v) = req.min_memory_limit {
            cfg.requirements.min_memory_limit = v.into_string();
        }
        if let Some(v) = req.recommended_memory_limit {
            cfg.requirements.recommended_memory_limit = v.into_string();
        }
        if let Some(v) = req.min_disk_free {
            cfg.requirements.min_disk_free = v.into_string();
        }
        if let Some(v) = req.recommended_disk_free {
            cfg.requirements.recommended_disk_free = v.into_string();
        }
    }

    if let Some(install) = raw.install {
        if let Some(path) = install.local_config_path {
            cfg.install.local_config_path = path;
        }
        if let Some(mode) = install.mode {
            cfg.install.mode = mode;
        }
        if let Some(backup) = install.backup_tables_default {
            cfg.install.backup_tables_default = backup;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("SETUPWIZ_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "SETUPWIZ_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("SETUPWIZ_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "SETUPWIZ_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("SETUPWIZ_REQUIREMENTS_MIN_MEMORY_LIMIT") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.requirements.min_memory_limit = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("SETUPWIZ_REQUIREMENTS_RECOMMENDED_MEMORY_LIMIT") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.requirements.recommended_memory_limit = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("SETUPWIZ_INSTALL_LOCAL_CONFIG_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.install.local_config_path = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("SETUPWIZ_INSTALL_MODE") {
        cfg.install.mode = v
            .parse::<WizardMode>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "SETUPWIZ_INSTALL_MODE")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    crate::wizard::parse_bool(s).ok_or_else(|| {
        anyhow::anyhow!(
            "真偽値が不正です: {}（true|false|1|0|yes|no|on|off を指定してください）",
            s.trim()
        )
    })
}

fn expand_home(path: &str, home_dir: &Path) -> PathBuf {
    if path == "~" {
        return home_dir.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home_dir.join(rest);
    }
    let p = PathBuf::from(path);
    if p.is_absolute() { p } else { home_dir.join(p) }
}
