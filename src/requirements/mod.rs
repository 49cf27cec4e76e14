use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::Finding;

pub const MEMORY_LIMIT: &str = "memory_limit";
pub const DISK_FREE: &str = "disk_free";
pub const CONFIG_DIR_WRITABLE: &str = "config_dir_writable";
pub const LOCAL_CONFIG_EXISTS: &str = "local_config_exists";
pub const OS: &str = "os";

pub const DEFAULT_MIN_MEMORY_LIMIT: &str = "256M";
pub const DEFAULT_RECOMMENDED_MEMORY_LIMIT: &str = "512M";
pub const DEFAULT_MIN_DISK_FREE: &str = "64M";
pub const DEFAULT_RECOMMENDED_DISK_FREE: &str = "1G";

/// Measured value as reported by the probe (or injected by a caller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Bytes(u64),
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    values: BTreeMap<String, EnvValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: EnvValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: EnvValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.values.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Threshold {
    pub minimum: u64,
    pub recommended: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub memory_limit: Threshold,
    pub disk_free: Threshold,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            memory_limit: Threshold {
                minimum: 256 * MIB,
                recommended: 512 * MIB,
            },
            disk_free: Threshold {
                minimum: 64 * MIB,
                recommended: GIB,
            },
        }
    }
}

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Compares a measured value against its thresholds.
///
/// Below `minimum` blocks installation, below `recommended` warns. A value equal
/// to a threshold satisfies it.
pub fn check(name: &str, limit_value: u64, recommended_value: u64, minimum_value: u64) -> Finding {
    let current = format_size(limit_value);
    if limit_value < minimum_value {
        return Finding::blocking(
            name,
            format!(
                "{name} が最小要件 {} 未満です（現在: {current}）",
                format_size(minimum_value)
            ),
        );
    }
    if limit_value < recommended_value {
        return Finding::warning(
            name,
            format!(
                "{name} が推奨値 {} 未満です（現在: {current}）",
                format_size(recommended_value)
            ),
        );
    }
    Finding::ok(name, format!("{name} は要件を満たしています（現在: {current}）"))
}

/// Runs every requirement check in a fixed order.
pub fn check_requirements(env: &Environment, thresholds: &Thresholds) -> Vec<Finding> {
    let mut out = vec![
        threshold_finding(env, MEMORY_LIMIT, thresholds.memory_limit),
        threshold_finding(env, DISK_FREE, thresholds.disk_free),
        writable_finding(env),
    ];
    out.extend(local_config_finding(env));
    out
}

fn threshold_finding(env: &Environment, name: &str, threshold: Threshold) -> Finding {
    match measured_bytes(env.get(name)) {
        Ok(value) => check(name, value, threshold.recommended, threshold.minimum),
        Err(reason) => Finding::blocking(name, format!("{name} を取得できませんでした: {reason}")),
    }
}

fn writable_finding(env: &Environment) -> Finding {
    match env.get(CONFIG_DIR_WRITABLE) {
        Some(EnvValue::Flag(true)) => Finding::ok(
            CONFIG_DIR_WRITABLE,
            "設定ディレクトリに書き込みできます",
        ),
        Some(EnvValue::Flag(false)) => Finding::blocking(
            CONFIG_DIR_WRITABLE,
            "設定ディレクトリに書き込みできません（権限を確認してください）",
        ),
        Some(other) => Finding::blocking(
            CONFIG_DIR_WRITABLE,
            format!("{CONFIG_DIR_WRITABLE} の値が不正です: {other:?}"),
        ),
        None => Finding::blocking(
            CONFIG_DIR_WRITABLE,
            "設定ディレクトリの書き込み可否を確認できませんでした",
        ),
    }
}

fn local_config_finding(env: &Environment) -> Option<Finding> {
    match env.get(LOCAL_CONFIG_EXISTS)? {
        EnvValue::Flag(true) => Some(Finding::warning(
            "local_config",
            "ローカル設定が既に存在します（install モードでは続行できません。reinstall を使用してください）",
        )),
        EnvValue::Flag(false) => Some(Finding::ok("local_config", "ローカル設定はまだ存在しません")),
        other => Some(Finding::blocking(
            "local_config",
            format!("{LOCAL_CONFIG_EXISTS} の値が不正です: {other:?}"),
        )),
    }
}

fn measured_bytes(value: Option<&EnvValue>) -> std::result::Result<u64, String> {
    match value {
        Some(EnvValue::Bytes(n)) => Ok(*n),
        Some(EnvValue::Text(s)) => parse_size(s).map_err(|e| e.to_string()),
        Some(EnvValue::Flag(b)) => Err(format!("数値ではありません: {b}")),
        None => Err("値がありません".to_string()),
    }
}

/// Parses sizes such as `512M`, `1g`, `65536` or `-1` (unlimited).
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("サイズが空です"));
    }
    if s == "-1" {
        return Ok(u64::MAX);
    }

    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&s[..s.len() - 1], KIB),
        Some('m') => (&s[..s.len() - 1], MIB),
        Some('g') => (&s[..s.len() - 1], GIB),
        _ => (s, 1),
    };
    let n = digits
        .trim()
        .parse::<u64>()
        .map_err(|_| anyhow!("サイズが不正です: {s}（例: 512M / 1G / 65536 / -1）"))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| anyhow!("サイズが大きすぎます: {s}"))
}

/// Inverse of [`parse_size`] for display; falls back to bytes when not a whole unit.
pub fn format_size(bytes: u64) -> String {
    if bytes == u64::MAX {
        return "無制限".to_string();
    }
    if bytes >= GIB && bytes % GIB == 0 {
        return format!("{}G", bytes / GIB);
    }
    if bytes >= MIB && bytes % MIB == 0 {
        return format!("{}M", bytes / MIB);
    }
    if bytes >= KIB && bytes % KIB == 0 {
        return format!("{}K", bytes / KIB);
    }
    bytes.to_string()
}
