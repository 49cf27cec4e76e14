use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

fn check_with_memory(home: &Path, memory_limit: &str) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_setupwiz"));
    cmd.env("HOME", home);
    cmd.env_remove("SETUPWIZ_CONFIG");
    cmd.env_remove("SETUPWIZ_UI_COLOR");
    cmd.env_remove("SETUPWIZ_UI_MAX_TABLE_ROWS");
    cmd.env_remove("SETUPWIZ_REQUIREMENTS_MIN_MEMORY_LIMIT");
    cmd.env_remove("SETUPWIZ_REQUIREMENTS_RECOMMENDED_MEMORY_LIMIT");
    cmd.env_remove("SETUPWIZ_INSTALL_LOCAL_CONFIG_PATH");
    cmd.env_remove("SETUPWIZ_INSTALL_MODE");
    cmd.env("SETUPWIZ_MEMORY_LIMIT", memory_limit);
    cmd.env("SETUPWIZ_DISK_FREE", "10G");
    cmd.args(["--json", "check"]);
    cmd.output().expect("run setupwiz")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("setupwiz-req-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn memory_finding(out: &std::process::Output) -> serde_json::Value {
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    v["findings"]
        .as_array()
        .expect("findings array")
        .iter()
        .find(|f| f["name"] == "memory_limit")
        .cloned()
        .expect("memory_limit finding")
}

const MIB: u64 = 1024 * 1024;

#[test]
fn memory_just_below_recommended_warns() {
    let home = make_temp_home();
    let out = check_with_memory(&home, &(512 * MIB - 1).to_string());
    assert!(out.status.success());

    let f = memory_finding(&out);
    assert_eq!(f["severity"], "WARNING");
    assert!(f["message"].as_str().unwrap().contains("512M"), "{f}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn memory_above_recommended_is_ok() {
    let home = make_temp_home();
    let out = check_with_memory(&home, &(512 * MIB + 1).to_string());
    assert!(out.status.success());
    assert_eq!(memory_finding(&out)["severity"], "OK");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn memory_equal_to_minimum_is_not_blocking() {
    let home = make_temp_home();
    let out = check_with_memory(&home, "256M");
    assert!(out.status.success());
    assert_eq!(memory_finding(&out)["severity"], "WARNING");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn memory_below_minimum_blocks() {
    let home = make_temp_home();
    let out = check_with_memory(&home, "255M");
    assert_eq!(out.status.code(), Some(10));
    assert_eq!(memory_finding(&out)["severity"], "BLOCKING");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unlimited_memory_is_ok() {
    let home = make_temp_home();
    let out = check_with_memory(&home, "-1");
    assert!(out.status.success());
    assert_eq!(memory_finding(&out)["severity"], "OK");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unparseable_memory_blocks() {
    let home = make_temp_home();
    let out = check_with_memory(&home, "plenty");
    assert_eq!(out.status.code(), Some(10));
    assert_eq!(memory_finding(&out)["severity"], "BLOCKING");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn findings_keep_fixed_order() {
    let home = make_temp_home();
    let out = check_with_memory(&home, "1G");
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    let names: Vec<&str> = v["findings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["memory_limit", "disk_free", "config_dir_writable", "local_config"]
    );
    let _ = std::fs::remove_dir_all(&home);
}
