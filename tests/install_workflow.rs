use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn setupwiz_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_setupwiz"));
    cmd.env("HOME", home);
    cmd.env_remove("SETUPWIZ_CONFIG");
    cmd.env_remove("SETUPWIZ_UI_COLOR");
    cmd.env_remove("SETUPWIZ_UI_MAX_TABLE_ROWS");
    cmd.env_remove("SETUPWIZ_REQUIREMENTS_MIN_MEMORY_LIMIT");
    cmd.env_remove("SETUPWIZ_REQUIREMENTS_RECOMMENDED_MEMORY_LIMIT");
    cmd.env_remove("SETUPWIZ_INSTALL_LOCAL_CONFIG_PATH");
    cmd.env_remove("SETUPWIZ_INSTALL_MODE");
    cmd.env("SETUPWIZ_MEMORY_LIMIT", "1G");
    cmd.env("SETUPWIZ_DISK_FREE", "10G");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    setupwiz_cmd(home).args(args).output().expect("run setupwiz")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home =
        std::env::temp_dir().join(format!("setupwiz-install-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_answers(home: &Path) -> PathBuf {
    let path = home.join("answers.toml");
    std::fs::write(
        &path,
        br#"
[check]

[doctrine]
host = "db.internal"
port = 3307
name = "app"
user = "app"
password = "dbpass"
backup_tables = false

[user]
username = "admin"
password = "maut!cR000cks"
firstname = "Ada"
lastname = "Admin"
email = "admin@example.com"
"#,
    )
    .expect("write answers");
    path
}

fn log_files(home: &Path) -> Vec<PathBuf> {
    let dir = home.join(".config/setupwiz/logs");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return vec![];
    };
    let mut out: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("install-") && n.ends_with(".json"))
        })
        .collect();
    out.sort();
    out
}

#[test]
fn install_from_answers_writes_local_config() {
    let home = make_temp_home();
    let answers = write_answers(&home);

    let out = run(&home, &["install", "--answers", answers.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("is installed"), "{stdout}");
    assert!(stdout.contains("インストールされました"), "{stdout}");

    let local = home.join(".config/setupwiz/local.toml");
    let body = std::fs::read_to_string(&local).expect("read local config");
    assert!(body.contains("admin@example.com"), "{body}");
    assert!(body.contains("db.internal"), "{body}");
    assert!(body.contains("port = 3307"), "{body}");
    assert!(!body.contains("maut!cR000cks"), "{body}");

    let logs = log_files(&home);
    assert_eq!(logs.len(), 1);
    let log = std::fs::read_to_string(&logs[0]).expect("read log");
    let v: serde_json::Value = serde_json::from_str(&log).expect("parse log");
    assert_eq!(v["status"], "ok");
    assert_eq!(v["mode"], "install");
    assert_eq!(
        v["steps_completed"],
        serde_json::json!(["check", "doctrine", "user"])
    );
    assert_eq!(v["values"]["user.password"], "********");
    assert_eq!(v["values"]["doctrine.password"], "********");
    assert_eq!(v["values"]["user.email"], "admin@example.com");
    assert!(!log.contains("maut!cR000cks"));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn install_json_prints_summary() {
    let home = make_temp_home();
    let answers = write_answers(&home);

    let out = run(
        &home,
        &["--json", "install", "--answers", answers.to_str().unwrap()],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    assert_eq!(v["mode"], "install");
    assert_eq!(v["admin_username"], "admin");
    assert_eq!(v["admin_email"], "admin@example.com");
    assert_eq!(v["db_host"], "db.internal");
    assert_eq!(v["db_name"], "app");
    assert_eq!(v["written"], true);
    assert!(v.get("backup_path").is_none());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn reinstall_backs_up_previous_config() {
    let home = make_temp_home();
    let answers = write_answers(&home);
    let local = home.join(".config/setupwiz/local.toml");
    std::fs::create_dir_all(local.parent().unwrap()).unwrap();
    std::fs::write(&local, "installed_at = \"earlier\"\n").unwrap();

    let out = run(
        &home,
        &[
            "install",
            "--mode",
            "reinstall",
            "--answers",
            answers.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("is installed"));

    let backup = home.join(".config/setupwiz/local.toml.bak");
    assert_eq!(
        std::fs::read_to_string(&backup).expect("read backup"),
        "installed_at = \"earlier\"\n"
    );
    assert!(std::fs::read_to_string(&local).unwrap().contains("mode = \"reinstall\""));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn dry_run_validates_but_writes_no_config() {
    let home = make_temp_home();
    let answers = write_answers(&home);

    let out = run(
        &home,
        &["--dry-run", "install", "--answers", answers.to_str().unwrap()],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("dry-run"), "{stdout}");
    assert!(!home.join(".config/setupwiz/local.toml").exists());

    let logs = log_files(&home);
    assert_eq!(logs.len(), 1);
    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&logs[0]).unwrap()).unwrap();
    assert_eq!(v["dry_run"], true);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_required_field_reports_only_that_field() {
    let home = make_temp_home();
    let answers = home.join("answers.toml");
    std::fs::write(
        &answers,
        br#"
[doctrine]
host = "db.internal"
name = "app"
user = "app"

[user]
username = "admin"
password = "maut!cR000cks"
firstname = "Ada"
lastname = "Admin"
email = ""
"#,
    )
    .unwrap();

    let out = run(&home, &["install", "--answers", answers.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("（email）"), "{stderr}");
    assert!(!stderr.contains("（username）"), "{stderr}");
    assert!(!home.join(".config/setupwiz/local.toml").exists());
    assert!(log_files(&home).is_empty());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn steps_json_lists_wizard_in_order() {
    let home = make_temp_home();
    let out = run(&home, &["--json", "steps"]);
    assert!(out.status.success());

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse json");
    let ids: Vec<&str> = v
        .as_array()
        .expect("steps array")
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["check", "doctrine", "user"]);
    assert_eq!(v[0]["next_step_id"], "doctrine");
    assert!(v[2].get("next_step_id").is_none());

    let user_fields: Vec<&str> = v[2]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["key"].as_str().unwrap())
        .collect();
    assert_eq!(
        user_fields,
        vec!["username", "password", "firstname", "lastname", "email"]
    );

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn install_shows_warnings_without_verbose() {
    let home = make_temp_home();
    let answers = write_answers(&home);

    let out = setupwiz_cmd(&home)
        .env("SETUPWIZ_MEMORY_LIMIT", "300M")
        .args(["install", "--answers", answers.to_str().unwrap()])
        .output()
        .expect("run setupwiz");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("推奨値 512M"), "{stdout}");
    assert!(stdout.contains("is installed"), "{stdout}");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn install_stays_terse_when_requirements_pass() {
    let home = make_temp_home();
    let answers = write_answers(&home);

    let out = setupwiz_cmd(&home)
        .env("SETUPWIZ_MEMORY_LIMIT", "513M")
        .args(["install", "--answers", answers.to_str().unwrap()])
        .output()
        .expect("run setupwiz");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(!stdout.contains("512M"), "{stdout}");
    assert!(!stdout.contains("確認結果"), "{stdout}");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn quiet_install_hides_warnings() {
    let home = make_temp_home();
    let answers = write_answers(&home);

    let out = setupwiz_cmd(&home)
        .env("SETUPWIZ_MEMORY_LIMIT", "300M")
        .args(["--quiet", "install", "--answers", answers.to_str().unwrap()])
        .output()
        .expect("run setupwiz");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(out.stdout.is_empty(), "{}", String::from_utf8_lossy(&out.stdout));

    let _ = std::fs::remove_dir_all(&home);
}
