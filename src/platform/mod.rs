use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

use crate::core::OsInfo;
use crate::requirements::{self, EnvValue, Environment};

pub const MEMORY_LIMIT_OVERRIDE_ENV: &str = "SETUPWIZ_MEMORY_LIMIT";
pub const DISK_FREE_OVERRIDE_ENV: &str = "SETUPWIZ_DISK_FREE";

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
}

pub fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("プロセス起動に失敗しました: {cmd}"))?;

    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("プロセス待機に失敗しました: {cmd}"))?
    {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("タイムアウトしました（{timeout:?}）: {cmd}"));
        }
    };

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
    })
}

pub fn effective_home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("環境変数 HOME が設定されていません"))
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub local_config_path: PathBuf,
    pub timeout: Duration,
}

/// Measures everything the requirement checks look at.
///
/// Sources that cannot be read are left out; the checker reports them as
/// blocking.
pub fn probe_environment(opts: &ProbeOptions) -> Environment {
    let mut env = Environment::new();

    match non_empty_env(MEMORY_LIMIT_OVERRIDE_ENV) {
        Some(v) => env.insert(requirements::MEMORY_LIMIT, EnvValue::Text(v)),
        None => {
            if let Some(limit) = memory_limit_bytes(opts.timeout) {
                env.insert(requirements::MEMORY_LIMIT, EnvValue::Bytes(limit));
            }
        }
    }

    let config_dir = opts
        .local_config_path
        .parent()
        .and_then(nearest_existing_ancestor);

    match non_empty_env(DISK_FREE_OVERRIDE_ENV) {
        Some(v) => env.insert(requirements::DISK_FREE, EnvValue::Text(v)),
        None => {
            if let Some(free) = config_dir.as_deref().and_then(disk_free_bytes) {
                env.insert(requirements::DISK_FREE, EnvValue::Bytes(free));
            }
        }
    }

    if let Some(dir) = config_dir.as_deref() {
        env.insert(
            requirements::CONFIG_DIR_WRITABLE,
            EnvValue::Flag(is_writable(dir)),
        );
    }

    env.insert(
        requirements::LOCAL_CONFIG_EXISTS,
        EnvValue::Flag(opts.local_config_path.exists()),
    );

    let os = os_info(opts.timeout);
    env.insert(
        requirements::OS,
        EnvValue::Text(format!("{} {}", os.name, os.version)),
    );

    env
}

fn non_empty_env(key: &str) -> Option<String> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    Some(v.to_string())
}

/// Smallest of the address-space rlimit, the cgroup limit and physical memory.
///
/// A source that reads as unlimited counts as `u64::MAX`. `None` means no
/// source could be read at all.
pub fn memory_limit_bytes(timeout: Duration) -> Option<u64> {
    [
        rlimit_address_space(),
        cgroup_memory_max(),
        physical_memory_bytes(timeout),
    ]
    .into_iter()
    .flatten()
    .min()
}

#[cfg(unix)]
fn rlimit_address_space() -> Option<u64> {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut rl) };
    if rc != 0 {
        return None;
    }
    Some(rlimit_bytes(rl.rlim_cur))
}

#[cfg(unix)]
fn rlimit_bytes(cur: libc::rlim_t) -> u64 {
    if cur == libc::RLIM_INFINITY {
        return u64::MAX;
    }
    cur as u64
}

#[cfg(not(unix))]
fn rlimit_address_space() -> Option<u64> {
    None
}

fn cgroup_memory_max() -> Option<u64> {
    if let Ok(s) = std::fs::read_to_string("/sys/fs/cgroup/memory.max") {
        return parse_cgroup_limit(&s);
    }
    let s = std::fs::read_to_string("/sys/fs/cgroup/memory/memory.limit_in_bytes").ok()?;
    parse_cgroup_limit(&s)
}

fn parse_cgroup_limit(s: &str) -> Option<u64> {
    let s = s.trim();
    if s == "max" {
        return Some(u64::MAX);
    }
    let n = s.parse::<u64>().ok()?;
    // cgroup v1 reports "unlimited" as a page-aligned value near i64::MAX.
    if n >= (1u64 << 60) {
        return Some(u64::MAX);
    }
    Some(n)
}

#[cfg(target_os = "macos")]
fn physical_memory_bytes(timeout: Duration) -> Option<u64> {
    let output = run_command("sysctl", &["-n", "hw.memsize"], timeout).ok()?;
    if output.exit_code != 0 {
        return None;
    }
    output.stdout.trim().parse::<u64>().ok()
}

#[cfg(not(target_os = "macos"))]
fn physical_memory_bytes(_timeout: Duration) -> Option<u64> {
    let s = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&s)
}

#[cfg(any(not(target_os = "macos"), test))]
fn parse_meminfo_total(s: &str) -> Option<u64> {
    let line = s.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb = line
        .trim_start_matches("MemTotal:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse::<u64>()
        .ok()?;
    kb.checked_mul(1024)
}

fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
}

#[cfg(unix)]
fn disk_free_bytes(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return None;
    }
    Some((st.f_bavail as u64).saturating_mul(st.f_frsize as u64))
}

#[cfg(not(unix))]
fn disk_free_bytes(_path: &Path) -> Option<u64> {
    None
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

pub fn os_info(timeout: Duration) -> OsInfo {
    let field = |flag: &str| -> String {
        match run_command("uname", &[flag], timeout) {
            Ok(output) if output.exit_code == 0 && !output.stdout.trim().is_empty() => {
                output.stdout.trim().to_string()
            }
            _ => "unknown".to_string(),
        }
    };
    OsInfo {
        name: field("-s"),
        version: field("-r"),
    }
}
