use std::io::{self, BufRead, Write};

use anyhow::Result;

use crate::wizard::{FieldSpec, FieldValues, StepDefinition};

/// Prompts for every field of `step` on stderr and reads answers from stdin.
///
/// Returns `None` when stdin is closed before the step is complete.
pub(crate) fn prompt_step(step: &StepDefinition) -> Result<Option<FieldValues>> {
    let mut stdin = io::stdin().lock();
    let mut stderr = io::stderr().lock();
    read_step(step, &mut stdin, &mut stderr, true)
}

/// With `hide_secrets`, terminal echo is switched off while a secret field is
/// read from stdin. Input that is not a terminal is read as is.
pub(crate) fn read_step(
    step: &StepDefinition,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
    hide_secrets: bool,
) -> Result<Option<FieldValues>> {
    writeln!(out, "== {}（{}）", step.title, step.id)?;

    let mut values = FieldValues::new();
    for field in &step.fields {
        let guard = if hide_secrets && field.secret {
            EchoGuard::disable_stdin()
        } else {
            None
        };
        write!(out, "{}", field_prompt(field, guard.is_some()))?;
        out.flush()?;

        let mut line = String::new();
        let n = input.read_line(&mut line)?;
        if guard.is_some() {
            drop(guard);
            writeln!(out)?;
        }
        if n == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.trim().is_empty() {
            values.insert(field.key.clone(), line.to_string());
        }
    }
    Ok(Some(values))
}

fn field_prompt(field: &FieldSpec, hidden: bool) -> String {
    let mut prompt = field.label.clone();
    if field.required {
        prompt.push_str(" *");
    }
    if let Some(default) = &field.default {
        prompt.push_str(&format!(" [既定: {default}]"));
    }
    if field.secret && hidden {
        prompt.push_str("（入力内容は表示されません）");
    } else if field.secret {
        prompt.push_str("（入力内容は表示されます）");
    }
    prompt.push_str(": ");
    prompt
}

/// Restores the saved terminal attributes on drop.
struct EchoGuard {
    #[cfg(unix)]
    fd: libc::c_int,
    #[cfg(unix)]
    saved: libc::termios,
}

impl EchoGuard {
    fn disable_stdin() -> Option<Self> {
        #[cfg(unix)]
        {
            Self::disable(libc::STDIN_FILENO)
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    /// Returns `None` when `fd` is not a terminal.
    #[cfg(unix)]
    fn disable(fd: libc::c_int) -> Option<Self> {
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return None;
        }
        let mut hidden = saved;
        hidden.c_lflag &= !libc::ECHO;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &hidden) } != 0 {
            return None;
        }
        Some(Self { fd, saved })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        let _ = unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::Rule;

    fn step() -> StepDefinition {
        StepDefinition::new("user", "管理者ユーザー")
            .field(FieldSpec::required("username", "ユーザー名"))
            .field(
                FieldSpec::optional("port", "ポート")
                    .default_value("3306")
                    .rule(Rule::Integer { min: 1, max: 65535 }),
            )
            .field(FieldSpec::required("password", "パスワード").secret())
    }

    #[test]
    fn blank_answers_are_left_out() {
        let mut input = io::Cursor::new("admin\n\nsecret1\n");
        let mut out = Vec::new();
        let values = read_step(&step(), &mut input, &mut out, false).unwrap().unwrap();
        assert_eq!(values.get("username").map(String::as_str), Some("admin"));
        assert!(!values.contains_key("port"));
        assert_eq!(values.get("password").map(String::as_str), Some("secret1"));

        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("ユーザー名 *: "));
        assert!(shown.contains("ポート [既定: 3306]: "));
        assert!(shown.contains("パスワード *（入力内容は表示されます）: "));
    }

    #[test]
    fn secret_prompt_says_when_input_is_hidden() {
        let field = FieldSpec::required("password", "パスワード").secret();
        assert_eq!(field_prompt(&field, true), "パスワード *（入力内容は表示されません）: ");
        let plain = FieldSpec::required("username", "ユーザー名");
        assert_eq!(field_prompt(&plain, true), "ユーザー名 *: ");
    }

    #[cfg(unix)]
    #[test]
    fn echo_is_left_alone_off_a_terminal() {
        use std::os::unix::io::AsRawFd;

        let path = std::env::temp_dir().join(format!("setupwiz-echo-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        assert!(EchoGuard::disable(file.as_raw_fd()).is_none());
        drop(file);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn closed_stdin_aborts() {
        let mut input = io::Cursor::new("admin\n");
        let mut out = Vec::new();
        assert!(read_step(&step(), &mut input, &mut out, false).unwrap().is_none());
    }

    #[test]
    fn crlf_is_stripped() {
        let mut input = io::Cursor::new("admin\r\n3307\r\npw1234\r\n");
        let mut out = Vec::new();
        let values = read_step(&step(), &mut input, &mut out, false).unwrap().unwrap();
        assert_eq!(values["port"], "3307");
        assert_eq!(values["password"], "pw1234");
    }
}
