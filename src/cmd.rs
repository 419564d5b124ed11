use std::{
    io,
    process::{Command, Stdio},
};

use crate::error::InstallerError;

/// Exit status and output of one shell invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Everything the command printed, for showing to the operator.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(err);
        }
        text
    }
}

/// Runs command text. `env` carries secret values the command refers to as
/// `$NAME`; they never appear in the text itself.
pub trait ShellRunner {
    fn run(&mut self, command: &str, env: &[(&str, &str)]) -> Result<CommandOutput, InstallerError>;
}

fn not_found_or_io(program: &str, err: io::Error) -> InstallerError {
    if err.kind() == io::ErrorKind::NotFound {
        InstallerError::CommandNotFound(program.to_string())
    } else {
        InstallerError::Io(err)
    }
}

/// Runs each command with `bash -c`, output captured, stdin closed so a
/// command that unexpectedly prompts fails instead of hanging.
#[derive(Debug, Default)]
pub struct Bash;

impl ShellRunner for Bash {
    fn run(&mut self, command: &str, env: &[(&str, &str)]) -> Result<CommandOutput, InstallerError> {
        let output = Command::new("bash")
            .arg("-c")
            .arg(command)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| not_found_or_io("bash", e))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records commands and replays canned results in order; anything past
    /// the script succeeds with no output.
    #[derive(Debug, Default)]
    pub(crate) struct FakeShell {
        pub(crate) ran: Vec<String>,
        /// Environment handed to each command, in the same order as `ran`.
        pub(crate) envs: Vec<Vec<(String, String)>>,
        pub(crate) replies: Vec<CommandOutput>,
    }

    impl FakeShell {
        pub(crate) fn replying(replies: Vec<CommandOutput>) -> Self {
            FakeShell {
                replies,
                ..Default::default()
            }
        }
    }

    impl ShellRunner for FakeShell {
        fn run(&mut self, command: &str, env: &[(&str, &str)]) -> Result<CommandOutput, InstallerError> {
            self.ran.push(command.to_string());
            self.envs
                .push(env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
            if self.replies.is_empty() {
                return Ok(CommandOutput {
                    code: Some(0),
                    ..Default::default()
                });
            }
            Ok(self.replies.remove(0))
        }
    }

    pub(crate) fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn combined_joins_streams() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "a\n".into(),
            stderr: "b\n".into(),
        };
        assert_eq!(out.combined(), "a\nb");
        assert!(!out.success());
        assert_eq!(ok("").combined(), "");
    }

    #[test]
    fn bash_captures_streams_and_code() {
        let out = Bash.run("printf out; printf err >&2; exit 3", &[]).unwrap();
        assert_eq!(out.stdout, "out");
        assert_eq!(out.stderr, "err");
        assert_eq!(out.code, Some(3));
    }

    #[test]
    fn bash_expands_env_values_verbatim() {
        for value in ["pa$$word", "a\"b", "back`id`tick", "x$(echo INJECTED)y", "a\\b c"] {
            let out = Bash
                .run(r#"printf '%s' "$LUKS_PASSPHRASE""#, &[("LUKS_PASSPHRASE", value)])
                .unwrap();
            assert_eq!(out.stdout, value);
        }
    }

    #[test]
    fn bash_gets_no_stdin() {
        let out = Bash.run("cat", &[]).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "");
    }
}
