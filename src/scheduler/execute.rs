//! Spawning and waiting on the supervised command.

use crate::error::{Result, SchedError};
use crate::exit_codes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};

/// Contents of `owner.json`: what the lock holder is running right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// The onelane process holding the lock.
    pub pid: u32,
    /// The supervised command's process, once spawned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_pid: Option<u32>,
    pub command: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
}

/// Human-readable form of `argv`.
pub fn display_command(argv: &[String]) -> String {
    match argv {
        [single] => single.clone(),
        _ => shell_words::join(argv),
    }
}

/// Words used to classify `argv`: a single argument is a shell command
/// string and is split the way the shell would.
pub fn command_words(argv: &[String]) -> Vec<String> {
    match argv {
        [single] => shell_words::split(single).unwrap_or_else(|_| vec![single.clone()]),
        _ => argv.to_vec(),
    }
}

/// Build the process for `argv`.
///
/// A single argument runs through `sh -c` so pipelines and redirections in
/// a quoted command string work. Several arguments run the program
/// directly.
pub fn build_command(argv: &[String], env: &[(String, String)], cwd: Option<&Path>) -> Result<Command> {
    let mut command = match argv {
        [] => return Err(SchedError::UserError("no command given".to_string())),
        [single] => {
            let mut command = Command::new("sh");
            command.arg("-c").arg(single);
            command
        }
        [program, args @ ..] => {
            let mut command = Command::new(program);
            command.args(args);
            command
        }
    };

    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    for (key, value) in env {
        command.env(key, value);
    }
    Ok(command)
}

pub fn spawn(command: &mut Command, display: &str) -> Result<Child> {
    command.spawn().map_err(|e| {
        SchedError::UserError(format!(
            "failed to execute '{}': {}\nFix: ensure the command is installed and in PATH.",
            display, e
        ))
    })
}

/// Exit code onelane reports for a finished command: its own code, or
/// `128 + N` when killed by signal N.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => exit_codes::from_signal(signal),
        (None, None) => exit_codes::USER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn run(argv: &[String]) -> i32 {
        let mut command = build_command(argv, &[], None).unwrap();
        exit_code_of(spawn(&mut command, "test").unwrap().wait().unwrap())
    }

    #[test]
    fn test_display_command() {
        assert_eq!(display_command(&argv(&["make test"])), "make test");
        assert_eq!(
            display_command(&argv(&["git", "commit", "-m", "a message"])),
            "git commit -m 'a message'"
        );
    }

    #[test]
    fn test_command_words() {
        assert_eq!(
            command_words(&argv(&["CARGO_TERM_COLOR=never cargo 'test'"])),
            argv(&["CARGO_TERM_COLOR=never", "cargo", "test"])
        );
        assert_eq!(command_words(&argv(&["git", "status"])), argv(&["git", "status"]));
    }

    #[test]
    fn test_exit_codes_pass_through() {
        assert_eq!(run(&argv(&["true"])), 0);
        assert_eq!(run(&argv(&["exit 7"])), 7);
        assert_eq!(run(&argv(&["sh", "-c", "exit 3"])), 3);
    }

    #[test]
    fn test_signal_exit_code() {
        assert_eq!(run(&argv(&["kill -TERM $$"])), 128 + 15);
    }

    #[test]
    fn test_env_is_applied() {
        let env = vec![("ONELANE_TEST_VAR".to_string(), "42".to_string())];
        let mut command =
            build_command(&argv(&["test \"$ONELANE_TEST_VAR\" = 42"]), &env, None).unwrap();
        assert!(command.status().unwrap().success());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(build_command(&[], &[], None).is_err());
    }

    #[test]
    fn test_missing_program() {
        let mut command = build_command(&argv(&["/nonexistent/tool", "x"]), &[], None).unwrap();
        let err = spawn(&mut command, "/nonexistent/tool x").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tool"));
    }
}
