use std::{fmt, path::PathBuf};

use tracing::debug;

use crate::{
  config::SshConfig,
  utils::{self, CmdResult},
};

/// Where a command is executed
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
  /// The machine running the checker (no SSH)
  Local,
  /// A cluster node reached over SSH
  Host(String),
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Local => write!(f, "local"),
      Self::Host(host) => write!(f, "{host}"),
    }
  }
}

/// Classified result of running a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
  /// The command succeeded and produced (normalized) output
  Success(String),
  /// The command succeeded without producing output
  Empty,
  /// The command failed; carries the reason (usually stderr)
  Error(String),
}

impl Outcome {
  /// Output text, empty for `Empty` and `Error`
  pub fn text(&self) -> &str {
    match self {
      Self::Success(text) => text,
      _ => "",
    }
  }
}

/// SSH authentication, selected once per run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SshAuth {
  /// `ssh -i <key> <user>@<host>`
  Key { username: String, key: PathBuf },
  /// `ssh <host>`, relying on the agent / ssh_config for the identity and user
  Agent,
  /// `ssh <user>@<host>`
  User { username: String },
}

impl SshAuth {
  pub fn from_config(ssh: &SshConfig) -> Self {
    match &ssh.key {
      Some(key) => Self::Key {
        username: ssh.username.clone(),
        key: key.clone(),
      },
      None if ssh.skip_username => Self::Agent,
      None => Self::User {
        username: ssh.username.clone(),
      },
    }
  }

  /// Arguments passed to `ssh` to run `command` on `host`
  pub fn args(&self, host: &str, command: &str) -> Vec<String> {
    let mut args = vec!["-q".to_string()];

    match self {
      Self::Key { username, key } => {
        args.push("-i".to_string());
        args.push(key.display().to_string());
        args.push(format!("{username}@{host}"));
      }
      Self::Agent => args.push(host.to_string()),
      Self::User { username } => args.push(format!("{username}@{host}")),
    }

    args.push(command.to_string());
    args
  }
}

/// Runs commands on targets
///
/// Trait wrapper to support testing
pub trait Executor {
  /// Run `command` on `target`, trimming trailing whitespace from the output when `strip` is set
  fn execute(&self, target: &Target, command: &str, strip: bool) -> Outcome;
}

/// Executes commands through the local shell or over SSH
#[derive(Debug)]
pub struct ShellExecutor {
  auth: SshAuth,
}

impl ShellExecutor {
  pub fn new(auth: SshAuth) -> Self {
    Self { auth }
  }
}

impl Executor for ShellExecutor {
  fn execute(&self, target: &Target, command: &str, strip: bool) -> Outcome {
    let result = match target {
      Target::Local => utils::shell_exec(command),
      Target::Host(host) => {
        let args = self.auth.args(host, command);
        let args = args.iter().map(String::as_str).collect::<Vec<&str>>();
        utils::cmd_exec("ssh", &args)
      }
    };

    let outcome = match result {
      Ok(result) => match (target, classify(&result, command, strip)) {
        (Target::Host(_), Outcome::Error(reason)) if result.status == 255 && result.stderr.trim().is_empty() => {
          Outcome::Error(format!("SSH error occurred? ({reason})"))
        }
        (_, outcome) => outcome,
      },
      Err(e) => Outcome::Error(e.to_string()),
    };
    debug!("{target}: {outcome:?}");

    outcome
  }
}

/// Classify a finished process
///
/// - exit 0 is a success
/// - exit 1 with empty stdout and stderr is a success without output (e.g. `grep` without a match)
/// - exit 1 with stderr, or any other exit code, is an error carrying stderr
/// - exit 1 with stdout is an error, the command's output cannot be trusted
pub fn classify(result: &CmdResult, command: &str, strip: bool) -> Outcome {
  let stderr = result.stderr.trim_end();

  match result.status {
    0 => {}
    1 => {
      if !result.stdout.trim_end().is_empty() {
        return Outcome::Error(format!("unexpected output with exit status 1 from command: {command}"));
      }
      if !stderr.is_empty() {
        return Outcome::Error(stderr.to_string());
      }
    }
    status => {
      return match stderr.is_empty() {
        true => Outcome::Error(format!("command exited with status {status}")),
        false => Outcome::Error(stderr.to_string()),
      }
    }
  }

  let text = match strip {
    true => result.stdout.trim_end(),
    false => result.stdout.as_str(),
  };

  match text.is_empty() {
    true => Outcome::Empty,
    false => Outcome::Success(text.to_string()),
  }
}
