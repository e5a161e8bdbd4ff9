use anyhow::{anyhow, Result};
use tracing::debug;

/// Raw result of a spawned process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CmdResult {
  pub stdout: String,
  pub stderr: String,
  /// Exit code; `-1` when the process was terminated by a signal
  pub status: i32,
}

/// Execute a command and capture its output
pub fn cmd_exec(cmd: &str, args: &[&str]) -> Result<CmdResult> {
  debug!("Executing {cmd} {}", args.join(" "));
  let output = std::process::Command::new(cmd).args(args).output();

  match output {
    Ok(output) => Ok(CmdResult {
      stdout: String::from_utf8_lossy(&output.stdout).to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).to_string(),
      status: output.status.code().unwrap_or(-1),
    }),
    Err(e) => Err(anyhow!("Error executing command {cmd}: {e}")),
  }
}

/// Execute a script through the local shell
///
/// Scripts may contain pipes, backticks and environment expansion (e.g. `KUBECONFIG=$KUBECONFIG kubectl ...`)
pub fn shell_exec(script: &str) -> Result<CmdResult> {
  cmd_exec("sh", &["-c", script])
}

/// Left-justify `text` to `width` characters using `fill`
///
/// Text longer than `width` is returned unchanged
pub fn ljust(text: &str, width: usize, fill: char) -> String {
  let len = text.chars().count();
  if len >= width {
    return text.to_string();
  }

  let mut padded = String::with_capacity(width);
  padded.push_str(text);
  padded.extend(std::iter::repeat(fill).take(width - len));
  padded
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;

  #[rstest]
  #[case("abc", 6, '.', "abc...")]
  #[case("abc", 3, '.', "abc")]
  #[case("abcdef", 3, '.', "abcdef")]
  #[case("", 2, ' ', "  ")]
  fn ljust_test(#[case] text: &str, #[case] width: usize, #[case] fill: char, #[case] expected: &str) {
    assert_eq!(ljust(text, width, fill), expected);
  }

  #[test]
  fn it_captures_shell_output() {
    let result = shell_exec("echo out; echo err >&2; exit 3").unwrap();
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert_eq!(result.status, 3);
  }
}
