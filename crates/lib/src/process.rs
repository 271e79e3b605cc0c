//! External process execution.
//!
//! Every adapter shells out through this module. Build paths use [`run`],
//! which never fails: a nonzero exit or a process that cannot start is folded
//! into a single [`Issue`]. Bundle paths use the blocking variants, because
//! packaging a deployable artifact must finish before the deploy continues.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::BuildError;
use crate::issue::Issue;

/// A fully determined external command: program, arguments and the
/// environment layered over the current process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
  pub command: String,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

impl CommandSpec {
  pub fn new(command: impl Into<String>) -> Self {
    Self {
      command: command.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  fn tokio_command(&self, cwd: &Path) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(&self.command);
    command
      .args(&self.args)
      .envs(&self.env)
      .current_dir(cwd)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    command
  }

  fn std_command(&self, cwd: &Path) -> std::process::Command {
    let mut command = std::process::Command::new(&self.command);
    command
      .args(&self.args)
      .envs(&self.env)
      .current_dir(cwd)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    command
  }
}

impl fmt::Display for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.command)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }
    Ok(())
  }
}

/// Exit status plus the combined stdout and stderr of a finished process.
#[derive(Debug)]
pub struct Captured {
  pub status: ExitStatus,
  pub output: String,
}

impl Captured {
  fn from_parts(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(stderr));
    Self { status, output }
  }

  pub fn success(&self) -> bool {
    self.status.success()
  }

  /// The captured output, or a description of the exit status when the
  /// process printed nothing.
  fn failure_message(&self, spec: &CommandSpec) -> String {
    if self.output.trim().is_empty() {
      format!("{} exited with {}", spec, self.status)
    } else {
      self.output.clone()
    }
  }
}

/// Spawn `spec` in `cwd` and wait for it, capturing all output.
pub async fn capture(spec: &CommandSpec, cwd: &Path) -> std::io::Result<Captured> {
  debug!(command = %spec, cwd = ?cwd, "spawning process");
  let output = spec.tokio_command(cwd).output().await?;
  Ok(Captured::from_parts(output.status, &output.stdout, &output.stderr))
}

/// Blocking counterpart of [`capture`].
pub fn capture_sync(spec: &CommandSpec, cwd: &Path) -> std::io::Result<Captured> {
  debug!(command = %spec, cwd = ?cwd, "spawning process (blocking)");
  let output = spec.std_command(cwd).output()?;
  Ok(Captured::from_parts(output.status, &output.stdout, &output.stderr))
}

/// Spawn `spec` and wait for it unless `cancel` fires first, in which case the
/// process is killed and whatever it printed so far is returned.
///
/// stdout and stderr are pumped into one shared buffer as they arrive, so the
/// relative order of the two streams is not preserved.
pub async fn capture_cancellable(
  spec: &CommandSpec,
  cwd: &Path,
  cancel: oneshot::Receiver<()>,
) -> std::io::Result<Captured> {
  debug!(command = %spec, cwd = ?cwd, "spawning cancellable process");
  let mut child = spec.tokio_command(cwd).kill_on_drop(true).spawn()?;

  let buffer = Arc::new(Mutex::new(Vec::new()));
  let pumps = [
    pump(child.stdout.take(), buffer.clone()),
    pump(child.stderr.take(), buffer.clone()),
  ];

  let (status, killed) = tokio::select! {
    status = child.wait() => (status?, false),
    Ok(()) = cancel => {
      debug!(command = %spec, "killing superseded process");
      let _ = child.start_kill();
      (child.wait().await?, true)
    }
  };

  for pump in pumps {
    // Grandchildren of a killed process may still hold the pipes open.
    if killed {
      pump.abort();
    }
    let _ = pump.await;
  }

  let output = match buffer.lock() {
    Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
    Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
  };
  Ok(Captured { status, output })
}

/// Drain `reader` into `buffer` on a background task until EOF.
pub(crate) fn pump<R>(reader: Option<R>, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let Some(mut reader) = reader else {
      return;
    };
    let mut chunk = [0u8; 4096];
    loop {
      match reader.read(&mut chunk).await {
        Ok(0) | Err(_) => break,
        Ok(n) => {
          if let Ok(mut buf) = buffer.lock() {
            buf.extend_from_slice(&chunk[..n]);
          }
        }
      }
    }
  })
}

/// Run a build command and report failure as issues.
///
/// # Arguments
///
/// * `spec` - The command to run
/// * `cwd` - Working directory for the process
/// * `failure_file` - File the aggregate issue is attached to, conventionally
///   `src_path + "/" + handler`
///
/// # Returns
///
/// An empty vector on a zero exit; otherwise exactly one issue whose message is
/// the whole captured output.
pub async fn run(spec: &CommandSpec, cwd: &Path, failure_file: &str) -> Vec<Issue> {
  info!(command = %spec, "running build command");
  let result = capture(spec, cwd).await;
  into_issues(spec, result, failure_file)
}

/// Blocking counterpart of [`run`].
pub fn run_sync(spec: &CommandSpec, cwd: &Path, failure_file: &str) -> Vec<Issue> {
  info!(command = %spec, "running build command (blocking)");
  let result = capture_sync(spec, cwd);
  into_issues(spec, result, failure_file)
}

fn into_issues(spec: &CommandSpec, result: std::io::Result<Captured>, failure_file: &str) -> Vec<Issue> {
  match result {
    Ok(captured) if captured.success() => Vec::new(),
    Ok(captured) => {
      debug!(command = %spec, status = %captured.status, "build command failed");
      vec![Issue::in_file(failure_file, captured.failure_message(spec))]
    }
    Err(e) => vec![Issue::in_file(failure_file, format!("failed to start {}: {}", spec.command, e))],
  }
}

/// Run a packaging command, blocking, and fail hard on a nonzero exit.
///
/// Returns the captured output on success.
pub fn run_checked_sync(spec: &CommandSpec, cwd: &Path) -> Result<String, BuildError> {
  info!(command = %spec, "running packaging command");
  let captured = capture_sync(spec, cwd)?;
  if !captured.success() {
    return Err(BuildError::Toolchain {
      command: spec.to_string(),
      code: captured.status.code(),
      output: captured.output,
    });
  }
  Ok(captured.output)
}

/// Run user command hooks for a bundling stage through the platform shell.
///
/// Commands are joined with `&&` so the first failure stops the chain.
pub fn run_hooks_sync(commands: &[String], cwd: &Path, stage: &str) -> Result<(), BuildError> {
  if commands.is_empty() {
    return Ok(());
  }

  let script = commands.join(" && ");
  info!(stage = %stage, script = %script, "running command hooks");

  let captured = capture_sync(&shell_command(&script), cwd).map_err(|e| BuildError::Hook {
    stage: stage.to_string(),
    message: e.to_string(),
  })?;

  if !captured.success() {
    return Err(BuildError::Hook {
      stage: stage.to_string(),
      message: captured.output,
    });
  }
  Ok(())
}

/// Wrap a shell script into a command for the platform shell.
pub fn shell_command(script: &str) -> CommandSpec {
  let (shell, args) = get_shell();
  CommandSpec::new(shell).args(args).arg(script)
}

/// Get the shell command and argument for the current platform.
///
/// Uses `/bin/sh` on Unix rather than `$SHELL`, which may source profile
/// files.
fn get_shell() -> (String, Vec<String>) {
  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
