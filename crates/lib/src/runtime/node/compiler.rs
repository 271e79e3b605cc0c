//! The managed-script compiler.
//!
//! [`ScriptCompiler`] is the seam between the Node.js adapter and esbuild.
//! The production [`EsbuildCompiler`] runs a small node driver script: a
//! long-lived child holding an esbuild context answers rebuild requests over
//! stdin/stdout, and bundles run as a one-shot child.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info};

use crate::error::BuildError;
use crate::issue::{Issue, IssueLocation};
use crate::process::{self, CommandSpec};
use crate::runtime::Format;
use crate::util::fs::relative_posix;
use crate::util::hash::Hashable;

const DRIVER_SOURCE: &str = include_str!("driver.mjs");
const DRIVER_FILE: &str = "esbuild-driver.mjs";
const REQUEST_ENV: &str = "FNBUILD_COMPILE_REQUEST";

/// Prefix of every driver answer on stdout. Anything else on stdout comes
/// from user code such as plugins.
const REPLY_MARKER: &str = "@@fnbuild-reply ";

/// Everything esbuild needs to compile one handler.
///
/// Serialized as-is for the driver, and hashed to detect when a warm session
/// no longer matches the function's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
  pub entry_point: PathBuf,
  pub outfile: PathBuf,
  /// Metafile inputs are reported relative to this directory.
  pub abs_working_dir: PathBuf,
  pub bundle: bool,
  pub format: Format,
  pub target: String,
  pub main_fields: Vec<String>,
  pub external: Vec<String>,
  pub loader: BTreeMap<String, String>,
  pub define: BTreeMap<String, String>,
  pub keep_names: bool,
  pub banner: Option<String>,
  pub minify: bool,
  pub sourcemap: bool,
  pub plugins: Option<PathBuf>,
}

impl Hashable for CompileRequest {}

impl CompileRequest {
  /// File an error is attached to when esbuild gives no location.
  pub fn fallback_file(&self) -> String {
    relative_posix(&self.abs_working_dir, &self.entry_point)
  }
}

/// A successful cold compile.
pub struct Started {
  pub session: Box<dyn WarmBuild>,
  /// Input files, relative to the request's working directory, `/`-separated.
  pub inputs: BTreeSet<String>,
}

#[async_trait]
pub trait ScriptCompiler: Send + Sync {
  /// Full compile with metadata, keeping the compiler alive for rebuilds.
  ///
  /// On failure no session survives and every compiler message becomes one
  /// issue.
  async fn start(&self, request: &CompileRequest) -> Result<Started, Vec<Issue>>;

  /// One-shot compile for deployment. Blocks the calling thread.
  fn bundle(&self, request: &CompileRequest) -> Result<(), BuildError>;
}

/// A live compiler able to recompile incrementally.
#[async_trait]
pub trait WarmBuild: Send {
  /// Recompile, returning the new input set.
  async fn rebuild(&mut self) -> Result<BTreeSet<String>, Vec<Issue>>;

  /// Whether the session can still serve rebuilds.
  fn is_alive(&mut self) -> bool;
}

#[derive(Debug, Deserialize)]
struct DriverReply {
  ok: bool,
  #[serde(default)]
  inputs: Vec<String>,
  #[serde(default)]
  errors: Vec<DriverMessage>,
}

#[derive(Debug, Deserialize)]
struct DriverMessage {
  file: Option<String>,
  line: Option<u32>,
  column: Option<u32>,
  length: Option<u32>,
  text: String,
}

impl DriverMessage {
  fn into_issue(self, fallback: &str) -> Issue {
    Issue::new(
      IssueLocation {
        file: self.file.unwrap_or_else(|| fallback.to_string()),
        line: self.line,
        column: self.column,
        length: self.length,
      },
      self.text,
    )
  }
}

impl DriverReply {
  /// Read a driver answer from one stdout line.
  ///
  /// Returns `None` for lines that are not answers. Marked lines that fail to
  /// parse are an error; unmarked lines count only when they parse.
  fn from_line(line: &str) -> Option<Result<DriverReply, serde_json::Error>> {
    match line.strip_prefix(REPLY_MARKER) {
      Some(json) => Some(serde_json::from_str(json)),
      None => serde_json::from_str(line.trim()).ok().map(Ok),
    }
  }

  fn into_result(self, fallback: &str) -> Result<BTreeSet<String>, Vec<Issue>> {
    if self.ok {
      return Ok(self.inputs.into_iter().collect());
    }
    let mut issues: Vec<Issue> = self.errors.into_iter().map(|m| m.into_issue(fallback)).collect();
    if issues.is_empty() {
      issues.push(Issue::in_file(fallback, "esbuild failed without reporting an error"));
    }
    Err(issues)
  }
}

/// Drives esbuild through a node child process.
pub struct EsbuildCompiler {
  node: String,
  state_dir: PathBuf,
}

impl EsbuildCompiler {
  /// # Arguments
  ///
  /// * `node` - Node.js executable
  /// * `state_dir` - State directory relative to each request's root; the
  ///   driver script is written there so `esbuild` resolves from the
  ///   project's `node_modules`
  pub fn new(node: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
    Self {
      node: node.into(),
      state_dir: state_dir.into(),
    }
  }

  fn install_driver(&self, root: &Path) -> std::io::Result<PathBuf> {
    let path = root.join(&self.state_dir).join(DRIVER_FILE);
    let current = std::fs::read_to_string(&path).ok();
    if current.as_deref() != Some(DRIVER_SOURCE) {
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::write(&path, DRIVER_SOURCE)?;
      debug!(path = ?path, "wrote esbuild driver");
    }
    Ok(path)
  }
}

#[async_trait]
impl ScriptCompiler for EsbuildCompiler {
  async fn start(&self, request: &CompileRequest) -> Result<Started, Vec<Issue>> {
    let fallback = request.fallback_file();
    let fail = |message: String| vec![Issue::in_file(fallback.clone(), message)];

    let driver = self
      .install_driver(&request.abs_working_dir)
      .map_err(|e| fail(format!("failed to write esbuild driver: {}", e)))?;
    let payload = serde_json::to_string(request).map_err(|e| fail(e.to_string()))?;

    info!(entry = ?request.entry_point, "starting esbuild session");
    let mut child = tokio::process::Command::new(&self.node)
      .arg(&driver)
      .arg("serve")
      .current_dir(&request.abs_working_dir)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| fail(format!("failed to start {}: {}", self.node, e)))?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
      return Err(fail("esbuild driver has no stdio".to_string()));
    };
    let stderr = Arc::new(Mutex::new(Vec::new()));
    process::pump(child.stderr.take(), stderr.clone());

    let mut session = EsbuildSession {
      child,
      stdin,
      stdout: BufReader::new(stdout).lines(),
      stderr,
      fallback: fallback.clone(),
    };
    let inputs = session.exchange(&payload).await?;
    Ok(Started {
      session: Box::new(session),
      inputs,
    })
  }

  fn bundle(&self, request: &CompileRequest) -> Result<(), BuildError> {
    let root = &request.abs_working_dir;
    let driver = self.install_driver(root)?;
    let spec = CommandSpec::new(&self.node)
      .arg(driver.to_string_lossy())
      .arg("bundle")
      .env(REQUEST_ENV, serde_json::to_string(request)?);

    let captured = process::capture_sync(&spec, root)?;
    let reply = captured
      .output
      .lines()
      .rev()
      .find_map(|line| DriverReply::from_line(line).and_then(Result::ok));

    let transpile_error = || BuildError::Transpile {
      message: if captured.output.trim().is_empty() {
        format!("{} exited with {}", spec.command, captured.status)
      } else {
        captured.output.trim().to_string()
      },
    };
    match reply {
      Some(reply) => match reply.into_result(&request.fallback_file()) {
        Ok(_) if captured.success() => Ok(()),
        Ok(_) => Err(transpile_error()),
        Err(issues) => Err(BuildError::Transpile {
          message: issues.iter().map(Issue::to_string).collect::<Vec<_>>().join("\n"),
        }),
      },
      None => Err(transpile_error()),
    }
  }
}

struct EsbuildSession {
  child: Child,
  stdin: ChildStdin,
  stdout: Lines<BufReader<ChildStdout>>,
  stderr: Arc<Mutex<Vec<u8>>>,
  fallback: String,
}

impl EsbuildSession {
  async fn exchange(&mut self, line: &str) -> Result<BTreeSet<String>, Vec<Issue>> {
    let sent = async {
      self.stdin.write_all(line.as_bytes()).await?;
      self.stdin.write_all(b"\n").await?;
      self.stdin.flush().await
    }
    .await;
    if let Err(e) = sent {
      return Err(self.died(&format!("esbuild driver is not accepting requests: {}", e)));
    }

    loop {
      match self.stdout.next_line().await {
        Ok(Some(line)) => match DriverReply::from_line(&line) {
          Some(Ok(reply)) => return reply.into_result(&self.fallback),
          Some(Err(e)) => {
            return Err(vec![Issue::in_file(
              self.fallback.clone(),
              format!("unreadable esbuild driver reply: {}", e),
            )]);
          }
          None => debug!(entry = %self.fallback, output = %line, "esbuild driver output"),
        },
        Ok(None) => return Err(self.died("esbuild driver exited")),
        Err(e) => return Err(self.died(&format!("failed to read from esbuild driver: {}", e))),
      }
    }
  }

  fn died(&self, reason: &str) -> Vec<Issue> {
    let stderr = match self.stderr.lock() {
      Ok(buf) => String::from_utf8_lossy(&buf).trim().to_string(),
      Err(_) => String::new(),
    };
    let message = if stderr.is_empty() {
      reason.to_string()
    } else {
      format!("{}\n{}", reason, stderr)
    };
    vec![Issue::in_file(self.fallback.clone(), message)]
  }
}

#[async_trait]
impl WarmBuild for EsbuildSession {
  async fn rebuild(&mut self) -> Result<BTreeSet<String>, Vec<Issue>> {
    debug!(entry = %self.fallback, "incremental rebuild");
    self.exchange("rebuild").await
  }

  fn is_alive(&mut self) -> bool {
    matches!(self.child.try_wait(), Ok(None))
  }
}
