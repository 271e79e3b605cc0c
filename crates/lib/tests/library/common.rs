//! Shared helpers for library integration tests.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fnbuild_lib::config::EngineConfig;
use fnbuild_lib::context::BuildContext;
use fnbuild_lib::error::BuildError;
use fnbuild_lib::issue::{Issue, IssueLocation};
use fnbuild_lib::runtime::node::compiler::{CompileRequest, ScriptCompiler, Started, WarmBuild};
use tempfile::TempDir;

/// Marker that makes the fake compiler reject a source file.
pub const SYNTAX_ERROR: &str = "syntax error here";

/// Counters shared between a [`FakeCompiler`] and its sessions.
#[derive(Default)]
pub struct Counters {
  pub starts: AtomicUsize,
  pub rebuilds: AtomicUsize,
  pub bundles: AtomicUsize,
  pub alive: AtomicBool,
}

/// A script compiler that copies the entry point to the outfile.
///
/// Entry points containing [`SYNTAX_ERROR`] fail with one issue on line 1.
pub struct FakeCompiler {
  pub counters: Arc<Counters>,
  delay: Duration,
}

impl FakeCompiler {
  pub fn new() -> Self {
    Self::with_delay(Duration::ZERO)
  }

  /// Every start and rebuild sleeps for `delay` first.
  pub fn with_delay(delay: Duration) -> Self {
    let counters = Counters::default();
    counters.alive.store(true, Ordering::SeqCst);
    Self {
      counters: Arc::new(counters),
      delay,
    }
  }
}

fn compile(request: &CompileRequest) -> Result<BTreeSet<String>, Vec<Issue>> {
  let fallback = request.fallback_file();
  let source = std::fs::read_to_string(&request.entry_point)
    .map_err(|e| vec![Issue::in_file(fallback.clone(), e.to_string())])?;
  if source.contains(SYNTAX_ERROR) {
    return Err(vec![Issue::new(
      IssueLocation {
        file: fallback,
        line: Some(1),
        column: Some(0),
        length: None,
      },
      "Unexpected token",
    )]);
  }
  if let Some(parent) = request.outfile.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(&request.outfile, source).unwrap();
  Ok([fallback].into_iter().collect())
}

struct FakeSession {
  request: CompileRequest,
  counters: Arc<Counters>,
  delay: Duration,
}

#[async_trait]
impl WarmBuild for FakeSession {
  async fn rebuild(&mut self) -> Result<BTreeSet<String>, Vec<Issue>> {
    tokio::time::sleep(self.delay).await;
    let inputs = compile(&self.request)?;
    self.counters.rebuilds.fetch_add(1, Ordering::SeqCst);
    Ok(inputs)
  }

  fn is_alive(&mut self) -> bool {
    self.counters.alive.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ScriptCompiler for FakeCompiler {
  async fn start(&self, request: &CompileRequest) -> Result<Started, Vec<Issue>> {
    tokio::time::sleep(self.delay).await;
    self.counters.starts.fetch_add(1, Ordering::SeqCst);
    let inputs = compile(request)?;
    Ok(Started {
      session: Box::new(FakeSession {
        request: request.clone(),
        counters: self.counters.clone(),
        delay: self.delay,
      }),
      inputs,
    })
  }

  fn bundle(&self, request: &CompileRequest) -> Result<(), BuildError> {
    self.counters.bundles.fetch_add(1, Ordering::SeqCst);
    compile(request).map(|_| ()).map_err(|issues| BuildError::Transpile {
      message: issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"),
    })
  }
}

/// A context backed by `compiler` with default configuration.
pub fn context_with(compiler: FakeCompiler) -> (Arc<BuildContext>, Arc<Counters>) {
  let counters = compiler.counters.clone();
  let ctx = BuildContext::with_compiler(EngineConfig::default(), Arc::new(compiler));
  (Arc::new(ctx), counters)
}

/// Isolated project directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  /// Write a file relative to the project root.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Write an executable shell script relative to the project root.
  #[cfg(unix)]
  pub fn write_executable(&self, relative_path: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    self.write_file(relative_path, &format!("#!/bin/sh\n{}\n", body));
    let path = self.temp.path().join(relative_path);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  }
}
