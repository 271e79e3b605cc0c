//! Scripted-interpreter adapter: Python handlers.
//!
//! There is no local build step; the interpreter loads sources directly.
//! Bundling copies the source root into the artifact and installs its
//! requirements next to it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::process::{self, CommandSpec};
use crate::runtime::{BuildOptions, BundleOutput, Instructions, Plan, Watcher, support_path};
use crate::util::fs::{copy_dir, find_up_any, is_child, recreate_dir, relative_posix};

/// Files marking the root of a Python project, nearest first.
const SOURCE_HINTS: &[&str] = &["requirements.txt", "Pipfile", "poetry.lock"];

/// Never copied into an artifact.
const COPY_EXCLUDES: &[&str] = &[
  "__pycache__",
  ".venv",
  "venv",
  ".mypy_cache",
  ".pytest_cache",
  ".git",
];

pub(crate) struct PythonPlan {
  source_root: PathBuf,
  artifact: PathBuf,
  /// Handler path relative to the source root: `functions/api.handler`.
  handler: String,
  install_commands: Vec<String>,
  /// Name of the state directory, excluded when copying sources.
  state_dir: Option<String>,
}

/// The interpreter for a project: its `.venv` if present, otherwise the
/// system interpreter for the major version.
pub fn interpreter(source_root: &Path, version: &str) -> String {
  let venv = if cfg!(windows) {
    source_root.join(".venv").join("Scripts").join("python.exe")
  } else {
    source_root.join(".venv").join("bin").join("python")
  };
  if venv.exists() {
    return venv.to_string_lossy().into_owned();
  }
  if cfg!(windows) {
    "python.exe".to_string()
  } else if version.starts_with('2') {
    "python".to_string()
  } else {
    "python3".to_string()
  }
}

pub(crate) fn instructions(
  ctx: &Arc<BuildContext>,
  opts: &BuildOptions,
  version: &str,
) -> Result<Instructions, BuildError> {
  let source_dir = opts.source_dir();
  let handler_path = source_dir.join(&opts.handler);
  let module_file = handler_path.with_extension("py");
  if !module_file.is_file() {
    return Err(BuildError::HandlerNotFound {
      handler: opts.handler.clone(),
      src_path: source_dir.display().to_string(),
    });
  }

  let source_root = module_file
    .parent()
    .and_then(|dir| find_up_any(dir, SOURCE_HINTS))
    .and_then(|hint| hint.parent().map(Path::to_path_buf))
    .unwrap_or_else(|| source_dir.clone());
  let handler = relative_posix(&source_root, &handler_path);
  debug!(id = %opts.id, source_root = ?source_root, handler = %handler, "resolved python source root");

  let (module, function) = handler.rsplit_once('.').unwrap_or((handler.as_str(), "handler"));
  let root = opts.root_dir();
  let run = CommandSpec::new(interpreter(&source_root, version)).args([
    "-u".to_string(),
    support_path(ctx, &root, &["python-runtime", "runtime.py"])
      .to_string_lossy()
      .into_owned(),
    module.replace('/', "."),
    source_root.to_string_lossy().into_owned(),
    function.to_string(),
  ]);
  let watcher = Watcher::for_extensions(&source_root, &[".py"]);

  let plan = PythonPlan {
    artifact: ctx.config().artifact_dir(&root, &opts.id),
    handler,
    install_commands: opts.bundle.config().install_commands,
    state_dir: ctx
      .config()
      .state_dir
      .file_name()
      .map(|name| name.to_string_lossy().into_owned()),
    source_root,
  };
  Ok(Instructions::new(ctx, &opts.id, Plan::Python(plan), run, watcher, BTreeMap::new()))
}

impl PythonPlan {
  pub(crate) fn should_build(&self, files: &[PathBuf]) -> bool {
    files.iter().any(|file| is_child(&self.source_root, file))
  }

  pub(crate) fn bundle(&self) -> Result<BundleOutput, BuildError> {
    recreate_dir(&self.artifact)?;

    let mut excludes = COPY_EXCLUDES.to_vec();
    if let Some(state_dir) = &self.state_dir {
      excludes.push(state_dir.as_str());
    }
    info!(from = ?self.source_root, to = ?self.artifact, "copying python sources");
    copy_dir(&self.source_root, &self.artifact, &excludes)?;

    if self.source_root.join("Pipfile").exists() {
      process::run_checked_sync(
        &process::shell_command("pipenv requirements > requirements.txt"),
        &self.artifact,
      )?;
    }
    if self.source_root.join("poetry.lock").exists() {
      let export = CommandSpec::new("poetry").args([
        "export",
        "--with-credentials",
        "--format",
        "requirements.txt",
        "--output",
        "requirements.txt",
      ]);
      process::run_checked_sync(&export, &self.artifact)?;
    }
    if self.artifact.join("requirements.txt").exists() {
      let install = CommandSpec::new("pip").args([
        "install".to_string(),
        "-r".to_string(),
        "requirements.txt".to_string(),
        "-t".to_string(),
        self.artifact.to_string_lossy().into_owned(),
      ]);
      process::run_checked_sync(&install, &self.artifact)?;
    }
    process::run_hooks_sync(&self.install_commands, &self.artifact, "installCommands")?;

    Ok(BundleOutput::Directory {
      handler: self.handler.clone(),
      directory: self.artifact.clone(),
    })
  }
}
