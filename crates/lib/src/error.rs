//! Configuration and bundling errors.
//!
//! Build and check paths never return these for toolchain failures: those are
//! folded into [`crate::issue::Issue`] vectors. A `BuildError` means either a
//! configuration mistake caught before any process was spawned, or a failed
//! deployment bundle that must halt the caller.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
  /// The runtime identifier matched no known runtime family.
  #[error("unknown runtime: {0}")]
  UnknownRuntime(String),

  /// No source file exists for the handler under any known extension.
  #[error("cannot find a handler file for \"{handler}\" in {src_path}")]
  HandlerNotFound { handler: String, src_path: String },

  /// A configured esbuild plugins file does not exist.
  #[error("cannot find an esbuild plugins file at: {}", path.display())]
  MissingPlugins { path: PathBuf },

  /// A project manifest the adapter depends on is missing.
  #[error("cannot find {name} for {}", path.display())]
  MissingManifest { name: String, path: PathBuf },

  /// No npm or yarn lock file was found above the source directory.
  #[error("cannot find a lock file above {}", path.display())]
  MissingLockFile { path: PathBuf },

  /// A dependency marked for installation has no resolvable version.
  #[error(
    "cannot extract version for module '{module}'. Check that it's referenced in your package.json or installed."
  )]
  UnresolvedDependency { module: String },

  /// The deployment compile failed.
  #[error("there was a problem transpiling the handler: {message}")]
  Transpile { message: String },

  /// An external toolchain exited unsuccessfully during bundling.
  #[error("command failed with exit code {code:?}: {command}\n{output}")]
  Toolchain {
    command: String,
    code: Option<i32>,
    output: String,
  },

  /// A user command hook failed.
  #[error("there was a problem running \"{stage}\" command: {message}")]
  Hook { stage: String, message: String },

  /// Installing unbundled dependencies failed.
  #[error("there was a problem installing node modules: {message}")]
  Install { message: String },

  /// A build produced no deployable archive where one was expected.
  #[error("cannot find a .zip distribution in {}", path.display())]
  MissingDistribution { path: PathBuf },

  /// A distribution archive could not be read or extracted.
  #[error("failed to extract {}: {message}", path.display())]
  Archive { path: PathBuf, message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}
