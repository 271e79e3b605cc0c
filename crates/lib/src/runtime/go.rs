//! Compiled-binary adapter: Go handlers built into a `bootstrap` executable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::issue::Issue;
use crate::process::{self, CommandSpec};
use crate::runtime::{Architecture, BuildOptions, BundleOutput, Instructions, Plan, Watcher};
use crate::util::fs::{find_up, is_child, recreate_dir, relative_posix};

const BOOTSTRAP: &str = "bootstrap";

pub(crate) struct GoPlan {
  failure_file: String,
  module_dir: PathBuf,
  /// Package to build, relative to the module: `./cmd/api`.
  package: String,
  artifact: PathBuf,
  architecture: Architecture,
}

fn local_binary() -> &'static str {
  if cfg!(windows) { "bootstrap.exe" } else { BOOTSTRAP }
}

pub(crate) fn instructions(ctx: &Arc<BuildContext>, opts: &BuildOptions) -> Result<Instructions, BuildError> {
  let handler = opts.source_dir().join(&opts.handler);
  let search_from = handler.parent().unwrap_or(&handler);
  let module_dir = find_up(search_from, "go.mod")
    .and_then(|go_mod| go_mod.parent().map(Path::to_path_buf))
    .ok_or_else(|| BuildError::MissingManifest {
      name: "go.mod".to_string(),
      path: search_from.to_path_buf(),
    })?;
  let package = format!("./{}", relative_posix(&module_dir, &handler));
  debug!(id = %opts.id, module = ?module_dir, package = %package, "resolved go module");

  let artifact = ctx.config().artifact_dir(&opts.root_dir(), &opts.id);
  let run = CommandSpec::new(artifact.join(local_binary()).to_string_lossy());

  let mut watcher = Watcher::for_extensions(&module_dir, &[".go"]);
  watcher
    .include
    .push(format!("{}/go.mod", module_dir.to_string_lossy().replace('\\', "/")));

  let plan = GoPlan {
    failure_file: opts.failure_file(),
    module_dir,
    package,
    artifact,
    architecture: opts.bundle.config().architecture,
  };
  Ok(Instructions::new(ctx, &opts.id, Plan::Go(plan), run, watcher, BTreeMap::new()))
}

impl GoPlan {
  fn go_build(&self, output: &Path) -> CommandSpec {
    CommandSpec::new("go").args([
      "build".to_string(),
      "-ldflags".to_string(),
      "-s -w".to_string(),
      "-o".to_string(),
      output.to_string_lossy().into_owned(),
      self.package.clone(),
    ])
  }

  pub(crate) fn should_build(&self, files: &[PathBuf]) -> bool {
    files.iter().any(|file| is_child(&self.module_dir, file))
  }

  pub(crate) async fn build(&self) -> Vec<Issue> {
    if let Err(e) = std::fs::create_dir_all(&self.artifact) {
      return vec![Issue::in_file(&self.failure_file, e.to_string())];
    }
    let spec = self.go_build(&self.artifact.join(local_binary()));
    process::run(&spec, &self.module_dir, &self.failure_file).await
  }

  /// Cross-compile a static linux binary for the configured architecture.
  pub(crate) fn bundle(&self) -> Result<BundleOutput, BuildError> {
    recreate_dir(&self.artifact)?;
    let spec = self
      .go_build(&self.artifact.join(BOOTSTRAP))
      .env("CGO_ENABLED", "0")
      .env("GOOS", "linux")
      .env("GOARCH", self.architecture.goarch());
    process::run_checked_sync(&spec, &self.module_dir)?;

    Ok(BundleOutput::Directory {
      handler: BOOTSTRAP.to_string(),
      directory: self.artifact.clone(),
    })
  }
}
