//! Managed-platform adapter: .NET handlers published with `dotnet publish`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::issue::Issue;
use crate::process::{self, CommandSpec};
use crate::runtime::{BuildOptions, BundleOutput, Instructions, Plan, Watcher, support_path};
use crate::util::fs::{is_child, recreate_dir};

const PROJECT_EXTENSIONS: &[&str] = &["csproj", "fsproj"];
const SOURCE_EXTENSIONS: &[&str] = &["cs", "fs", "csproj", "fsproj"];

pub(crate) struct DotnetPlan {
  failure_file: String,
  source_dir: PathBuf,
  artifact: PathBuf,
  framework: &'static str,
  handler: String,
}

/// The first `.csproj` or `.fsproj` directly inside `dir`, by name.
fn find_project(dir: &Path) -> Option<PathBuf> {
  let mut projects: Vec<PathBuf> = std::fs::read_dir(dir)
    .ok()?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| {
      path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PROJECT_EXTENSIONS.contains(&ext))
    })
    .collect();
  projects.sort();
  projects.into_iter().next()
}

pub(crate) fn instructions(
  ctx: &Arc<BuildContext>,
  opts: &BuildOptions,
  framework: &'static str,
  bootstrap: &str,
) -> Result<Instructions, BuildError> {
  let source_dir = opts.source_dir();
  if find_project(&source_dir).is_none() {
    return Err(BuildError::MissingManifest {
      name: "a .csproj or .fsproj project".to_string(),
      path: source_dir,
    });
  }

  let root = opts.root_dir();
  let artifact = ctx.config().artifact_dir(&root, &opts.id);
  let assembly = opts.handler.split(':').next().unwrap_or_default();
  let run = CommandSpec::new("dotnet")
    .args([
      "exec".to_string(),
      support_path(ctx, &root, &[bootstrap, "release", "dotnet-bootstrap.dll"])
        .to_string_lossy()
        .into_owned(),
      artifact.join(format!("{}.dll", assembly)).to_string_lossy().into_owned(),
      opts.handler.clone(),
    ])
    .env("AWS_LAMBDA_DOTNET_DEBUG_RUN_ONCE", "true");

  let extensions: Vec<String> = SOURCE_EXTENSIONS.iter().map(|ext| format!(".{}", ext)).collect();
  let extensions: Vec<&str> = extensions.iter().map(String::as_str).collect();
  let watcher = Watcher::for_extensions(&source_dir, &extensions);

  let plan = DotnetPlan {
    failure_file: opts.failure_file(),
    source_dir,
    artifact,
    framework,
    handler: opts.handler.clone(),
  };
  Ok(Instructions::new(ctx, &opts.id, Plan::Dotnet(plan), run, watcher, BTreeMap::new()))
}

impl DotnetPlan {
  fn publish(&self) -> CommandSpec {
    CommandSpec::new("dotnet").args([
      "publish".to_string(),
      "--output".to_string(),
      self.artifact.to_string_lossy().into_owned(),
      "--configuration".to_string(),
      "Release".to_string(),
      "--framework".to_string(),
      self.framework.to_string(),
      "/p:GenerateRuntimeConfigurationFiles=true".to_string(),
      "--self-contained".to_string(),
      "false".to_string(),
      "-nologo".to_string(),
    ])
  }

  /// Only source and project files inside the project directory matter.
  pub(crate) fn should_build(&self, files: &[PathBuf]) -> bool {
    files.iter().any(|file| {
      let source = file
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
      source && is_child(&self.source_dir, file)
    })
  }

  pub(crate) async fn build(&self) -> Vec<Issue> {
    if let Err(e) = std::fs::create_dir_all(&self.artifact) {
      return vec![Issue::in_file(&self.failure_file, e.to_string())];
    }
    process::run(&self.publish(), &self.source_dir, &self.failure_file).await
  }

  pub(crate) fn bundle(&self) -> Result<BundleOutput, BuildError> {
    recreate_dir(&self.artifact)?;
    process::run_checked_sync(&self.publish(), &self.source_dir)?;
    Ok(BundleOutput::Directory {
      handler: self.handler.clone(),
      directory: self.artifact.clone(),
    })
  }
}
