//! JVM adapter: Java handlers built with Gradle.
//!
//! Gradle writes a distribution zip under a per-handler build directory
//! inside the artifact directory. Deployment ships that zip as-is; local
//! builds unpack it next to itself so its `lib/` jars can go on the class
//! path.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{Level, debug};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::issue::Issue;
use crate::process::{self, CommandSpec};
use crate::runtime::{BuildOptions, BundleOutput, Instructions, Plan, Watcher, support_path};
use crate::util::fs::{artifact_relative, is_child, recreate_dir};

const BUILD_FILE: &str = "build.gradle";
const WRAPPER: &str = "gradlew";
const DEFAULT_TASK: &str = "build";
const DEFAULT_OUTPUT_DIR: &str = "distributions";
const SOURCE_EXTENSIONS: &[&str] = &["java", "gradle"];
const RUNTIME_CLIENT: &str = "com.amazonaws.services.lambda.runtime.api.client.AWSLambda";

pub(crate) struct JavaPlan {
  failure_file: String,
  source_dir: PathBuf,
  artifact: PathBuf,
  /// Gradle `buildDir` for this handler.
  build_dir: PathBuf,
  output_dir: String,
  gradle: String,
  task: String,
  handler: String,
}

/// The project's `gradlew` when present, else `gradle` from PATH.
fn gradle_binary(source_dir: &Path) -> String {
  let wrapper = source_dir.join(WRAPPER);
  if wrapper.is_file() {
    wrapper.to_string_lossy().into_owned()
  } else {
    "gradle".to_string()
  }
}

fn class_path(entries: &[PathBuf]) -> String {
  let separator = if cfg!(windows) { ";" } else { ":" };
  entries
    .iter()
    .map(|entry| entry.to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join(separator)
}

pub(crate) fn instructions(ctx: &Arc<BuildContext>, opts: &BuildOptions) -> Result<Instructions, BuildError> {
  let source_dir = opts.source_dir();
  if !source_dir.join(BUILD_FILE).is_file() {
    return Err(BuildError::MissingManifest {
      name: BUILD_FILE.to_string(),
      path: source_dir,
    });
  }

  let config = opts.bundle.config();
  let task = config.build_task.unwrap_or_else(|| DEFAULT_TASK.to_string());
  let output_dir = config.build_output_dir.unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());
  let gradle = gradle_binary(&source_dir);

  let root = opts.root_dir();
  let artifact = ctx.config().artifact_dir(&root, &opts.id);
  let handler_name = Path::new(&opts.handler)
    .file_name()
    .map(|name| name.to_string_lossy().replace("::", "-"))
    .unwrap_or_default();
  let build_dir = artifact.join(artifact_relative(&root, &source_dir)).join(handler_name);
  debug!(id = %opts.id, gradle = %gradle, task = %task, build_dir = ?build_dir, "resolved gradle build");

  let run = CommandSpec::new("java").args([
    "-cp".to_string(),
    class_path(&[
      support_path(ctx, &root, &["java-runtime", "release", "*"]),
      build_dir.join("libs").join("*"),
      build_dir.join(&output_dir).join("lib").join("*"),
    ]),
    RUNTIME_CLIENT.to_string(),
    opts.handler.clone(),
  ]);
  let watcher = Watcher::for_extensions(&source_dir, &[".java", ".gradle"]);

  let plan = JavaPlan {
    failure_file: opts.failure_file(),
    source_dir,
    artifact,
    build_dir,
    output_dir,
    gradle,
    task,
    handler: opts.handler.clone(),
  };
  Ok(Instructions::new(ctx, &opts.id, Plan::Java(plan), run, watcher, BTreeMap::new()))
}

impl JavaPlan {
  fn gradle_build(&self) -> CommandSpec {
    let level = if tracing::enabled!(Level::DEBUG) { "debug" } else { "lifecycle" };
    CommandSpec::new(&self.gradle).args([
      self.task.clone(),
      format!("-Dorg.gradle.project.buildDir={}", self.build_dir.to_string_lossy()),
      format!("-Dorg.gradle.logging.level={}", level),
    ])
  }

  fn distribution_dir(&self) -> PathBuf {
    self.build_dir.join(&self.output_dir)
  }

  /// The first `.zip` in the distribution directory, by name.
  fn distribution(&self) -> Result<PathBuf, BuildError> {
    let dir = self.distribution_dir();
    let mut zips: Vec<PathBuf> = fs::read_dir(&dir)
      .map(|entries| {
        entries
          .filter_map(|entry| entry.ok().map(|e| e.path()))
          .filter(|path| path.extension().is_some_and(|ext| ext == "zip"))
          .collect()
      })
      .unwrap_or_default();
    zips.sort();
    zips
      .into_iter()
      .next()
      .ok_or(BuildError::MissingDistribution { path: dir })
  }

  pub(crate) fn should_build(&self, files: &[PathBuf]) -> bool {
    files.iter().any(|file| {
      let source = file
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
      source && is_child(&self.source_dir, file)
    })
  }

  /// Build, then unpack the distribution so its jars are on the run class path.
  pub(crate) async fn build(&self) -> Vec<Issue> {
    if let Err(e) = fs::create_dir_all(&self.artifact) {
      return vec![Issue::in_file(&self.failure_file, e.to_string())];
    }
    let issues = process::run(&self.gradle_build(), &self.source_dir, &self.failure_file).await;
    if !issues.is_empty() {
      return issues;
    }

    match self.distribution().and_then(|zip| unpack_zip(&zip, &self.distribution_dir())) {
      Ok(()) => Vec::new(),
      Err(e) => vec![Issue::in_file(&self.failure_file, e.to_string())],
    }
  }

  /// Clean build whose distribution zip is the deployment asset.
  pub(crate) fn bundle(&self) -> Result<BundleOutput, BuildError> {
    recreate_dir(&self.artifact)?;
    process::run_checked_sync(&self.gradle_build(), &self.source_dir)?;
    let path = self.distribution()?;
    Ok(BundleOutput::Asset {
      handler: self.handler.clone(),
      path,
    })
  }
}

/// Extract every entry of `archive` under `dest`, keeping the archive layout.
fn unpack_zip(archive: &Path, dest: &Path) -> Result<(), BuildError> {
  let archive_error = |message: String| BuildError::Archive {
    path: archive.to_path_buf(),
    message,
  };
  let file = File::open(archive)?;
  let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| archive_error(e.to_string()))?;

  for i in 0..zip.len() {
    let mut entry = zip.by_index(i).map_err(|e| archive_error(e.to_string()))?;
    let Some(relative) = entry.enclosed_name() else {
      return Err(archive_error(format!("unsafe entry name {}", entry.name())));
    };
    let target = dest.join(relative);

    if entry.is_dir() {
      fs::create_dir_all(&target)?;
      continue;
    }
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }
    let mut out = File::create(&target)?;
    std::io::copy(&mut entry, &mut out)?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = entry.unix_mode() {
        fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
      }
    }
  }
  Ok(())
}
