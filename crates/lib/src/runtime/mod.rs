//! Runtime resolution and dispatch.
//!
//! A runtime identifier resolves to one [`Runtime`] variant, and each variant
//! knows how to produce [`Instructions`] for a function: the operations the
//! caller may invoke for it (build, bundle, checks) plus how to run and watch
//! it locally.

pub mod dotnet;
pub mod go;
pub mod java;
pub mod node;
pub mod python;
mod types;

pub use types::*;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::check::{CheckKind, CheckOutcome};
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::issue::Issue;
use crate::process::CommandSpec;

/// A supported runtime family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
  /// Managed-script: TypeScript/JavaScript compiled with esbuild.
  Node { version: String },
  /// Compiled-binary.
  Go,
  /// Scripted-interpreter.
  Python { version: String },
  /// Managed-platform.
  Dotnet {
    framework: &'static str,
    bootstrap: &'static str,
  },
  /// JVM: Gradle-built distribution zip.
  Java { version: String },
}

impl Runtime {
  /// Resolve a runtime identifier such as `nodejs18.x` or `dotnet8`.
  ///
  /// The identifier splits into a family name and a version at the first
  /// digit; the pair is matched exhaustively.
  pub fn resolve(id: &str) -> Result<Self, BuildError> {
    let split = id.find(|c: char| c.is_ascii_digit()).unwrap_or(id.len());
    let (family, version) = id.split_at(split);

    let runtime = match (family, version) {
      ("nodejs", version) => Runtime::Node {
        version: version.to_string(),
      },
      ("go", _) => Runtime::Go,
      ("python", version) => Runtime::Python {
        version: version.to_string(),
      },
      ("dotnetcore", "1.0" | "2.0" | "2.1" | "3.1") => Runtime::Dotnet {
        framework: "netcoreapp3.1",
        bootstrap: "dotnet31-bootstrap",
      },
      ("dotnet", "6") => Runtime::Dotnet {
        framework: "net6.0",
        bootstrap: "dotnet6-bootstrap",
      },
      ("dotnet", "8") => Runtime::Dotnet {
        framework: "net8.0",
        bootstrap: "dotnet8-bootstrap",
      },
      ("java", version) if !version.is_empty() => Runtime::Java {
        version: version.to_string(),
      },
      _ => return Err(BuildError::UnknownRuntime(id.to_string())),
    };
    Ok(runtime)
  }

  pub fn family(&self) -> &'static str {
    match self {
      Runtime::Node { .. } => "nodejs",
      Runtime::Go => "go",
      Runtime::Python { .. } => "python",
      Runtime::Dotnet { .. } => "dotnet",
      Runtime::Java { .. } => "java",
    }
  }
}

impl fmt::Display for Runtime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Runtime::Node { version } | Runtime::Python { version } | Runtime::Java { version } => {
        write!(f, "{}{}", self.family(), version)
      }
      Runtime::Go => write!(f, "go"),
      Runtime::Dotnet { framework, .. } => write!(f, "dotnet ({})", framework),
    }
  }
}

/// A side check bound to the directory it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommand {
  pub source_dir: PathBuf,
  pub command: CommandSpec,
}

pub(crate) enum Plan {
  Node(node::NodePlan),
  Go(go::GoPlan),
  Python(python::PythonPlan),
  Dotnet(dotnet::DotnetPlan),
  Java(java::JavaPlan),
}

/// The operations available for one function on one runtime.
pub struct Instructions {
  ctx: Arc<BuildContext>,
  id: String,
  plan: Plan,
  /// How to start the built function locally.
  pub run: CommandSpec,
  pub watcher: Watcher,
  pub checks: BTreeMap<CheckKind, CheckCommand>,
}

impl Instructions {
  pub(crate) fn new(
    ctx: &Arc<BuildContext>,
    id: &str,
    plan: Plan,
    run: CommandSpec,
    watcher: Watcher,
    checks: BTreeMap<CheckKind, CheckCommand>,
  ) -> Self {
    Self {
      ctx: ctx.clone(),
      id: id.to_string(),
      plan,
      run,
      watcher,
      checks,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Whether a change to any of `files` can affect the built artifact.
  pub fn should_build(&self, files: &[PathBuf]) -> bool {
    match &self.plan {
      Plan::Node(plan) => plan.should_build(&self.ctx, files),
      Plan::Go(plan) => plan.should_build(files),
      Plan::Python(plan) => plan.should_build(files),
      Plan::Dotnet(plan) => plan.should_build(files),
      Plan::Java(plan) => plan.should_build(files),
    }
  }

  /// Whether this runtime has a local build step.
  pub fn can_build(&self) -> bool {
    !matches!(self.plan, Plan::Python(_))
  }

  /// Build for local development. `None` when the runtime has no build step.
  pub async fn build(&self) -> Option<Vec<Issue>> {
    match &self.plan {
      Plan::Node(plan) => Some(plan.build(&self.ctx).await),
      Plan::Go(plan) => Some(plan.build().await),
      Plan::Python(_) => None,
      Plan::Dotnet(plan) => Some(plan.build().await),
      Plan::Java(plan) => Some(plan.build().await),
    }
  }

  /// Produce the clean deployment artifact. Blocks the calling thread.
  pub fn bundle(&self) -> Result<Option<BundleOutput>, BuildError> {
    let output = match &self.plan {
      Plan::Node(plan) => plan.bundle(&self.ctx)?,
      Plan::Go(plan) => plan.bundle()?,
      Plan::Python(plan) => plan.bundle()?,
      Plan::Dotnet(plan) => plan.bundle()?,
      Plan::Java(plan) => plan.bundle()?,
    };
    Ok(Some(output))
  }

  /// Run the `kind` check through the context's coalescer. `None` when this
  /// function has no such check or it is disabled in the config.
  pub async fn check(&self, kind: CheckKind) -> Option<CheckOutcome> {
    if !self.ctx.config().checks.contains(&kind) {
      return None;
    }
    let check = self.checks.get(&kind)?;
    Some(self.ctx.coalescer().check(kind, &check.source_dir, &check.command).await)
  }

  /// Check kinds this function would run, in a stable order.
  pub fn enabled_checks(&self) -> Vec<CheckKind> {
    self
      .checks
      .keys()
      .copied()
      .filter(|kind| self.ctx.config().checks.contains(kind))
      .collect()
  }
}

/// Resolve `opts.runtime` and construct the function's instructions.
///
/// Configuration mistakes (unknown runtime, missing handler or manifest) fail
/// here, before any process is spawned or directory touched.
pub fn instructions(ctx: &Arc<BuildContext>, opts: &BuildOptions) -> Result<Instructions, BuildError> {
  let runtime = Runtime::resolve(&opts.runtime)?;
  debug!(id = %opts.id, runtime = %runtime, "resolved runtime");

  match runtime {
    Runtime::Node { .. } => node::instructions(ctx, opts),
    Runtime::Go => go::instructions(ctx, opts),
    Runtime::Python { version } => python::instructions(ctx, opts, &version),
    Runtime::Dotnet { framework, bootstrap } => dotnet::instructions(ctx, opts, framework, bootstrap),
    Runtime::Java { .. } => java::instructions(ctx, opts),
  }
}

/// Build one function for local development.
///
/// # Returns
///
/// The build's issues, empty on success or when the runtime has no build step.
/// Only configuration mistakes are errors.
pub async fn build(ctx: &Arc<BuildContext>, opts: &BuildOptions) -> Result<Vec<Issue>, BuildError> {
  let instructions = instructions(ctx, opts)?;
  info!(id = %opts.id, runtime = %opts.runtime, "building function");
  Ok(instructions.build().await.unwrap_or_default())
}

/// Bundle one function for deployment. Blocks the calling thread.
pub fn bundle(ctx: &Arc<BuildContext>, opts: &BuildOptions) -> Result<Option<BundleOutput>, BuildError> {
  let instructions = instructions(ctx, opts)?;
  info!(id = %opts.id, runtime = %opts.runtime, "bundling function");
  instructions.bundle()
}

/// `<support_dir>/<parts...>` for the context's configured support files.
pub(crate) fn support_path(ctx: &BuildContext, root: &Path, parts: &[&str]) -> PathBuf {
  parts
    .iter()
    .fold(ctx.config().support_dir(root), |path, part| path.join(part))
}
