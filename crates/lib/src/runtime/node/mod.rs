//! Managed-script adapter: Node.js handlers compiled with esbuild.
//!
//! Local builds go through the context's incremental cache: the first build
//! of a function starts a warm compiler session, later builds ask it to
//! rebuild. Deployment bundles always compile from scratch in a separate
//! process.

pub mod cache;
pub mod compiler;
pub mod install;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use self::cache::WarmEntry;
use self::compiler::CompileRequest;
use crate::check::CheckKind;
use crate::consts::SCRIPT_EXTENSIONS;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::issue::Issue;
use crate::process::{self, CommandSpec};
use crate::runtime::{
  BuildOptions, BundleConfig, BundleOutput, CheckCommand, Format, Instructions, Plan, Watcher, support_path,
};
use crate::util::fs::{artifact_relative, find_up, find_up_any, recreate_dir, relative_posix, to_posix};
use crate::util::hash::Hashable;

const ESM_BANNER: &str = "import { createRequire as topLevelCreateRequire } from 'module';const require = topLevelCreateRequire(import.meta.url);";

const ESLINT_CONFIGS: &[&str] = &[
  "eslint.config.js",
  "eslint.config.mjs",
  "eslint.config.cjs",
  ".eslintrc.js",
  ".eslintrc.cjs",
  ".eslintrc.json",
  ".eslintrc.yaml",
  ".eslintrc.yml",
  ".eslintrc",
];

pub(crate) struct NodePlan {
  opts: BuildOptions,
  root: PathBuf,
  source_dir: PathBuf,
  artifact: PathBuf,
  config: BundleConfig,
  /// Compile request shared by builds and bundles, before mode-specific
  /// minify and sourcemap settings.
  request: CompileRequest,
}

/// Find the source file for `handler` (`dir/base.function`) under
/// `source_dir`, probing each script extension in order.
///
/// Returns the file relative to `source_dir`.
pub fn resolve_handler(source_dir: &Path, handler: &str) -> Result<PathBuf, BuildError> {
  let handler_path = Path::new(handler);
  let dir = handler_path.parent().unwrap_or(Path::new(""));
  let base = handler_path
    .file_name()
    .and_then(|name| name.to_str())
    .and_then(|name| name.split('.').next())
    .unwrap_or_default();

  SCRIPT_EXTENSIONS
    .iter()
    .map(|ext| dir.join(format!("{}{}", base, ext)))
    .find(|file| source_dir.join(file).is_file())
    .ok_or_else(|| BuildError::HandlerNotFound {
      handler: handler.to_string(),
      src_path: source_dir.display().to_string(),
    })
}

pub(crate) fn instructions(ctx: &Arc<BuildContext>, opts: &BuildOptions) -> Result<Instructions, BuildError> {
  let root = opts.root_dir();
  let source_dir = opts.source_dir();
  let file = resolve_handler(&source_dir, &opts.handler)?;
  debug!(id = %opts.id, file = ?file, "resolved handler file");

  let config = opts.bundle.config();
  let plugins = match &config.esbuild.plugins {
    Some(plugins) => {
      let path = root.join(plugins);
      if !path.exists() {
        return Err(BuildError::MissingPlugins { path });
      }
      Some(path)
    }
    None => None,
  };

  let artifact = ctx.config().artifact_dir(&root, &opts.id);
  let mut target = artifact.join(artifact_relative(&root, &source_dir));
  if let Some(dir) = file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
    target.push(dir);
  }
  let base = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
  target.push(format!("{}.js", base));

  let request = compile_request(&root, source_dir.join(&file), target.clone(), opts.bundle.is_enabled(), &config, plugins);

  let run = CommandSpec::new(&ctx.config().node)
    .arg(support_path(ctx, &root, &["nodejs-runtime", "index.mjs"]).to_string_lossy())
    .arg(target.to_string_lossy());
  let watcher = Watcher::for_extensions(&source_dir, SCRIPT_EXTENSIONS);
  let checks = checks(&source_dir);

  let plan = NodePlan {
    opts: opts.clone(),
    root,
    source_dir,
    artifact,
    config,
    request,
  };
  Ok(Instructions::new(ctx, &opts.id, Plan::Node(plan), run, watcher, checks))
}

fn compile_request(
  root: &Path,
  entry_point: PathBuf,
  outfile: PathBuf,
  bundle: bool,
  config: &BundleConfig,
  plugins: Option<PathBuf>,
) -> CompileRequest {
  let esm = config.format == Format::Esm;

  let external = if bundle {
    let mut external = Vec::new();
    if !esm {
      external.push("aws-sdk".to_string());
    }
    external.extend(config.external_modules.iter().cloned());
    external.extend(config.node_modules.iter().cloned());
    external
  } else {
    Vec::new()
  };

  let (target, main_fields, banner) = if esm {
    (
      "esnext",
      ["module", "main"],
      Some(format!("{}{}", ESM_BANNER, config.banner.as_deref().unwrap_or(""))),
    )
  } else {
    ("node14", ["main", "module"], config.banner.clone())
  };

  CompileRequest {
    entry_point,
    outfile,
    abs_working_dir: root.to_path_buf(),
    bundle,
    format: config.format,
    target: target.to_string(),
    main_fields: main_fields.iter().map(|s| s.to_string()).collect(),
    external,
    loader: config.loader.clone(),
    define: config.esbuild.define.clone(),
    keep_names: config.esbuild.keep_names,
    banner,
    minify: false,
    sourcemap: false,
    plugins,
  }
}

/// Resolve a tool from the nearest `node_modules/.bin`, falling back to PATH.
fn node_bin(start: &Path, name: &str) -> String {
  find_up(start, &format!("node_modules/.bin/{}", name))
    .map(|path| path.to_string_lossy().into_owned())
    .unwrap_or_else(|| name.to_string())
}

fn checks(source_dir: &Path) -> BTreeMap<CheckKind, CheckCommand> {
  let mut checks = BTreeMap::new();
  if source_dir.join("tsconfig.json").exists() {
    checks.insert(
      CheckKind::Type,
      CheckCommand {
        source_dir: source_dir.to_path_buf(),
        command: CommandSpec::new(node_bin(source_dir, "tsc")).arg("--noEmit"),
      },
    );
  }
  if find_up_any(source_dir, ESLINT_CONFIGS).is_some() {
    checks.insert(
      CheckKind::Lint,
      CheckCommand {
        source_dir: source_dir.to_path_buf(),
        command: CommandSpec::new(node_bin(source_dir, "eslint")).args(["--no-error-on-unmatched-pattern", "."]),
      },
    );
  }
  checks
}

impl NodePlan {
  fn dev_request(&self) -> CompileRequest {
    CompileRequest {
      minify: false,
      sourcemap: true,
      ..self.request.clone()
    }
  }

  fn bundle_request(&self) -> CompileRequest {
    CompileRequest {
      minify: self.config.minify.unwrap_or(true),
      sourcemap: self.config.sourcemap.unwrap_or(false),
      ..self.request.clone()
    }
  }

  fn write_manifest(&self) -> std::io::Result<()> {
    let module_type = match self.config.format {
      Format::Esm => "module",
      Format::Cjs => "commonjs",
    };
    let manifest = serde_json::json!({ "type": module_type });
    std::fs::write(self.artifact.join("package.json"), manifest.to_string())
  }

  fn issue(&self, message: impl Into<String>) -> Vec<Issue> {
    vec![Issue::in_file(self.opts.failure_file(), message)]
  }

  pub(crate) fn should_build(&self, ctx: &BuildContext, files: &[PathBuf]) -> bool {
    let files: Vec<String> = files.iter().map(|file| relative_posix(&self.root, file)).collect();
    ctx.scripts().should_build(&self.opts.id, &files)
  }

  pub(crate) async fn build(&self, ctx: &BuildContext) -> Vec<Issue> {
    let id = &self.opts.id;
    let scripts = ctx.scripts();
    let slot = scripts.slot(id);
    let mut entry = slot.lock().await;

    let request = self.dev_request();
    let fingerprint = match request.compute_hash() {
      Ok(hash) => hash,
      Err(e) => return self.issue(format!("failed to fingerprint compile request: {}", e)),
    };

    if let Some(warm) = entry.as_mut() {
      if warm.fingerprint == fingerprint && warm.session.is_alive() {
        return match warm.session.rebuild().await {
          Ok(inputs) => {
            warm.rebuilds += 1;
            info!(id = %id, rebuilds = warm.rebuilds, "incremental rebuild succeeded");
            scripts.record_inputs(id, inputs);
            Vec::new()
          }
          Err(issues) => {
            debug!(id = %id, issues = issues.len(), "incremental rebuild failed");
            issues
          }
        };
      }
      info!(id = %id, "discarding stale warm session");
      *entry = None;
      scripts.forget_inputs(id);
    }

    if let Err(e) = recreate_dir(&self.artifact) {
      return self.issue(format!("failed to prepare {}: {}", self.artifact.display(), e));
    }

    match ctx.compiler().start(&request).await {
      Ok(started) => {
        if let Err(e) = self.write_manifest() {
          return self.issue(format!("failed to write package.json: {}", e));
        }
        info!(id = %id, inputs = started.inputs.len(), "cold build succeeded");
        scripts.record_inputs(id, started.inputs);
        *entry = Some(WarmEntry {
          session: started.session,
          fingerprint,
          rebuilds: 0,
        });
        Vec::new()
      }
      Err(issues) => issues,
    }
  }

  pub(crate) fn bundle(&self, ctx: &BuildContext) -> Result<BundleOutput, BuildError> {
    let hooks = &self.config.command_hooks;
    process::run_hooks_sync(&hooks.before_bundling, &self.source_dir, "beforeBundling")?;

    recreate_dir(&self.artifact)?;
    ctx.compiler().bundle(&self.bundle_request())?;
    self.write_manifest()?;

    process::run_hooks_sync(&hooks.before_install, &self.source_dir, "beforeInstall")?;
    install::install_node_modules(
      ctx.installs(),
      &ctx.config().installs_dir(&self.root),
      &self.source_dir,
      &self.artifact,
      &self.config.node_modules,
    )?;
    process::run_hooks_sync(&hooks.after_bundling, &self.source_dir, "afterBundling")?;

    let handler = to_posix(&artifact_relative(&self.root, &self.source_dir).join(&self.opts.handler));
    Ok(BundleOutput::Directory {
      handler,
      directory: self.artifact.clone(),
    })
  }
}
