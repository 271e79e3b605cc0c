use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::fs::absolute;

/// Identity and configuration for one function's compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
  /// Cache key. Unique per function within a build session.
  pub id: String,

  /// Application root. Artifacts live under `<root>/<state_dir>`. An empty
  /// path means the current directory.
  #[serde(default)]
  pub root: PathBuf,

  /// Runtime identifier such as `nodejs18.x`, `go1.x`, `python3.11` or `dotnet8`.
  pub runtime: String,

  /// Source directory, relative to `root` unless absolute.
  pub src_path: PathBuf,

  /// Handler reference, relative to `src_path`. Its shape is runtime
  /// specific: `dir/file.function` for scripts, a package path for Go,
  /// `Assembly::Type::Method` for .NET.
  pub handler: String,

  #[serde(default)]
  pub bundle: BundleSetting,
}

impl BuildOptions {
  pub fn new(id: impl Into<String>, runtime: impl Into<String>, src_path: impl Into<PathBuf>, handler: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      root: PathBuf::new(),
      runtime: runtime.into(),
      src_path: src_path.into(),
      handler: handler.into(),
      bundle: BundleSetting::default(),
    }
  }

  pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.root = root.into();
    self
  }

  pub fn with_bundle(mut self, bundle: BundleSetting) -> Self {
    self.bundle = bundle;
    self
  }

  /// Absolute application root.
  pub fn root_dir(&self) -> PathBuf {
    absolute(&self.root)
  }

  /// Absolute source directory.
  pub fn source_dir(&self) -> PathBuf {
    absolute(&self.root.join(&self.src_path))
  }

  /// `src_path + "/" + handler`, the file build failures are attached to.
  pub fn failure_file(&self) -> String {
    let src = self.src_path.to_string_lossy().replace('\\', "/");
    let src = src.trim_end_matches('/');
    if src.is_empty() {
      self.handler.clone()
    } else {
      format!("{}/{}", src, self.handler)
    }
  }
}

/// `false` disables dependency bundling, `true` selects the defaults and an
/// object configures it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BundleSetting {
  Toggle(bool),
  Config(BundleConfig),
}

impl Default for BundleSetting {
  fn default() -> Self {
    BundleSetting::Toggle(true)
  }
}

impl BundleSetting {
  pub fn is_enabled(&self) -> bool {
    !matches!(self, BundleSetting::Toggle(false))
  }

  /// The effective config. A toggle yields the defaults.
  pub fn config(&self) -> BundleConfig {
    match self {
      BundleSetting::Config(config) => config.clone(),
      BundleSetting::Toggle(_) => BundleConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
  #[default]
  Cjs,
  Esm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
  #[default]
  #[serde(rename = "x86_64")]
  X86_64,
  #[serde(rename = "arm_64", alias = "arm64")]
  Arm64,
}

impl Architecture {
  /// The `GOARCH` value for this architecture.
  pub fn goarch(&self) -> &'static str {
    match self {
      Architecture::X86_64 => "amd64",
      Architecture::Arm64 => "arm64",
    }
  }
}

/// Runtime-specific bundling settings. Every field is optional; adapters
/// ignore the ones that do not apply to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BundleConfig {
  /// File extension to esbuild loader name, e.g. `".png": "file"`.
  pub loader: BTreeMap<String, String>,
  pub banner: Option<String>,
  pub external_modules: Vec<String>,
  /// Dependencies installed into the artifact instead of bundled.
  pub node_modules: Vec<String>,
  pub esbuild: EsbuildConfig,
  pub command_hooks: CommandHooks,
  /// Defaults to on for deployment bundles.
  pub minify: Option<bool>,
  pub sourcemap: Option<bool>,
  pub format: Format,
  pub architecture: Architecture,
  /// Shell commands run in the artifact directory after Python dependencies
  /// are installed.
  pub install_commands: Vec<String>,
  /// Gradle task producing the distribution. Defaults to `build`.
  pub build_task: Option<String>,
  /// Directory under the Gradle build directory holding the distribution
  /// zip. Defaults to `distributions`.
  pub build_output_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EsbuildConfig {
  pub define: BTreeMap<String, String>,
  pub keep_names: bool,
  /// Module exporting an array of esbuild plugins, relative to the root.
  pub plugins: Option<PathBuf>,
}

/// Shell commands run around bundling, in `src_path`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandHooks {
  pub before_bundling: Vec<String>,
  pub before_install: Vec<String>,
  pub after_bundling: Vec<String>,
}

/// Globs a watcher should observe for a function, as absolute patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watcher {
  pub include: Vec<String>,
  pub ignore: Vec<String>,
}

impl Watcher {
  /// Absolute include patterns for `extensions` under `dir`.
  pub fn for_extensions(dir: &Path, extensions: &[&str]) -> Self {
    let include = extensions
      .iter()
      .map(|ext| format!("{}/**/*{}", dir.to_string_lossy().replace('\\', "/"), ext))
      .collect();
    Self {
      include,
      ignore: Vec::new(),
    }
  }

  /// Whether `path` matches an include pattern and no ignore pattern.
  pub fn matches(&self, path: &Path) -> bool {
    let path = absolute(path);
    let options = glob::MatchOptions {
      case_sensitive: true,
      require_literal_separator: true,
      require_literal_leading_dot: false,
    };
    let hit = |patterns: &[String]| {
      patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern)
          .map(|p| p.matches_path_with(&path, options))
          .unwrap_or(false)
      })
    };
    hit(&self.include) && !hit(&self.ignore)
  }
}

/// What `bundle()` hands the downstream packaging step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleOutput {
  /// A self-contained artifact directory.
  Directory { handler: String, directory: PathBuf },
  /// A single prebuilt archive.
  Asset { handler: String, path: PathBuf },
}

impl BundleOutput {
  pub fn handler(&self) -> &str {
    match self {
      BundleOutput::Directory { handler, .. } | BundleOutput::Asset { handler, .. } => handler,
    }
  }

  pub fn path(&self) -> &Path {
    match self {
      BundleOutput::Directory { directory, .. } => directory,
      BundleOutput::Asset { path, .. } => path,
    }
  }
}
