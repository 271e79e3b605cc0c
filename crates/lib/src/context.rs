//! The build context: every piece of engine state, owned in one place.
//!
//! Callers create one context per session and pass it to every operation.
//! Two contexts never share caches, which keeps tests independent.

use std::sync::Arc;

use crate::check::Coalescer;
use crate::config::EngineConfig;
use crate::runtime::node::cache::ScriptCache;
use crate::runtime::node::compiler::{EsbuildCompiler, ScriptCompiler};
use crate::runtime::node::install::InstallCache;

pub struct BuildContext {
  config: EngineConfig,
  compiler: Arc<dyn ScriptCompiler>,
  scripts: ScriptCache,
  installs: InstallCache,
  checks: Coalescer,
}

impl BuildContext {
  /// A context compiling scripts with esbuild through `config.node`.
  pub fn new(config: EngineConfig) -> Self {
    let compiler = Arc::new(EsbuildCompiler::new(config.node.clone(), config.state_dir.clone()));
    Self::with_compiler(config, compiler)
  }

  /// A context with an explicit script compiler.
  pub fn with_compiler(config: EngineConfig, compiler: Arc<dyn ScriptCompiler>) -> Self {
    Self {
      config,
      compiler,
      scripts: ScriptCache::new(),
      installs: InstallCache::new(),
      checks: Coalescer::new(),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn compiler(&self) -> &dyn ScriptCompiler {
    self.compiler.as_ref()
  }

  /// Warm script sessions and their recorded inputs.
  pub fn scripts(&self) -> &ScriptCache {
    &self.scripts
  }

  pub fn installs(&self) -> &InstallCache {
    &self.installs
  }

  pub fn coalescer(&self) -> &Coalescer {
    &self.checks
  }
}
