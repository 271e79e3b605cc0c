//! Incremental build cache for managed-script functions.
//!
//! One entry per function id. The warm session sits behind a per-id async
//! lock that is held for the whole of a build, so builds of the same function
//! run one at a time while different functions build concurrently. Recorded
//! input sets live in a separate map so [`ScriptCache::should_build`] can
//! answer without waiting on an in-flight build.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::compiler::WarmBuild;
use crate::util::hash::ObjectHash;

/// A warm compiler session for one function.
pub struct WarmEntry {
  pub session: Box<dyn WarmBuild>,
  /// Hash of the compile request the session was started with.
  pub fingerprint: ObjectHash,
  /// Successful incremental rebuilds served by this session.
  pub rebuilds: u64,
}

pub type Slot = Arc<AsyncMutex<Option<WarmEntry>>>;

#[derive(Default)]
pub struct ScriptCache {
  slots: Mutex<HashMap<String, Slot>>,
  inputs: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl ScriptCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// The lockable slot for `id`, created empty on first use.
  pub fn slot(&self, id: &str) -> Slot {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    slots.entry(id.to_string()).or_default().clone()
  }

  /// Whether any of `files` (root-relative, `/`-separated) was an input of the
  /// last successful build. Always true before the first one.
  pub fn should_build(&self, id: &str, files: &[String]) -> bool {
    let inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
    match inputs.get(id) {
      None => true,
      Some(recorded) => files.iter().any(|file| recorded.contains(file)),
    }
  }

  /// Replace the recorded inputs for `id`.
  pub fn record_inputs(&self, id: &str, files: BTreeSet<String>) {
    debug!(id = %id, inputs = files.len(), "recorded build inputs");
    let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
    inputs.insert(id.to_string(), files);
  }

  /// Drop the recorded inputs for `id`, making it cold again.
  pub fn forget_inputs(&self, id: &str) {
    let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
    inputs.remove(id);
  }

  /// Whether `id` has completed a successful build.
  pub fn is_warm(&self, id: &str) -> bool {
    let inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
    inputs.contains_key(id)
  }

  /// Incremental rebuilds served for `id`, `None` when cold. Waits for any
  /// in-flight build of the same function.
  pub async fn rebuilds(&self, id: &str) -> Option<u64> {
    let slot = self.slot(id);
    let entry = slot.lock().await;
    entry.as_ref().map(|e| e.rebuilds)
  }
}
