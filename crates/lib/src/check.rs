//! Coalesced type-check and lint runs.
//!
//! A save storm in watch mode can request the same check many times while an
//! earlier run is still going. The [`Coalescer`] keeps at most one process in
//! flight per `(kind, source directory)`: each request bumps that key's
//! generation and kills the previous process. Only the run whose generation is
//! still current when it exits reports issues; the others resolve
//! [`CheckOutcome::Superseded`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::issue::Issue;
use crate::process::{self, CommandSpec};

/// A named side check that runs alongside, not as part of, a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
  Type,
  Lint,
}

impl fmt::Display for CheckKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CheckKind::Type => write!(f, "type"),
      CheckKind::Lint => write!(f, "lint"),
    }
  }
}

impl FromStr for CheckKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "type" => Ok(CheckKind::Type),
      "lint" => Ok(CheckKind::Lint),
      other => Err(format!("unknown check \"{}\", expected \"type\" or \"lint\"", other)),
    }
  }
}

/// How a check request resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
  /// The run finished and was still the latest request for its key.
  Completed(Vec<Issue>),
  /// A newer request for the same key replaced this one.
  Superseded,
}

impl CheckOutcome {
  /// Issues of a completed run, `None` if superseded.
  pub fn issues(&self) -> Option<&[Issue]> {
    match self {
      CheckOutcome::Completed(issues) => Some(issues),
      CheckOutcome::Superseded => None,
    }
  }
}

type SlotKey = (CheckKind, PathBuf);

/// Directories reached through different spellings or symlinks share a slot.
fn slot_key(kind: CheckKind, source_dir: &Path) -> SlotKey {
  let dir = dunce::canonicalize(source_dir).unwrap_or_else(|_| source_dir.to_path_buf());
  (kind, dir)
}

struct Slot {
  generation: u64,
  cancel: Option<oneshot::Sender<()>>,
}

/// Releases a run's slot when the run ends, including when its future is
/// dropped before the process exits.
struct RunGuard<'a> {
  coalescer: &'a Coalescer,
  key: SlotKey,
  generation: u64,
}

impl RunGuard<'_> {
  /// Release the slot. Returns whether this run was still the latest.
  fn finish(self) -> bool {
    self.release()
  }

  fn release(&self) -> bool {
    let mut slots = self.coalescer.slots.lock().unwrap_or_else(PoisonError::into_inner);
    match slots.get_mut(&self.key) {
      Some(slot) if slot.generation == self.generation => {
        slot.cancel = None;
        true
      }
      _ => false,
    }
  }
}

impl Drop for RunGuard<'_> {
  fn drop(&mut self) {
    self.release();
  }
}

#[derive(Default)]
pub struct Coalescer {
  slots: Mutex<HashMap<SlotKey, Slot>>,
}

impl Coalescer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `command` in `source_dir` as the latest `kind` check for that
  /// directory.
  ///
  /// There is no delay before the process starts. Any run already in flight
  /// for the same key is killed and resolves `Superseded`.
  ///
  /// # Returns
  ///
  /// `Completed([])` when the tool printed nothing, `Completed` with a single
  /// issue located at `source_dir` carrying the raw output otherwise.
  pub async fn check(&self, kind: CheckKind, source_dir: &Path, command: &CommandSpec) -> CheckOutcome {
    let key = slot_key(kind, source_dir);
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let generation = {
      let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      let slot = slots.entry(key.clone()).or_insert(Slot {
        generation: 0,
        cancel: None,
      });
      if let Some(previous) = slot.cancel.take() {
        debug!(check = %kind, dir = ?source_dir, "superseding in-flight check");
        let _ = previous.send(());
      }
      slot.generation += 1;
      slot.cancel = Some(cancel_tx);
      slot.generation
    };

    let guard = RunGuard {
      coalescer: self,
      key,
      generation,
    };
    let result = process::capture_cancellable(command, source_dir, cancel_rx).await;
    let current = guard.finish();
    if !current {
      debug!(check = %kind, dir = ?source_dir, generation, "discarding superseded check result");
      return CheckOutcome::Superseded;
    }

    let file = source_dir.display().to_string();
    match result {
      Ok(captured) => {
        let output = captured.output.trim();
        if output.is_empty() {
          CheckOutcome::Completed(Vec::new())
        } else {
          CheckOutcome::Completed(vec![Issue::in_file(file, output)])
        }
      }
      Err(e) => CheckOutcome::Completed(vec![Issue::in_file(
        file,
        format!("failed to start {}: {}", command.command, e),
      )]),
    }
  }

  /// Whether a run for this key is currently in flight.
  pub fn in_flight(&self, kind: CheckKind, source_dir: &Path) -> bool {
    let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    slots
      .get(&slot_key(kind, source_dir))
      .is_some_and(|slot| slot.cancel.is_some())
  }
}
