//! Per-function watch loop.
//!
//! Each watched function runs a small state machine on its own task:
//!
//! ```text
//! Idle --change--> Building --done--> Building   (a change arrived meanwhile)
//!                           --done--> Checking --all done--> Idle
//!                                     Checking --change--> Building
//! ```
//!
//! A file change only counts when the function is warm (it has been invoked
//! or was started warm), the file matches the watcher globs and the
//! function's `should_build` accepts it. Progress is reported on a channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info};

use crate::check::{CheckKind, CheckOutcome};
use crate::issue::Issue;
use crate::runtime::Instructions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
  FileChange(PathBuf),
  /// The function was invoked; from now on changes trigger builds.
  Invoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
  Idle,
  Building,
  Checking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchReport {
  BuildStarted,
  BuildFinished { issues: Vec<Issue>, elapsed: Duration },
  CheckFinished { kind: CheckKind, outcome: CheckOutcome },
  /// Back to idle after building and checking.
  Settled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchUpdate {
  pub id: String,
  pub report: WatchReport,
}

/// Handle to a running watch loop. Dropping every handle stops the loop once
/// its current step finishes.
pub struct FunctionWatch {
  events: mpsc::UnboundedSender<WatchEvent>,
  task: JoinHandle<()>,
}

impl FunctionWatch {
  /// Start watching one function.
  ///
  /// # Arguments
  ///
  /// * `instructions` - The function's instructions
  /// * `warm` - Whether changes trigger builds before the first invoke
  /// * `updates` - Where progress reports go
  pub fn spawn(instructions: Arc<Instructions>, warm: bool, updates: mpsc::UnboundedSender<WatchUpdate>) -> Self {
    let (events, receiver) = mpsc::unbounded_channel();
    let machine = Machine {
      instructions,
      updates,
      warm,
      dirty: false,
      state: WatchState::Idle,
      started: Instant::now(),
      build: None,
      checks: JoinSet::new(),
    };
    let task = tokio::spawn(machine.run(receiver));
    Self { events, task }
  }

  /// Queue an event. Returns false if the loop has stopped.
  pub fn send(&self, event: WatchEvent) -> bool {
    self.events.send(event).is_ok()
  }

  /// Stop the loop and wait for it to exit.
  pub async fn shutdown(self) {
    drop(self.events);
    let _ = self.task.await;
  }
}

struct Machine {
  instructions: Arc<Instructions>,
  updates: mpsc::UnboundedSender<WatchUpdate>,
  warm: bool,
  dirty: bool,
  state: WatchState,
  started: Instant,
  build: Option<JoinHandle<Vec<Issue>>>,
  checks: JoinSet<(CheckKind, Option<CheckOutcome>)>,
}

async fn finished<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
  match task {
    Some(handle) => handle.await,
    None => std::future::pending().await,
  }
}

impl Machine {
  async fn run(mut self, mut events: mpsc::UnboundedReceiver<WatchEvent>) {
    loop {
      tokio::select! {
        event = events.recv() => match event {
          Some(event) => self.on_event(event),
          None => break,
        },
        result = finished(&mut self.build) => {
          self.build = None;
          self.on_build_done(result);
        }
        Some(done) = self.checks.join_next(), if self.state == WatchState::Checking => {
          self.on_check_done(done);
        }
      }
    }

    if let Some(build) = self.build.take() {
      build.abort();
    }
    self.checks.abort_all();
    debug!(id = %self.instructions.id(), "watch loop stopped");
  }

  fn report(&self, report: WatchReport) {
    let _ = self.updates.send(WatchUpdate {
      id: self.instructions.id().to_string(),
      report,
    });
  }

  fn triggers(&self, path: &Path) -> bool {
    self.warm && self.instructions.watcher.matches(path) && self.instructions.should_build(&[path.to_path_buf()])
  }

  fn on_event(&mut self, event: WatchEvent) {
    match event {
      WatchEvent::Invoke => {
        self.warm = true;
      }
      WatchEvent::FileChange(path) => {
        if !self.triggers(&path) {
          return;
        }
        debug!(id = %self.instructions.id(), file = ?path, state = ?self.state, "file change");
        match self.state {
          WatchState::Idle => self.start_build(),
          WatchState::Building => self.dirty = true,
          WatchState::Checking => {
            self.checks = JoinSet::new();
            self.start_build();
          }
        }
      }
    }
  }

  fn start_build(&mut self) {
    self.state = WatchState::Building;
    self.dirty = false;
    self.started = Instant::now();
    self.report(WatchReport::BuildStarted);

    let instructions = self.instructions.clone();
    self.build = Some(tokio::spawn(async move {
      instructions.build().await.unwrap_or_default()
    }));
  }

  fn on_build_done(&mut self, result: Result<Vec<Issue>, JoinError>) {
    let issues = result.unwrap_or_else(|e| {
      vec![Issue::in_file(
        self.instructions.id(),
        format!("build task failed: {}", e),
      )]
    });
    let elapsed = self.started.elapsed();
    info!(id = %self.instructions.id(), issues = issues.len(), elapsed = ?elapsed, "build finished");
    self.report(WatchReport::BuildFinished { issues, elapsed });

    if self.dirty {
      self.start_build();
    } else {
      self.start_checks();
    }
  }

  fn start_checks(&mut self) {
    let kinds = self.instructions.enabled_checks();
    if kinds.is_empty() {
      self.settle();
      return;
    }

    self.state = WatchState::Checking;
    for kind in kinds {
      let instructions = self.instructions.clone();
      self.checks.spawn(async move { (kind, instructions.check(kind).await) });
    }
  }

  fn on_check_done(&mut self, done: Result<(CheckKind, Option<CheckOutcome>), JoinError>) {
    if let Ok((kind, Some(outcome))) = done {
      self.report(WatchReport::CheckFinished { kind, outcome });
    }
    if self.checks.is_empty() {
      self.settle();
    }
  }

  fn settle(&mut self) {
    self.state = WatchState::Idle;
    self.report(WatchReport::Settled);
  }
}
