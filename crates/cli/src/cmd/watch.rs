//! Implementation of the `fnbuild watch` command.
//!
//! Builds every selected function once, then feeds filesystem events from the
//! application root into one watch loop per function until interrupted.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fnbuild_lib::check::CheckOutcome;
use fnbuild_lib::config::EngineConfig;
use fnbuild_lib::context::BuildContext;
use fnbuild_lib::issue::Issue;
use fnbuild_lib::runtime::{self, Instructions};
use fnbuild_lib::watch::{FunctionWatch, WatchEvent, WatchReport, WatchUpdate};

use crate::app::App;
use crate::output::{format_duration, print_error, print_info, print_issues, print_success, print_warning};

/// Directories whose changes never trigger a rebuild.
const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];

pub fn cmd_watch(app: &App, config: EngineConfig, ids: &[String], debounce: Duration) -> Result<()> {
  let state_dir = app.root.join(&config.state_dir);
  let ctx = Arc::new(BuildContext::new(config));

  let mut functions = Vec::new();
  for opts in app.select(ids)? {
    let instructions =
      runtime::instructions(&ctx, opts).with_context(|| format!("Failed to prepare {}", opts.id))?;
    functions.push(Arc::new(instructions));
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(watch(&app.root, &state_dir, functions, debounce))
}

async fn watch(root: &Path, state_dir: &Path, functions: Vec<Arc<Instructions>>, debounce: Duration) -> Result<()> {
  for instructions in &functions {
    initial_build(instructions).await;
  }

  let (update_tx, mut updates) = mpsc::unbounded_channel();
  let watches: Vec<FunctionWatch> = functions
    .into_iter()
    .map(|instructions| FunctionWatch::spawn(instructions, true, update_tx.clone()))
    .collect();
  drop(update_tx);

  let printer = tokio::spawn(async move {
    while let Some(update) = updates.recv().await {
      print_update(&update);
    }
  });

  let (event_tx, mut events) = mpsc::unbounded_channel();
  let mut watcher = notify::recommended_watcher(move |event| {
    let _ = event_tx.send(event);
  })
  .context("Failed to create file watcher")?;
  watcher
    .watch(root, RecursiveMode::Recursive)
    .with_context(|| format!("Failed to watch {}", root.display()))?;

  print_info(&format!("Watching {} for changes. Press Ctrl+C to stop.", root.display()));

  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);
  loop {
    let first: notify::Result<notify::Event> = tokio::select! {
      event = events.recv() => match event {
        Some(event) => event,
        None => break,
      },
      _ = &mut ctrl_c => break,
    };

    // Collect the rest of a save storm before dispatching.
    let mut changed = BTreeSet::new();
    collect(first, root, state_dir, &mut changed);
    let deadline = tokio::time::sleep(debounce);
    tokio::pin!(deadline);
    loop {
      tokio::select! {
        Some(event) = events.recv() => collect(event, root, state_dir, &mut changed),
        _ = &mut deadline => break,
      }
    }

    for path in changed {
      debug!(file = ?path, "file changed");
      for watch in &watches {
        watch.send(WatchEvent::FileChange(path.clone()));
      }
    }
  }

  drop(watcher);
  for watch in watches {
    watch.shutdown().await;
  }
  let _ = printer.await;
  Ok(())
}

async fn initial_build(instructions: &Instructions) {
  if !instructions.can_build() {
    return;
  }
  let start = std::time::Instant::now();
  let issues = instructions.build().await.unwrap_or_default();
  print_build(instructions.id(), &issues, start.elapsed());
}

fn collect(event: notify::Result<notify::Event>, root: &Path, state_dir: &Path, changed: &mut BTreeSet<PathBuf>) {
  let event = match event {
    Ok(event) => event,
    Err(e) => {
      warn!(error = %e, "file watcher error");
      return;
    }
  };
  if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
    return;
  }
  for path in event.paths {
    if !ignored(&path, root, state_dir) {
      changed.insert(path);
    }
  }
}

fn ignored(path: &Path, root: &Path, state_dir: &Path) -> bool {
  if path.starts_with(state_dir) {
    return true;
  }
  let relative = path.strip_prefix(root).unwrap_or(path);
  relative
    .components()
    .any(|c| matches!(c, Component::Normal(name) if IGNORED_DIRS.iter().any(|dir| name == *dir)))
}

fn print_build(id: &str, issues: &[Issue], elapsed: Duration) {
  if issues.is_empty() {
    print_success(&format!("{} built in {}", id, format_duration(elapsed)));
  } else {
    print_error(&format!("{} failed with {} issue(s)", id, issues.len()));
    print_issues(issues);
  }
}

fn print_update(update: &WatchUpdate) {
  match &update.report {
    WatchReport::BuildStarted => print_info(&format!("{} rebuilding", update.id)),
    WatchReport::BuildFinished { issues, elapsed } => print_build(&update.id, issues, *elapsed),
    WatchReport::CheckFinished { kind, outcome } => match outcome {
      CheckOutcome::Completed(issues) if issues.is_empty() => {
        print_success(&format!("{} {} check passed", update.id, kind))
      }
      CheckOutcome::Completed(issues) => {
        print_warning(&format!("{} {} check reported issues", update.id, kind));
        print_issues(issues);
      }
      CheckOutcome::Superseded => debug!(id = %update.id, check = %kind, "check superseded"),
    },
    WatchReport::Settled => debug!(id = %update.id, "idle"),
  }
}
