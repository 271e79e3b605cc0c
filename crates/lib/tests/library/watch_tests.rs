//! Watch loop behaviour with a slow fake compiler.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use fnbuild_lib::check::{CheckKind, CheckOutcome};
use fnbuild_lib::runtime::{self, BuildOptions, Instructions};
use fnbuild_lib::watch::{FunctionWatch, WatchEvent, WatchReport, WatchUpdate};
use tokio::sync::mpsc;

use super::common::{FakeCompiler, TestEnv, context_with};

const CLEAN: &str = "export const handler = async () => ({ statusCode: 200 });";

async fn next(updates: &mut mpsc::UnboundedReceiver<WatchUpdate>) -> WatchReport {
  let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
    .await
    .expect("timed out waiting for a watch report")
    .expect("watch loop stopped");
  assert_eq!(update.id, "fnA");
  update.report
}

/// Reports up to and including the next `Settled`.
async fn until_settled(updates: &mut mpsc::UnboundedReceiver<WatchUpdate>) -> Vec<WatchReport> {
  let mut reports = Vec::new();
  loop {
    let report = next(updates).await;
    let settled = report == WatchReport::Settled;
    reports.push(report);
    if settled {
      return reports;
    }
  }
}

fn function(env: &TestEnv, compiler: FakeCompiler) -> (Arc<Instructions>, Arc<super::common::Counters>) {
  let (ctx, counters) = context_with(compiler);
  let opts = BuildOptions::new("fnA", "nodejs18.x", "svc", "index.handler").with_root(env.root());
  (Arc::new(runtime::instructions(&ctx, &opts).unwrap()), counters)
}

#[tokio::test]
async fn change_during_build_triggers_one_rebuild() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (instructions, counters) = function(&env, FakeCompiler::with_delay(Duration::from_millis(200)));
  let (tx, mut updates) = mpsc::unbounded_channel();
  let watch = FunctionWatch::spawn(instructions, true, tx);
  let file = env.root().join("svc/index.ts");

  watch.send(WatchEvent::FileChange(file.clone()));
  assert_eq!(next(&mut updates).await, WatchReport::BuildStarted);
  watch.send(WatchEvent::FileChange(file.clone()));
  watch.send(WatchEvent::FileChange(file));

  let reports = until_settled(&mut updates).await;
  let started = reports.iter().filter(|r| **r == WatchReport::BuildStarted).count();
  let finished = reports
    .iter()
    .filter(|r| matches!(r, WatchReport::BuildFinished { issues, .. } if issues.is_empty()))
    .count();

  assert_eq!(started, 1);
  assert_eq!(finished, 2);
  assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
  assert_eq!(counters.rebuilds.load(Ordering::SeqCst), 1);

  watch.shutdown().await;
}

#[tokio::test]
async fn changes_outside_inputs_are_ignored_once_warm() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  env.write_file("svc/unused.ts", CLEAN);
  let (instructions, counters) = function(&env, FakeCompiler::new());
  let (tx, mut updates) = mpsc::unbounded_channel();
  let watch = FunctionWatch::spawn(instructions, true, tx);

  watch.send(WatchEvent::FileChange(env.root().join("svc/index.ts")));
  until_settled(&mut updates).await;

  watch.send(WatchEvent::FileChange(env.root().join("svc/unused.ts")));
  watch.send(WatchEvent::FileChange(env.root().join("svc/index.ts")));
  let reports = until_settled(&mut updates).await;

  assert_eq!(reports[0], WatchReport::BuildStarted);
  assert_eq!(reports.len(), 3);
  assert_eq!(counters.rebuilds.load(Ordering::SeqCst), 1);

  watch.shutdown().await;
}

#[tokio::test]
#[cfg(unix)]
async fn checks_run_after_each_build() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  env.write_file("svc/tsconfig.json", "{}");
  env.write_executable(
    "node_modules/.bin/tsc",
    "echo \"index.ts(1,1): error TS2304: Cannot find name 'x'.\"",
  );

  let (instructions, _) = function(&env, FakeCompiler::new());
  assert_eq!(instructions.enabled_checks(), vec![CheckKind::Type]);
  let (tx, mut updates) = mpsc::unbounded_channel();
  let watch = FunctionWatch::spawn(instructions, true, tx);

  watch.send(WatchEvent::FileChange(env.root().join("svc/index.ts")));
  let reports = until_settled(&mut updates).await;

  let outcome = reports
    .iter()
    .find_map(|report| match report {
      WatchReport::CheckFinished { kind: CheckKind::Type, outcome } => Some(outcome.clone()),
      _ => None,
    })
    .expect("type check should report");
  match outcome {
    CheckOutcome::Completed(issues) => {
      assert_eq!(issues.len(), 1);
      assert!(issues[0].message.contains("TS2304"));
    }
    CheckOutcome::Superseded => panic!("a single check cannot be superseded"),
  }

  watch.shutdown().await;
}
