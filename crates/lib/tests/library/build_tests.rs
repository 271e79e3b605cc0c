//! End-to-end build scenarios against a fake script compiler.

use std::sync::atomic::Ordering;

use fnbuild_lib::error::BuildError;
use fnbuild_lib::runtime::{self, BuildOptions, Runtime};
use tracing_test::traced_test;

use super::common::{FakeCompiler, SYNTAX_ERROR, TestEnv, context_with};

const CLEAN: &str = "export const handler = async () => ({ statusCode: 200 });";

fn options(env: &TestEnv) -> BuildOptions {
  BuildOptions::new("fnA", "nodejs18.x", "svc", "index.handler").with_root(env.root())
}

#[tokio::test]
async fn second_build_reuses_warm_session() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::new());
  let opts = options(&env);

  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());
  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());

  assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
  assert_eq!(ctx.scripts().rebuilds("fnA").await, Some(1));
  assert!(
    ctx
      .config()
      .artifact_dir(env.root(), "fnA")
      .join("svc/index.js")
      .exists()
  );
}

#[tokio::test]
async fn failed_rebuild_keeps_warm_session() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::new());
  let opts = options(&env);

  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());

  env.write_file("svc/index.ts", SYNTAX_ERROR);
  let issues = runtime::build(&ctx, &opts).await.unwrap();
  assert_eq!(issues.len(), 1);
  assert_eq!(issues[0].location.file, "svc/index.ts");
  assert_eq!(issues[0].location.line, Some(1));
  assert!(ctx.scripts().is_warm("fnA"));
  assert_eq!(ctx.scripts().rebuilds("fnA").await, Some(0));

  env.write_file("svc/index.ts", CLEAN);
  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());
  assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
  assert_eq!(ctx.scripts().rebuilds("fnA").await, Some(1));
}

#[tokio::test]
async fn failed_cold_build_leaves_function_cold() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", SYNTAX_ERROR);
  let (ctx, counters) = context_with(FakeCompiler::new());
  let opts = options(&env);

  assert_eq!(runtime::build(&ctx, &opts).await.unwrap().len(), 1);
  assert!(!ctx.scripts().is_warm("fnA"));
  assert_eq!(ctx.scripts().rebuilds("fnA").await, None);

  env.write_file("svc/index.ts", CLEAN);
  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());
  assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[traced_test]
async fn dead_session_restarts_cold() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::new());
  let opts = options(&env);

  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());
  counters.alive.store(false, Ordering::SeqCst);
  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());

  assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
  assert_eq!(counters.rebuilds.load(Ordering::SeqCst), 0);
  assert!(logs_contain("discarding stale warm session"));
}

#[tokio::test]
async fn changed_options_restart_cold() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::new());

  let opts = options(&env);
  assert!(runtime::build(&ctx, &opts).await.unwrap().is_empty());
  let unbundled = opts.clone().with_bundle(fnbuild_lib::runtime::BundleSetting::Toggle(false));
  assert!(runtime::build(&ctx, &unbundled).await.unwrap().is_empty());

  assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn same_function_builds_are_serialized() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::with_delay(std::time::Duration::from_millis(50)));
  let opts = options(&env);

  let (first, second) = tokio::join!(runtime::build(&ctx, &opts), runtime::build(&ctx, &opts));
  assert!(first.unwrap().is_empty());
  assert!(second.unwrap().is_empty());

  assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
  assert_eq!(counters.rebuilds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn should_build_tracks_recorded_inputs() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  env.write_file("svc/unused.ts", CLEAN);
  let (ctx, _) = context_with(FakeCompiler::new());
  let instructions = runtime::instructions(&ctx, &options(&env)).unwrap();

  assert!(instructions.should_build(&[env.root().join("svc/unused.ts")]));

  assert!(instructions.build().await.unwrap().is_empty());
  assert!(instructions.should_build(&[env.root().join("svc/index.ts")]));
  assert!(!instructions.should_build(&[env.root().join("svc/unused.ts")]));
}

#[test]
fn unknown_runtime_fails_resolution() {
  match Runtime::resolve("unknown-runtime-123") {
    Err(BuildError::UnknownRuntime(name)) => assert_eq!(name, "unknown-runtime-123"),
    other => panic!("expected unknown runtime, got {:?}", other),
  }

  let env = TestEnv::new();
  let (ctx, _) = context_with(FakeCompiler::new());
  let opts = BuildOptions::new("fnA", "unknown-runtime-123", "svc", "index.handler").with_root(env.root());
  assert!(matches!(
    runtime::instructions(&ctx, &opts),
    Err(BuildError::UnknownRuntime(_))
  ));
  assert!(!env.root().join(".fnbuild").exists());
}
