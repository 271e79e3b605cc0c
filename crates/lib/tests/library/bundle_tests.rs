//! Deployment bundle scenarios against a fake script compiler.

use std::sync::atomic::Ordering;

use serial_test::serial;

use fnbuild_lib::error::BuildError;
use fnbuild_lib::runtime::{self, BuildOptions, BundleConfig, BundleOutput, BundleSetting, CommandHooks};
use fnbuild_lib::util::hash::hash_directory;

use super::common::{FakeCompiler, SYNTAX_ERROR, TestEnv, context_with};

const CLEAN: &str = "export const handler = async () => ({ statusCode: 200 });";

fn options(env: &TestEnv) -> BuildOptions {
  BuildOptions::new("fnA", "nodejs18.x", "svc", "index.handler").with_root(env.root())
}

#[test]
fn bundle_produces_self_contained_directory() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::new());

  let output = runtime::bundle(&ctx, &options(&env)).unwrap().unwrap();

  let artifact = ctx.config().artifact_dir(env.root(), "fnA");
  match &output {
    BundleOutput::Directory { handler, directory } => {
      assert_eq!(handler, "svc/index.handler");
      assert_eq!(directory, &artifact);
    }
    other => panic!("expected a directory, got {:?}", other),
  }
  assert!(artifact.join("svc/index.js").exists());
  let manifest = std::fs::read_to_string(artifact.join("package.json")).unwrap();
  assert!(manifest.contains("commonjs"));
  assert_eq!(counters.bundles.load(Ordering::SeqCst), 1);
}

#[test]
fn repeated_bundles_are_identical() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, _) = context_with(FakeCompiler::new());
  let opts = options(&env);

  let first = runtime::bundle(&ctx, &opts).unwrap().unwrap();
  let first_hash = hash_directory(first.path(), &[]).unwrap();

  // Leftovers from a previous run must not survive.
  std::fs::write(first.path().join("stale.txt"), "old").unwrap();

  let second = runtime::bundle(&ctx, &opts).unwrap().unwrap();
  assert_eq!(first, second);
  assert_eq!(hash_directory(second.path(), &[]).unwrap(), first_hash);
}

#[test]
fn missing_handler_fails_before_touching_artifacts() {
  let env = TestEnv::new();
  env.write_file("svc/other.ts", CLEAN);
  env.write_file(".fnbuild/artifacts/fnA/keep.txt", "previous bundle");
  let (ctx, counters) = context_with(FakeCompiler::new());

  let err = runtime::bundle(&ctx, &options(&env)).unwrap_err();

  assert!(matches!(err, BuildError::HandlerNotFound { ref handler, .. } if handler == "index.handler"));
  assert!(env.root().join(".fnbuild/artifacts/fnA/keep.txt").exists());
  assert_eq!(counters.bundles.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_handler_creates_no_artifact_directory() {
  let env = TestEnv::new();
  let (ctx, _) = context_with(FakeCompiler::new());

  assert!(runtime::bundle(&ctx, &options(&env)).is_err());
  assert!(!ctx.config().artifacts_dir(env.root()).exists());
}

#[test]
fn compile_errors_fail_the_bundle() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", SYNTAX_ERROR);
  let (ctx, _) = context_with(FakeCompiler::new());

  match runtime::bundle(&ctx, &options(&env)) {
    Err(BuildError::Transpile { message }) => assert!(message.contains("Unexpected token")),
    other => panic!("expected a transpile error, got {:?}", other),
  }
}

#[test]
fn missing_plugins_file_is_a_configuration_error() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::new());
  let mut config = BundleConfig::default();
  config.esbuild.plugins = Some("plugins.js".into());
  let opts = options(&env).with_bundle(BundleSetting::Config(config));

  assert!(matches!(
    runtime::bundle(&ctx, &opts),
    Err(BuildError::MissingPlugins { .. })
  ));
  assert_eq!(counters.bundles.load(Ordering::SeqCst), 0);
}

#[test]
#[cfg(unix)]
fn command_hooks_run_around_bundling() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, _) = context_with(FakeCompiler::new());
  let config = BundleConfig {
    command_hooks: CommandHooks {
      before_bundling: vec!["echo before >> hooks.log".to_string()],
      before_install: vec!["echo install >> hooks.log".to_string()],
      after_bundling: vec!["echo after >> hooks.log".to_string()],
    },
    ..BundleConfig::default()
  };
  let opts = options(&env).with_bundle(BundleSetting::Config(config));

  runtime::bundle(&ctx, &opts).unwrap();

  let log = std::fs::read_to_string(env.root().join("svc/hooks.log")).unwrap();
  assert_eq!(log.lines().collect::<Vec<_>>(), vec!["before", "install", "after"]);
}

#[test]
#[cfg(unix)]
fn failing_hook_aborts_the_bundle() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  let (ctx, counters) = context_with(FakeCompiler::new());
  let config = BundleConfig {
    command_hooks: CommandHooks {
      before_bundling: vec!["exit 3".to_string()],
      ..CommandHooks::default()
    },
    ..BundleConfig::default()
  };
  let opts = options(&env).with_bundle(BundleSetting::Config(config));

  match runtime::bundle(&ctx, &opts) {
    Err(BuildError::Hook { stage, .. }) => assert_eq!(stage, "beforeBundling"),
    other => panic!("expected a hook error, got {:?}", other),
  }
  assert_eq!(counters.bundles.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
#[cfg(unix)]
fn installed_modules_survive_rebundling() {
  let env = TestEnv::new();
  env.write_file("svc/index.ts", CLEAN);
  env.write_file("svc/package.json", r#"{ "dependencies": { "pg": "8.11.0" } }"#);
  env.write_file("package-lock.json", "{}");
  let runs = env.root().join("npm-runs.log");
  env.write_executable(
    "bin/npm",
    &format!(
      "echo install >> '{}'\nmkdir -p node_modules/pg\necho 'module.exports = {{}}' > node_modules/pg/index.js",
      runs.display()
    ),
  );
  let (ctx, _) = context_with(FakeCompiler::new());
  let config = BundleConfig {
    node_modules: vec!["pg".to_string()],
    ..BundleConfig::default()
  };
  let opts = options(&env).with_bundle(BundleSetting::Config(config));

  let path = format!("{}:{}", env.root().join("bin").display(), std::env::var("PATH").unwrap_or_default());
  let (first, second) = temp_env::with_var("PATH", Some(path), || {
    let first = runtime::bundle(&ctx, &opts).unwrap().unwrap();
    let first_hash = hash_directory(first.path(), &[]).unwrap();
    let second = runtime::bundle(&ctx, &opts).unwrap().unwrap();
    (first_hash, second)
  });

  assert!(second.path().join("node_modules/pg/index.js").exists());
  assert_eq!(hash_directory(second.path(), &[]).unwrap(), first);
  assert_eq!(std::fs::read_to_string(&runs).unwrap().lines().count(), 1);
}
