//! fnbuild-lib: build and bundle orchestration for serverless functions
//!
//! This crate provides the engine behind the `fnbuild` CLI:
//! - `runtime`: resolves a runtime identifier and produces per-function
//!   `Instructions` (build, bundle, checks, run command, watch globs)
//! - `context`: the `BuildContext` owning every cache for one session
//! - `check`: coalesced type and lint checks
//! - `watch`: the per-function rebuild loop driven by file changes

pub mod check;
pub mod config;
pub mod consts;
pub mod context;
pub mod error;
pub mod issue;
pub mod process;
pub mod runtime;
pub mod util;
pub mod watch;
