//! Library integration tests.

mod common;

mod build_tests;
mod bundle_tests;
mod watch_tests;
