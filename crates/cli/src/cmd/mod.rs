mod build;
mod bundle;
mod check;
mod watch;

pub use build::cmd_build;
pub use bundle::cmd_bundle;
pub use check::cmd_check;
pub use watch::cmd_watch;
