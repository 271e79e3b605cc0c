//! Crate-wide constants.

pub const APP_NAME: &str = "fnbuild";

/// Default state directory, relative to the application root.
pub const DEFAULT_STATE_DIR: &str = ".fnbuild";

/// Subdirectory of the state directory holding per-function artifacts.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Subdirectory of the state directory holding reusable `node_modules` installs.
pub const INSTALLS_DIR: &str = "installs";

/// Length of the truncated hash used for cache keys.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Source extensions tried when resolving a script handler, in priority order.
pub const SCRIPT_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs"];
