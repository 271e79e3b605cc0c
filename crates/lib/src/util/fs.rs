//! Filesystem helpers shared by the runtime adapters.

use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

/// Search `start` and each of its ancestors for an entry named `name`.
///
/// Returns the full path of the first match.
pub fn find_up(start: &Path, name: &str) -> Option<PathBuf> {
  let start = absolute(start);
  start.ancestors().map(|dir| dir.join(name)).find(|candidate| candidate.exists())
}

/// Like [`find_up`], but tries each name in order at every level before moving
/// to the parent directory.
pub fn find_up_any(start: &Path, names: &[&str]) -> Option<PathBuf> {
  let start = absolute(start);
  for dir in start.ancestors() {
    for name in names {
      let candidate = dir.join(name);
      if candidate.exists() {
        return Some(candidate);
      }
    }
  }
  None
}

/// Make `path` absolute against the current directory and fold `.` and `..`
/// components, without touching the filesystem.
pub fn absolute(path: &Path) -> PathBuf {
  let joined = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
  let mut normalized = PathBuf::new();
  for component in joined.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        normalized.pop();
      }
      other => normalized.push(other),
    }
  }
  normalized
}

/// Whether `path` lies inside `parent` (or is `parent` itself).
pub fn is_child(parent: &Path, path: &Path) -> bool {
  absolute(path).starts_with(absolute(parent))
}

/// Render a path with `/` separators regardless of platform.
pub fn to_posix(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .filter(|s| s != "/" && s != "\\")
    .collect::<Vec<_>>()
    .join("/")
}

/// `path` relative to `base`, `/`-separated. Paths outside `base` are returned
/// absolute.
pub fn relative_posix(base: &Path, path: &Path) -> String {
  let base = absolute(base);
  let path = absolute(path);
  match path.strip_prefix(&base) {
    Ok(rel) => to_posix(rel),
    Err(_) => path.to_string_lossy().replace('\\', "/"),
  }
}

/// `path` relative to `base` with any `node_modules` segments removed.
///
/// Sources installed as packages keep their layout in the artifact directory
/// without a `node_modules` prefix.
pub fn artifact_relative(base: &Path, path: &Path) -> PathBuf {
  let base = absolute(base);
  let path = absolute(path);
  let rel = path.strip_prefix(&base).unwrap_or(&path);
  rel
    .components()
    .filter(|c| matches!(c, Component::Normal(name) if name.to_str() != Some("node_modules")))
    .collect()
}

/// Recursively copy `src` into `dst`, skipping entries whose file name is in
/// `exclude`.
pub fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> io::Result<()> {
  let walker = WalkDir::new(src).into_iter().filter_entry(|e| {
    e.depth() == 0
      || e
        .file_name()
        .to_str()
        .map(|name| !exclude.contains(&name))
        .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dst.join(rel);
    let file_type = entry.file_type();
    if file_type.is_dir() {
      std::fs::create_dir_all(&target)?;
    } else if file_type.is_file() {
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::copy(entry.path(), &target)?;
    } else if file_type.is_symlink() {
      // Follow links so the artifact stays self-contained.
      let resolved = std::fs::canonicalize(entry.path())?;
      if resolved.is_dir() {
        copy_dir(&resolved, &target, exclude)?;
      } else {
        if let Some(parent) = target.parent() {
          std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&resolved, &target)?;
      }
    }
  }
  Ok(())
}

/// Remove `dir` if it exists, then create it empty.
pub fn recreate_dir(dir: &Path) -> io::Result<()> {
  if dir.exists() {
    std::fs::remove_dir_all(dir)?;
  }
  std::fs::create_dir_all(dir)
}
