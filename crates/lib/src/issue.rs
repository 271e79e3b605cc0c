//! Structured diagnostics shared by every runtime adapter.
//!
//! Callers never need to know which toolchain produced an [`Issue`]: the
//! managed-script compiler, the process runner and the check coalescer all
//! report through the same shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an issue was reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLocation {
  pub file: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub line: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub column: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub length: Option<u32>,
}

impl IssueLocation {
  /// A location that only names a file.
  pub fn file(file: impl Into<String>) -> Self {
    Self {
      file: file.into(),
      line: None,
      column: None,
      length: None,
    }
  }
}

/// A file/line-located diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
  pub location: IssueLocation,
  pub message: String,
}

impl Issue {
  pub fn new(location: IssueLocation, message: impl Into<String>) -> Self {
    Self {
      location,
      message: message.into(),
    }
  }

  /// An issue attached to a whole file, with no line information.
  pub fn in_file(file: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(IssueLocation::file(file), message)
  }
}

impl fmt::Display for Issue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.location.file)?;
    if let Some(line) = self.location.line {
      write!(f, ":{}", line)?;
      if let Some(column) = self.location.column {
        write!(f, ":{}", column)?;
      }
    }
    write!(f, ": {}", self.message)
  }
}
