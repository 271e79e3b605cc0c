//! Terminal output for fnbuild commands.
//!
//! Status lines go to stdout for progress and to stderr for failures, so
//! `-o json` output on stdout stays machine-readable. Build and check issues
//! are printed as `file:line:column message`, the form editors link to.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use fnbuild_lib::issue::{Issue, IssueLocation};
use owo_colors::{OwoColorize, Stream, Style};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Kind of status line, deciding its marker, color and stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
  Done,
  Failed,
  Warning,
  Progress,
}

impl Status {
  fn marker(self) -> &'static str {
    match self {
      Status::Done => "✓",
      Status::Failed => "✗",
      Status::Warning => "⚠",
      Status::Progress => "•",
    }
  }

  fn style(self) -> Style {
    match self {
      Status::Done => Style::new().green(),
      Status::Failed => Style::new().red(),
      Status::Warning => Style::new().yellow(),
      Status::Progress => Style::new().blue(),
    }
  }

  fn to_stderr(self) -> bool {
    matches!(self, Status::Failed | Status::Warning)
  }
}

fn status_line(status: Status, message: &str) {
  if status.to_stderr() {
    let marker = status.marker();
    let marker = marker.if_supports_color(Stream::Stderr, |s| s.style(status.style()));
    let message = message.if_supports_color(Stream::Stderr, |s| s.style(status.style()));
    eprintln!("{} {}", marker, message);
  } else {
    let marker = status.marker();
    let marker = marker.if_supports_color(Stream::Stdout, |s| s.style(status.style()));
    println!("{} {}", marker, message);
  }
}

pub fn print_success(message: &str) {
  status_line(Status::Done, message);
}

pub fn print_error(message: &str) {
  status_line(Status::Failed, message);
}

pub fn print_warning(message: &str) {
  status_line(Status::Warning, message);
}

pub fn print_info(message: &str) {
  status_line(Status::Progress, message);
}

/// An indented `label: value` line under a report.
pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// Leading characters of an artifact digest, enough to tell bundles apart.
pub fn short_digest(digest: &str) -> &str {
  digest.get(..12).unwrap_or(digest)
}

/// Elapsed time of a build or check: milliseconds under a second, then
/// seconds with one decimal.
pub fn format_duration(duration: Duration) -> String {
  let millis = duration.as_millis();
  if millis < 1000 {
    format!("{}ms", millis)
  } else {
    format!("{:.1}s", duration.as_secs_f64())
  }
}

/// `file`, `file:line` or `file:line:column`.
pub fn format_location(location: &IssueLocation) -> String {
  match (location.line, location.column) {
    (Some(line), Some(column)) => format!("{}:{}:{}", location.file, line, column),
    (Some(line), None) => format!("{}:{}", location.file, line),
    _ => location.file.clone(),
  }
}

/// One indented line per issue on stderr, the location dimmed.
pub fn print_issues(issues: &[Issue]) {
  for issue in issues {
    let location = format_location(&issue.location);
    eprintln!(
      "  {} {}",
      location.if_supports_color(Stream::Stderr, |s| s.dimmed()),
      issue.message
    );
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize report to JSON")?;
  println!("{}", json);
  Ok(())
}
