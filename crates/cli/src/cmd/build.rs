//! Implementation of the `fnbuild build` command.
//!
//! Builds every selected function concurrently for local development and
//! reports each function's issues.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::task::JoinSet;

use fnbuild_lib::config::EngineConfig;
use fnbuild_lib::context::BuildContext;
use fnbuild_lib::issue::Issue;
use fnbuild_lib::runtime;

use crate::app::App;
use crate::output::{OutputFormat, format_duration, print_error, print_issues, print_json, print_stat, print_success};

#[derive(Debug, Serialize)]
struct BuildReport {
  id: String,
  issues: Vec<Issue>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
}

impl BuildReport {
  fn failed(&self) -> bool {
    self.error.is_some() || !self.issues.is_empty()
  }
}

pub fn cmd_build(app: &App, config: EngineConfig, ids: &[String], output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let functions = app.select(ids)?;
  let ctx = Arc::new(BuildContext::new(config));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let mut reports = rt.block_on(async {
    let mut builds = JoinSet::new();
    for opts in functions {
      let ctx = ctx.clone();
      let opts = opts.clone();
      builds.spawn(async move {
        match runtime::build(&ctx, &opts).await {
          Ok(issues) => BuildReport {
            id: opts.id,
            issues,
            error: None,
          },
          Err(e) => BuildReport {
            id: opts.id,
            issues: Vec::new(),
            error: Some(e.to_string()),
          },
        }
      });
    }

    let mut reports = Vec::new();
    while let Some(report) = builds.join_next().await {
      reports.push(report.context("Build task failed")?);
    }
    anyhow::Ok(reports)
  })?;
  reports.sort_by(|a, b| a.id.cmp(&b.id));
  // Warm sessions hold child processes; stop them before returning.
  drop(ctx);

  let failed = reports.iter().filter(|r| r.failed()).count();
  if output.is_json() {
    print_json(&reports)?;
  } else {
    for report in &reports {
      match (&report.error, report.issues.is_empty()) {
        (Some(error), _) => print_error(&format!("{}: {}", report.id, error)),
        (None, true) => print_success(&format!("Built {}", report.id)),
        (None, false) => {
          print_error(&format!("{}: {} issue(s)", report.id, report.issues.len()));
          print_issues(&report.issues);
        }
      }
    }
    println!();
    print_stat("Functions", &reports.len().to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if failed > 0 {
    bail!("{} function(s) failed to build", failed);
  }
  Ok(())
}
