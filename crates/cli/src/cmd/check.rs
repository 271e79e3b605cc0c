//! Implementation of the `fnbuild check` command.
//!
//! Runs the type and lint checks of the selected functions. Functions sharing
//! a source directory share one run per check kind.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::task::JoinSet;

use fnbuild_lib::check::{CheckKind, CheckOutcome};
use fnbuild_lib::config::EngineConfig;
use fnbuild_lib::context::BuildContext;
use fnbuild_lib::issue::Issue;
use fnbuild_lib::runtime::{self, Instructions};

use crate::app::App;
use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_issues, print_json, print_stat, print_success,
};

#[derive(Debug, Serialize)]
struct CheckReport {
  kind: CheckKind,
  source_dir: PathBuf,
  functions: Vec<String>,
  issues: Vec<Issue>,
}

pub fn cmd_check(
  app: &App,
  mut config: EngineConfig,
  ids: &[String],
  kinds: &[CheckKind],
  output: OutputFormat,
) -> Result<()> {
  let start = Instant::now();
  if !kinds.is_empty() {
    config.checks = kinds.iter().copied().collect();
  }
  let ctx = Arc::new(BuildContext::new(config));

  // One run per (kind, source dir), attributed to every function using it.
  let mut runs: BTreeMap<(CheckKind, PathBuf), (Arc<Instructions>, BTreeSet<String>)> = BTreeMap::new();
  for opts in app.select(ids)? {
    let instructions = Arc::new(runtime::instructions(&ctx, opts).with_context(|| format!("Failed to prepare {}", opts.id))?);
    for kind in instructions.enabled_checks() {
      let source_dir = instructions.checks[&kind].source_dir.clone();
      runs
        .entry((kind, source_dir))
        .or_insert_with(|| (instructions.clone(), BTreeSet::new()))
        .1
        .insert(opts.id.clone());
    }
  }

  if runs.is_empty() {
    if !output.is_json() {
      print_info("No checks to run");
    } else {
      print_json(&Vec::<CheckReport>::new())?;
    }
    return Ok(());
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let mut reports = rt.block_on(async {
    let mut checks = JoinSet::new();
    for ((kind, source_dir), (instructions, functions)) in runs {
      checks.spawn(async move {
        let outcome = instructions.check(kind).await;
        let issues = match outcome {
          Some(CheckOutcome::Completed(issues)) => issues,
          Some(CheckOutcome::Superseded) | None => Vec::new(),
        };
        CheckReport {
          kind,
          source_dir,
          functions: functions.into_iter().collect(),
          issues,
        }
      });
    }

    let mut reports = Vec::new();
    while let Some(report) = checks.join_next().await {
      reports.push(report.context("Check task failed")?);
    }
    anyhow::Ok(reports)
  })?;
  reports.sort_by(|a, b| (a.kind, &a.source_dir).cmp(&(b.kind, &b.source_dir)));

  let failed = reports.iter().filter(|r| !r.issues.is_empty()).count();
  if output.is_json() {
    print_json(&reports)?;
  } else {
    for report in &reports {
      let label = format!(
        "{} check of {} ({})",
        report.kind,
        report.source_dir.display(),
        report.functions.join(", ")
      );
      if report.issues.is_empty() {
        print_success(&format!("{} passed", label));
      } else {
        print_error(&format!("{} failed", label));
        print_issues(&report.issues);
      }
    }
    println!();
    print_stat("Checks", &reports.len().to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if failed > 0 {
    bail!("{} check(s) reported issues", failed);
  }
  Ok(())
}
