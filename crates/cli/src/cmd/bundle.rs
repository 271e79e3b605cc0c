//! Implementation of the `fnbuild bundle` command.
//!
//! Bundles the selected functions one after another, the way a deploy
//! pipeline consumes them, and prints each artifact with a content digest.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::info;

use fnbuild_lib::config::EngineConfig;
use fnbuild_lib::context::BuildContext;
use fnbuild_lib::runtime::{self, BundleOutput};
use fnbuild_lib::util::hash::{hash_directory, hash_file};

use crate::app::App;
use crate::output::{
  OutputFormat, format_duration, print_error, print_json, print_stat, print_success, short_digest,
};

#[derive(Debug, Serialize)]
struct BundleReport {
  id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  output: Option<BundleOutput>,
  #[serde(skip_serializing_if = "Option::is_none")]
  digest: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
}

pub fn cmd_bundle(app: &App, config: EngineConfig, ids: &[String], output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let functions = app.select(ids)?;
  let ctx = Arc::new(BuildContext::new(config));

  let mut reports = Vec::with_capacity(functions.len());
  for opts in functions {
    let report = match runtime::bundle(&ctx, opts) {
      Ok(bundle) => {
        let digest = match &bundle {
          Some(BundleOutput::Directory { directory, .. }) => Some(hash_directory(directory, &[])?.0),
          Some(BundleOutput::Asset { path, .. }) => Some(hash_file(path)?.0),
          None => None,
        };
        info!(id = %opts.id, digest = ?digest, "bundled function");
        BundleReport {
          id: opts.id.clone(),
          output: bundle,
          digest,
          error: None,
        }
      }
      Err(e) => BundleReport {
        id: opts.id.clone(),
        output: None,
        digest: None,
        error: Some(e.to_string()),
      },
    };

    if !output.is_json() {
      print_report(&report);
    }
    reports.push(report);
  }

  let failed = reports.iter().filter(|r| r.error.is_some()).count();
  if output.is_json() {
    print_json(&reports)?;
  } else {
    println!();
    print_stat("Functions", &reports.len().to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if failed > 0 {
    bail!("{} function(s) failed to bundle", failed);
  }
  Ok(())
}

fn print_report(report: &BundleReport) {
  if let Some(error) = &report.error {
    print_error(&format!("{}: {}", report.id, error));
    return;
  }
  print_success(&format!("Bundled {}", report.id));
  if let Some(bundle) = &report.output {
    print_stat("Handler", bundle.handler());
    print_stat("Path", &bundle.path().display().to_string());
  }
  if let Some(digest) = &report.digest {
    print_stat("Digest", short_digest(digest));
  }
}
