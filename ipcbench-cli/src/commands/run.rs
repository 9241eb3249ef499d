// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ipcbench <mechanism>`, `ipcbench all` and `ipcbench plan` - Run benchmarks.
//!
//! Benchmarks run one after another so they never compete for CPU or memory
//! bandwidth. A failing benchmark does not stop the rest, but makes the
//! command exit non-zero.

use std::path::Path;

use anyhow::Context;
use ipcbench_core::{format_gib_per_sec, run_benchmark, BenchmarkSpec, ConfigLoader};
use ipcbench_report::{BenchmarkReport, BenchmarkResult, JsonReporter};

pub fn execute_plan(file: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    tracing::info!(file = %file.display(), "Loading benchmark plan");
    let plan = ConfigLoader::load_file(file)
        .with_context(|| format!("invalid benchmark plan {}", file.display()))?;
    execute(plan.benchmarks, output)
}

pub fn execute(specs: Vec<BenchmarkSpec>, output: Option<&Path>) -> anyhow::Result<()> {
    let mut report = BenchmarkReport::new();
    let mut failures = Vec::new();

    for spec in &specs {
        match run_benchmark(spec) {
            Ok(outcome) => {
                let result = BenchmarkResult::from_outcome(&outcome)
                    .with_metadata("resource", spec.resource.as_str());
                println!("{:<16} {:>14}", result.name, format_gib_per_sec(outcome.bandwidth));
                report.add_result(result);
            }
            Err(e) => {
                tracing::error!(benchmark = %spec.kind, error = %e, "Benchmark failed");
                println!("{:<16} {:>14}", spec.kind.as_str(), "FAILED");
                failures.push(format!("{}: {}", spec.kind, e));
            }
        }
    }

    if specs.len() > 1 {
        if let Some(fastest) = report.fastest() {
            println!();
            println!(
                "Fastest: {} ({})",
                fastest.name,
                format_gib_per_sec(fastest.metrics.bytes_per_sec)
            );
        }
    }

    if let Some(dir) = output {
        if !report.results.is_empty() {
            let reporter = JsonReporter::new(dir)
                .with_context(|| format!("cannot create output directory {}", dir.display()))?;
            let path = reporter.save(&report)?;
            println!("Report saved to: {}", path.display());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} of {} benchmark(s) failed:\n  {}",
            failures.len(),
            specs.len(),
            failures.join("\n  ")
        )
    }
}
