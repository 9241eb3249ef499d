// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ipcbench validate` command - Validate a benchmark plan.

use std::path::Path;

use ipcbench_core::{ByteSize, ConfigLoader, TransportKind};

pub fn execute(file: &Path) -> anyhow::Result<()> {
    tracing::info!(file = %file.display(), "Validating benchmark plan");

    match ConfigLoader::load_file(file) {
        Ok(plan) => {
            println!("✓ Benchmark plan is valid");
            println!();
            println!("Benchmarks ({}):", plan.benchmarks.len());
            for spec in &plan.benchmarks {
                let params = &spec.params;
                let mut line = format!(
                    "  - {} (iterations: {}, warmups: {}, data: {}, chunk: {}",
                    spec.kind,
                    params.measured_iterations,
                    params.warmup_iterations,
                    ByteSize::new(params.data_size as u64),
                    ByteSize::new(params.buffer_size as u64),
                );
                match spec.kind {
                    TransportKind::MemcpyMt => line.push_str(&format!(", threads: {}", spec.threads)),
                    TransportKind::Uds => {
                        line.push_str(&format!(", socket: {}", spec.socket_path.display()))
                    }
                    _ => {}
                }
                if spec.kind.is_two_process() {
                    line.push_str(&format!(", resource: {}", spec.resource));
                }
                line.push(')');
                println!("{}", line);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Benchmark plan validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
