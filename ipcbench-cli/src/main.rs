// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ipcbench CLI
//!
//! Command-line interface for the IPC bandwidth benchmarks.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ipcbench_core::config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_DATA_SIZE, DEFAULT_ITERATIONS, DEFAULT_THREADS, DEFAULT_WARMUPS,
};
use ipcbench_core::transport::DEFAULT_SOCKET_PATH;
use ipcbench_core::{BenchmarkSpec, ByteSize, ResourceName, RunParams, TransportKind};

mod commands;

/// ipcbench - Bandwidth of Linux IPC mechanisms under one fair protocol
#[derive(Parser)]
#[command(name = "ipcbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write a JSON report into this directory
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every benchmark command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Measured iterations
    #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: u32,

    /// Warmup iterations, excluded from the result
    #[arg(short, long, default_value_t = DEFAULT_WARMUPS)]
    pub warmups: u32,

    /// Payload per iteration (e.g. 64M, 1G, 65536)
    #[arg(short, long, default_value_t = DEFAULT_DATA_SIZE)]
    pub data_size: ByteSize,

    /// Largest chunk per send/receive (e.g. 64K, 1M)
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: ByteSize,

    /// Barrier name override, for concurrent runs
    #[arg(long)]
    pub resource: Option<String>,
}

impl RunArgs {
    pub fn params(&self) -> anyhow::Result<RunParams> {
        Ok(RunParams::new(
            self.iterations,
            self.warmups,
            self.data_size.as_usize()?,
            self.buffer_size.as_usize()?,
        )?)
    }

    /// Spec for `kind` with these flags applied.
    pub fn spec(&self, kind: TransportKind) -> anyhow::Result<BenchmarkSpec> {
        let mut spec = BenchmarkSpec::new(kind, self.params()?);
        if let Some(resource) = &self.resource {
            // Keep per-kind names distinct when one override serves `all`.
            let base = ResourceName::new(resource.as_str())?;
            let resource = if kind.is_two_process() {
                base.with_suffix(kind.as_str())?
            } else {
                base
            };
            spec = spec.with_resource(resource);
        }
        Ok(spec)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Single-threaded memcpy baseline
    Memcpy(RunArgs),

    /// memcpy split across worker threads
    MemcpyMt {
        #[command(flatten)]
        run: RunArgs,

        /// Copy threads
        #[arg(short, long, default_value_t = DEFAULT_THREADS)]
        threads: usize,
    },

    /// Anonymous pipe between two processes
    Pipe(RunArgs),

    /// Unix domain stream socket between two processes
    Uds {
        #[command(flatten)]
        run: RunArgs,

        /// Socket path
        #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: PathBuf,
    },

    /// Shared memory mapping between two processes
    Mmap(RunArgs),

    /// POSIX message queue between two processes
    Mq(RunArgs),

    /// Every mechanism, one after another
    All {
        #[command(flatten)]
        run: RunArgs,

        /// Copy threads for memcpy-mt
        #[arg(short, long, default_value_t = DEFAULT_THREADS)]
        threads: usize,

        /// Socket path for uds
        #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: PathBuf,
    },

    /// Run the benchmarks listed in a YAML plan
    Plan {
        /// Path to the plan file
        file: PathBuf,
    },

    /// Validate a YAML plan without running it
    Validate {
        /// Path to the plan file
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let output = cli.output.as_deref();

    // Dispatch to command handlers
    match cli.command {
        Commands::Memcpy(run) => commands::run::execute(vec![run.spec(TransportKind::Memcpy)?], output),
        Commands::MemcpyMt { run, threads } => commands::run::execute(
            vec![run.spec(TransportKind::MemcpyMt)?.with_threads(threads)],
            output,
        ),
        Commands::Pipe(run) => commands::run::execute(vec![run.spec(TransportKind::Pipe)?], output),
        Commands::Uds { run, socket_path } => commands::run::execute(
            vec![run.spec(TransportKind::Uds)?.with_socket_path(socket_path)],
            output,
        ),
        Commands::Mmap(run) => commands::run::execute(vec![run.spec(TransportKind::Mmap)?], output),
        Commands::Mq(run) => commands::run::execute(vec![run.spec(TransportKind::Mq)?], output),
        Commands::All {
            run,
            threads,
            socket_path,
        } => {
            let specs = TransportKind::ALL
                .into_iter()
                .map(|kind| {
                    Ok(run
                        .spec(kind)?
                        .with_threads(if kind == TransportKind::MemcpyMt { threads } else { 1 })
                        .with_socket_path(&socket_path))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            commands::run::execute(specs, output)
        }
        Commands::Plan { file } => commands::run::execute_plan(&file, output),
        Commands::Validate { file } => commands::validate::execute(&file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_memcpy_mt() {
        let cli = Cli::try_parse_from([
            "ipcbench",
            "memcpy-mt",
            "--threads",
            "8",
            "--data-size",
            "1M",
            "--buffer-size",
            "64K",
        ])
        .unwrap();

        match cli.command {
            Commands::MemcpyMt { run, threads } => {
                assert_eq!(threads, 8);
                let params = run.params().unwrap();
                assert_eq!(params.data_size, 1 << 20);
                assert_eq!(params.buffer_size, 64 << 10);
                assert_eq!(params.measured_iterations, DEFAULT_ITERATIONS);
            }
            _ => panic!("expected memcpy-mt"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ipcbench", "pipe", "-v", "--output", "/tmp/out"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.output, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_resource_override_is_per_kind() {
        let cli = Cli::try_parse_from(["ipcbench", "mmap", "--resource", "ci_run"]).unwrap();
        let Commands::Mmap(run) = cli.command else {
            panic!("expected mmap");
        };
        assert_eq!(
            run.spec(TransportKind::Mmap).unwrap().resource.as_str(),
            "ci_run_mmap"
        );
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(Cli::try_parse_from(["ipcbench", "pipe", "--data-size", "lots"]).is_err());

        let cli = Cli::try_parse_from(["ipcbench", "pipe", "--buffer-size", "0"]).unwrap();
        let Commands::Pipe(run) = cli.command else {
            panic!("expected pipe");
        };
        assert!(run.params().is_err());
    }

    #[test]
    fn test_small_payload_with_default_chunk() {
        let cli = Cli::try_parse_from(["ipcbench", "pipe", "--data-size", "4K"]).unwrap();
        let Commands::Pipe(run) = cli.command else {
            panic!("expected pipe");
        };
        let params = run.params().unwrap();
        assert_eq!(params.buffer_size as u64, DEFAULT_BUFFER_SIZE.bytes());
        assert_eq!(params.chunk_size(), 4096);
    }
}
