// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML benchmark plan parser with strict schema validation.
//!
//! Plans are validated before anything is forked or allocated.
//! Any invalid field results in a HardValidationError.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult, HardValidationError};
use crate::protocol::local::MAX_THREADS;
use crate::protocol::RunParams;
use crate::transport::DEFAULT_SOCKET_PATH;
use crate::types::{ByteSize, ResourceName, TransportKind};

pub const DEFAULT_ITERATIONS: u32 = 10;
pub const DEFAULT_WARMUPS: u32 = 2;
pub const DEFAULT_DATA_SIZE: ByteSize = ByteSize::new(64 * 1024 * 1024);
pub const DEFAULT_BUFFER_SIZE: ByteSize = ByteSize::new(1024 * 1024);
pub const DEFAULT_THREADS: usize = 4;

/// Raw defaults section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefaults {
    #[serde(default = "default_iterations")]
    iterations: u32,
    #[serde(default = "default_warmups")]
    warmups: u32,
    #[serde(default = "default_data_size")]
    data_size: ByteSize,
    #[serde(default = "default_buffer_size")]
    buffer_size: ByteSize,
    #[serde(default = "default_threads")]
    threads: usize,
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_warmups() -> u32 {
    DEFAULT_WARMUPS
}

fn default_data_size() -> ByteSize {
    DEFAULT_DATA_SIZE
}

fn default_buffer_size() -> ByteSize {
    DEFAULT_BUFFER_SIZE
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

impl Default for RawDefaults {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            warmups: default_warmups(),
            data_size: default_data_size(),
            buffer_size: default_buffer_size(),
            threads: default_threads(),
        }
    }
}

/// One benchmark entry; unset fields fall back to the plan defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBenchmark {
    kind: Option<String>,
    iterations: Option<u32>,
    warmups: Option<u32>,
    data_size: Option<ByteSize>,
    buffer_size: Option<ByteSize>,
    threads: Option<usize>,
    socket_path: Option<String>,
    resource: Option<String>,
}

/// Raw root of a plan file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlan {
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    benchmarks: Vec<RawBenchmark>,
}

/// A fully validated benchmark, ready to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSpec {
    pub kind: TransportKind,
    pub params: RunParams,
    /// Copy threads, used by `memcpy_mt` only.
    pub threads: usize,
    /// Socket path, used by `uds` only.
    pub socket_path: PathBuf,
    /// Barrier name, and prefix of any other named resource the run creates.
    pub resource: ResourceName,
}

impl BenchmarkSpec {
    /// Spec with the conventional resource name and default socket path.
    pub fn new(kind: TransportKind, params: RunParams) -> Self {
        Self {
            kind,
            params,
            threads: if kind == TransportKind::MemcpyMt {
                DEFAULT_THREADS
            } else {
                1
            },
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            resource: kind.default_resource(),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_resource(mut self, resource: ResourceName) -> Self {
        self.resource = resource;
        self
    }
}

/// Complete validated plan.
#[derive(Debug, Clone)]
pub struct BenchPlan {
    pub benchmarks: Vec<BenchmarkSpec>,
}

/// Plan loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a plan from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> BenchResult<BenchPlan> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BenchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BenchError::Io {
            context: "reading benchmark plan",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate a plan from a YAML string.
    pub fn load_string(content: &str) -> BenchResult<BenchPlan> {
        let raw: RawPlan = serde_yaml::from_str(content).map_err(|e| BenchError::ConfigParse {
            message: format!("YAML parse error: {}", e),
        })?;

        Self::validate(raw)
    }

    fn validate(raw: RawPlan) -> BenchResult<BenchPlan> {
        if raw.benchmarks.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one benchmark must be defined".to_string(),
            }
            .into());
        }

        let benchmarks = raw
            .benchmarks
            .into_iter()
            .enumerate()
            .map(|(index, bench)| Self::validate_benchmark(bench, &raw.defaults, index))
            .collect::<BenchResult<Vec<_>>>()?;

        Ok(BenchPlan { benchmarks })
    }

    fn validate_benchmark(
        raw: RawBenchmark,
        defaults: &RawDefaults,
        index: usize,
    ) -> BenchResult<BenchmarkSpec> {
        let kind_name = raw
            .kind
            .ok_or_else(|| HardValidationError::MissingRequiredField {
                field: "kind",
                context: format!("benchmark at index {}", index),
            })?;
        let kind: TransportKind = kind_name.parse()?;

        let data_size = raw.data_size.unwrap_or(defaults.data_size).as_usize()?;
        let buffer_size = raw.buffer_size.unwrap_or(defaults.buffer_size).as_usize()?;
        let params = RunParams::new(
            raw.iterations.unwrap_or(defaults.iterations),
            raw.warmups.unwrap_or(defaults.warmups),
            data_size,
            buffer_size,
        )?;

        let threads = raw.threads.unwrap_or(defaults.threads);
        if threads == 0 || threads > MAX_THREADS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "threads",
                value: threads.to_string(),
                reason: format!("Must be between 1 and {}", MAX_THREADS),
            }
            .into());
        }

        let mut spec = BenchmarkSpec::new(kind, params);
        if kind == TransportKind::MemcpyMt {
            spec = spec.with_threads(threads);
        }

        if let Some(path) = raw.socket_path {
            if path.is_empty() {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "socket_path",
                    value: path,
                    reason: "Socket path cannot be empty".to_string(),
                }
                .into());
            }
            spec = spec.with_socket_path(path);
        }

        if let Some(resource) = raw.resource {
            spec = spec.with_resource(ResourceName::new(resource)?);
        }

        Ok(spec)
    }
}
