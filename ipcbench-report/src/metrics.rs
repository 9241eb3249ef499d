// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Serializable bandwidth results.
//!
//! This module defines the data structures used to capture and serialize
//! the outcome of benchmark runs together with the machine they ran on.

use chrono::{DateTime, Utc};
use ipcbench_core::{RunOutcome, RunParams, TransportKind, BYTES_PER_GIB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use sysinfo::System;

/// Sustained bandwidth of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthMetrics {
    /// Bytes per second over all measured iterations
    pub bytes_per_sec: f64,
    /// Same figure in GiB/s
    pub gib_per_sec: f64,
    /// Bytes moved by the measured iterations
    pub total_bytes: u64,
    /// Sum of the measured iteration durations in nanoseconds
    pub total_duration_ns: u64,
    /// Duration of each measured iteration in nanoseconds, in order
    pub iteration_ns: Vec<u64>,
}

impl BandwidthMetrics {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let iteration_ns: Vec<u64> = outcome
            .record
            .samples()
            .iter()
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .collect();

        Self {
            bytes_per_sec: outcome.bandwidth,
            gib_per_sec: outcome.bandwidth / BYTES_PER_GIB,
            total_bytes: outcome.params.data_size as u64
                * u64::from(outcome.params.measured_iterations),
            total_duration_ns: u64::try_from(outcome.record.total().as_nanos()).unwrap_or(u64::MAX),
            iteration_ns,
        }
    }
}

/// System information captured at benchmark time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system name
    pub os: String,
    /// OS version
    pub os_version: String,
    /// Kernel version (Linux)
    pub kernel_version: Option<String>,
    /// CPU model name
    pub cpu_model: String,
    /// Number of CPU cores
    pub cpu_cores: usize,
    /// Total system memory in bytes
    pub memory_bytes: u64,
    /// Hostname
    pub hostname: String,
}

impl SystemInfo {
    /// Collect current system information.
    pub fn collect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            os: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            cpu_cores: sys.cpus().len(),
            memory_bytes: sys.total_memory(),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// A single benchmark result with all associated metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Name of the benchmark
    pub name: String,
    /// Mechanism that was measured
    pub kind: TransportKind,
    /// Iteration counts and sizes the run used
    pub params: RunParams,
    /// Copy threads (1 unless memcpy_mt)
    pub threads: usize,
    pub metrics: BandwidthMetrics,
    /// Additional metadata specific to this benchmark
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl BenchmarkResult {
    /// Result named after the mechanism, e.g. `memcpy_mt_4t` or `pipe`.
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let name = if outcome.kind == TransportKind::MemcpyMt {
            format!("{}_{}t", outcome.kind, outcome.threads)
        } else {
            outcome.kind.to_string()
        };

        Self {
            name,
            kind: outcome.kind,
            params: outcome.params,
            threads: outcome.threads,
            metrics: BandwidthMetrics::from_outcome(outcome),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the result. Values that fail to serialize are skipped.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), value);
        }
        self
    }
}

/// Complete benchmark suite report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Suite identifier
    pub benchmark_suite: String,
    /// Framework version
    pub version: String,
    /// Timestamp when benchmarks were run
    pub timestamp: DateTime<Utc>,
    /// System information
    pub system_info: SystemInfo,
    /// Individual benchmark results
    pub results: Vec<BenchmarkResult>,
}

impl BenchmarkReport {
    /// Create a new benchmark report.
    pub fn new() -> Self {
        Self {
            benchmark_suite: "ipcbench".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            system_info: SystemInfo::collect(),
            results: Vec::new(),
        }
    }

    /// Add a result to the report.
    pub fn add_result(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }

    /// Fastest mechanism in the report.
    pub fn fastest(&self) -> Option<&BenchmarkResult> {
        self.results
            .iter()
            .max_by(|a, b| a.metrics.bytes_per_sec.total_cmp(&b.metrics.bytes_per_sec))
    }
}

impl Default for BenchmarkReport {
    fn default() -> Self {
        Self::new()
    }
}
