// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a shared resource name (POSIX NAME_MAX minus the leading slash).
const MAX_RESOURCE_NAME_LEN: usize = 200;

/// Validated name of a kernel-visible resource (barrier, shm region, queue).
/// Must be non-empty, at most 200 chars, and must not contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    /// Create a new ResourceName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "resource",
                value: name,
                reason: "Resource name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_RESOURCE_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "resource",
                value: name.clone(),
                reason: format!(
                    "Resource name too long: {} chars (max {})",
                    name.len(),
                    MAX_RESOURCE_NAME_LEN
                ),
            });
        }

        if name.contains('/') || name.contains('\0') {
            return Err(HardValidationError::InvalidFieldValue {
                field: "resource",
                value: name,
                reason: "Resource name must not contain '/' or NUL".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a sibling resource name, e.g. `mmap_benchmark` -> `mmap_benchmark_data`.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, HardValidationError> {
        Self::new(format!("{}_{}", self.0, suffix))
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

/// A byte count parsed from either an integer or a size string.
///
/// Accepted suffixes are `K`, `M` and `G` (optionally followed by `B` or `iB`),
/// all base 1024: `64K` is 65536 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "ByteSizeRepr", into = "u64")]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Byte count as `usize`, rejecting values that do not fit the address space.
    pub fn as_usize(&self) -> Result<usize, HardValidationError> {
        usize::try_from(self.0).map_err(|_| HardValidationError::InvalidByteSize {
            value: self.0.to_string(),
            reason: "does not fit in the address space".to_string(),
        })
    }
}

impl FromStr for ByteSize {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = |reason: &str| HardValidationError::InvalidByteSize {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);

        if digits.is_empty() {
            return Err(invalid("expected a number"));
        }

        let value: u64 = digits.parse().map_err(|_| invalid("number out of range"))?;

        let shift = match suffix.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 0,
            "K" | "KB" | "KIB" => 10,
            "M" | "MB" | "MIB" => 20,
            "G" | "GB" | "GIB" => 30,
            _ => return Err(invalid("unknown suffix (use K, M or G)")),
        };

        value
            .checked_mul(1u64 << shift)
            .map(Self)
            .ok_or_else(|| invalid("size overflows 64 bits"))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 3] = [(1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];
        for (unit, suffix) in UNITS {
            if self.0 >= unit && self.0 % unit == 0 {
                return write!(f, "{}{}", self.0 / unit, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

/// YAML accepts both `65536` and `"64K"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ByteSizeRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<ByteSizeRepr> for ByteSize {
    type Error = HardValidationError;

    fn try_from(value: ByteSizeRepr) -> Result<Self, Self::Error> {
        match value {
            ByteSizeRepr::Number(n) => Ok(Self(n)),
            ByteSizeRepr::Text(s) => s.parse(),
        }
    }
}

/// The IPC mechanism under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Single-threaded memcpy within one process.
    Memcpy,
    /// memcpy fanned out across worker threads.
    MemcpyMt,
    /// Anonymous pipe between forked processes.
    Pipe,
    /// Unix domain stream socket.
    Uds,
    /// Shared memory mapping with a chunk handoff barrier.
    Mmap,
    /// POSIX message queue.
    Mq,
}

impl TransportKind {
    pub const ALL: [TransportKind; 6] = [
        TransportKind::Memcpy,
        TransportKind::MemcpyMt,
        TransportKind::Pipe,
        TransportKind::Uds,
        TransportKind::Mmap,
        TransportKind::Mq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Memcpy => "memcpy",
            TransportKind::MemcpyMt => "memcpy_mt",
            TransportKind::Pipe => "pipe",
            TransportKind::Uds => "uds",
            TransportKind::Mmap => "mmap",
            TransportKind::Mq => "mq",
        }
    }

    /// Whether the benchmark forks a sender and a receiver.
    pub fn is_two_process(&self) -> bool {
        !matches!(self, TransportKind::Memcpy | TransportKind::MemcpyMt)
    }

    /// Conventional barrier/resource name for this benchmark type.
    pub fn default_resource(&self) -> ResourceName {
        ResourceName(format!("{}_benchmark", self.as_str()))
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TransportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| HardValidationError::UnknownKind {
                kind: s.to_string(),
            })
    }
}

/// Which side of a two-process transfer a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}
