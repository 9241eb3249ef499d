// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Deterministic payload generation and verification.
//!
//! Both processes of a run generate the same bytes independently, so the
//! receiver can check what arrived without any coordination. Verification
//! also keeps the transfer observable, so it cannot be optimised away.

use crate::error::IntegrityError;

/// Period of the byte pattern. Prime, so a chunk delivered at the wrong
/// power-of-two offset never lines up with the expected bytes.
pub const PATTERN_PERIOD: usize = 251;

/// Expected byte at `index`.
#[inline]
pub fn byte_at(index: usize) -> u8 {
    (index % PATTERN_PERIOD) as u8
}

/// Generate `size` bytes of the reference pattern.
pub fn generate(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    fill(&mut data);
    data
}

/// Overwrite `buf` with the reference pattern starting at index 0.
pub fn fill(buf: &mut [u8]) {
    let mut period = [0u8; PATTERN_PERIOD];
    for (index, byte) in period.iter_mut().enumerate() {
        *byte = byte_at(index);
    }
    for chunk in buf.chunks_mut(PATTERN_PERIOD) {
        chunk.copy_from_slice(&period[..chunk.len()]);
    }
}

/// True iff `received` is exactly `generate(expected_size)`.
pub fn verify(received: &[u8], expected_size: usize) -> bool {
    check(received, expected_size).is_ok()
}

/// Like [`verify`], but reports what went wrong.
///
/// Content mismatches carry the first bad offset and CRC32 checksums of the
/// expected and received buffers.
pub fn check(received: &[u8], expected_size: usize) -> Result<(), IntegrityError> {
    if received.len() != expected_size {
        return Err(IntegrityError::LengthMismatch {
            expected: expected_size,
            actual: received.len(),
        });
    }

    let mismatch = received
        .chunks(PATTERN_PERIOD)
        .enumerate()
        .find_map(|(chunk_index, chunk)| {
            let base = chunk_index * PATTERN_PERIOD;
            chunk
                .iter()
                .enumerate()
                .find(|&(offset, &byte)| byte != byte_at(offset))
                .map(|(offset, _)| base + offset)
        });

    match mismatch {
        None => Ok(()),
        Some(offset) => Err(IntegrityError::ContentMismatch {
            offset,
            expected_crc: crc32fast::hash(&generate(expected_size)),
            actual_crc: crc32fast::hash(received),
        }),
    }
}
