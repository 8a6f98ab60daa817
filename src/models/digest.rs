// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CRC32C helpers for the optional header and data digest trailers.
//!
//! A header digest covers the typed header bytes (`hlen` of them); a data
//! digest covers the payload bytes of one PDU. Both are carried on the wire
//! as 4 little-endian bytes immediately after the region they protect.

use crc32c::{crc32c, crc32c_append};

#[inline]
pub fn crc32c_of_parts(parts: &[&[u8]]) -> u32 {
    let mut acc = 0u32;
    for p in parts {
        if !p.is_empty() {
            acc = crc32c_append(acc, p);
        }
    }
    acc
}

#[inline]
pub fn header_digest(header: &[u8]) -> u32 {
    crc32c(header)
}

#[inline]
pub fn data_digest(data: &[u8]) -> u32 {
    crc32c(data)
}

/// Incremental digest over a scatter-gather payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestAcc(u32);

impl DigestAcc {
    pub fn update(&mut self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.0 = crc32c_append(self.0, chunk);
        }
    }

    pub fn finish(self) -> u32 {
        self.0
    }
}
