// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scatter-gather payload buffers.
//!
//! Write payload is absorbed into page-granular [`SgBuf`] segments so the
//! receive path can hand `recvmsg`-style io-vectors over the un-filled tail.
//! Once a request is handed to the executor (or a read completion comes
//! back), the payload travels as a cheaply-cloneable [`SgList`]; the send
//! path appends its segments straight into a caravan.

use std::io::IoSliceMut;

use bytes::{Bytes, BytesMut};

use crate::{cfg::config::PAGE_SIZE, models::digest::DigestAcc};

/// Mutable page-granular receive buffer.
#[derive(Debug, Default)]
pub struct SgBuf {
    pages: Vec<BytesMut>,
    len: usize,
}

impl SgBuf {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocates `ceil(len / PAGE_SIZE)` zeroed pages covering `len` bytes.
    pub fn with_len(len: usize) -> Self {
        let mut pages = Vec::with_capacity(len.div_ceil(PAGE_SIZE));
        let mut left = len;
        while left > 0 {
            let chunk = left.min(PAGE_SIZE);
            pages.push(BytesMut::zeroed(chunk));
            left -= chunk;
        }
        SgBuf { pages, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Io-vector over `[start, start + len)`, split on page boundaries.
    pub fn window_slices(&mut self, start: usize, len: usize) -> Vec<IoSliceMut<'_>> {
        let end = (start + len).min(self.len);
        let mut out = Vec::new();
        let mut page_start = 0usize;
        for page in &mut self.pages {
            let page_end = page_start + page.len();
            if page_end > start && page_start < end {
                let from = start.saturating_sub(page_start);
                let to = page.len() - page_end.saturating_sub(end);
                out.push(IoSliceMut::new(&mut page[from..to]));
            }
            page_start = page_end;
        }
        out
    }

    /// CRC32C over `[start, start + len)`.
    pub fn crc32c_range(&self, start: usize, len: usize) -> u32 {
        let end = (start + len).min(self.len);
        let mut acc = DigestAcc::default();
        let mut page_start = 0usize;
        for page in &self.pages {
            let page_end = page_start + page.len();
            if page_end > start && page_start < end {
                let from = start.saturating_sub(page_start);
                let to = page.len() - page_end.saturating_sub(end);
                acc.update(&page[from..to]);
            }
            page_start = page_end;
        }
        acc.finish()
    }

    /// Copy `src` into the buffer at `start`. Test and executor helper.
    pub fn copy_in(&mut self, start: usize, src: &[u8]) {
        let mut off = start;
        let mut left = src;
        let mut page_start = 0usize;
        for page in &mut self.pages {
            let page_end = page_start + page.len();
            if !left.is_empty() && page_end > off {
                let from = off - page_start;
                let n = left.len().min(page.len() - from);
                page[from..from + n].copy_from_slice(&left[..n]);
                left = &left[n..];
                off += n;
            }
            page_start = page_end;
        }
    }

    pub fn freeze(self) -> SgList {
        let len = self.len;
        SgList {
            segs: self.pages.into_iter().map(BytesMut::freeze).collect(),
            len,
        }
    }
}

/// Immutable scatter-gather payload.
#[derive(Debug, Default, Clone)]
pub struct SgList {
    segs: Vec<Bytes>,
    len: usize,
}

impl SgList {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Chops a contiguous buffer into page-sized segments.
    pub fn from_contiguous(mut data: Bytes) -> Self {
        let len = data.len();
        let mut segs = Vec::with_capacity(len.div_ceil(PAGE_SIZE));
        while !data.is_empty() {
            let n = data.len().min(PAGE_SIZE);
            segs.push(data.split_to(n));
        }
        SgList { segs, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn segments(&self) -> &[Bytes] {
        &self.segs
    }

    pub fn crc32c(&self) -> u32 {
        let mut acc = DigestAcc::default();
        for seg in &self.segs {
            acc.update(seg);
        }
        acc.finish()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for seg in &self.segs {
            out.extend_from_slice(seg);
        }
        out
    }
}
