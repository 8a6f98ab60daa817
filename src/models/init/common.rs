// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Protocol framing version carried in `icreq`/`icresp`.
pub const PFV_1_0: u16 = 1;

/// Wire view of the digest-enable octet of the initial connection exchange.
/// Bit 0 requests the header digest, bit 1 the data digest.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawDigestBits(u8);

impl RawDigestBits {
    pub const HDGST: u8 = 1 << 0;
    pub const DDGST: u8 = 1 << 1;

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn new_raw(v: u8) -> Self {
        Self(v)
    }

    #[inline]
    pub fn hdgst(&self) -> bool {
        self.0 & Self::HDGST != 0
    }

    #[inline]
    pub fn ddgst(&self) -> bool {
        self.0 & Self::DDGST != 0
    }

    #[inline]
    pub fn set_hdgst(&mut self, on: bool) {
        self.set(Self::HDGST, on)
    }

    #[inline]
    pub fn set_ddgst(&mut self, on: bool) {
        self.set(Self::DDGST, on)
    }

    #[inline]
    fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl fmt::Debug for RawDigestBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawDigestBits {{ ")?;
        if self.hdgst() {
            write!(f, "HDGST|")?;
        }
        if self.ddgst() {
            write!(f, "DDGST|")?;
        }
        write!(f, "0x{:02x} }}", self.0)
    }
}
