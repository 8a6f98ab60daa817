// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Helpers for encoding / decoding the very first byte of every NVMe/TCP
//! PDU common header.
//!
//! ```text
//! +--------+--------+--------+--------+-----------------+
//! |  type  | flags  |  hlen  |  pdo   |   plen (le32)   |
//! +--------+--------+--------+--------+-----------------+
//! ```
//!
//! * **type** – PDU type octet.
//! * **hlen** – length of the typed header, digests excluded.
//! * **pdo**  – offset of the data payload from the start of the PDU.
//! * **plen** – total PDU length including digest trailers.

use core::fmt;
use std::convert::TryFrom;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// All PDU types defined by the NVMe/TCP transport specification.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    #[default]
    IcReq = 0x00,
    IcResp = 0x01,
    H2CTermReq = 0x02,
    C2HTermReq = 0x03,
    CapsuleCmd = 0x04,
    CapsuleResp = 0x05,
    H2CData = 0x06,
    C2HData = 0x07,
    R2T = 0x09,
}

impl PduType {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::IcReq,
            0x01 => Self::IcResp,
            0x02 => Self::H2CTermReq,
            0x03 => Self::C2HTermReq,
            0x04 => Self::CapsuleCmd,
            0x05 => Self::CapsuleResp,
            0x06 => Self::H2CData,
            0x07 => Self::C2HData,
            0x09 => Self::R2T,
            _ => return None,
        })
    }

    /// hlen the transport mandates for this PDU type.
    #[inline]
    pub const fn expected_hlen(self) -> usize {
        match self {
            Self::IcReq | Self::IcResp => 128,
            Self::CapsuleCmd => 72,
            Self::CapsuleResp => 24,
            Self::H2CData | Self::C2HData | Self::R2T => 24,
            Self::H2CTermReq | Self::C2HTermReq => 24,
        }
    }
}

/// Returned when the type octet contains an undefined PDU type.
#[derive(Debug, Error)]
#[error("invalid pdu type: 0x{0:02x}")]
pub struct UnknownPduType(pub u8);

impl TryFrom<u8> for PduType {
    type Error = UnknownPduType;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        PduType::from_u8(byte).ok_or(UnknownPduType(byte))
    }
}

/// Wire-safe, zero-copy PDU type octet.
/// Transparent over `u8`, so it can live inside a zerocopy header struct.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawPduType(u8);

impl RawPduType {
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_raw(v: u8) -> Self {
        Self(v)
    }

    #[inline]
    pub fn known(&self) -> Option<PduType> {
        PduType::from_u8(self.0)
    }

    #[inline]
    pub fn set_known(&mut self, t: PduType) {
        self.0 = t as u8;
    }
}

impl From<PduType> for RawPduType {
    #[inline]
    fn from(t: PduType) -> Self {
        Self(t as u8)
    }
}

impl fmt::Debug for RawPduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(t) => write!(f, "RawPduType {{ {t:?} }}"),
            None => write!(f, "RawPduType {{ 0x{:02X} }}", self.0),
        }
    }
}
