// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use anyhow::Result;
use bitflags::bitflags;
use enum_dispatch::enum_dispatch;
use zerocopy::{
    FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U32,
};

use crate::models::pdu_type::{PduType, RawPduType};

/// Fixed length of the common header that starts every PDU.
pub const CH_LEN: usize = 8;

/// Length of a CRC32C digest trailer.
pub const DIGEST_LEN: usize = 4;

bitflags! {
    /// Decoded view of the flags octet (byte 1 of the common header).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PduFlags: u8 {
        const HDGST = 1 << 0;
        const DDGST = 1 << 1;
        const DATA_LAST = 1 << 2;
        const DATA_SUCCESS = 1 << 3;
    }
}

/// Wire view of the flags octet. Transparent over `u8` so it can live
/// inside a zerocopy header struct.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawPduFlags(u8);

impl RawPduFlags {
    pub const HDGST: u8 = 1 << 0;
    pub const DDGST: u8 = 1 << 1;
    pub const DATA_LAST: u8 = 1 << 2;
    pub const DATA_SUCCESS: u8 = 1 << 3;

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
    pub fn data_last(&self) -> bool {
        self.0 & Self::DATA_LAST != 0
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
    pub fn set_data_last(&mut self, on: bool) {
        self.set(Self::DATA_LAST, on)
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

impl From<PduFlags> for RawPduFlags {
    #[inline]
    fn from(f: PduFlags) -> Self {
        Self(f.bits())
    }
}

impl fmt::Debug for RawPduFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match PduFlags::from_bits(self.0) {
            Some(flags) => write!(f, "RawPduFlags {{ {flags:?} }}"),
            None => write!(f, "RawPduFlags {{ 0x{:02X} }}", self.0),
        }
    }
}

/// Common header shared by every PDU: `{type, flags, hlen, pdo, plen}`.
/// `plen` is the total PDU length, digest trailers included.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CommonHeader {
    pub pdu_type: RawPduType,
    pub flags: RawPduFlags,
    pub hlen: u8,
    pub pdo: u8,
    pub plen: U32<LittleEndian>,
}

impl CommonHeader {
    pub fn new(t: PduType, hlen: u8) -> Self {
        let mut ch = CommonHeader {
            hlen,
            ..Default::default()
        };
        ch.pdu_type.set_known(t);
        ch.plen.set(hlen as u32);
        ch
    }
}

/// Common functionality for any typed PDU header.
///
/// Every PDU starts with the 8-byte [`CommonHeader`]; typed headers extend
/// it up to `hlen` bytes and may be followed by a header digest, a data
/// payload, and a data digest. This trait encapsulates extracting lengths
/// out of the header and building the wire image.
#[enum_dispatch]
pub trait PduHeader: Sized {
    /// Serialize the typed header (digests excluded) into `buf`.
    fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()>;

    /// Decoded PDU type octet.
    fn get_type(&self) -> Result<PduType>;

    fn get_flags(&self) -> RawPduFlags;

    /// `hlen`: typed header length, digests excluded.
    fn get_header_len(&self) -> usize;

    /// `plen`: total PDU length, digest trailers included.
    fn get_pdu_len(&self) -> usize;

    fn set_pdu_len(&mut self, len: u32);

    #[inline]
    fn hdgst_len(&self, enabled: bool) -> usize {
        DIGEST_LEN * enabled as usize
    }

    #[inline]
    fn ddgst_len(&self, enabled: bool) -> usize {
        DIGEST_LEN * (enabled && self.get_flags().ddgst()) as usize
    }

    /// Payload carried after the typed header and optional header digest.
    #[inline]
    fn data_len(&self, hdgst: bool, ddgst: bool) -> usize {
        self.get_pdu_len()
            .saturating_sub(self.get_header_len())
            .saturating_sub(self.hdgst_len(hdgst))
            .saturating_sub(self.ddgst_len(ddgst))
    }
}

// Forward PduHeader to &mut T
impl<T: PduHeader> PduHeader for &mut T {
    #[inline]
    fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        (**self).to_wire_bytes(buf)
    }

    #[inline]
    fn get_type(&self) -> Result<PduType> {
        (**self).get_type()
    }

    #[inline]
    fn get_flags(&self) -> RawPduFlags {
        (**self).get_flags()
    }

    #[inline]
    fn get_header_len(&self) -> usize {
        (**self).get_header_len()
    }

    #[inline]
    fn get_pdu_len(&self) -> usize {
        (**self).get_pdu_len()
    }

    #[inline]
    fn set_pdu_len(&mut self, len: u32) {
        (**self).set_pdu_len(len)
    }
}
