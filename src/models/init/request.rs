// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::models::{
    common::{CommonHeader, PduHeader, RawPduFlags},
    init::common::RawDigestBits,
    pdu_type::PduType,
};

/// Initial Connection Request PDU (`icreq`), the mandatory first inbound
/// PDU on every connection.
///
/// The initiator declares the framing version, its data alignment
/// requirement (`hpda`), which digests it wants, and how many R2Ts per
/// command it can honour beyond the first (`maxr2t`).
#[repr(C)]
#[derive(Debug, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct IcReqPdu {
    pub ch: CommonHeader,
    pub pfv: U16<LittleEndian>,
    pub hpda: u8,
    pub digest: RawDigestBits,
    pub maxr2t: U32<LittleEndian>,
    reserved: [u8; 112],
}

impl IcReqPdu {
    pub const HLEN: usize = 128;

    pub fn new() -> Self {
        IcReqPdu {
            ch: CommonHeader::new(PduType::IcReq, Self::HLEN as u8),
            pfv: U16::new(crate::models::init::common::PFV_1_0),
            hpda: 0,
            digest: RawDigestBits::default(),
            maxr2t: U32::new(0),
            reserved: [0u8; 112],
        }
    }

    pub fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != Self::HLEN {
            bail!("buffer length must be {}, got {}", Self::HLEN, buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_wire_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf)
            .map_err(|e| anyhow!("failed convert buffer IcReqPdu: {e}"))?;
        if hdr.ch.pdu_type.known() != Some(PduType::IcReq) {
            bail!("IcReqPdu: invalid pdu type 0x{:02x}", hdr.ch.pdu_type.raw());
        }
        Ok(hdr)
    }
}

impl Default for IcReqPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl PduHeader for IcReqPdu {
    #[inline]
    fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        self.to_wire_bytes(buf)
    }

    #[inline]
    fn get_type(&self) -> Result<PduType> {
        Ok(PduType::try_from(self.ch.pdu_type.raw())?)
    }

    #[inline]
    fn get_flags(&self) -> RawPduFlags {
        self.ch.flags
    }

    #[inline]
    fn get_header_len(&self) -> usize {
        self.ch.hlen as usize
    }

    #[inline]
    fn get_pdu_len(&self) -> usize {
        self.ch.plen.get() as usize
    }

    #[inline]
    fn set_pdu_len(&mut self, len: u32) {
        self.ch.plen.set(len);
    }
}

