// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::models::{
    common::{CommonHeader, PduHeader, RawPduFlags},
    init::common::{PFV_1_0, RawDigestBits},
    pdu_type::PduType,
};

/// Initial Connection Response PDU (`icresp`), written synchronously on the
/// receive path once the `icreq` has been validated.
#[repr(C)]
#[derive(Debug, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct IcRespPdu {
    pub ch: CommonHeader,
    pub pfv: U16<LittleEndian>,
    pub cpda: u8,
    pub digest: RawDigestBits,
    /// Largest h2c data payload the target accepts per PDU.
    pub maxdata: U32<LittleEndian>,
    reserved: [u8; 112],
}

impl IcRespPdu {
    pub const HLEN: usize = 128;
    pub const MAXDATA: u32 = 0xffff;

    pub fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != Self::HLEN {
            bail!("buffer length must be {}, got {}", Self::HLEN, buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_wire_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf)
            .map_err(|e| anyhow!("failed convert buffer IcRespPdu: {e}"))?;
        if hdr.ch.pdu_type.known() != Some(PduType::IcResp) {
            bail!("IcRespPdu: invalid pdu type 0x{:02x}", hdr.ch.pdu_type.raw());
        }
        Ok(hdr)
    }
}

/// Builder for `icresp` PDUs.
#[derive(Debug)]
pub struct IcRespBuilder {
    pub header: IcRespPdu,
}

impl IcRespBuilder {
    pub fn new() -> Self {
        IcRespBuilder {
            header: IcRespPdu {
                ch: CommonHeader::new(PduType::IcResp, IcRespPdu::HLEN as u8),
                pfv: U16::new(PFV_1_0),
                cpda: 0,
                digest: RawDigestBits::default(),
                maxdata: U32::new(IcRespPdu::MAXDATA),
                reserved: [0u8; 112],
            },
        }
    }

    /// Echo the digests the target actually enabled.
    pub fn digests(mut self, hdgst: bool, ddgst: bool) -> Self {
        self.header.digest.set_hdgst(hdgst);
        self.header.digest.set_ddgst(ddgst);
        self
    }

    pub fn maxdata(mut self, maxdata: u32) -> Self {
        self.header.maxdata.set(maxdata);
        self
    }
}

impl Default for IcRespBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduHeader for IcRespPdu {
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

