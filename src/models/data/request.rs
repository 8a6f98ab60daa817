// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::models::{
    common::{CH_LEN, CommonHeader, PduHeader, RawPduFlags},
    pdu_type::PduType,
};

/// Host-to-controller data PDU (`h2c_data`): write payload solicited by an
/// earlier R2T. `ttag` echoes the transfer tag the target handed out, which
/// is the command slot index, so dispatch is O(1).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct H2CDataPdu {
    pub ch: CommonHeader,
    pub command_id: U16<LittleEndian>,
    pub ttag: U16<LittleEndian>,
    pub data_offset: U32<LittleEndian>,
    pub data_length: U32<LittleEndian>,
    reserved: [u8; 4],
}

impl H2CDataPdu {
    pub const HLEN: usize = CH_LEN + 16;

    pub fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != Self::HLEN {
            bail!("buffer length must be {}, got {}", Self::HLEN, buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_wire_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf)
            .map_err(|e| anyhow!("failed convert buffer H2CDataPdu: {e}"))?;
        if hdr.ch.pdu_type.known() != Some(PduType::H2CData) {
            bail!(
                "H2CDataPdu: invalid pdu type 0x{:02x}",
                hdr.ch.pdu_type.raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for `h2c_data` PDUs, used by the initiator side of the
/// integration tests.
#[derive(Debug, Default)]
pub struct H2CDataBuilder {
    pub header: H2CDataPdu,
}

impl H2CDataBuilder {
    pub fn new() -> Self {
        let mut ch = CommonHeader::new(PduType::H2CData, H2CDataPdu::HLEN as u8);
        ch.flags.set_data_last(true);
        H2CDataBuilder {
            header: H2CDataPdu {
                ch,
                ..Default::default()
            },
        }
    }

    pub fn ttag(mut self, ttag: u16) -> Self {
        self.header.ttag.set(ttag);
        self
    }

    pub fn command_id(mut self, cid: u16) -> Self {
        self.header.command_id.set(cid);
        self
    }

    pub fn window(mut self, offset: u32, length: u32) -> Self {
        self.header.data_offset.set(offset);
        self.header.data_length.set(length);
        self.header.ch.pdo = H2CDataPdu::HLEN as u8;
        self.header
            .ch
            .plen
            .set(H2CDataPdu::HLEN as u32 + length);
        self
    }
}

impl PduHeader for H2CDataPdu {
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

