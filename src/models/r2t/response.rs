// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::models::{
    common::{CH_LEN, CommonHeader, DIGEST_LEN, PduHeader, RawPduFlags},
    pdu_type::PduType,
};

/// Ready-To-Transfer PDU (`r2t`): solicits the write payload the command
/// capsule did not carry inline. The target advertises a single outstanding
/// R2T per command, so `r2t_length` always covers the whole remainder.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct R2tPdu {
    pub ch: CommonHeader,
    pub command_id: U16<LittleEndian>,
    pub ttag: U16<LittleEndian>,
    pub r2t_offset: U32<LittleEndian>,
    pub r2t_length: U32<LittleEndian>,
    reserved: [u8; 4],
}

impl R2tPdu {
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
            .map_err(|e| anyhow!("failed convert buffer R2tPdu: {e}"))?;
        if hdr.ch.pdu_type.known() != Some(PduType::R2T) {
            bail!("R2tPdu: invalid pdu type 0x{:02x}", hdr.ch.pdu_type.raw());
        }
        Ok(hdr)
    }
}

/// Builder for `r2t` PDUs.
#[derive(Debug, Default)]
pub struct R2tBuilder {
    pub header: R2tPdu,
}

impl R2tBuilder {
    pub fn new() -> Self {
        R2tBuilder {
            header: R2tPdu {
                ch: CommonHeader::new(PduType::R2T, R2tPdu::HLEN as u8),
                ..Default::default()
            },
        }
    }

    pub fn command_id(mut self, cid: u16) -> Self {
        self.header.command_id.set(cid);
        self
    }

    /// `ttag` is the command slot index.
    pub fn ttag(mut self, ttag: u16) -> Self {
        self.header.ttag.set(ttag);
        self
    }

    pub fn window(mut self, offset: u32, length: u32) -> Self {
        self.header.r2t_offset.set(offset);
        self.header.r2t_length.set(length);
        self
    }

    pub fn with_header_digest(mut self) -> Self {
        self.header.ch.flags.set_hdgst(true);
        self.header
            .ch
            .plen
            .set((R2tPdu::HLEN + DIGEST_LEN) as u32);
        self
    }
}

impl PduHeader for R2tPdu {
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

