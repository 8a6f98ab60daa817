// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::models::{
    common::{CH_LEN, CommonHeader, DIGEST_LEN, PduHeader, RawPduFlags},
    pdu_type::PduType,
};

/// Controller-to-host data PDU (`c2h_data`): read payload. The target
/// emits the whole transfer as one data PDU, so `plen` is
/// `hlen + hdgst + transfer_len + ddgst` even though only header bytes are
/// written when the PDU is set up; payload and trailing digest follow from
/// the command's scatter-gather list.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct C2HDataPdu {
    pub ch: CommonHeader,
    pub command_id: U16<LittleEndian>,
    pub ttag: U16<LittleEndian>,
    pub data_offset: U32<LittleEndian>,
    pub data_length: U32<LittleEndian>,
    reserved: [u8; 4],
}

impl C2HDataPdu {
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
            .map_err(|e| anyhow!("failed convert buffer C2HDataPdu: {e}"))?;
        if hdr.ch.pdu_type.known() != Some(PduType::C2HData) {
            bail!(
                "C2HDataPdu: invalid pdu type 0x{:02x}",
                hdr.ch.pdu_type.raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for `c2h_data` PDUs.
#[derive(Debug, Default)]
pub struct C2HDataBuilder {
    pub header: C2HDataPdu,
    hdgst: bool,
    ddgst: bool,
}

impl C2HDataBuilder {
    pub fn new() -> Self {
        let mut ch = CommonHeader::new(PduType::C2HData, C2HDataPdu::HLEN as u8);
        ch.flags.set_data_last(true);
        C2HDataBuilder {
            header: C2HDataPdu {
                ch,
                ..Default::default()
            },
            hdgst: false,
            ddgst: false,
        }
    }

    pub fn command_id(mut self, cid: u16) -> Self {
        self.header.command_id.set(cid);
        self
    }

    pub fn window(mut self, offset: u32, length: u32) -> Self {
        self.header.data_offset.set(offset);
        self.header.data_length.set(length);
        self
    }

    pub fn with_header_digest(mut self) -> Self {
        self.hdgst = true;
        self.header.ch.flags.set_hdgst(true);
        self
    }

    pub fn with_data_digest(mut self) -> Self {
        self.ddgst = true;
        self.header.ch.flags.set_ddgst(true);
        self
    }

    /// Finalize `pdo`/`plen` once window and digests are known.
    pub fn seal(mut self) -> C2HDataPdu {
        let hdgst = DIGEST_LEN * self.hdgst as usize;
        let ddgst = DIGEST_LEN * self.ddgst as usize;
        self.header.ch.pdo = (C2HDataPdu::HLEN + hdgst) as u8;
        self.header.ch.plen.set(
            (C2HDataPdu::HLEN + hdgst + ddgst) as u32 + self.header.data_length.get(),
        );
        self.header
    }
}

impl PduHeader for C2HDataPdu {
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

