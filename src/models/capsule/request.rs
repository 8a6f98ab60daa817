// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout};

use crate::models::{
    common::{CH_LEN, CommonHeader, PduHeader, RawPduFlags},
    nvme::NvmeSqe,
    pdu_type::PduType,
};

/// Command capsule PDU (`cmd`): the common header followed by a 64-byte
/// NVMe submission queue entry. A write command may carry its payload
/// in-capsule, in which case `plen` exceeds `hlen` (plus digests).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CmdCapsulePdu {
    pub ch: CommonHeader,
    pub sqe: NvmeSqe,
}

impl CmdCapsulePdu {
    pub const HLEN: usize = CH_LEN + crate::models::nvme::SQE_LEN;

    pub fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != Self::HLEN {
            bail!("buffer length must be {}, got {}", Self::HLEN, buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_wire_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf)
            .map_err(|e| anyhow!("failed convert buffer CmdCapsulePdu: {e}"))?;
        if hdr.ch.pdu_type.known() != Some(PduType::CapsuleCmd) {
            bail!(
                "CmdCapsulePdu: invalid pdu type 0x{:02x}",
                hdr.ch.pdu_type.raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for command capsules. The target only parses these, but the
/// integration tests drive the wire as an initiator.
#[derive(Debug, Default)]
pub struct CmdCapsuleBuilder {
    pub header: CmdCapsulePdu,
}

impl CmdCapsuleBuilder {
    pub fn new() -> Self {
        CmdCapsuleBuilder {
            header: CmdCapsulePdu {
                ch: CommonHeader::new(PduType::CapsuleCmd, CmdCapsulePdu::HLEN as u8),
                ..Default::default()
            },
        }
    }

    pub fn sqe(mut self, sqe: NvmeSqe) -> Self {
        self.header.sqe = sqe;
        self
    }

    /// Account for an in-capsule write payload.
    pub fn inline_data_len(mut self, len: u32) -> Self {
        let plen = self.header.ch.plen.get() + len;
        self.header.ch.plen.set(plen);
        self.header.ch.pdo = if len > 0 {
            CmdCapsulePdu::HLEN as u8
        } else {
            0
        };
        self
    }
}

impl PduHeader for CmdCapsulePdu {
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

