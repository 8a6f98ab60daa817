// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Zero-copy views of the NVMe submission and completion entries carried
//! inside command and response capsules.

use zerocopy::{
    FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32,
    U64,
};

/// Size of an NVMe submission queue entry.
pub const SQE_LEN: usize = 64;

/// Size of an NVMe completion queue entry.
pub const CQE_LEN: usize = 16;

pub mod opcode {
    //! Opcodes the in-memory executor understands. The engine itself only
    //! cares about the fabrics opcode; everything else is executor policy.
    pub const FLUSH: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const IDENTIFY: u8 = 0x06;
    pub const KEEP_ALIVE: u8 = 0x18;
    pub const FABRICS: u8 = 0x7f;
}

pub mod fabrics {
    pub const CONNECT: u8 = 0x01;
}

pub mod status {
    //! NVMe status codes, pre-shift (bit 0 of the wire field is the phase
    //! tag; `NvmeCqe::set_status` applies the shift).
    pub const SUCCESS: u16 = 0x0000;
    pub const INVALID_OPCODE: u16 = 0x0001;
    pub const INVALID_FIELD: u16 = 0x0002;
    pub const DATA_XFER_ERROR: u16 = 0x0004;
    pub const INTERNAL: u16 = 0x0006;
    /// Do Not Retry.
    pub const DNR: u16 = 0x4000;
}

/// NVMe submission queue entry (64 bytes).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct NvmeSqe {
    pub opcode: u8,
    pub flags: u8,
    pub command_id: U16<LittleEndian>,
    pub nsid: U32<LittleEndian>,
    pub cdw2: U32<LittleEndian>,
    pub cdw3: U32<LittleEndian>,
    pub mptr: U64<LittleEndian>,
    pub dptr: [u8; 16],
    pub cdw10: U32<LittleEndian>,
    pub cdw11: U32<LittleEndian>,
    pub cdw12: U32<LittleEndian>,
    pub cdw13: U32<LittleEndian>,
    pub cdw14: U32<LittleEndian>,
    pub cdw15: U32<LittleEndian>,
}

impl NvmeSqe {
    #[inline]
    pub fn is_fabrics(&self) -> bool {
        self.opcode == opcode::FABRICS
    }

    /// Starting LBA of a Read/Write command.
    #[inline]
    pub fn slba(&self) -> u64 {
        (self.cdw11.get() as u64) << 32 | self.cdw10.get() as u64
    }

    /// Number of logical blocks of a Read/Write command (the wire field is
    /// zero-based).
    #[inline]
    pub fn nlb(&self) -> u32 {
        (self.cdw12.get() & 0xffff) + 1
    }
}

/// Fabrics Connect view over the same 64 bytes as [`NvmeSqe`].
#[repr(C)]
#[derive(Debug, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FabricsConnect {
    pub opcode: u8,
    reserved1: u8,
    pub command_id: U16<LittleEndian>,
    pub fctype: u8,
    reserved2: [u8; 19],
    pub sqid: U16<LittleEndian>,
    pub sqsize: U16<LittleEndian>,
    pub cattr: u8,
    reserved3: [u8; 3],
    pub kato: U32<LittleEndian>,
    reserved4: [u8; 28],
}

/// NVMe completion queue entry (16 bytes).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct NvmeCqe {
    pub result: U32<LittleEndian>,
    reserved: U32<LittleEndian>,
    pub sq_head: U16<LittleEndian>,
    pub sq_id: U16<LittleEndian>,
    pub command_id: U16<LittleEndian>,
    pub status: U16<LittleEndian>,
}

impl NvmeCqe {
    pub fn for_command(sqe: &NvmeSqe, sq_id: u16) -> Self {
        let mut cqe = NvmeCqe::default();
        cqe.command_id.set(sqe.command_id.get());
        cqe.sq_id.set(sq_id);
        cqe
    }

    /// Store a pre-shift status code; bit 0 of the wire field is the phase
    /// tag and stays clear on fabrics transports.
    #[inline]
    pub fn set_status(&mut self, sc: u16) {
        self.status.set(sc << 1);
    }

    #[inline]
    pub fn status_code(&self) -> u16 {
        self.status.get() >> 1
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status_code() == status::SUCCESS
    }
}
