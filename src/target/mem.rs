// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! RAM-backed command executor.
//!
//! Backs the CLI binary and the integration tests: a sparse block store
//! keyed by LBA where unwritten blocks read back as a constant fill
//! pattern. Completions are issued synchronously from the calling context,
//! which still exercises the inbox hand-off the engine relies on.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU16, Ordering},
    },
};

use bytes::Bytes;
use tracing::{debug, warn};
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    models::nvme::{FabricsConnect, NvmeCqe, NvmeSqe, fabrics, opcode, status},
    queue::sg::SgList,
    target::executor::{
        CommandExecutor, ExecRequest, ReqShape, SqInstall, TransferDir,
    },
};

/// Logical block size of the RAM device.
pub const BLOCK_SIZE: usize = 512;

/// Fill byte for never-written blocks.
pub const READ_PATTERN: u8 = 0x5a;

/// Fabrics Connect carries 1024 bytes of in-capsule connect data.
pub const CONNECT_DATA_LEN: usize = 1024;

const IDENTIFY_LEN: usize = 4096;

#[derive(Debug, Default)]
pub struct MemExecutor {
    blocks: Mutex<HashMap<u64, Vec<u8>>>,
    next_cntlid: AtomicU16,
}

impl MemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_blocks(&self, slba: u64, nlb: u32) -> SgList {
        let blocks = self.blocks.lock().unwrap_or_else(|p| p.into_inner());
        let mut out = Vec::with_capacity(nlb as usize * BLOCK_SIZE);
        for lba in slba..slba + nlb as u64 {
            match blocks.get(&lba) {
                Some(b) => out.extend_from_slice(b),
                None => out.extend(std::iter::repeat_n(READ_PATTERN, BLOCK_SIZE)),
            }
        }
        SgList::from_contiguous(Bytes::from(out))
    }

    fn write_blocks(&self, slba: u64, payload: &[u8]) {
        let mut blocks = self.blocks.lock().unwrap_or_else(|p| p.into_inner());
        for (i, chunk) in payload.chunks(BLOCK_SIZE).enumerate() {
            let mut block = vec![0u8; BLOCK_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            blocks.insert(slba + i as u64, block);
        }
    }

    fn connect(&self, req: &ExecRequest) -> (NvmeCqe, Option<SqInstall>) {
        let mut cqe = NvmeCqe::for_command(&req.sqe, req.qid.unwrap_or(0));
        let Ok(connect) = FabricsConnect::ref_from_bytes(req.sqe.as_bytes()) else {
            cqe.set_status(status::INVALID_FIELD | status::DNR);
            return (cqe, None);
        };
        let cntlid = self.next_cntlid.fetch_add(1, Ordering::Relaxed);
        let install = SqInstall {
            qid: connect.sqid.get(),
            size: connect.sqsize.get() + 1,
            cntlid,
        };
        cqe.result.set(cntlid as u32);
        debug!(
            qid = install.qid,
            size = install.size,
            cntlid,
            "fabrics connect"
        );
        (cqe, Some(install))
    }
}

impl CommandExecutor for MemExecutor {
    fn req_init(&self, _qid: Option<u16>, sqe: &NvmeSqe) -> Result<ReqShape, u16> {
        match sqe.opcode {
            opcode::FABRICS => {
                let connect = FabricsConnect::ref_from_bytes(sqe.as_bytes())
                    .map_err(|_| status::INVALID_FIELD | status::DNR)?;
                if connect.fctype != fabrics::CONNECT {
                    return Err(status::INVALID_FIELD | status::DNR);
                }
                Ok(ReqShape {
                    dir: TransferDir::HostToController,
                    transfer_len: CONNECT_DATA_LEN,
                })
            },
            opcode::WRITE => Ok(ReqShape {
                dir: TransferDir::HostToController,
                transfer_len: sqe.nlb() as usize * BLOCK_SIZE,
            }),
            opcode::READ => Ok(ReqShape {
                dir: TransferDir::ControllerToHost,
                transfer_len: sqe.nlb() as usize * BLOCK_SIZE,
            }),
            opcode::IDENTIFY => Ok(ReqShape {
                dir: TransferDir::ControllerToHost,
                transfer_len: IDENTIFY_LEN,
            }),
            opcode::FLUSH | opcode::KEEP_ALIVE => Ok(ReqShape {
                dir: TransferDir::None,
                transfer_len: 0,
            }),
            other => {
                warn!(opcode = other, "unsupported opcode");
                Err(status::INVALID_OPCODE | status::DNR)
            },
        }
    }

    fn req_execute(&self, req: ExecRequest) {
        let sq_id = req.qid.unwrap_or(0);
        match req.sqe.opcode {
            opcode::FABRICS => {
                let (cqe, install) = self.connect(&req);
                req.done.complete(cqe, SgList::empty(), install);
            },
            opcode::WRITE => {
                let payload = req.data.to_vec();
                self.write_blocks(req.sqe.slba(), &payload);
                let cqe = NvmeCqe::for_command(&req.sqe, sq_id);
                req.done.complete(cqe, SgList::empty(), None);
            },
            opcode::READ => {
                let data = self.read_blocks(req.sqe.slba(), req.sqe.nlb());
                let cqe = NvmeCqe::for_command(&req.sqe, sq_id);
                req.done.complete(cqe, data, None);
            },
            opcode::IDENTIFY => {
                let data =
                    SgList::from_contiguous(Bytes::from(vec![0u8; IDENTIFY_LEN]));
                let cqe = NvmeCqe::for_command(&req.sqe, sq_id);
                req.done.complete(cqe, data, None);
            },
            opcode::FLUSH | opcode::KEEP_ALIVE => {
                let cqe = NvmeCqe::for_command(&req.sqe, sq_id);
                req.done.complete(cqe, SgList::empty(), None);
            },
            _ => {
                let mut cqe = NvmeCqe::for_command(&req.sqe, sq_id);
                cqe.set_status(status::INVALID_OPCODE | status::DNR);
                req.done.complete(cqe, SgList::empty(), None);
            },
        }
    }
}
