// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use anyhow::Result;
use nvmet_tcp_rs::{
    models::{nvme::opcode, pdu_type::PduType},
    target::mem::READ_PATTERN,
};
use serial_test::serial;
use tokio::io::AsyncWriteExt;

use crate::integration_tests::common::{
    cmd_capsule, connect_queue, connect_target, handshake, parse_c2h, parse_rsp,
    read_pdu, rw_sqe, start_target,
};

/// A burst larger than one caravan: every reply must still arrive intact
/// and every slot must recycle (the queue keeps serving afterwards).
#[tokio::test]
#[serial]
async fn read_burst_across_many_flushes() -> Result<()> {
    const BURST: u16 = 129;

    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 1, 255).await?;

    for cid in 0..BURST {
        let capsule =
            cmd_capsule(rw_sqe(opcode::READ, cid, cid as u64, 1), &[], false, false);
        s.write_all(&capsule).await?;
    }

    let mut data_seen: HashMap<u16, usize> = HashMap::new();
    let mut rsp_seen: HashMap<u16, bool> = HashMap::new();
    for _ in 0..2 * BURST as usize {
        let (kind, bytes) = read_pdu(&mut s).await?;
        match kind {
            PduType::C2HData => {
                let (hdr, payload) = parse_c2h(&bytes)?;
                assert_eq!(hdr.data_offset.get(), 0);
                assert!(payload.iter().all(|&b| b == READ_PATTERN));
                let prev = data_seen.insert(hdr.command_id.get(), payload.len());
                assert!(prev.is_none(), "duplicate data pdu");
            },
            PduType::CapsuleResp => {
                let rsp = parse_rsp(&bytes)?;
                assert!(rsp.cqe.is_success());
                let prev = rsp_seen.insert(rsp.cqe.command_id.get(), true);
                assert!(prev.is_none(), "duplicate response");
            },
            other => panic!("unexpected pdu type {other:?}"),
        }
    }
    assert_eq!(data_seen.len(), BURST as usize);
    assert_eq!(rsp_seen.len(), BURST as usize);
    assert!(data_seen.values().all(|&len| len == 512));

    // All slots must be back on the free list: another full burst works.
    for cid in 0..16u16 {
        let capsule = cmd_capsule(
            rw_sqe(opcode::READ, 1000 + cid, cid as u64, 1),
            &[],
            false,
            false,
        );
        s.write_all(&capsule).await?;
    }
    let mut seen = 0;
    while seen < 32 {
        let (kind, _) = read_pdu(&mut s).await?;
        assert!(matches!(kind, PduType::C2HData | PduType::CapsuleResp));
        seen += 1;
    }
    Ok(())
}
