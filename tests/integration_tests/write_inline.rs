// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use nvmet_tcp_rs::models::{nvme::opcode, pdu_type::PduType};
use rand::RngExt;
use serial_test::serial;
use tokio::io::AsyncWriteExt;

use crate::integration_tests::common::{
    cmd_capsule, connect_queue, connect_target, handshake, parse_c2h, parse_rsp,
    read_pdu, rw_sqe, start_target,
};

#[tokio::test]
#[serial]
async fn inline_write_completes_without_r2t() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 1, 63).await?;

    let mut payload = vec![0u8; 512];
    rand::rng().fill(&mut payload[..]);

    let capsule = cmd_capsule(rw_sqe(opcode::WRITE, 9, 4, 1), &payload, false, false);
    s.write_all(&capsule).await?;

    // A fully inline write answers with a bare response capsule.
    let (t1, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t1, PduType::CapsuleResp);
    let rsp = parse_rsp(&rsp_bytes)?;
    assert_eq!(rsp.cqe.command_id.get(), 9);
    assert!(rsp.cqe.is_success());

    // The data landed: read it back.
    let capsule = cmd_capsule(rw_sqe(opcode::READ, 10, 4, 1), &[], false, false);
    s.write_all(&capsule).await?;
    let (t2, data_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t2, PduType::C2HData);
    let (_, got) = parse_c2h(&data_bytes)?;
    assert_eq!(got, payload.as_slice());
    let (t3, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t3, PduType::CapsuleResp);
    assert!(parse_rsp(&rsp_bytes)?.cqe.is_success());
    Ok(())
}

#[tokio::test]
#[serial]
async fn rejected_command_drains_inline_payload() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 1, 63).await?;

    // Opcode 0x71 is nothing the executor knows; the engine must still
    // drain the inline payload and keep the queue usable.
    let payload = vec![0xabu8; 512];
    let capsule = cmd_capsule(rw_sqe(0x71, 11, 0, 1), &payload, false, false);
    s.write_all(&capsule).await?;

    let (t1, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t1, PduType::CapsuleResp);
    let rsp = parse_rsp(&rsp_bytes)?;
    assert_eq!(rsp.cqe.command_id.get(), 11);
    assert!(!rsp.cqe.is_success());

    // Framing survived: a normal read still works.
    let capsule = cmd_capsule(rw_sqe(opcode::READ, 12, 0, 1), &[], false, false);
    s.write_all(&capsule).await?;
    let (t2, _) = read_pdu(&mut s).await?;
    assert_eq!(t2, PduType::C2HData);
    let (t3, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t3, PduType::CapsuleResp);
    assert!(parse_rsp(&rsp_bytes)?.cqe.is_success());
    Ok(())
}
