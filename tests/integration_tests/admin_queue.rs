// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use nvmet_tcp_rs::models::{nvme::opcode, pdu_type::PduType};
use serial_test::serial;
use tokio::io::AsyncWriteExt;

use crate::integration_tests::common::{
    admin_sqe, cmd_capsule, connect_queue, connect_target, handshake, parse_c2h,
    parse_rsp, read_pdu, start_target,
};

/// qid 0 bypasses the caravans: emissions go straight to the socket, in
/// the same order, one command at a time.
#[tokio::test]
#[serial]
async fn admin_queue_serves_keep_alive_and_identify() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 0, 31).await?;

    // No-data command.
    let capsule = cmd_capsule(admin_sqe(opcode::KEEP_ALIVE, 1), &[], false, false);
    s.write_all(&capsule).await?;
    let (t1, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t1, PduType::CapsuleResp);
    let rsp = parse_rsp(&rsp_bytes)?;
    assert_eq!(rsp.cqe.command_id.get(), 1);
    assert!(rsp.cqe.is_success());

    // Admin read: data PDU then response, directly written.
    let capsule = cmd_capsule(admin_sqe(opcode::IDENTIFY, 2), &[], false, false);
    s.write_all(&capsule).await?;
    let (t2, data_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t2, PduType::C2HData);
    let (hdr, payload) = parse_c2h(&data_bytes)?;
    assert_eq!(hdr.command_id.get(), 2);
    assert_eq!(hdr.data_length.get(), 4096);
    assert!(payload.iter().all(|&b| b == 0));
    let (t3, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t3, PduType::CapsuleResp);
    assert!(parse_rsp(&rsp_bytes)?.cqe.is_success());
    Ok(())
}

/// Controller delete tears down every queue bound to the controller.
#[tokio::test]
#[serial]
async fn delete_ctrl_disconnects_queues() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 0, 31).await?;

    // The MemExecutor hands out cntlids starting at 0.
    assert_eq!(t.registry.delete_ctrl(0), 1);
    crate::integration_tests::common::wait_for_queues(&t.registry, 0).await?;
    Ok(())
}
