// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use nvmet_tcp_rs::models::{capsule::request::CmdCapsulePdu, nvme::opcode};
use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::integration_tests::common::{
    cmd_capsule, connect_target, handshake, rw_sqe, start_target, wait_for_queues,
};

#[tokio::test]
#[serial]
async fn header_digest_mismatch_is_fatal() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;

    let resp = handshake(&mut s, true, false).await?;
    assert!(resp.digest.hdgst());

    // Corrupt one bit of the 4-byte header digest trailer.
    let mut capsule = cmd_capsule(rw_sqe(opcode::READ, 1, 0, 1), &[], true, false);
    capsule[CmdCapsulePdu::HLEN] ^= 0x01;
    s.write_all(&capsule).await?;

    // No response is emitted; the queue goes to its receive-error state and
    // the socket is shut down.
    let mut buf = [0u8; 1];
    match s.read(&mut buf).await {
        Ok(0) => {},
        Ok(n) => panic!("unexpected {n} bytes after digest mismatch"),
        // Abortive close may surface as a reset instead of EOF.
        Err(_) => {},
    }
    wait_for_queues(&t.registry, 0).await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn intact_header_digest_is_accepted() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;

    let resp = handshake(&mut s, true, false).await?;
    assert!(resp.digest.hdgst());

    crate::integration_tests::common::connect_queue_with_digests(&mut s, 1, 63, true)
        .await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn data_digest_protects_inline_payload() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;

    let resp = handshake(&mut s, false, true).await?;
    assert!(resp.digest.ddgst());

    // Good digest first: the write completes.
    let payload = vec![0x11u8; 512];
    let capsule = cmd_capsule(rw_sqe(opcode::WRITE, 2, 0, 1), &payload, false, true);
    s.write_all(&capsule).await?;
    let (kind, bytes) = crate::integration_tests::common::read_pdu(&mut s).await?;
    assert_eq!(kind, nvmet_tcp_rs::models::pdu_type::PduType::CapsuleResp);
    assert!(
        crate::integration_tests::common::parse_rsp(&bytes)?
            .cqe
            .is_success()
    );

    // Corrupted payload (digest now stale): fatal for the queue.
    let mut capsule = cmd_capsule(rw_sqe(opcode::WRITE, 3, 8, 1), &payload, false, true);
    let len = capsule.len();
    capsule[len - 5] ^= 0x80;
    s.write_all(&capsule).await?;
    wait_for_queues(&t.registry, 0).await?;
    Ok(())
}
