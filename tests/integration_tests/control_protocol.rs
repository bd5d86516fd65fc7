// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Raw-socket probes of the server's control-plane behavior.

use std::time::Duration;

use anyhow::Result;
use reverse_tunnel_rs::proto::{record::ControlRecord, session_id::SessionId};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::integration_tests::common::{
    binding_for, dead_target, init_test_logger, read_exactly, server_config,
    spawn_server, stays_silent, wait_until,
};

async fn register(control: std::net::SocketAddr, client_id: &str) -> Result<TcpStream> {
    let mut conn = TcpStream::connect(control).await?;
    let record = ControlRecord::Connect {
        client_id: client_id.to_string(),
    }
    .encode()?;
    conn.write_all(&record).await?;
    Ok(conn)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_client_closed_silently() -> Result<()> {
    init_test_logger();
    let target = dead_target().await?;
    let server = spawn_server(&server_config(vec![binding_for("alpha", target)])).await?;

    let mut conn = register(server.control, "beta").await?;

    // No response record exists for a rejection; the socket just closes.
    let mut byte = [0u8; 1];
    let read = timeout(Duration::from_secs(5), conn.read(&mut byte)).await?;
    assert_eq!(read?, 0, "server must close without writing");
    assert!(!server.registry.has_client("beta"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heartbeat_echoed_once_each() -> Result<()> {
    init_test_logger();
    let target = dead_target().await?;
    let server = spawn_server(&server_config(vec![binding_for("alpha", target)])).await?;

    let mut conn = register(server.control, "alpha").await?;
    wait_until("registration", || server.registry.has_client("alpha")).await?;

    for _ in 0..3 {
        conn.write_all(&[0x01]).await?;
        assert_eq!(read_exactly(&mut conn, 1).await?, vec![0x01]);
    }

    // Nothing beyond the three echoes may arrive.
    assert!(stays_silent(&mut conn, Duration::from_millis(300)).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_is_decoded_in_order() -> Result<()> {
    init_test_logger();
    let target = dead_target().await?;
    let server = spawn_server(&server_config(vec![binding_for("alpha", target)])).await?;

    // One write carrying a heartbeat followed by a registration. The
    // identifier record must come last because it runs to the end of the
    // batch.
    let mut batch = vec![0x01, 0x00];
    batch.extend_from_slice(b"alpha");

    let mut conn = TcpStream::connect(server.control).await?;
    conn.write_all(&batch).await?;

    assert_eq!(read_exactly(&mut conn, 1).await?, vec![0x01]);
    wait_until("registration", || server.registry.has_client("alpha")).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attach_for_unknown_session_closes_only_that_socket() -> Result<()> {
    init_test_logger();
    let target = dead_target().await?;
    let server = spawn_server(&server_config(vec![binding_for("alpha", target)])).await?;

    // A real client that registers but never opens tunnels, leaving the
    // user's session parked.
    let mut idle_client = register(server.control, "alpha").await?;
    wait_until("registration", || server.registry.has_client("alpha")).await?;

    let mut user = TcpStream::connect(server.publics[0]).await?;
    user.write_all(b"knock").await?;
    wait_until("parked session", || server.registry.pending_sessions() == 1).await?;

    // A bogus attach names a session that does not exist.
    let attach = ControlRecord::AttachTunnel {
        sid: SessionId::generate(),
    }
    .encode()?;
    let mut bogus = TcpStream::connect(server.control).await?;
    bogus.write_all(&attach).await?;

    let mut byte = [0u8; 1];
    let read = timeout(Duration::from_secs(5), bogus.read(&mut byte)).await?;
    assert_eq!(read?, 0, "bogus data socket must be closed");

    // The parked session and the registered client are untouched.
    assert_eq!(server.registry.pending_sessions(), 1);
    assert!(server.registry.has_client("alpha"));
    assert!(stays_silent(&mut user, Duration::from_millis(200)).await);

    // The instruction for the parked session did reach the idle client.
    let mut instruction = vec![0u8; 256];
    let n = timeout(Duration::from_secs(5), idle_client.read(&mut instruction)).await??;
    let records = ControlRecord::decode_batch(&instruction[..n])?;
    assert!(matches!(records[0], ControlRecord::OpenTunnel { .. }));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reregistration_takes_over_routing() -> Result<()> {
    init_test_logger();
    let target = dead_target().await?;
    let server = spawn_server(&server_config(vec![binding_for("alpha", target)])).await?;

    let mut first = register(server.control, "alpha").await?;
    wait_until("first registration", || server.registry.has_client("alpha")).await?;

    let second = register(server.control, "alpha").await?;
    let second_addr = second.local_addr()?;
    wait_until("takeover", || {
        server
            .registry
            .client("alpha")
            .is_some_and(|handle| handle.peer() == second_addr)
    })
    .await?;

    // A fresh user must be signalled on the new connection only.
    let _user = TcpStream::connect(server.publics[0]).await?;

    let mut second = second;
    let mut instruction = vec![0u8; 256];
    let n = timeout(Duration::from_secs(5), second.read(&mut instruction)).await??;
    let records = ControlRecord::decode_batch(&instruction[..n])?;
    match &records[0] {
        ControlRecord::OpenTunnel { host, port, .. } => {
            assert_eq!(host, &target.ip().to_string());
            assert_eq!(port, &target.port().to_string());
        },
        other => panic!("expected a tunnel-open instruction, got {other:?}"),
    }

    assert!(stays_silent(&mut first, Duration::from_millis(300)).await);
    Ok(())
}
