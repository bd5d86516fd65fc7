// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use reverse_tunnel_rs::{
    proto::session_id::SessionId,
    server::registry::{ControlHandle, Registry},
};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

async fn socket_pair() -> Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let dialed = TcpStream::connect(addr).await?;
    let (accepted, _) = listener.accept().await?;
    Ok((dialed, accepted))
}

/// Splits a dialed socket into a control handle plus the peer that observes
/// its writes.
async fn handle_pair() -> Result<(ControlHandle, TcpStream)> {
    let (dialed, accepted) = socket_pair().await?;
    let peer = dialed.local_addr()?;
    let (_reader, writer) = dialed.into_split();
    let handle = ControlHandle::new(peer, Arc::new(Mutex::new(writer)));
    Ok((handle, accepted))
}

#[tokio::test]
async fn test_session_claimed_exactly_once() -> Result<()> {
    let registry = Registry::new();
    let (user, _peer) = socket_pair().await?;

    let sid = SessionId::generate();
    registry.insert_session(sid, user);
    assert_eq!(registry.pending_sessions(), 1);

    assert!(registry.take_session(&sid).is_some());
    assert!(registry.take_session(&sid).is_none());
    assert_eq!(registry.pending_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_yields_none() {
    let registry = Registry::new();
    assert!(registry.take_session(&SessionId::generate()).is_none());
}

#[tokio::test]
async fn test_last_registration_wins() -> Result<()> {
    let registry = Registry::new();
    let (first, _keep_first) = handle_pair().await?;
    let (second, _keep_second) = handle_pair().await?;
    let second_peer = second.peer();

    assert!(!registry.register_client("alpha".to_string(), first));
    assert!(registry.has_client("alpha"));

    // Same identifier again: the stored handle is replaced atomically.
    assert!(registry.register_client("alpha".to_string(), second));
    let current = registry.client("alpha").expect("client must be present");
    assert_eq!(current.peer(), second_peer);
    Ok(())
}

#[tokio::test]
async fn test_handle_send_reaches_peer() -> Result<()> {
    let registry = Registry::new();
    let (handle, mut observer) = handle_pair().await?;
    registry.register_client("alpha".to_string(), handle);

    let snapshot = registry.client("alpha").expect("registered above");
    snapshot.send(&[0x01]).await?;

    let mut byte = [0u8; 1];
    observer.read_exact(&mut byte).await?;
    assert_eq!(byte, [0x01]);
    Ok(())
}
