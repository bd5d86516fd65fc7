// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use dashmap::DashMap;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, tcp::OwnedWriteHalf},
    sync::Mutex,
    time::Instant,
};

use crate::proto::session_id::SessionId;

/// Write side of a control connection, shareable between the handler that
/// owns the read loop and the public acceptors that push tunnel-open records.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    peer: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl ControlHandle {
    pub fn new(peer: SocketAddr, writer: Arc<Mutex<OwnedWriteHalf>>) -> Self {
        Self { peer, writer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one encoded record in a single operation.
    ///
    /// The lock is held only for the write itself, never across unrelated
    /// I/O, so concurrent senders interleave on record boundaries.
    pub async fn send(&self, record: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(record).await?;
        Ok(())
    }
}

/// A user connection parked until its data tunnel attaches.
#[derive(Debug)]
pub struct PendingSession {
    pub user: TcpStream,
    pub created_at: Instant,
}

/// Process-wide shared state: registered control connections and parked user
/// sockets.
///
/// Both maps are concurrent; callers clone handles out before awaiting so no
/// map guard is ever held across socket I/O.
#[derive(Debug, Default)]
pub struct Registry {
    clients: DashMap<String, ControlHandle>,
    sessions: DashMap<SessionId, PendingSession>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a control connection under `client_id`. The last
    /// registration wins; a replaced connection is orphaned until its own
    /// read loop observes the transport failure. Returns whether a previous
    /// handle was replaced.
    pub fn register_client(&self, client_id: String, handle: ControlHandle) -> bool {
        self.clients.insert(client_id, handle).is_some()
    }

    /// Snapshot of the current control handle for `client_id`.
    pub fn client(&self, client_id: &str) -> Option<ControlHandle> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    pub fn has_client(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Parks a freshly accepted user connection under `sid`. Must happen
    /// before the matching tunnel-open record is written.
    pub fn insert_session(&self, sid: SessionId, user: TcpStream) {
        self.sessions.insert(
            sid,
            PendingSession {
                user,
                created_at: Instant::now(),
            },
        );
    }

    /// Claims the parked session for `sid`, if any. A session can be claimed
    /// exactly once.
    pub fn take_session(&self, sid: &SessionId) -> Option<PendingSession> {
        self.sessions.remove(sid).map(|(_, pending)| pending)
    }

    pub fn pending_sessions(&self) -> usize {
        self.sessions.len()
    }
}
