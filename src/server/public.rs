// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::{
    cfg::config::PublicBinding,
    proto::{record::ControlRecord, session_id::SessionId},
    server::registry::Registry,
};

/// Accepts external users on one public port and signals the bound client to
/// open a data tunnel for each of them.
pub async fn accept_loop(
    listener: TcpListener,
    binding: PublicBinding,
    registry: Arc<Registry>,
) -> Result<()> {
    loop {
        let (user, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(client_id = %binding.client_id, "user accept failed: {e}");
                continue;
            },
        };
        let _ = user.set_nodelay(true);
        debug!(%peer, client_id = %binding.client_id, "user connected");

        let sid = SessionId::generate();
        // The parked entry must be visible before the client can possibly
        // answer with an attach.
        registry.insert_session(sid, user);

        let Some(handle) = registry.client(&binding.client_id) else {
            warn!(
                client_id = %binding.client_id,
                %sid,
                "no registered control connection, dropping user"
            );
            drop(registry.take_session(&sid));
            continue;
        };

        let record = ControlRecord::OpenTunnel {
            sid,
            host: binding.target_host.clone(),
            port: binding.target_port.clone(),
        };
        let encoded = match record.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(client_id = %binding.client_id, %sid, "unencodable binding: {e}");
                drop(registry.take_session(&sid));
                continue;
            },
        };

        if let Err(e) = handle.send(&encoded).await {
            // The entry stays parked; no sweep reclaims it.
            warn!(
                client_id = %binding.client_id,
                %sid,
                peer = %handle.peer(),
                "failed to signal client: {e:#}"
            );
        }
    }
}
