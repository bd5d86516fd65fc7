// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{debug, info};

use crate::{
    cfg::config::ClientSettings,
    proto::{record::ControlRecord, session_id::SessionId},
    splice::splice,
};

/// Establishes the client side of one session.
///
/// Dials a fresh data socket to the server and a target socket to the
/// backend, announces the session id on the data socket in a single write,
/// then bridges the two until both directions are done. A failure before the
/// announce leaves the server unaware; its parked user entry stays behind.
pub async fn open(
    settings: &ClientSettings,
    sid: SessionId,
    host: &str,
    port: &str,
) -> Result<()> {
    let mut data = TcpStream::connect(settings.server_addr())
        .await
        .context("failed to dial server for data tunnel")?;
    let _ = data.set_nodelay(true);

    let target = TcpStream::connect(format!("{host}:{port}"))
        .await
        .with_context(|| format!("failed to dial target {host}:{port}"))?;
    let _ = target.set_nodelay(true);

    let attach = ControlRecord::AttachTunnel { sid }.encode()?;
    data.write_all(&attach)
        .await
        .context("failed to announce data tunnel")?;
    debug!(%sid, backend = %format!("{host}:{port}"), "data tunnel attached");

    let (to_target, to_server) = splice(sid, data, target).await?;
    info!(%sid, to_target, to_server, "data tunnel finished");

    Ok(())
}
