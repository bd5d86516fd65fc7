// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bidirectional byte bridging between the two sockets of one session.

use anyhow::{Result, anyhow};
use tokio::{
    io::{AsyncWriteExt, copy},
    net::TcpStream,
};
use tracing::debug;

use crate::proto::session_id::SessionId;

/// Bridges `a` and `b` until both directions have terminated.
///
/// Each direction runs as its own copier task; when one direction sees EOF or
/// an error, the opposing write side is shut down so the other copier can
/// finish instead of blocking forever. Returns the byte totals
/// `(a_to_b, b_to_a)`; a direction that ended in a transport error reports
/// the bytes as zero.
pub async fn splice(sid: SessionId, a: TcpStream, b: TcpStream) -> Result<(u64, u64)> {
    let (mut a_rd, mut a_wr) = a.into_split();
    let (mut b_rd, mut b_wr) = b.into_split();

    let forward = tokio::spawn(async move {
        let copied = match copy(&mut a_rd, &mut b_wr).await {
            Ok(n) => n,
            Err(e) => {
                debug!(%sid, "forward copy ended: {e}");
                0
            },
        };
        let _ = b_wr.shutdown().await;
        copied
    });

    let reverse = tokio::spawn(async move {
        let copied = match copy(&mut b_rd, &mut a_wr).await {
            Ok(n) => n,
            Err(e) => {
                debug!(%sid, "reverse copy ended: {e}");
                0
            },
        };
        let _ = a_wr.shutdown().await;
        copied
    });

    let a_to_b = forward
        .await
        .map_err(|e| anyhow!("forward copier for {sid} died: {e}"))?;
    let b_to_a = reverse
        .await
        .map_err(|e| anyhow!("reverse copier for {sid} died: {e}"))?;

    Ok((a_to_b, b_to_a))
}
