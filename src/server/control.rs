// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use anyhow::{Result, anyhow, bail};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::{
    proto::{
        framing::read_batch,
        record::ControlRecord,
        session_id::SessionId,
        tag::ControlTag,
    },
    server::registry::{ControlHandle, Registry},
    splice::splice,
};

/// Accepts control-port connections.
///
/// Both the long-lived client registrations and the short-lived per-session
/// data sockets arrive here; a connection reveals which it is by its first
/// record.
pub async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    allowed: Arc<HashSet<String>>,
    buf_size: usize,
) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("control accept failed: {e}");
                continue;
            },
        };

        let registry = Arc::clone(&registry);
        let allowed = Arc::clone(&allowed);
        tokio::spawn(async move {
            if let Err(e) =
                handle_control_conn(stream, peer, registry, allowed, buf_size).await
            {
                debug!(%peer, "control connection closed: {e:#}");
            }
        });
    }
}

/// Per-connection state machine.
///
/// Registrations keep this task alive, reading batch after batch; a tunnel
/// attach consumes the connection and terminates the task. Any transport or
/// protocol error closes the connection.
async fn handle_control_conn(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    allowed: Arc<HashSet<String>>,
    buf_size: usize,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let handle = ControlHandle::new(peer, Arc::clone(&writer));

    loop {
        let batch = read_batch(&mut reader, buf_size).await?;
        for record in ControlRecord::decode_batch(&batch)? {
            match record {
                ControlRecord::Connect { client_id } => {
                    if !allowed.contains(&client_id) {
                        // Rejection is a silent close; no response record exists.
                        debug!(%peer, %client_id, "registration rejected");
                        return Ok(());
                    }
                    let replaced =
                        registry.register_client(client_id.clone(), handle.clone());
                    if replaced {
                        info!(
                            %peer,
                            %client_id,
                            "client re-registered, previous control connection orphaned"
                        );
                    } else {
                        info!(%peer, %client_id, "client registered");
                    }
                },
                ControlRecord::Heartbeat => {
                    handle.send(&[u8::from(ControlTag::Heartbeat)]).await?;
                },
                ControlRecord::AttachTunnel { sid } => {
                    // Release the local writer clone so the halves can be
                    // reunited; only a registered handle may still share it.
                    drop(handle);
                    return attach_tunnel(reader, writer, sid, &registry, peer);
                },
                ControlRecord::OpenTunnel { .. } => {
                    bail!("tunnel-open record received from a client");
                },
            }
        }
    }
}

/// Pairs the data socket with the parked user connection and hands both to a
/// splice task. The control handler terminates either way: the connection is
/// consumed and is not a control channel from here on.
fn attach_tunnel(
    reader: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    sid: SessionId,
    registry: &Registry,
    peer: SocketAddr,
) -> Result<()> {
    let writer = Arc::try_unwrap(writer)
        .map_err(|_| anyhow!("data socket is shared as a registered control connection"))?
        .into_inner();
    let data = reader
        .reunite(writer)
        .map_err(|e| anyhow!("failed to reunite data socket halves: {e}"))?;

    let Some(pending) = registry.take_session(&sid) else {
        debug!(%sid, %peer, "data tunnel for unknown session, closing");
        return Ok(());
    };

    let waited = pending.created_at.elapsed();
    debug!(%sid, %peer, ?waited, "pairing user connection with data tunnel");

    tokio::spawn(async move {
        match splice(sid, pending.user, data).await {
            Ok((to_client, to_user)) => {
                info!(%sid, to_client, to_user, "session finished");
            },
            Err(e) => warn!(%sid, "session splice failed: {e:#}"),
        }
    });

    Ok(())
}
