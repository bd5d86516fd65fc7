// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, tcp::OwnedReadHalf},
    sync::Mutex,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::{ClientConfig, ClientSettings},
    client::{heartbeat, tunnel},
    proto::{framing::read_batch, record::ControlRecord},
};

/// Runs the client until `cancel` fires.
///
/// One pass of the loop is one control-connection lifetime: dial, register,
/// heartbeat, read instructions. Any transport failure tears the connection
/// down and re-enters the dial state after the configured reconnect delay.
/// Data tunnels spawned along the way are independent and survive the
/// control connection that created them.
pub async fn run(cfg: ClientConfig, cancel: CancellationToken) -> Result<()> {
    let settings = Arc::new(cfg.client);

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let stream = match TcpStream::connect(settings.server_addr()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("failed to reach server at {}: {e}", settings.server_addr());
                if wait_or_cancelled(settings.recon_wait_time, &cancel).await {
                    return Ok(());
                }
                continue;
            },
        };
        let _ = stream.set_nodelay(true);
        info!(server = %settings.server_addr(), "control connection established");

        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));

        // Registration is the very first write on a fresh control
        // connection; no acknowledgement is awaited.
        let connect = ControlRecord::Connect {
            client_id: settings.client_id.clone(),
        }
        .encode()?;
        let registered = {
            let mut w = writer.lock().await;
            w.write_all(&connect).await
        };
        if let Err(e) = registered {
            warn!("registration write failed: {e}");
            if wait_or_cancelled(settings.recon_wait_time, &cancel).await {
                return Ok(());
            }
            continue;
        }
        info!(client_id = %settings.client_id, "registered with server");

        let conn_cancel = cancel.child_token();
        let hb = heartbeat::spawn(
            Arc::clone(&writer),
            settings.ping_interval,
            settings.ping_max_cnt,
            conn_cancel.clone(),
        );

        if let Err(e) = read_loop(&mut reader, &settings, &conn_cancel).await {
            warn!("control connection lost: {e:#}");
        }
        conn_cancel.cancel();
        let _ = hb.await;

        if cancel.is_cancelled() {
            return Ok(());
        }
        if wait_or_cancelled(settings.recon_wait_time, &cancel).await {
            return Ok(());
        }
    }
}

/// Consumes instruction batches until the connection or the token dies.
async fn read_loop(
    reader: &mut OwnedReadHalf,
    settings: &Arc<ClientSettings>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            batch = read_batch(reader, settings.buf_size) => batch?,
        };

        for record in ControlRecord::decode_batch(&batch)? {
            match record {
                ControlRecord::OpenTunnel { sid, host, port } => {
                    let settings = Arc::clone(settings);
                    tokio::spawn(async move {
                        if let Err(e) =
                            tunnel::open(&settings, sid, &host, &port).await
                        {
                            warn!(%sid, "data tunnel failed: {e:#}");
                        }
                    });
                },
                // The echo of our own probe; consumed, never answered.
                ControlRecord::Heartbeat => debug!("heartbeat echoed by server"),
                other => {
                    bail!("unexpected {:?} record from server", other.tag());
                },
            }
        }
    }
}

async fn wait_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = sleep(delay) => false,
    }
}
