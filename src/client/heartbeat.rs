// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    sync::Mutex,
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::proto::tag::ControlTag;

/// Spawns the periodic liveness writer for one control connection.
///
/// Each tick writes a single heartbeat byte. A write failure bumps the
/// consecutive-failure counter without aborting the loop; reaching
/// `max_failures` declares the control connection dead and cancels `cancel`
/// so the owning read loop tears down and re-dials. Any successful write
/// resets the counter to zero.
pub fn spawn(
    writer: Arc<Mutex<OwnedWriteHalf>>,
    interval: Duration,
    max_failures: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(interval) => {},
            }

            let written = {
                let mut writer = writer.lock().await;
                writer.write_all(&[u8::from(ControlTag::Heartbeat)]).await
            };

            match written {
                Ok(()) => {
                    failures = 0;
                    debug!("heartbeat sent");
                },
                Err(e) => {
                    failures += 1;
                    warn!(failures, "heartbeat write failed: {e}");
                    if failures >= max_failures {
                        warn!("control connection dead after {failures} failed heartbeats");
                        cancel.cancel();
                        return;
                    }
                },
            }
        }
    })
}
