// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads one batch of control records from an unframed stream.
///
/// Fills a buffer of capacity `buf_size`; as long as a read returns exactly
/// `buf_size` bytes the batch may continue mid-record, so the next read is
/// appended. The batch is complete only on a short read. A zero-length read
/// or transport error fails the call and the caller closes the connection.
pub async fn read_batch<R>(reader: &mut R, buf_size: usize) -> Result<Bytes>
where R: AsyncRead + Unpin {
    let mut batch = BytesMut::with_capacity(buf_size);
    let mut chunk = vec![0u8; buf_size];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            bail!("peer closed the connection");
        }
        batch.extend_from_slice(&chunk[..n]);
        if n < buf_size {
            break;
        }
    }

    Ok(batch.freeze())
}
