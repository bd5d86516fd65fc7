// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Control records and their batch layout.
//!
//! Records are concatenated back to back inside one read batch with no outer
//! framing. Decoding walks the tag byte at each offset and advances by that
//! tag's fixed or length-prefixed payload size:
//!
//! ```text
//! Connect       0x00 | identifier bytes .. end of batch
//! Heartbeat     0x01
//! OpenTunnel    0x02 | sid[36] | hlen u8 | host[hlen] | plen u8 | port[plen]
//! AttachTunnel  0x03 | sid[36]
//! ```
//!
//! Producers hand every encoded record to a single write call, so a short
//! read on the consumer side always falls on a record boundary.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::proto::{
    session_id::{SESSION_ID_LEN, SessionId},
    tag::{ControlTag, ReservedTag},
};

/// Bytes of an `OpenTunnel` record that are not host/port text: the tag, the
/// session id and the two length prefixes.
pub const OPEN_TUNNEL_FIXED_LEN: usize = 1 + SESSION_ID_LEN + 1 + 1;

/// Largest value an 8-bit length prefix can carry.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error(transparent)]
    ReservedTag(#[from] ReservedTag),
    #[error("record truncated at offset {offset}: need {need} more bytes, {left} buffered")]
    Truncated {
        offset: usize,
        need: usize,
        left: usize,
    },
    #[error("{field} is not valid UTF-8")]
    InvalidText { field: &'static str },
    #[error("{field} exceeds {MAX_FIELD_LEN} bytes: {len}")]
    FieldTooLong { field: &'static str, len: usize },
}

/// One decoded control record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRecord {
    /// Registers the sending connection under `client_id`.
    Connect { client_id: String },
    /// Liveness probe, echoed back by the receiving side.
    Heartbeat,
    /// Instructs the client to open a data tunnel for `sid` and bridge it to
    /// `host:port`.
    OpenTunnel {
        sid: SessionId,
        host: String,
        port: String,
    },
    /// Marks the sending connection as the data side of `sid`.
    AttachTunnel { sid: SessionId },
}

impl ControlRecord {
    pub fn tag(&self) -> ControlTag {
        match self {
            Self::Connect { .. } => ControlTag::Connect,
            Self::Heartbeat => ControlTag::Heartbeat,
            Self::OpenTunnel { .. } => ControlTag::OpenTunnel,
            Self::AttachTunnel { .. } => ControlTag::AttachTunnel,
        }
    }

    /// Serializes the record into one contiguous buffer.
    ///
    /// The result must reach the transport in a single write so that batch
    /// boundaries stay on record boundaries.
    pub fn encode(&self) -> Result<Bytes, RecordError> {
        let buf = match self {
            Self::Connect { client_id } => {
                let mut buf = BytesMut::with_capacity(1 + client_id.len());
                buf.put_u8(self.tag().into());
                buf.put_slice(client_id.as_bytes());
                buf
            },
            Self::Heartbeat => {
                let mut buf = BytesMut::with_capacity(1);
                buf.put_u8(self.tag().into());
                buf
            },
            Self::OpenTunnel { sid, host, port } => {
                let hlen = checked_len(host, "target host")?;
                let plen = checked_len(port, "target port")?;
                let mut buf = BytesMut::with_capacity(
                    OPEN_TUNNEL_FIXED_LEN + host.len() + port.len(),
                );
                buf.put_u8(self.tag().into());
                buf.put_slice(sid.as_bytes());
                buf.put_u8(hlen);
                buf.put_slice(host.as_bytes());
                buf.put_u8(plen);
                buf.put_slice(port.as_bytes());
                buf
            },
            Self::AttachTunnel { sid } => {
                let mut buf = BytesMut::with_capacity(1 + SESSION_ID_LEN);
                buf.put_u8(self.tag().into());
                buf.put_slice(sid.as_bytes());
                buf
            },
        };
        Ok(buf.freeze())
    }

    /// Decodes every record of one batch, in order.
    ///
    /// Any reserved tag or record running past the buffered bytes poisons the
    /// whole batch; the caller closes the connection.
    pub fn decode_batch(batch: &[u8]) -> Result<Vec<Self>, RecordError> {
        let mut records = Vec::new();
        let mut at = 0usize;

        while at < batch.len() {
            let tag = ControlTag::try_from(batch[at])?;
            at += 1;
            match tag {
                ControlTag::Connect => {
                    let client_id = text(&batch[at..], "client identifier")?;
                    at = batch.len();
                    records.push(Self::Connect { client_id });
                },
                ControlTag::Heartbeat => records.push(Self::Heartbeat),
                ControlTag::OpenTunnel => {
                    let sid = take_sid(batch, &mut at)?;
                    let hlen = take(batch, &mut at, 1)?[0] as usize;
                    let host = text(take(batch, &mut at, hlen)?, "target host")?;
                    let plen = take(batch, &mut at, 1)?[0] as usize;
                    let port = text(take(batch, &mut at, plen)?, "target port")?;
                    records.push(Self::OpenTunnel { sid, host, port });
                },
                ControlTag::AttachTunnel => {
                    let sid = take_sid(batch, &mut at)?;
                    records.push(Self::AttachTunnel { sid });
                },
            }
        }

        Ok(records)
    }
}

fn checked_len(value: &str, field: &'static str) -> Result<u8, RecordError> {
    u8::try_from(value.len()).map_err(|_| RecordError::FieldTooLong {
        field,
        len: value.len(),
    })
}

fn take<'a>(batch: &'a [u8], at: &mut usize, need: usize) -> Result<&'a [u8], RecordError> {
    let end = at
        .checked_add(need)
        .filter(|&end| end <= batch.len())
        .ok_or(RecordError::Truncated {
            offset: *at,
            need,
            left: batch.len().saturating_sub(*at),
        })?;
    let out = &batch[*at..end];
    *at = end;
    Ok(out)
}

fn take_sid(batch: &[u8], at: &mut usize) -> Result<SessionId, RecordError> {
    let raw = take(batch, at, SESSION_ID_LEN)?;
    SessionId::try_from(raw).map_err(|_| RecordError::Truncated {
        offset: *at,
        need: SESSION_ID_LEN,
        left: raw.len(),
    })
}

fn text(raw: &[u8], field: &'static str) -> Result<String, RecordError> {
    String::from_utf8(raw.to_vec()).map_err(|_| RecordError::InvalidText { field })
}
