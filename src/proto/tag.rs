// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The first byte of every control record names its type.
//!
//! ```text
//! +------+-------------------------------+
//! | tag  |   payload (per-tag layout)    |
//! +------+-------------------------------+
//! ```
//!
//! The numeric values are part of the wire contract and must never change.
//! Values `0x04` and above are reserved; receiving one closes the connection.

use std::convert::TryFrom;

use thiserror::Error;

/// Control-record types carried over the control port.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ControlTag {
    /// Registers the sending connection under a client identifier.
    #[default]
    Connect = 0x00,
    /// Liveness probe; the peer answers with the same single byte.
    Heartbeat = 0x01,
    /// Server instruction to open a data tunnel for one session.
    OpenTunnel = 0x02,
    /// Announces a fresh connection as the data side of one session.
    AttachTunnel = 0x03,
}

impl ControlTag {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => Self::Connect,
            0x01 => Self::Heartbeat,
            0x02 => Self::OpenTunnel,
            0x03 => Self::AttachTunnel,
            _ => return None,
        })
    }
}

/// Returned when the tag byte holds a reserved value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("reserved control tag: 0x{0:02x}")]
pub struct ReservedTag(pub u8);

impl TryFrom<u8> for ControlTag {
    type Error = ReservedTag;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_u8(byte).ok_or(ReservedTag(byte))
    }
}

impl From<ControlTag> for u8 {
    fn from(tag: ControlTag) -> u8 {
        tag as u8
    }
}
