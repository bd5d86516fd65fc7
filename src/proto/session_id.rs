// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;
use std::fmt::Write;

use rand::RngExt;
use thiserror::Error;

/// Canonical hyphenated UUID length, the on-wire size of a session id.
pub const SESSION_ID_LEN: usize = 36;

/// Identifier pairing one user connection with one data tunnel.
///
/// A version-4 UUID rendered as the canonical `8-4-4-4-12` lowercase hex
/// string and carried on the wire as exactly [`SESSION_ID_LEN`] ASCII bytes.
/// Comparison is bytewise; received ids are never re-validated beyond their
/// length.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Generates a fresh id from 128 random bits with the version nibble
    /// forced to `4` and the variant bits to `10`.
    pub fn generate() -> Self {
        let mut raw = [0u8; 16];
        rand::rng().fill(&mut raw);

        raw[6] = (raw[6] & 0x0f) | 0x40;
        raw[8] = (raw[8] & 0x3f) | 0x80;

        let mut text = String::with_capacity(SESSION_ID_LEN);
        for (i, byte) in raw.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                text.push('-');
            }
            write!(&mut text, "{byte:02x}").expect("Writing to String cannot fail");
        }

        let mut id = [0u8; SESSION_ID_LEN];
        id.copy_from_slice(text.as_bytes());
        Self(id)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }
}

/// Returned when a wire slice is not exactly [`SESSION_ID_LEN`] bytes.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("session id must be {SESSION_ID_LEN} bytes, got {0}")]
pub struct BadSessionIdLen(pub usize);

impl TryFrom<&[u8]> for SessionId {
    type Error = BadSessionIdLen;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let id: [u8; SESSION_ID_LEN] =
            bytes.try_into().map_err(|_| BadSessionIdLen(bytes.len()))?;
        Ok(Self(id))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}
