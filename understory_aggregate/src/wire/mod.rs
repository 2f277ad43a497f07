// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire encodings of a node's base values.
//!
//! Two codecs share the same outer framing, a little-endian `u32` entry count
//! followed by the entries:
//!
//! - [`FastCodec`] writes each entry as a varint of the bit-reversed key and a
//!   varint of the value bits. It is compact but only valid between peers with
//!   the same registry.
//! - [`DurableCodec`] writes each entry against stable guids and the tag's data
//!   version, length-prefixed, so entries whose metadata changed since they
//!   were written can be skipped on load.
//!
//! Both decoders apply entries through [`PropertyForest::set_with_flags`]
//! with [`SetFlags::DESERIALIZED`], so watchers and parents see deserialized
//! values like any other write. An entry that cannot be applied is skipped
//! with a warning; only framing problems abort decoding, and the returned
//! [`DecodeError`] still counts the entries applied before the break.
//!
//! [`PropertyForest::set_with_flags`]: crate::PropertyForest::set_with_flags
//! [`SetFlags::DESERIALIZED`]: crate::SetFlags::DESERIALIZED

mod durable;
mod fast;
mod varint;

pub use durable::DurableCodec;
pub use fast::{FastCodec, WireMode};

use alloc::vec::Vec;

/// Framing error that stops a decode or encode.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The input ended inside an entry or the header.
    #[error("stream truncated at byte {offset}")]
    Truncated {
        /// Byte offset of the read that ran out of input.
        offset: usize,
    },
    /// A varint was longer than ten bytes or overflowed 64 bits.
    #[error("malformed varint at byte {offset}")]
    Malformed {
        /// Byte offset where the varint started.
        offset: usize,
    },
    /// More entries than the `u32` header can count.
    #[error("{count} entries do not fit the stream header")]
    TooManyEntries {
        /// Number of entries selected for encoding.
        count: usize,
    },
}

/// A framing error that stopped a decode part way.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{error} after {} applied entries", .report.applied)]
pub struct DecodeError {
    /// Entries handled before the error. Applied entries stay applied.
    pub report: DecodeReport,
    /// What stopped the decode.
    #[source]
    pub error: WireError,
}

/// Outcome of a successful decode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Entries written to the node.
    pub applied: usize,
    /// Entries read but not applied.
    pub skipped: usize,
}

impl DecodeReport {
    /// Total entries read.
    #[must_use]
    #[inline]
    pub fn total(&self) -> usize {
        self.applied + self.skipped
    }
}

/// Writes the `u32` entry count followed by the encoded entries.
fn write_framed(out: &mut Vec<u8>, count: usize, entries: &[u8]) -> Result<(), WireError> {
    let header = u32::try_from(count).map_err(|_| WireError::TooManyEntries { count })?;
    out.extend_from_slice(&header.to_le_bytes());
    out.extend_from_slice(entries);
    Ok(())
}
