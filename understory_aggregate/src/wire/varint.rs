// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! LEB128 varints, zig-zag, and a bounds-checked reader.

use alloc::vec::Vec;

use super::WireError;

/// Longest LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        #[expect(clippy::cast_possible_truncation, reason = "masked to 7 bits")]
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    #[expect(clippy::cast_possible_truncation, reason = "value < 0x80")]
    out.push(value as u8);
}

#[inline]
pub(crate) const fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub(crate) const fn unzigzag(bits: u64) -> i64 {
    ((bits >> 1) as i64) ^ -((bits & 1) as i64)
}

/// Cursor over an input buffer. Every read reports the offset it failed at.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, WireError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(WireError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(WireError::Truncated { offset: self.pos })?;
        let bytes = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn read_varint(&mut self) -> Result<u64, WireError> {
        let start = self.pos;
        let mut value = 0_u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let low = u64::from(byte & 0x7f);
            // The tenth byte may only carry the top bit of a u64.
            if i == MAX_VARINT_LEN - 1 && low > 1 {
                return Err(WireError::Malformed { offset: start });
            }
            value |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::Malformed { offset: start })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn varint_edges() {
        for value in [0, 1, 0x7f, 0x80, 300, u64::from(u32::MAX), u64::MAX] {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            let mut reader = Reader::new(&out);
            assert_eq!(reader.read_varint(), Ok(value));
            assert!(reader.is_empty());
        }
        let mut out = Vec::new();
        write_varint(&mut out, u64::MAX);
        assert_eq!(out.len(), MAX_VARINT_LEN);
    }

    #[test]
    fn zigzag_keeps_small_magnitudes_small() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(unzigzag(zigzag(i64::MIN)), i64::MIN);
        assert_eq!(unzigzag(zigzag(i64::MAX)), i64::MAX);
    }

    #[test]
    fn reader_reports_offsets() {
        let mut reader = Reader::new(&[0x80, 0x80]);
        assert_eq!(reader.read_varint(), Err(WireError::Truncated { offset: 2 }));

        let overlong = vec![0xff; 11];
        let mut reader = Reader::new(&overlong);
        assert_eq!(reader.read_varint(), Err(WireError::Malformed { offset: 0 }));

        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u32_le(), Err(WireError::Truncated { offset: 0 }));
        assert_eq!(reader.read_bytes(3), Ok(&[1, 2, 3][..]));
        assert_eq!(reader.position(), 3);
    }
}
