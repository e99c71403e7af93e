#![doc = r#"
A byte cursor over an in-memory buffer, plus the OKD event grammar
primitives built on top of it.

OKD streams use big-endian multi-byte integers throughout, a 6-bit
continuation encoding for delta times and durations (not the 7-bit SMF
encoding), and a status/data byte grammar where every data byte must
have bit 7 clear.
"#]

use crate::error::{FormatError, FormatErrorKind, ReadResult};

/// A cursor over a borrowed byte buffer.
///
/// All multi-byte reads are big-endian unless the method name says
/// otherwise.
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over a byte slice, positioned at the start.
    pub const fn from_bytes(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Returns the current read offset.
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor to an absolute offset.
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// True when every byte has been consumed.
    pub const fn is_empty(&self) -> bool {
        self.position >= self.bytes.len()
    }

    /// Bytes left to read.
    pub const fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.position)
    }

    /// Read `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(FormatError::oob(self.position))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Read a fixed-size array, advancing the cursor.
    pub fn read_array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> ReadResult<u8> {
        let b = *self
            .bytes
            .get(self.position)
            .ok_or(FormatError::oob(self.position))?;
        self.position += 1;
        Ok(b)
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> ReadResult<u8> {
        self.bytes
            .get(self.position)
            .copied()
            .ok_or(FormatError::oob(self.position))
    }

    /// Read a big-endian u16.
    pub fn read_u16_be(&mut self) -> ReadResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a little-endian u16.
    pub fn read_u16_le(&mut self) -> ReadResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a big-endian i16.
    pub fn read_i16_be(&mut self) -> ReadResult<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u32.
    pub fn read_u32_be(&mut self) -> ReadResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian i32.
    pub fn read_i32_be(&mut self) -> ReadResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u64.
    pub fn read_u64_be(&mut self) -> ReadResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    fn inv_data(&self, kind: FormatErrorKind) -> FormatError {
        FormatError::new(self.position, kind)
    }

    /// Read a byte that must have bit 7 clear.
    pub fn read_data_byte(&mut self) -> ReadResult<u8> {
        let b = self.read_u8()?;
        if b & 0x80 == 0x80 {
            return Err(self.inv_data(FormatErrorKind::InvalidDataByte(b)));
        }
        Ok(b)
    }

    /// Read a byte that must have bit 7 set.
    pub fn read_status_byte(&mut self) -> ReadResult<u8> {
        let b = self.read_u8()?;
        if b & 0x80 != 0x80 {
            return Err(self.inv_data(FormatErrorKind::InvalidStatusByte(b)));
        }
        Ok(b)
    }

    /// Read one variable-length number: up to three 6-bit groups packed
    /// low-to-high, continuation signalled by bit 6.
    pub fn read_var_num(&mut self) -> ReadResult<u32> {
        let mut value = 0u32;
        for i in 0..3 {
            let b = self.read_data_byte()?;
            value += u32::from(b) << (i * 6);
            if b & 0x40 != 0x40 {
                return Ok(value);
            }
        }
        Err(self.inv_data(FormatErrorKind::UnterminatedVarNum))
    }

    /// Read a delta time: the sum of consecutive variable-length numbers.
    ///
    /// Accumulation stops when the next byte is a status byte, or a zero
    /// data byte (the start of the four-zero end-of-track mark).
    pub fn read_delta(&mut self) -> ReadResult<u32> {
        let mut value = 0u32;
        loop {
            let Ok(b) = self.peek_u8() else { break };
            if b & 0x80 == 0x80 || b == 0 {
                break;
            }
            value += self.read_var_num()?;
        }
        Ok(value)
    }

    /// Read SysEx payload bytes up to and including a bit-7-set
    /// terminator, which must equal `stop`.
    pub fn read_sysex_payload(&mut self, stop: u8) -> ReadResult<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let b = self.read_u8()?;
            bytes.push(b);
            if b & 0x80 == 0x80 {
                if b != stop {
                    return Err(self.inv_data(FormatErrorKind::UnterminatedSysEx(b)));
                }
                return Ok(bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_num_single_byte() {
        let mut r = Reader::from_bytes(&[0x3F]);
        assert_eq!(r.read_var_num().unwrap(), 0x3F);
    }

    #[test]
    fn var_num_continuation() {
        // The continuation bit is not masked out; the raw byte counts.
        let mut r = Reader::from_bytes(&[0x41, 0x02]);
        assert_eq!(r.read_var_num().unwrap(), 0x41 + (2 << 6));
    }

    #[test]
    fn var_num_three_byte_limit() {
        let mut r = Reader::from_bytes(&[0x41, 0x41, 0x41, 0x01]);
        assert!(r.read_var_num().is_err());
    }

    #[test]
    fn delta_sums_runs() {
        // two maximal-looking groups followed by a status byte
        let mut r = Reader::from_bytes(&[0x3F, 0x3F, 0x90]);
        assert_eq!(r.read_delta().unwrap(), 0x3F + 0x3F);
        assert_eq!(r.read_status_byte().unwrap(), 0x90);
    }

    #[test]
    fn delta_stops_at_eot_zero() {
        let mut r = Reader::from_bytes(&[0x10, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(r.read_delta().unwrap(), 0x10);
        assert_eq!(r.position(), 1);
    }

    #[test]
    fn sysex_requires_stop_byte() {
        let mut r = Reader::from_bytes(&[0x43, 0x10, 0xF7]);
        assert_eq!(r.read_sysex_payload(0xF7).unwrap(), vec![0x43, 0x10, 0xF7]);

        let mut r = Reader::from_bytes(&[0x43, 0xF0]);
        assert!(r.read_sysex_payload(0xF7).is_err());
    }

    #[test]
    fn data_byte_rejects_high_bit() {
        let mut r = Reader::from_bytes(&[0x80]);
        assert!(r.read_data_byte().is_err());
    }
}
