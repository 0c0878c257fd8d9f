//! Endian-correct byte stream with a seekable offset.
//!
//! Every PEL field is big-endian; this is the one place that
//! endianness is encoded, .

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::{PelError, Result};

/// A cursor over an owned byte buffer. Reads past the end of the buffer
/// fail with `PelError::Parse`; writes grow the buffer.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    buf: Vec<u8>,
    offset: usize,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { buf: bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn set_offset(&mut self, offset: usize) -> Result<()> {
        if offset > self.buf.len() {
            return Err(PelError::Parse(format!(
                "seek to {} past end of {}-byte stream",
                offset,
                self.buf.len()
            )));
        }
        self.offset = offset;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(PelError::Parse(format!(
                "out of range: need {} bytes, {} remaining",
                n,
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let mut cursor = Cursor::new(&self.buf[self.offset..]);
        let v = cursor.read_u8().map_err(|e| PelError::Parse(e.to_string()))?;
        self.offset += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        let mut cursor = Cursor::new(&self.buf[self.offset..]);
        let v = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| PelError::Parse(e.to_string()))?;
        self.offset += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        let mut cursor = Cursor::new(&self.buf[self.offset..]);
        let v = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| PelError::Parse(e.to_string()))?;
        self.offset += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        let mut cursor = Cursor::new(&self.buf[self.offset..]);
        let v = cursor
            .read_u64::<BigEndian>()
            .map_err(|e| PelError::Parse(e.to_string()))?;
        self.offset += 8;
        Ok(v)
    }

    /// Peek `n` bytes without advancing the offset. Used by the section
    /// factory to read the leading section id before dispatch.
    pub fn peek_bytes(&self, n: usize) -> Result<&[u8]> {
        self.need(n)?;
        Ok(&self.buf[self.offset..self.offset + n])
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.need(n)?;
        let out = self.buf[self.offset..self.offset + n].to_vec();
        self.offset += n;
        Ok(out)
    }

    /// Reads a fixed-length ASCII field, stopping at the first NUL if one
    /// appears before `n` bytes.
    pub fn read_ascii(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn write_u8(&mut self, v: u8) {
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_u8(v).expect("write to Vec cannot fail");
        self.append(cursor.into_inner());
    }

    pub fn write_u16(&mut self, v: u16) {
        let mut cursor = Cursor::new(Vec::new());
        cursor
            .write_u16::<BigEndian>(v)
            .expect("write to Vec cannot fail");
        self.append(cursor.into_inner());
    }

    pub fn write_u32(&mut self, v: u32) {
        let mut cursor = Cursor::new(Vec::new());
        cursor
            .write_u32::<BigEndian>(v)
            .expect("write to Vec cannot fail");
        self.append(cursor.into_inner());
    }

    pub fn write_u64(&mut self, v: u64) {
        let mut cursor = Cursor::new(Vec::new());
        cursor
            .write_u64::<BigEndian>(v)
            .expect("write to Vec cannot fail");
        self.append(cursor.into_inner());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.append(bytes.to_vec());
    }

    /// Writes `s` left-justified and space- (or NUL-) padded to exactly
    /// `n` bytes, truncating if `s` is longer.
    pub fn write_ascii_padded(&mut self, s: &str, n: usize, pad: u8) {
        let mut bytes = s.as_bytes().to_vec();
        bytes.truncate(n);
        bytes.resize(n, pad);
        self.write_bytes(&bytes);
    }

    fn append(&mut self, bytes: Vec<u8>) {
        if self.offset == self.buf.len() {
            self.buf.extend_from_slice(&bytes);
        } else {
            // Overwrite in place when writing within an already-sized
            // buffer (e.g. rewriting a header field after the body was
            // written), else extend.
            let end = self.offset + bytes.len();
            if end > self.buf.len() {
                self.buf.resize(end, 0);
            }
            self.buf[self.offset..end].copy_from_slice(&bytes);
        }
        self.offset += bytes.len();
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.buf[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut s = Stream::new();
        s.write_u8(0xAB);
        s.write_u16(0x1234);
        s.write_u32(0xDEADBEEF);
        s.write_u64(0x0102030405060708);

        s.set_offset(0).unwrap();
        assert_eq!(s.read_u8().unwrap(), 0xAB);
        assert_eq!(s.read_u16().unwrap(), 0x1234);
        assert_eq!(s.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(s.read_u64().unwrap(), 0x0102030405060708);
    }

    #[test]
    fn read_past_end_fails() {
        let mut s = Stream::from_bytes(vec![1, 2]);
        assert!(s.read_u32().is_err());
    }

    #[test]
    fn ascii_padding_truncates_and_pads() {
        let mut s = Stream::new();
        s.write_ascii_padded("AB", 4, b' ');
        s.write_ascii_padded("ABCDEF", 4, b' ');
        assert_eq!(s.as_bytes(), b"AB  ABCD");
    }
}
