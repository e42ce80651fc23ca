use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use binrw::{BinReaderExt, BinWriterExt};

use crate::error::{Error, Result};

/// Payload encoding for length-prefixed strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Utf8,
    Utf16Le,
}

/// Seekable, position-tracked reader/writer over an in-memory buffer.
///
/// Every primitive advances the position by exactly the bytes it consumes or
/// produces; nothing seeks implicitly. Backpatching components save the
/// position, seek, and restore it themselves.
pub struct ByteCursor {
    inner: Cursor<Vec<u8>>,
}

impl ByteCursor {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(data),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    pub fn len(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.position())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.inner.seek(pos)?)
    }

    pub fn as_slice(&self) -> &[u8] {
        self.inner.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_le::<u8>()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.inner.read_le::<u16>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.inner.read_le::<u32>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.inner.read_le::<u64>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.inner.read_le::<i32>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(self.inner.read_le::<f32>()?)
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        Ok(self.inner.write_le(&v)?)
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        Ok(self.inner.write_le(&v)?)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        Ok(self.inner.write_le(&v)?)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        Ok(self.inner.write_le(&v)?)
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        Ok(self.inner.write_le(&v)?)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        Ok(self.inner.write_le(&v)?)
    }

    /// Reads exactly `len` bytes, failing with [`Error::ShortRead`] if fewer
    /// remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if (self.remaining() as usize) < len {
            return Err(Error::ShortRead {
                requested: len,
                available: self.remaining() as usize,
                offset: self.position(),
            });
        }
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    /// Reads a string prefixed with a 7-bit-encoded byte length.
    ///
    /// The prefix is little-endian base-128: each byte carries 7 bits of the
    /// length plus a continuation bit, terminated when the continuation bit is
    /// clear.
    pub fn read_varint_string(&mut self, encoding: StringEncoding) -> Result<String> {
        let start = self.position();
        let len = self.read_varint_len()?;
        let bytes = self.read_bytes(len)?;
        match encoding {
            StringEncoding::Utf8 => {
                String::from_utf8(bytes).map_err(|_| Error::MalformedString { offset: start })
            }
            StringEncoding::Utf16Le => {
                if bytes.len() % 2 != 0 {
                    return Err(Error::MalformedString { offset: start });
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|_| Error::MalformedString { offset: start })
            }
        }
    }

    pub fn write_varint_string(&mut self, s: &str, encoding: StringEncoding) -> Result<()> {
        let bytes: Vec<u8> = match encoding {
            StringEncoding::Utf8 => s.as_bytes().to_vec(),
            StringEncoding::Utf16Le => s
                .encode_utf16()
                .flat_map(|u| u.to_le_bytes())
                .collect(),
        };
        self.write_varint_len(bytes.len())?;
        self.write_bytes(&bytes)
    }

    /// Reads a big-endian UTF-16 string prefixed with a big-endian u32
    /// code-unit count. Used by one resource family; everything else in the
    /// format is little-endian.
    pub fn read_string_utf16_be(&mut self) -> Result<String> {
        let start = self.position();
        let count = u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()) as usize;
        let bytes = self.read_bytes(count * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| Error::MalformedString { offset: start })
    }

    pub fn write_string_utf16_be(&mut self, s: &str) -> Result<()> {
        let units: Vec<u16> = s.encode_utf16().collect();
        self.write_bytes(&(units.len() as u32).to_be_bytes())?;
        for u in units {
            self.write_bytes(&u.to_be_bytes())?;
        }
        Ok(())
    }

    fn read_varint_len(&mut self) -> Result<usize> {
        let start = self.position();
        let mut len: u32 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.read_u8()?;
            // A u32 length never needs more than five prefix bytes.
            if shift >= 35 {
                return Err(Error::MalformedVarint { offset: start });
            }
            len |= ((b & 0x7f) as u32) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(len as usize)
    }

    fn write_varint_len(&mut self, mut len: usize) -> Result<()> {
        loop {
            let mut b = (len & 0x7f) as u8;
            len >>= 7;
            if len != 0 {
                b |= 0x80;
            }
            self.write_u8(b)?;
            if len == 0 {
                return Ok(());
            }
        }
    }

    /// Consistency check: in strict mode, fails unless the whole buffer has
    /// been consumed.
    pub fn expect_eof(&self) -> Result<()> {
        if crate::strict_checking() && self.remaining() != 0 {
            return Err(Error::TrailingBytes {
                remaining: self.remaining(),
                offset: self.position(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ByteCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteCursor")
            .field("position", &self.position())
            .field("len", &self.len())
            .finish()
    }
}
