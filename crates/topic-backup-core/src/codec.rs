//! Little-endian primitives shared by the metadata and data file codecs.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Write a `u16`-length-prefixed UTF-8 string.
pub(crate) fn put_str(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::InvalidRecord(format!("string of {} bytes is too long", value.len())))?;
    buf.put_u16_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

/// Write an `i32`-length-prefixed byte string, `-1` for null.
pub(crate) fn put_nullable_bytes(buf: &mut BytesMut, value: Option<&[u8]>) -> Result<()> {
    match value {
        Some(data) => {
            let len = i32::try_from(data.len()).map_err(|_| {
                Error::InvalidRecord(format!("payload of {} bytes is too long", data.len()))
            })?;
            buf.put_i32_le(len);
            buf.put_slice(data);
        }
        None => buf.put_i32_le(-1),
    }
    Ok(())
}

/// Bounds-checked reader over an in-memory buffer.
///
/// Every short read is a [`Error::Format`] naming the field being decoded.
pub(crate) struct ByteReader {
    data: Bytes,
    context: &'static str,
}

impl ByteReader {
    pub(crate) fn new(data: Bytes, context: &'static str) -> Self {
        Self { data, context }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.remaining()
    }

    fn need(&self, len: usize, field: &str) -> Result<()> {
        if self.data.remaining() < len {
            return Err(Error::format(format!(
                "{} truncated while reading {} (need {} bytes, have {})",
                self.context,
                field,
                len,
                self.data.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, field: &str) -> Result<u8> {
        self.need(1, field)?;
        Ok(self.data.get_u8())
    }

    pub(crate) fn u16(&mut self, field: &str) -> Result<u16> {
        self.need(2, field)?;
        Ok(self.data.get_u16_le())
    }

    pub(crate) fn u32(&mut self, field: &str) -> Result<u32> {
        self.need(4, field)?;
        Ok(self.data.get_u32_le())
    }

    pub(crate) fn i32(&mut self, field: &str) -> Result<i32> {
        self.need(4, field)?;
        Ok(self.data.get_i32_le())
    }

    pub(crate) fn u64(&mut self, field: &str) -> Result<u64> {
        self.need(8, field)?;
        Ok(self.data.get_u64_le())
    }

    pub(crate) fn i64(&mut self, field: &str) -> Result<i64> {
        self.need(8, field)?;
        Ok(self.data.get_i64_le())
    }

    pub(crate) fn bytes(&mut self, len: usize, field: &str) -> Result<Bytes> {
        self.need(len, field)?;
        Ok(self.data.split_to(len))
    }

    pub(crate) fn str(&mut self, field: &str) -> Result<String> {
        let len = self.u16(field)? as usize;
        let raw = self.bytes(len, field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| {
            Error::format(format!("{} field {} is not valid UTF-8", self.context, field))
        })
    }

    pub(crate) fn nullable_bytes(&mut self, field: &str) -> Result<Option<Bytes>> {
        let len = self.i32(field)?;
        match len {
            -1 => Ok(None),
            len if len >= 0 => self.bytes(len as usize, field).map(Some),
            len => Err(Error::format(format!(
                "{} field {} has negative length {}",
                self.context, field, len
            ))),
        }
    }

    /// `u8` presence flag followed by the value
    pub(crate) fn flag(&mut self, field: &str) -> Result<bool> {
        match self.u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::format(format!(
                "{} field {} has invalid presence flag {}",
                self.context, field, other
            ))),
        }
    }

    /// Fail if anything is left over
    pub(crate) fn finish(self) -> Result<()> {
        if self.data.has_remaining() {
            return Err(Error::format(format!(
                "{} has {} unexpected trailing bytes",
                self.context,
                self.data.remaining()
            )));
        }
        Ok(())
    }
}
