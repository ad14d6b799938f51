//! TLV writer.

use crate::error::{CodecError, CodecResult};
use crate::reader::UnknownFields;
use bytes::{BufMut, BytesMut};

/// Appends TLV fields to a growable buffer.
///
/// Field order is the caller's responsibility: a record's `encode` must
/// always emit its fields in the same order for the output to be canonical.
#[derive(Debug, Default)]
pub struct TlvWriter {
    buffer: BytesMut,
}

impl TlvWriter {
    /// Create a new writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new writer with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Writes a 32-bit unsigned field.
    pub fn put_u32(&mut self, tag: u32, value: u32) {
        self.put_header(tag, 4);
        self.buffer.put_u32_le(value);
    }

    /// Writes a 64-bit unsigned field.
    pub fn put_u64(&mut self, tag: u32, value: u64) {
        self.put_header(tag, 8);
        self.buffer.put_u64_le(value);
    }

    /// Writes a UTF-8 string field.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is longer than `u32::MAX` bytes.
    pub fn put_str(&mut self, tag: u32, value: &str) -> CodecResult<()> {
        self.put_bytes(tag, value.as_bytes())
    }

    /// Writes a raw byte field.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is longer than `u32::MAX` bytes.
    pub fn put_bytes(&mut self, tag: u32, value: &[u8]) -> CodecResult<()> {
        let len = u32::try_from(value.len()).map_err(|_| {
            CodecError::encoding_failed(format!(
                "field {tag} is {} bytes, exceeds u32 length",
                value.len()
            ))
        })?;
        self.put_header(tag, len);
        self.buffer.put_slice(value);
        Ok(())
    }

    /// Re-emits fields captured while decoding, in capture order.
    ///
    /// # Errors
    ///
    /// Returns an error if a captured value is too long to encode.
    pub fn put_unknown(&mut self, unknown: &UnknownFields) -> CodecResult<()> {
        for (tag, value) in unknown.iter() {
            self.put_bytes(tag, value)?;
        }
        Ok(())
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume this writer and return the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    fn put_header(&mut self, tag: u32, len: u32) {
        self.buffer.put_u32_le(tag);
        self.buffer.put_u32_le(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_is_little_endian() {
        let mut writer = TlvWriter::new();
        writer.put_u64(2, 0x0102_0304_0506_0708);
        let bytes = writer.finish();

        assert_eq!(&bytes[0..8], &[2, 0, 0, 0, 8, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn empty_string_has_zero_length() {
        let mut writer = TlvWriter::new();
        writer.put_str(3, "").unwrap();
        assert_eq!(writer.len(), 8);
        assert_eq!(writer.finish(), vec![3, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn new_writer_is_empty() {
        assert!(TlvWriter::with_capacity(16).is_empty());
    }
}
