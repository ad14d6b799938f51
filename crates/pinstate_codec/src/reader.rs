//! TLV reader.

use crate::error::{CodecError, CodecResult};
use crate::FIELD_HEADER_SIZE;
use bytes::Buf;

/// A single decoded field borrowing its value from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Field tag.
    pub tag: u32,
    /// Raw value bytes.
    pub value: &'a [u8],
}

impl<'a> Field<'a> {
    /// Interprets the value as a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidLength`] unless the value is 4 bytes.
    pub fn as_u32(&self) -> CodecResult<u32> {
        let mut value = self.fixed(4)?;
        Ok(value.get_u32_le())
    }

    /// Interprets the value as a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidLength`] unless the value is 8 bytes.
    pub fn as_u64(&self) -> CodecResult<u64> {
        let mut value = self.fixed(8)?;
        Ok(value.get_u64_le())
    }

    /// Interprets the value as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidUtf8`] if the bytes are not UTF-8.
    pub fn as_str(&self) -> CodecResult<&'a str> {
        std::str::from_utf8(self.value).map_err(|_| CodecError::InvalidUtf8 { tag: self.tag })
    }

    /// Interprets the value as an owned UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidUtf8`] if the bytes are not UTF-8.
    pub fn to_string_value(&self) -> CodecResult<String> {
        self.as_str().map(str::to_owned)
    }

    fn fixed(&self, expected: usize) -> CodecResult<&'a [u8]> {
        if self.value.len() == expected {
            Ok(self.value)
        } else {
            Err(CodecError::InvalidLength {
                tag: self.tag,
                expected,
                actual: self.value.len(),
            })
        }
    }
}

/// Iterates over the fields of a TLV byte sequence.
///
/// Yields an error and stops if the input ends inside a field.
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    rest: &'a [u8],
}

impl<'a> TlvReader<'a> {
    /// Creates a reader over `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = CodecResult<Field<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < FIELD_HEADER_SIZE {
            self.rest = &[];
            return Some(Err(CodecError::UnexpectedEof));
        }

        let mut header = &self.rest[..FIELD_HEADER_SIZE];
        let tag = header.get_u32_le();
        let len = header.get_u32_le() as usize;

        let body = &self.rest[FIELD_HEADER_SIZE..];
        if body.len() < len {
            self.rest = &[];
            return Some(Err(CodecError::UnexpectedEof));
        }

        let (value, rest) = body.split_at(len);
        self.rest = rest;
        Some(Ok(Field { tag, value }))
    }
}

/// Fields a decoder did not recognise, kept so they can be re-emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UnknownFields {
    fields: Vec<(u32, Vec<u8>)>,
}

impl UnknownFields {
    /// Records a field.
    pub fn capture(&mut self, field: &Field<'_>) {
        self.fields.push((field.tag, field.value.to_vec()));
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of captured fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterates over captured `(tag, value)` pairs in capture order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.fields.iter().map(|(tag, value)| (*tag, value.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TlvWriter;

    #[test]
    fn reads_fields_in_order() {
        let mut writer = TlvWriter::new();
        writer.put_u64(1, 42);
        writer.put_str(2, "pack.core").unwrap();
        let bytes = writer.finish();

        let mut reader = TlvReader::new(&bytes);
        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.tag, 1);
        assert_eq!(first.as_u64().unwrap(), 42);

        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.as_str().unwrap(), "pack.core");
        assert!(reader.next().is_none());
    }

    #[test]
    fn truncated_header_is_eof() {
        let mut reader = TlvReader::new(&[1, 0, 0]);
        assert_eq!(reader.next(), Some(Err(CodecError::UnexpectedEof)));
        assert!(reader.next().is_none());
    }

    #[test]
    fn truncated_value_is_eof() {
        let mut writer = TlvWriter::new();
        writer.put_u32(1, 5);
        let mut bytes = writer.finish();
        bytes.pop();

        let result: CodecResult<Vec<_>> = TlvReader::new(&bytes).collect();
        assert_eq!(result, Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn wrong_width_is_rejected() {
        let field = Field {
            tag: 4,
            value: &[1, 2, 3],
        };
        assert_eq!(
            field.as_u32(),
            Err(CodecError::InvalidLength {
                tag: 4,
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let field = Field {
            tag: 9,
            value: &[0xff, 0xfe],
        };
        assert_eq!(field.as_str(), Err(CodecError::InvalidUtf8 { tag: 9 }));
    }
}
