//! # pinstate codec
//!
//! Deterministic tag/length/value encoding for pinstate records.
//!
//! Every persisted record is a flat sequence of fields:
//!
//! ```text
//! | tag (u32 LE) | length (u32 LE) | value (length bytes) | tag | length | value | ...
//! ```
//!
//! ## Rules
//!
//! - Writers emit fields in a fixed, schema-defined order
//! - Integers are fixed width little-endian (4 or 8 bytes)
//! - Strings are UTF-8 without terminator
//! - Nested records are encoded as a byte value containing their own fields
//! - Readers skip tags they do not recognise, optionally capturing them in
//!   [`UnknownFields`] so a re-encode preserves them
//!
//! Identical inputs always produce identical bytes, which makes
//! [`fnv1a64`] over an encoding a stable fingerprint.
//!
//! ## Usage
//!
//! ```
//! use pinstate_codec::{TlvReader, TlvWriter};
//!
//! let mut writer = TlvWriter::new();
//! writer.put_u32(1, 7);
//! writer.put_str(2, "demo").unwrap();
//! let bytes = writer.finish();
//!
//! let fields: Vec<_> = TlvReader::new(&bytes).collect::<Result<_, _>>().unwrap();
//! assert_eq!(fields[0].as_u32().unwrap(), 7);
//! assert_eq!(fields[1].as_str().unwrap(), "demo");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hash;
mod reader;
mod writer;

pub use error::{CodecError, CodecResult};
pub use hash::{fnv1a64, FNV_OFFSET_BASIS, FNV_PRIME};
pub use reader::{Field, TlvReader, UnknownFields};
pub use writer::TlvWriter;

/// Size of a field header (tag + length) in bytes.
pub const FIELD_HEADER_SIZE: usize = 8;

/// Trait for records that can be encoded to TLV bytes.
pub trait Encode {
    /// Encode this record to its canonical byte form.
    ///
    /// # Errors
    ///
    /// Returns an error if a field value is too long to encode.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for records that can be decoded from TLV bytes.
pub trait Decode: Sized {
    /// Decode this record from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are truncated or a known field is malformed.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn field_layout_is_tag_length_value() {
        let mut writer = TlvWriter::new();
        writer.put_u32(0x0102_0304, 9);
        let bytes = writer.finish();

        assert_eq!(
            bytes,
            vec![0x04, 0x03, 0x02, 0x01, 4, 0, 0, 0, 9, 0, 0, 0]
        );
    }

    #[test]
    fn unknown_fields_survive_reencode() {
        let mut writer = TlvWriter::new();
        writer.put_u32(1, 5);
        writer.put_bytes(99, b"future").unwrap();
        let bytes = writer.finish();

        let mut unknown = UnknownFields::default();
        let mut known = 0;
        for field in TlvReader::new(&bytes) {
            let field = field.unwrap();
            match field.tag {
                1 => known = field.as_u32().unwrap(),
                _ => unknown.capture(&field),
            }
        }

        let mut rewriter = TlvWriter::new();
        rewriter.put_u32(1, known);
        rewriter.put_unknown(&unknown).unwrap();
        assert_eq!(rewriter.finish(), bytes);
    }

    proptest! {
        #[test]
        fn arbitrary_fields_read_back(fields in prop::collection::vec(
            (any::<u32>(), prop::collection::vec(any::<u8>(), 0..64)),
            0..16,
        )) {
            let mut writer = TlvWriter::new();
            for (tag, value) in &fields {
                writer.put_bytes(*tag, value).unwrap();
            }
            let bytes = writer.finish();

            let decoded: Vec<(u32, Vec<u8>)> = TlvReader::new(&bytes)
                .map(|f| f.map(|f| (f.tag, f.value.to_vec())))
                .collect::<Result<_, _>>()
                .unwrap();
            prop_assert_eq!(decoded, fields);
        }

        #[test]
        fn truncated_input_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
            for field in TlvReader::new(&data) {
                let _ = field;
            }
        }
    }
}
