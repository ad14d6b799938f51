//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a record.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a record.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Input ended inside a field header or value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A fixed-width field had the wrong length.
    #[error("field {tag} has length {actual}, expected {expected}")]
    InvalidLength {
        /// Field tag.
        tag: u32,
        /// Required length in bytes.
        expected: usize,
        /// Length found on the wire.
        actual: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("field {tag} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field tag.
        tag: u32,
    },

    /// A required field was absent.
    #[error("missing required field {tag}")]
    MissingField {
        /// Field tag.
        tag: u32,
    },

    /// An enumerated field carried a value outside its domain.
    #[error("field {tag} has unknown value {value}")]
    UnknownValue {
        /// Field tag.
        tag: u32,
        /// The value found.
        value: u32,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
