//! Error types for the wire formats and the value codec.

use thiserror::Error;

/// Malformed call descriptor bytes or manifest text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("truncated {what}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("{what} is not valid UTF-8")]
    InvalidUtf8 { what: &'static str },

    #[error("invalid bool byte 0x{0:02x}")]
    InvalidBool(u8),

    #[error("negative argument count {0}")]
    NegativeCount(i32),

    #[error("{what} of {len} does not fit its length field")]
    TooLong { what: &'static str, len: usize },

    #[error("{0} trailing bytes after last argument")]
    TrailingBytes(usize),

    #[error("manifest line {line}: missing space separator")]
    MissingSeparator { line: usize },

    #[error("manifest line {line}: invalid hash '{hash}'")]
    InvalidHash { line: usize, hash: String },

    #[error("manifest is missing its terminating newline")]
    MissingNewline,

    #[error("duplicate manifest path: {0}")]
    DuplicatePath(String),

    #[error("path contains a newline: {0:?}")]
    NewlineInPath(String),
}

/// Failure to encode or decode a value payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to encode {type_name}: {message}")]
    Encode { type_name: String, message: String },

    #[error("failed to decode {type_name}: {message}")]
    Decode { type_name: String, message: String },
}

impl CodecError {
    /// Create an encode error for the given type.
    pub fn encode(type_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Encode {
            type_name: type_name.into(),
            message: message.to_string(),
        }
    }

    /// Create a decode error for the given type.
    pub fn decode(type_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            type_name: type_name.into(),
            message: message.to_string(),
        }
    }
}
