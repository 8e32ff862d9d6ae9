//! Binary encoding of call descriptors.
//!
//! Layout, in order:
//!
//! ```text
//! string  artifact
//! string  type_name
//! string  method
//! int32   argument count
//! per argument:
//!   bool    has_artifact
//!   string  artifact        (only if has_artifact)
//!   string  type_name
//!   string  payload
//! ```
//!
//! Strings are a little-endian `u32` byte length followed by UTF-8 bytes.
//! `int32` is little-endian. `bool` is one byte, `0` or `1`.

use crate::descriptor::{Argument, CallDescriptor, MethodIdentity};
use crate::error::FormatError;

/// Encode a descriptor. Fails only when a string or the argument count
/// does not fit its length field.
pub fn encode(descriptor: &CallDescriptor) -> Result<Vec<u8>, FormatError> {
    let mut writer = WireWriter::default();
    writer.string("artifact", &descriptor.method.artifact)?;
    writer.string("type name", &descriptor.method.type_name)?;
    writer.string("method name", &descriptor.method.method)?;
    writer.int32(argument_count(descriptor.arguments.len())?);

    for argument in &descriptor.arguments {
        match &argument.artifact {
            Some(artifact) => {
                writer.bool(true);
                writer.string("argument artifact", artifact)?;
            }
            None => writer.bool(false),
        }
        writer.string("argument type name", &argument.type_name)?;
        writer.string("argument payload", &argument.payload)?;
    }

    Ok(writer.into_bytes())
}

fn string_length(what: &'static str, len: usize) -> Result<u32, FormatError> {
    u32::try_from(len).map_err(|_| FormatError::TooLong { what, len })
}

fn argument_count(len: usize) -> Result<i32, FormatError> {
    i32::try_from(len).map_err(|_| FormatError::TooLong {
        what: "argument count",
        len,
    })
}

/// Decode a descriptor, rejecting truncated, miscounted or padded input.
pub fn decode(bytes: &[u8]) -> Result<CallDescriptor, FormatError> {
    let mut reader = WireReader::new(bytes);

    let artifact = reader.string("artifact")?;
    let type_name = reader.string("type name")?;
    let method = reader.string("method name")?;

    let count = reader.int32("argument count")?;
    if count < 0 {
        return Err(FormatError::NegativeCount(count));
    }

    // Every argument takes at least 9 bytes, so a count larger than that
    // bound is a miscount and must not drive the allocation.
    let mut arguments = Vec::with_capacity((count as usize).min(reader.remaining() / 9));
    for _ in 0..count {
        let artifact = if reader.bool("argument artifact flag")? {
            Some(reader.string("argument artifact")?)
        } else {
            None
        };
        let type_name = reader.string("argument type name")?;
        let payload = reader.string("argument payload")?;
        arguments.push(Argument {
            artifact,
            type_name,
            payload,
        });
    }

    if reader.remaining() > 0 {
        return Err(FormatError::TrailingBytes(reader.remaining()));
    }

    Ok(CallDescriptor {
        method: MethodIdentity {
            artifact,
            type_name,
            method,
        },
        arguments,
    })
}

#[derive(Default)]
struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    fn string(&mut self, what: &'static str, value: &str) -> Result<(), FormatError> {
        let len = string_length(what, value.len())?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn int32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, what: &'static str, needed: usize) -> Result<&'a [u8], FormatError> {
        if needed > self.remaining() {
            return Err(FormatError::Truncated {
                what,
                needed,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, FormatError> {
        let raw = self.take(what, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn int32(&mut self, what: &'static str) -> Result<i32, FormatError> {
        let raw = self.take(what, 4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn bool(&mut self, what: &'static str) -> Result<bool, FormatError> {
        match self.take(what, 1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FormatError::InvalidBool(other)),
        }
    }

    fn string(&mut self, what: &'static str) -> Result<String, FormatError> {
        let len = self.u32(what)? as usize;
        let raw = self.take(what, len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| FormatError::InvalidUtf8 { what })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CallDescriptor {
        CallDescriptor::new(
            MethodIdentity::new("app.core", "Text", "Upper"),
            vec![
                Argument::new(None, "string", "\"hello\""),
                Argument::new(Some("app.shapes".to_string()), "Circle", "{\"r\":2.0}"),
            ],
        )
    }

    #[test]
    fn test_encode_decode() {
        let descriptor = sample();
        let decoded = decode(&encode(&descriptor).unwrap()).unwrap();
        assert_eq!(decoded, descriptor);
    }

    #[test]
    fn test_exact_layout() {
        let descriptor = CallDescriptor::new(
            MethodIdentity::new("a", "T", "m"),
            vec![Argument::new(None, "s", "x")],
        );
        let bytes = encode(&descriptor).unwrap();
        let expected: Vec<u8> = [
            &[1, 0, 0, 0, b'a'][..],
            &[1, 0, 0, 0, b'T'],
            &[1, 0, 0, 0, b'm'],
            &[1, 0, 0, 0],
            &[0],
            &[1, 0, 0, 0, b's'],
            &[1, 0, 0, 0, b'x'],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_empty_arguments() {
        let descriptor = CallDescriptor::new(MethodIdentity::new("a", "T", "m"), vec![]);
        assert_eq!(decode(&encode(&descriptor).unwrap()).unwrap(), descriptor);
    }

    #[test]
    fn test_every_truncation_rejected() {
        let bytes = encode(&sample()).unwrap();
        for len in 0..bytes.len() {
            let result = decode(&bytes[..len]);
            assert!(
                matches!(result, Err(FormatError::Truncated { .. })),
                "prefix of {} bytes: {:?}",
                len,
                result
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert_eq!(decode(&bytes), Err(FormatError::TrailingBytes(1)));
    }

    #[test]
    fn test_overcounted_arguments_rejected() {
        let descriptor = CallDescriptor::new(
            MethodIdentity::new("a", "T", "m"),
            vec![Argument::new(None, "s", "x")],
        );
        let mut bytes = encode(&descriptor).unwrap();
        // count lives right after the three 5-byte strings
        bytes[15] = 2;
        assert!(matches!(decode(&bytes), Err(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_undercounted_arguments_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        let count_offset = 4 + "app.core".len() + 4 + "Text".len() + 4 + "Upper".len();
        bytes[count_offset] = 1;
        assert!(matches!(decode(&bytes), Err(FormatError::TrailingBytes(_))));
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut bytes = encode(&CallDescriptor::new(MethodIdentity::new("a", "T", "m"), vec![])).unwrap();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(decode(&bytes), Err(FormatError::NegativeCount(-1)));
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let descriptor = CallDescriptor::new(
            MethodIdentity::new("a", "T", "m"),
            vec![Argument::new(None, "s", "x")],
        );
        let mut bytes = encode(&descriptor).unwrap();
        bytes[19] = 7;
        assert_eq!(decode(&bytes), Err(FormatError::InvalidBool(7)));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut bytes = encode(&CallDescriptor::new(MethodIdentity::new("a", "T", "m"), vec![])).unwrap();
        bytes[4] = 0xff;
        assert!(matches!(decode(&bytes), Err(FormatError::InvalidUtf8 { .. })));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_oversized_lengths_rejected() {
        let len = u32::MAX as usize + 1;
        assert_eq!(
            string_length("argument payload", len),
            Err(FormatError::TooLong {
                what: "argument payload",
                len
            })
        );
        assert_eq!(string_length("method name", u32::MAX as usize), Ok(u32::MAX));

        let count = i32::MAX as usize + 1;
        assert!(matches!(
            argument_count(count),
            Err(FormatError::TooLong { len, .. }) if len == count
        ));
        assert_eq!(argument_count(3), Ok(3));
    }
}
