//! Value codec.
//!
//! Arguments and results travel as codec payload strings. The codec is
//! pluggable; [`JsonCodec`] is the default.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Encodes typed values to payload strings and back.
pub trait ValueCodec: Clone + Send + Sync + 'static {
    /// Encode a value. `type_name` is used for diagnostics only.
    fn encode<T: Serialize + ?Sized>(&self, value: &T, type_name: &str) -> Result<String, CodecError>;

    /// Decode a payload as `T`. Fails on schema mismatch.
    fn decode<T: DeserializeOwned>(&self, payload: &str, type_name: &str) -> Result<T, CodecError>;
}

/// JSON value codec backed by serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T, type_name: &str) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::encode(type_name, e))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &str, type_name: &str) -> Result<T, CodecError> {
        serde_json::from_str(payload).map_err(|e| CodecError::decode(type_name, e))
    }
}

/// A value type that can cross the wire as a tagged argument or result.
///
/// `TYPE_NAME` is the tag carried by every argument of this type; together
/// with `ARTIFACT` it selects the decoder on the dispatcher side.
pub trait RemoteType: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_NAME: &'static str;

    /// Deployable unit defining the type. `None` for built-in types.
    const ARTIFACT: Option<&'static str> = None;
}

macro_rules! builtin_remote_type {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl RemoteType for $ty {
                const TYPE_NAME: &'static str = $name;
            }
        )*
    };
}

builtin_remote_type! {
    String => "string",
    bool => "bool",
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
    f64 => "f64",
    Vec<u8> => "bytes",
    Vec<String> => "string[]",
}
