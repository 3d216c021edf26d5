//! JSON codec using `serde_json`.
//!
//! Frame payloads are UTF-8 JSON text. Absent optional fields are skipped by
//! the message types themselves (`skip_serializing_if`), so the codec stays a
//! thin wrapper.
//!
//! # Example
//!
//! ```
//! use procwire_rpc::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = JsonCodec::encode(&msg).unwrap();
//! assert_eq!(encoded, br#"{"id":42,"content":"hello"}"#);
//! let decoded: Message = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use serde_json::Value;

use crate::error::Result;

/// JSON codec for frame payloads and call values.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to UTF-8 JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode UTF-8 JSON bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode a value into a loosely-typed JSON value.
    #[inline]
    pub fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }
}
