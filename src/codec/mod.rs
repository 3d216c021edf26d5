//! Codec module - serialization and value conversion for payloads.
//!
//! - [`JsonCodec`] - UTF-8 JSON using `serde_json`
//! - [`coerce`] - the loose-to-strict conversion applied to received values
//!
//! # Design
//!
//! Codecs are implemented as marker structs with static methods rather than trait objects.
//! Conversion is a free function generic over the target type, so callers name the
//! type they expect and the chain adapts to it.

pub mod coerce;
mod json;

pub use coerce::{coerce, coerce_traced, CoercionError, Stage};
pub use json::JsonCodec;
