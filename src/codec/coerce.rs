//! Loose-to-strict value conversion.
//!
//! Values arrive as untyped JSON. Before they reach a handler argument or a
//! caller's return type they pass through an ordered chain of conversions.
//! The first stage that produces a `T` wins:
//!
//! 1. [`Stage::Exact`] - `T` is [`Value`], or the value is a scalar that
//!    deserializes strictly.
//! 2. [`Stage::Enum`] - variant name (case-insensitive), then ordinal.
//! 3. [`Stage::Uuid`] - identifier text in any of the usual notations.
//! 4. [`Stage::Structural`] - objects and arrays decoded into the target shape.
//! 5. [`Stage::Convert`] - string/number/bool conversions.
//! 6. [`Stage::TextRoundTrip`] - re-encode as JSON text and decode again.
//!
//! # Example
//!
//! ```
//! use procwire_rpc::codec::coerce;
//! use serde_json::json;
//!
//! let n: u16 = coerce(json!("8080")).unwrap();
//! assert_eq!(n, 8080);
//! ```

use std::any::{type_name, Any, TypeId};
use std::fmt;

use serde::de::{self, DeserializeOwned, Visitor};
use serde_json::{Number, Value};
use thiserror::Error;
use uuid::Uuid;

/// Values longer than this are shortened in error messages.
const MAX_VALUE_PREVIEW: usize = 120;

/// The conversion stage that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Exact,
    Enum,
    Uuid,
    Structural,
    Convert,
    TextRoundTrip,
}

/// A value could not be converted to the requested type.
#[derive(Debug, Clone, Error)]
#[error("cannot convert {value} to {target}: {reason}")]
pub struct CoercionError {
    /// Name of the target type.
    pub target: &'static str,
    /// The offending value, possibly shortened.
    pub value: String,
    /// Why the last stage rejected it.
    pub reason: String,
}

/// Convert a loosely-typed value into `T`.
pub fn coerce<T>(value: Value) -> Result<T, CoercionError>
where
    T: DeserializeOwned + 'static,
{
    coerce_traced(value).map(|(converted, _)| converted)
}

/// Like [`coerce`], also reporting which stage succeeded.
pub fn coerce_traced<T>(value: Value) -> Result<(T, Stage), CoercionError>
where
    T: DeserializeOwned + 'static,
{
    let mut reason = String::from("no conversion applies");

    // Exact
    if TypeId::of::<T>() == TypeId::of::<Value>() {
        return downcast::<T, Value>(value).map(|v| (v, Stage::Exact));
    }
    if is_scalar(&value) {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(v) => return Ok((v, Stage::Exact)),
            Err(e) => reason = e.to_string(),
        }
    }

    // Enum
    if let Some(variants) = enum_variants::<T>() {
        match coerce_enum::<T>(&value, variants) {
            Ok(v) => return Ok((v, Stage::Enum)),
            Err(e) => reason = e,
        }
    }

    // Uuid
    if TypeId::of::<T>() == TypeId::of::<Uuid>() {
        if let Value::String(text) = &value {
            match Uuid::parse_str(text.trim()) {
                Ok(id) => return downcast::<T, Uuid>(id).map(|v| (v, Stage::Uuid)),
                Err(e) => reason = e.to_string(),
            }
        }
    }

    // Structural
    if value.is_object() || value.is_array() {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(v) => return Ok((v, Stage::Structural)),
            Err(e) => reason = e.to_string(),
        }
    }

    // Convert
    for candidate in conversions(&value) {
        match serde_json::from_value::<T>(candidate) {
            Ok(v) => return Ok((v, Stage::Convert)),
            Err(e) => reason = e.to_string(),
        }
    }

    // Text round-trip
    if let Ok(text) = serde_json::to_string(&value) {
        match serde_json::from_str::<T>(&text) {
            Ok(v) => return Ok((v, Stage::TextRoundTrip)),
            Err(e) => reason = e.to_string(),
        }
    }
    if let Value::String(text) = &value {
        match serde_json::from_str::<T>(text) {
            Ok(v) => return Ok((v, Stage::TextRoundTrip)),
            Err(e) => reason = e.to_string(),
        }
    }

    Err(failure::<T>(&value, reason))
}

fn failure<T>(value: &Value, reason: String) -> CoercionError {
    let mut preview = value.to_string();
    if preview.len() > MAX_VALUE_PREVIEW {
        let mut cut = MAX_VALUE_PREVIEW;
        while !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
        preview.push_str("...");
    }
    CoercionError {
        target: type_name::<T>(),
        value: preview,
        reason,
    }
}

fn downcast<T: 'static, V: 'static>(value: V) -> Result<T, CoercionError> {
    let boxed: Box<dyn Any> = Box::new(value);
    boxed.downcast::<T>().map(|b| *b).map_err(|_| CoercionError {
        target: type_name::<T>(),
        value: type_name::<V>().to_string(),
        reason: "type mismatch".to_string(),
    })
}

fn is_scalar(value: &Value) -> bool {
    !(value.is_object() || value.is_array())
}

fn coerce_enum<T: DeserializeOwned>(
    value: &Value,
    variants: &'static [&'static str],
) -> Result<T, String> {
    let by_variant = |index: usize| -> Result<T, String> {
        let name = variants
            .get(index)
            .ok_or_else(|| format!("no variant with ordinal {index}"))?;
        serde_json::from_value::<T>(Value::String((*name).to_string())).map_err(|e| e.to_string())
    };

    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Some(index) = variants.iter().position(|v| v.eq_ignore_ascii_case(text)) {
                return by_variant(index);
            }
            match text.parse::<usize>() {
                Ok(index) => by_variant(index),
                Err(_) => Err(format!("unknown variant '{text}'")),
            }
        }
        Value::Number(n) => match n.as_u64().and_then(|i| usize::try_from(i).ok()) {
            Some(index) => by_variant(index),
            None => Err(format!("invalid ordinal {n}")),
        },
        other => Err(format!("cannot select a variant from {other}")),
    }
}

/// Alternative representations tried by the convert stage, in order.
fn conversions(value: &Value) -> Vec<Value> {
    let mut out = Vec::new();
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(i) = text.parse::<i64>() {
                out.push(Value::from(i));
            } else if let Ok(u) = text.parse::<u64>() {
                out.push(Value::from(u));
            } else if let Ok(f) = text.parse::<f64>() {
                if let Some(n) = Number::from_f64(f) {
                    out.push(Value::Number(n));
                }
                if let Some(i) = integral(f) {
                    out.push(Value::from(i));
                }
            }
            if text.eq_ignore_ascii_case("true") {
                out.push(Value::Bool(true));
            } else if text.eq_ignore_ascii_case("false") {
                out.push(Value::Bool(false));
            }
        }
        Value::Number(n) => {
            out.push(Value::String(n.to_string()));
            if let Some(i) = n.as_f64().filter(|_| n.is_f64()).and_then(integral) {
                out.push(Value::from(i));
            }
            if n.is_i64() || n.is_u64() {
                out.push(Value::Bool(n.as_f64() != Some(0.0)));
            }
        }
        Value::Bool(b) => {
            out.push(Value::String(b.to_string()));
            out.push(Value::from(u8::from(*b)));
        }
        _ => {}
    }
    out
}

/// 2^63, the first float past `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= -I64_LIMIT && f < I64_LIMIT {
        Some(f as i64)
    } else {
        None
    }
}

/// Discover the variant names of `T` if it deserializes as a serde enum.
fn enum_variants<T: DeserializeOwned>() -> Option<&'static [&'static str]> {
    match T::deserialize(EnumProbe) {
        Err(Probe::Variants(variants)) => Some(variants),
        _ => None,
    }
}

/// A deserializer that only answers "which variants do you have?".
struct EnumProbe;

#[derive(Debug)]
enum Probe {
    Variants(&'static [&'static str]),
    NotEnum,
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Variants(v) => write!(f, "enum with variants {v:?}"),
            Probe::NotEnum => f.write_str("not an enum"),
        }
    }
}

impl std::error::Error for Probe {}

impl de::Error for Probe {
    fn custom<M: fmt::Display>(_msg: M) -> Self {
        Probe::NotEnum
    }
}

impl<'de> de::Deserializer<'de> for EnumProbe {
    type Error = Probe;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Probe> {
        Err(Probe::NotEnum)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Probe> {
        Err(Probe::Variants(variants))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}
