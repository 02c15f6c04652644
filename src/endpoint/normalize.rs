//! Best-effort typing of `value` fields in server payloads.
//!
//! The endpoint wire format carries most values as strings, some of them base64 encoded.
//! The rules here are heuristics: a numeric looking string always becomes a number and a
//! string that happens to be valid base64 of UTF-8 text is always decoded. The caller's own
//! schema for a key stays the authority on its final type.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::{Number, Value};

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Normalizes every `value` field reachable from `data`, in place.
///
/// Objects are walked key by key and arrays element by element; other leaves are left as-is.
pub fn normalize(data: &mut Value, fold_booleans: bool) {
    match data {
        Value::Array(items) => {
            for item in items {
                normalize(item, fold_booleans);
            }
        }
        Value::Object(object) => {
            if let Some(value) = object.get_mut("value") {
                let normalized = normalize_value(value.take(), fold_booleans);
                *value = normalized;
            }
            for child in object.values_mut() {
                normalize(child, fold_booleans);
            }
        }
        _ => {}
    }
}

/// Coerces a single value: numeric strings become numbers, other strings are base64 decoded
/// when they decode to UTF-8 text, and with `fold_booleans` `1`/`0` become `true`/`false`.
#[must_use]
pub fn normalize_value(value: Value, fold_booleans: bool) -> Value {
    let value = match value {
        Value::String(text) => match parse_number(&text) {
            Some(number) => Value::Number(number),
            None => Value::String(decode_base64_text(&text).unwrap_or(text)),
        },
        other => other,
    };

    if fold_booleans {
        fold_boolean(value)
    } else {
        value
    }
}

fn fold_boolean(value: Value) -> Value {
    let bit = match &value {
        Value::Number(n) => n.as_f64().and_then(|f| {
            if (f - 1.0).abs() < f64::EPSILON {
                Some(true)
            } else if f.abs() < f64::EPSILON {
                Some(false)
            } else {
                None
            }
        }),
        Value::String(s) if s == "1" => Some(true),
        Value::String(s) if s == "0" => Some(false),
        _ => None,
    };
    bit.map_or(value, Value::Bool)
}

/// Parses text that is entirely a finite decimal number (surrounding whitespace allowed).
///
/// Integral values stay integers; `""`, `NaN` and infinities are not numbers.
pub(crate) fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(int) = text.parse::<i64>() {
        return Some(int.into());
    }
    if let Ok(uint) = text.parse::<u64>() {
        return Some(uint.into());
    }
    // Rust accepts "inf"/"nan" spellings that are not numbers on the wire
    if text.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E')) {
        return None;
    }
    let float = text.parse::<f64>().ok().filter(|f| f.is_finite())?;
    Number::from_f64(float)
}

fn decode_base64_text(text: &str) -> Option<String> {
    let bytes = LENIENT_BASE64.decode(text).ok()?;
    String::from_utf8(bytes).ok()
}
