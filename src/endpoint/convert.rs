//! Conversion between caller-side state values and endpoint wire values.
//!
//! Keys declared boolean ("bool mode") accept `true`/`false`, `0`/`1`, their string forms
//! and `"toggle"`, and always send `"1"`/`"0"`. Other keys send numbers and numeric strings
//! unchanged and base64 encode free text.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::{Map, Value};
use strum_macros::Display;

use super::normalize::parse_number;
use super::types::request::CallRequest;

const TOGGLE: &str = "toggle";

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallMethod {
    #[default]
    Set,
    Toggle,
}

/// A state value prepared for a `call`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    /// Sent as `param.value`
    pub uid_value: Value,
    /// What the caller should record as acknowledged state
    pub ack_value: Value,
    pub method: CallMethod,
}

impl Encoded {
    /// The `call` that writes this value to `key`.
    #[must_use]
    pub fn into_call<K: Into<String>>(self, key: K) -> CallRequest {
        let mut params = Map::new();
        params.insert("value".to_owned(), self.uid_value);
        CallRequest::builder()
            .key(key)
            .method(self.method.to_string())
            .params(params)
            .build()
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Number,
    String,
    Mixed,
}

/// A wire value converted back to caller-side state.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub value_type: ValueType,
}

/// Encodes a caller-side value for the wire.
#[must_use]
pub fn encode_uid_value(value: &Value, bool_mode: bool) -> Encoded {
    let encoded = |uid_value: Value, ack_value: Value| Encoded {
        uid_value,
        ack_value,
        method: CallMethod::Set,
    };

    match value {
        Value::String(s) if s == TOGGLE => Encoded {
            uid_value: bit(true),
            ack_value: value.clone(),
            method: CallMethod::Toggle,
        },
        Value::Bool(b) if bool_mode => encoded(bit(*b), Value::Bool(*b)),
        Value::Bool(b) => encoded(bit(*b), Value::from(u8::from(*b))),
        Value::String(s) if s == "true" || s == "false" => {
            let on = s == "true";
            let ack_value = if bool_mode {
                Value::Bool(on)
            } else {
                Value::from(u8::from(on))
            };
            encoded(bit(on), ack_value)
        }
        Value::Number(n) if bool_mode => {
            let on = is_non_zero(n);
            encoded(bit(on), Value::Bool(on))
        }
        Value::String(s) => match parse_number(s) {
            Some(n) if bool_mode => {
                let on = is_non_zero(&n);
                encoded(bit(on), Value::Bool(on))
            }
            Some(_) => encoded(value.clone(), value.clone()),
            None => encoded(Value::String(STANDARD.encode(s)), value.clone()),
        },
        other => encoded(other.clone(), other.clone()),
    }
}

/// Decodes an acknowledged wire value into caller-side state.
#[must_use]
pub fn decode_ack_value(value: &Value, bool_mode: bool) -> Decoded {
    if bool_mode {
        let on = match value {
            Value::Bool(b) => *b,
            Value::Number(n) => is_non_zero(n),
            Value::String(s) => s != "0",
            Value::Null => false,
            Value::Array(_) | Value::Object(_) => true,
        };
        return Decoded {
            value: Value::Bool(on),
            value_type: ValueType::Boolean,
        };
    }

    let (value, value_type) = match value {
        Value::Bool(b) => (Value::from(u8::from(*b)), ValueType::Number),
        Value::Number(_) => (value.clone(), ValueType::Number),
        Value::String(_) => (value.clone(), ValueType::String),
        other => (other.clone(), ValueType::Mixed),
    };
    Decoded { value, value_type }
}

fn bit(on: bool) -> Value {
    Value::String(if on { "1" } else { "0" }.to_owned())
}

fn is_non_zero(n: &serde_json::Number) -> bool {
    n.as_f64().is_some_and(|f| f.abs() > 0.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bool_true_in_bool_mode() {
        let encoded = encode_uid_value(&json!(true), true);

        assert_eq!(
            encoded,
            Encoded {
                uid_value: json!("1"),
                ack_value: json!(true),
                method: CallMethod::Set,
            }
        );
    }

    #[test]
    fn toggle_in_both_modes() {
        for bool_mode in [true, false] {
            let encoded = encode_uid_value(&json!("toggle"), bool_mode);

            assert_eq!(encoded.uid_value, json!("1"), "bool_mode={bool_mode}");
            assert_eq!(encoded.method, CallMethod::Toggle, "bool_mode={bool_mode}");
        }
    }

    #[test]
    fn text_in_number_mode_is_base64() {
        let encoded = encode_uid_value(&json!("abc"), false);

        assert_eq!(encoded.uid_value, json!(STANDARD.encode("abc")));
        assert_eq!(encoded.ack_value, json!("abc"));
        assert_eq!(encoded.method, CallMethod::Set);
    }

    #[test]
    fn numbers_in_bool_mode_become_bits() {
        let encoded = encode_uid_value(&json!(5), true);
        assert_eq!(encoded.uid_value, json!("1"));
        assert_eq!(encoded.ack_value, json!(true));

        let encoded = encode_uid_value(&json!("0"), true);
        assert_eq!(encoded.uid_value, json!("0"));
        assert_eq!(encoded.ack_value, json!(false));
    }

    #[test]
    fn numbers_in_number_mode_pass_through() {
        let encoded = encode_uid_value(&json!(21.5), false);
        assert_eq!(encoded.uid_value, json!(21.5));

        let encoded = encode_uid_value(&json!("42"), false);
        assert_eq!(encoded.uid_value, json!("42"));
        assert_eq!(encoded.ack_value, json!("42"));
    }

    #[test]
    fn boolean_strings_in_number_mode() {
        let encoded = encode_uid_value(&json!("true"), false);

        assert_eq!(encoded.uid_value, json!("1"));
        assert_eq!(encoded.ack_value, json!(1));
    }

    #[test]
    fn bool_mode_round_trip_preserves_truthiness() {
        let cases = [
            (json!(true), true),
            (json!(false), false),
            (json!(0), false),
            (json!(1), true),
            (json!("0"), false),
            (json!("1"), true),
            (json!("true"), true),
            (json!("false"), false),
        ];

        for (input, expected) in cases {
            let encoded = encode_uid_value(&input, true);
            let decoded = decode_ack_value(&encoded.ack_value, true);

            assert_eq!(decoded.value, json!(expected), "input {input}");
            assert_eq!(encoded.uid_value, json!(if expected { "1" } else { "0" }), "input {input}");
        }
    }

    #[test]
    fn decode_number_in_bool_mode() {
        assert_eq!(
            decode_ack_value(&json!(1), true),
            Decoded {
                value: json!(true),
                value_type: ValueType::Boolean,
            }
        );
    }

    #[test]
    fn decode_bool_in_number_mode() {
        assert_eq!(
            decode_ack_value(&json!(true), false),
            Decoded {
                value: json!(1),
                value_type: ValueType::Number,
            }
        );
    }

    #[test]
    fn decode_other_shapes() {
        assert_eq!(decode_ack_value(&json!("on"), false).value_type, ValueType::String);
        assert_eq!(decode_ack_value(&json!(null), false).value_type, ValueType::Mixed);
        assert_eq!(decode_ack_value(&json!("off"), true).value, json!(true));
        assert_eq!(decode_ack_value(&json!(null), true).value, json!(false));
    }

    #[test]
    fn encoded_value_builds_call() {
        let request = encode_uid_value(&json!("toggle"), true).into_call("CO@1");

        assert_eq!(
            request.param(),
            json!({"key": "CO@1", "method": "toggle", "value": "1"})
        );
        assert!(request.tag.is_none(), "set calls are fire-and-forget");
    }
}
