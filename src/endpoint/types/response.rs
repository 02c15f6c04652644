use serde_json::{Map, Value};

use crate::error::Protocol;

/// Messages for the status codes documented by the endpoint API.
#[must_use]
pub const fn status_message(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("Ok"),
        400 => Some("Bad request"),
        403 => Some("Forbidden"),
        404 => Some("Not found"),
        500 => Some("Internal server error"),
        901 => Some("Invalid request"),
        902 => Some("Reserved"),
        903 => Some("Unknown method"),
        904 => Some("Invalid value"),
        _ => None,
    }
}

/// Decodes an inbound text frame; text that is not JSON becomes `{"raw": text}`.
#[must_use]
pub fn parse_inbound(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| {
        let mut raw = Map::new();
        raw.insert("raw".to_owned(), Value::String(text.to_owned()));
        Value::Object(raw)
    })
}

/// The `code` of an error response.
///
/// Any present `code` is an error except `0`, `"0"` and `null`, whatever its type.
#[must_use]
pub fn error_code(payload: &Value) -> Option<&Value> {
    let code = payload.get("code")?;
    let success = match code {
        Value::Null => true,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() < f64::EPSILON),
        Value::String(s) => s.trim() == "0",
        _ => false,
    };
    (!success).then_some(code)
}

/// Integral value of `code` for the status table: `404`, `404.0` and `"404"` alike.
fn status_number(code: &Value) -> Option<i64> {
    match code {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64()?.to_string().parse().ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Classifies `payload` as an error response.
///
/// The message is the first non-empty of `message`, `error`, the status table entry and
/// `Error code N`.
#[must_use]
pub fn protocol_error(payload: &Value) -> Option<Protocol> {
    let code = error_code(payload)?.clone();
    let text = |field: &str| {
        payload
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    let message = text("message")
        .or_else(|| text("error"))
        .or_else(|| status_number(&code).and_then(status_message).map(str::to_owned))
        .unwrap_or_else(|| {
            let raw = code.as_str().map_or_else(|| code.to_string(), str::to_owned);
            format!("Error code {raw}")
        });

    Some(Protocol { code, message })
}

/// The correlation tag echoed by the server.
#[must_use]
pub fn response_tag(payload: &Value) -> Option<&str> {
    payload.get("tag").and_then(Value::as_str)
}

/// The request object some responses echo instead of a tag.
#[must_use]
pub fn echoed_request(payload: &Value) -> Option<&Value> {
    payload.get("request").filter(|request| request.is_object())
}

/// A single `(key, value)` state change carried by an event payload.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    /// Endpoint key or uid
    pub key: String,
    /// `Null` when the payload carried no value
    pub value: Value,
}

impl Update {
    fn new(key: String, value: Option<&Value>) -> Self {
        Self {
            key,
            value: value.cloned().unwrap_or(Value::Null),
        }
    }
}

/// Extracts state changes from an (already normalized) `event` payload.
///
/// Handled shapes of `data`:
/// - `{items: [{uid|key, data: {value}} | {uid|key, value}]}` subscription results
/// - `{value}` together with a top-level `subscription.key` push
/// - `[{uid|key, value}]` arrays of events
/// - `{uid|key, data: {value}}` single objects, otherwise a map of key to value (or `{value}`)
#[must_use]
pub fn extract_updates(payload: &Value) -> Vec<Update> {
    let Some(data) = payload.get("data").filter(|data| is_truthy(data)) else {
        return Vec::new();
    };

    if let Some(items) = data.get("items").and_then(Value::as_array) {
        return items
            .iter()
            .filter(|item| is_truthy(item))
            .filter_map(|item| {
                let key = item_key(item)?;
                let value = match item.get("data") {
                    Some(inner) if inner.get("value").is_some() => inner.get("value"),
                    Some(inner) if !inner.is_null() => Some(inner),
                    _ => item.get("value"),
                };
                Some(Update::new(key, value))
            })
            .collect();
    }

    let subscription_key = payload
        .get("subscription")
        .and_then(|subscription| subscription.get("key"))
        .filter(|key| is_truthy(key));
    if let Some(key) = subscription_key
        && let Some(value) = data.as_object().and_then(|object| object.get("value"))
    {
        return vec![Update::new(key_string(key), Some(value))];
    }

    match data {
        Value::Array(items) => items
            .iter()
            .filter(|item| is_truthy(item))
            .filter_map(|item| Some(Update::new(item_key(item)?, item.get("value"))))
            .collect(),
        Value::Object(object) => match item_key(data) {
            Some(key) => {
                let value = data
                    .get("data")
                    .and_then(|inner| inner.get("value"))
                    .or_else(|| data.get("value"));
                vec![Update::new(key, value)]
            }
            None => object
                .iter()
                .map(|(key, value)| {
                    let value = value.get("value").unwrap_or(value);
                    Update::new(key.clone(), Some(value))
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// `uid` takes precedence over `key`.
fn item_key(item: &Value) -> Option<String> {
    item.get("uid").or_else(|| item.get("key")).map(key_string)
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn non_json_is_wrapped_as_raw() {
        assert_eq!(parse_inbound("hello"), json!({"raw": "hello"}));
        assert_eq!(parse_inbound(r#"{"a":1}"#), json!({"a": 1}));
    }

    #[test]
    fn zero_or_missing_code_is_success() {
        assert_eq!(error_code(&json!({"code": 0})), None);
        assert_eq!(error_code(&json!({"code": 0.0})), None);
        assert_eq!(error_code(&json!({"code": "0"})), None);
        assert_eq!(error_code(&json!({"code": null})), None);
        assert_eq!(error_code(&json!({"data": {}})), None);
        assert_eq!(error_code(&json!("text")), None);
    }

    #[test]
    fn non_zero_code_is_error() {
        assert_eq!(error_code(&json!({"code": 404})), Some(&json!(404)));
        assert_eq!(error_code(&json!({"code": "500"})), Some(&json!("500")));
    }

    #[test]
    fn any_non_zero_code_type_is_error() {
        assert_eq!(error_code(&json!({"code": "E42"})), Some(&json!("E42")));
        assert_eq!(error_code(&json!({"code": 404.0})), Some(&json!(404.0)));
        assert_eq!(error_code(&json!({"code": true})), Some(&json!(true)));
        assert_eq!(error_code(&json!({"code": -1})), Some(&json!(-1)));
    }

    #[test]
    fn raw_code_is_kept_in_error() {
        let error = protocol_error(&json!({"code": "E42"})).unwrap();
        assert_eq!(error.code, json!("E42"));
        assert_eq!(error.message, "Error code E42");

        let error = protocol_error(&json!({"code": 404.0})).unwrap();
        assert_eq!(error.message, "Not found");

        let error = protocol_error(&json!({"code": true})).unwrap();
        assert_eq!(error.message, "Error code true");
    }

    #[test]
    fn table_message_when_no_text_given() {
        let error = protocol_error(&json!({"code": 404})).unwrap();

        assert_eq!(error.code, 404);
        assert_eq!(error.message, status_message(404).unwrap());
    }

    #[test]
    fn explicit_message_wins() {
        let error = protocol_error(&json!({"code": 403, "message": "nope", "error": "ignored"})).unwrap();
        assert_eq!(error.message, "nope");

        let error = protocol_error(&json!({"code": 403, "error": "denied"})).unwrap();
        assert_eq!(error.message, "denied");
    }

    #[test]
    fn unknown_code_falls_back() {
        let error = protocol_error(&json!({"code": 900})).unwrap();

        assert_eq!(error.message, "Error code 900");
    }

    #[test]
    fn reserved_code_has_entry() {
        assert_eq!(status_message(902), Some("Reserved"));
        assert_eq!(status_message(0), Some("Ok"));
        assert_eq!(status_message(418), None);
    }

    #[test]
    fn echoed_request_must_be_object() {
        assert!(echoed_request(&json!({"request": "CO@1"})).is_none(), "strings are not requests");
        assert_eq!(
            echoed_request(&json!({"request": {"key": "CO@1"}})),
            Some(&json!({"key": "CO@1"}))
        );
    }

    #[test]
    fn subscription_items() {
        let payload = json!({"data": {"items": [
            {"uid": "a1", "data": {"value": true}},
            {"key": "CO@2", "value": 5},
            {"value": "no key"},
            null,
        ]}});

        let updates = extract_updates(&payload);

        assert_eq!(
            updates,
            vec![
                Update::new("a1".to_owned(), Some(&json!(true))),
                Update::new("CO@2".to_owned(), Some(&json!(5))),
            ]
        );
    }

    #[test]
    fn item_with_data_but_no_value_uses_data() {
        let payload = json!({"data": {"items": [{"uid": "a1", "data": {"on": 1}}]}});

        assert_eq!(extract_updates(&payload)[0].value, json!({"on": 1}));
    }

    #[test]
    fn subscription_push() {
        let payload = json!({"subscription": {"key": "CO@1"}, "data": {"value": false}});

        assert_eq!(
            extract_updates(&payload),
            vec![Update::new("CO@1".to_owned(), Some(&json!(false)))]
        );
    }

    #[test]
    fn event_array() {
        let payload = json!({"data": [{"uid": 7, "value": 21.5}, {"key": "x"}]});

        assert_eq!(
            extract_updates(&payload),
            vec![
                Update::new("7".to_owned(), Some(&json!(21.5))),
                Update::new("x".to_owned(), None),
            ]
        );
    }

    #[test]
    fn single_object_with_uid() {
        let payload = json!({"data": {"uid": "a1", "data": {"value": "on"}}});

        assert_eq!(
            extract_updates(&payload),
            vec![Update::new("a1".to_owned(), Some(&json!("on")))]
        );
    }

    #[test]
    fn raw_property_map() {
        let payload = json!({"data": {"CO@1": {"value": 1}, "CO@2": 3}});

        let updates = extract_updates(&payload);

        assert_eq!(updates.len(), 2, "{updates:?}");
        assert!(updates.contains(&Update::new("CO@1".to_owned(), Some(&json!(1)))), "{updates:?}");
        assert!(updates.contains(&Update::new("CO@2".to_owned(), Some(&json!(3)))), "{updates:?}");
    }

    #[test]
    fn missing_or_falsy_data_yields_nothing() {
        assert!(extract_updates(&json!({"type": "ack"})).is_empty(), "no data");
        assert!(extract_updates(&json!({"data": 0})).is_empty(), "falsy data");
        assert!(extract_updates(&json!({"data": "text"})).is_empty(), "scalar data");
    }
}
