use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use serde_json::{Map, Value, json};
use strum_macros::Display;

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RequestType {
    Call,
    Select,
    Subscribe,
    Unsubscribe,
}

/// Outbound message envelope `{type, param, tag?}`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    pub r#type: RequestType,
    pub param: Value,
    /// Correlation tag echoed by the server in the matching response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn subscribe<K: AsRef<str>>(keys: &[K]) -> Self {
        Self::keys(RequestType::Subscribe, keys)
    }

    #[must_use]
    pub fn unsubscribe<K: AsRef<str>>(keys: &[K]) -> Self {
        Self::keys(RequestType::Unsubscribe, keys)
    }

    fn keys<K: AsRef<str>>(r#type: RequestType, keys: &[K]) -> Self {
        let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        Self {
            r#type,
            param: json!({ "keys": keys }),
            tag: None,
        }
    }
}

/// Invocation of `method` on the endpoint identified by `key`.
///
/// Without a `tag` the call is fire-and-forget.
///
/// ```
/// use gira_endpoint_client::endpoint::CallRequest;
/// use serde_json::{Map, json};
///
/// let mut params = Map::new();
/// params.insert("value".to_owned(), json!("1"));
///
/// let request = CallRequest::builder()
///     .key("CO@1")
///     .method("set")
///     .params(params)
///     .tag("switch-1")
///     .build();
///
/// assert_eq!(request.param(), json!({"key": "CO@1", "method": "set", "value": "1"}));
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct CallRequest {
    /// Endpoint key, e.g. `CO@1`
    #[builder(into)]
    pub key: String,
    #[builder(into)]
    pub method: String,
    /// Extra parameters merged into `param` after `key` and `method`
    #[builder(default)]
    pub params: Map<String, Value>,
    #[builder(into)]
    pub tag: Option<String>,
    /// Overrides the client's default request timeout
    pub timeout: Option<Duration>,
}

impl CallRequest {
    #[must_use]
    pub fn new<K: Into<String>, M: Into<String>>(key: K, method: M) -> Self {
        Self::builder().key(key).method(method).build()
    }

    /// The `param` object: `{key, method, ...params}`.
    ///
    /// Entries of `params` named `key` or `method` take precedence.
    #[must_use]
    pub fn param(&self) -> Value {
        let mut param = Map::with_capacity(self.params.len() + 2);
        param.insert("key".to_owned(), Value::String(self.key.clone()));
        param.insert("method".to_owned(), Value::String(self.method.clone()));
        param.extend(self.params.clone());
        Value::Object(param)
    }

    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope {
            r#type: RequestType::Call,
            param: self.param(),
            tag: self.tag.clone(),
        }
    }
}

/// Read-style query with the same correlation rules as [`CallRequest`].
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct SelectRequest {
    /// Sent verbatim as `param`
    #[builder(into)]
    pub filter: Value,
    #[builder(into)]
    pub tag: Option<String>,
    pub timeout: Option<Duration>,
}

impl SelectRequest {
    #[must_use]
    pub fn new<F: Into<Value>>(filter: F) -> Self {
        Self::builder().filter(filter).build()
    }

    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope {
            r#type: RequestType::Select,
            param: self.filter.clone(),
            tag: self.tag.clone(),
        }
    }
}
