use std::collections::{HashMap, VecDeque};
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::time::{DelayQueue, delay_queue};

use super::types::response::{echoed_request, response_tag};
use crate::Result;
use crate::error::Error;
use crate::ws::WsError;

/// Result of a tagged `call` or `select`.
///
/// Resolves with the (normalized) response payload, or fails with a
/// [`crate::error::Protocol`] error response, a [`crate::error::Timeout`], or
/// [`WsError::ConnectionClosed`] when the client shut down first.
#[must_use = "a pending response does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingResponse {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self { rx }
    }
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(WsError::ConnectionClosed.into())))
    }
}

struct PendingRequest {
    reply: oneshot::Sender<Result<Value>>,
    request_key: String,
    deadline: delay_queue::Key,
    timeout: Duration,
}

impl PendingRequest {
    fn settle(self, tag: &str, outcome: Result<Value>) {
        if self.reply.send(outcome).is_err() {
            #[cfg(feature = "tracing")]
            tracing::trace!(%tag, "Response arrived after the caller stopped waiting");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = &tag;
    }
}

/// Tracks tagged requests until their response, error response or timeout.
///
/// Every pending request is also indexed by the canonical JSON of its `param` so that a
/// response echoing `request` instead of `tag` still finds its caller. Requests with
/// identical `param` queue up under one key and are matched oldest first.
#[derive(Default)]
pub(crate) struct Correlator {
    pending: HashMap<String, PendingRequest>,
    request_keys: HashMap<String, VecDeque<String>>,
    deadlines: DelayQueue<String>,
}

impl Correlator {
    /// Registers `tag`; a still pending request with the same tag is replaced and fails.
    pub(crate) fn register(
        &mut self,
        tag: String,
        param: &Value,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        if let Some(replaced) = self.remove(&tag) {
            replaced.settle(
                &tag,
                Err(Error::validation(format!(
                    "tag {tag} was reused before its response arrived"
                ))),
            );
        }

        let request_key = canonical_json(param);
        self.request_keys
            .entry(request_key.clone())
            .or_default()
            .push_back(tag.clone());
        let deadline = self.deadlines.insert(tag.clone(), timeout);
        self.pending.insert(
            tag,
            PendingRequest {
                reply,
                request_key,
                deadline,
                timeout,
            },
        );
    }

    /// Settles the request `payload` answers, by tag first and echoed request second.
    ///
    /// `outcome` is only evaluated when a request matches. Returns the matched tag.
    pub(crate) fn settle<F>(&mut self, payload: &Value, outcome: F) -> Option<String>
    where
        F: FnOnce() -> Result<Value>,
    {
        let tag = self.match_tag(payload)?;
        let request = self.remove(&tag)?;
        request.settle(&tag, outcome());
        Some(tag)
    }

    /// Completes with the tag of the next request whose timeout elapsed.
    ///
    /// Never completes while nothing is pending.
    pub(crate) async fn next_expired(&mut self) -> String {
        if self.deadlines.is_empty() {
            return std::future::pending().await;
        }
        match poll_fn(|cx| self.deadlines.poll_expired(cx)).await {
            Some(expired) => expired.into_inner(),
            None => std::future::pending().await,
        }
    }

    /// Fails `tag` with a timeout; its deadline has already left the queue.
    pub(crate) fn expire(&mut self, tag: &str) {
        if let Some(request) = self.pending.remove(tag) {
            self.unindex(tag, &request.request_key);
            let after = request.timeout;
            request.settle(tag, Err(Error::timeout(tag, after)));
        }
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, tag: &str) -> bool {
        self.pending.contains_key(tag)
    }

    #[cfg(any(test, feature = "tracing"))]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    fn match_tag(&self, payload: &Value) -> Option<String> {
        if let Some(tag) = response_tag(payload)
            && self.pending.contains_key(tag)
        {
            return Some(tag.to_owned());
        }

        let request = echoed_request(payload)?;
        self.request_keys
            .get(&canonical_json(request))?
            .iter()
            .find(|tag| self.pending.contains_key(tag.as_str()))
            .cloned()
    }

    fn remove(&mut self, tag: &str) -> Option<PendingRequest> {
        let request = self.pending.remove(tag)?;
        self.deadlines.remove(&request.deadline);
        self.unindex(tag, &request.request_key);
        Some(request)
    }

    fn unindex(&mut self, tag: &str, request_key: &str) {
        let Some(tags) = self.request_keys.get_mut(request_key) else {
            return;
        };
        tags.retain(|indexed| indexed != tag);
        if tags.is_empty() {
            self.request_keys.remove(request_key);
        }
    }
}

/// JSON text of `value` with object keys sorted at every level.
pub(crate) fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(object) => {
                let mut entries: Vec<_> = object.iter().collect();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(key, value)| (key.clone(), sorted(value)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }

    sorted(value).to_string()
}
