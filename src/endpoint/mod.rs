//! The endpoint protocol: request envelopes, response classification, correlation of
//! tagged requests and normalization of loosely typed values.

pub mod client;
pub mod convert;
pub(crate) mod correlator;
pub mod normalize;
pub mod types;

// Re-export commonly used types
pub use client::Client;
pub use convert::{CallMethod, Decoded, Encoded, ValueType, decode_ack_value, encode_uid_value};
pub use correlator::PendingResponse;
pub use types::request::{CallRequest, Envelope, RequestType, SelectRequest};
pub use types::response::{Update, extract_updates, status_message};

pub use crate::ws::WsError;
