//! Frame envelope for the gateway's RPC transport.
//!
//! Every frame is a 4-byte big-endian length prefix followed by one
//! JSON-encoded envelope. Three logical services share the connection,
//! distinguished by the `method` namespace (`crud.*`, `metadata.*`,
//! `rawsql.*`).

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

/// Upper bound for a single frame; large enough for bulk inserts,
/// small enough to bound a misbehaving client.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Metadata key carrying the caller's trace identifier. Logged, never
/// used for correctness decisions.
pub const REQUEST_ID_METADATA: &str = "x-md-global-requestid";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Client-chosen correlation id, echoed in the response.
    pub id: u64,
    /// Namespaced method name, e.g. `crud.Query`.
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// One of the [`crate::code`] constants.
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl RpcResponse {
    pub fn ok(id: u64, body: serde_json::Value) -> Self {
        Self {
            id,
            error: None,
            body,
        }
    }

    pub fn error(id: u64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(RpcError {
                kind: kind.into(),
                message: message.into(),
            }),
            body: serde_json::Value::Null,
        }
    }
}

/// Codec for one connection. Both peers must use the same settings.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn encode_request(req: &RpcRequest) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(req).map(Bytes::from)
}

pub fn encode_response(resp: &RpcResponse) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(resp).map(Bytes::from)
}

pub fn decode_request(frame: &[u8]) -> Result<RpcRequest, serde_json::Error> {
    serde_json::from_slice(frame)
}

pub fn decode_response(frame: &[u8]) -> Result<RpcResponse, serde_json::Error> {
    serde_json::from_slice(frame)
}
