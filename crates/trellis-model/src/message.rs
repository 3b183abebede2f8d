//! Request/response message model.
//!
//! Both sides carry raw content bytes plus a string/string metadata map.
//! The request id and the response result code live in the metadata so they
//! survive any transport unchanged. Protocol failures are result codes, not
//! errors -- they have to cross the wire.

use serde::{de::DeserializeOwned, Serialize};

use crate::ids;
use crate::metadata::MetaData;

/// Metadata key carrying the correlation id on requests and responses.
pub const KEY_REQUEST_ID: &str = "requestid";

/// Response-specific metadata key for the result code.
pub const KEY_RESULT_CODE: &str = "response.resultCode";

/// Numeric result codes carried in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultCode {
    Undefined = 0,
    Success = 1,
    NoMatchingHandler = 101,
    ExceptionAtDestination = 102,
    ExceptionWhileForwarding = 103,
}

impl ResultCode {
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => ResultCode::Success,
            101 => ResultCode::NoMatchingHandler,
            102 => ResultCode::ExceptionAtDestination,
            103 => ResultCode::ExceptionWhileForwarding,
            _ => ResultCode::Undefined,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// An outbound request: content bytes, metadata, and a correlation id.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    content: Vec<u8>,
    metadata: MetaData,
}

impl NetworkRequest {
    /// Create a request with a fresh random request id.
    pub fn new(content: Vec<u8>, mut metadata: MetaData) -> Self {
        if metadata.get(KEY_REQUEST_ID).is_none() {
            metadata.set_value(KEY_REQUEST_ID, ids::random_id());
        }
        Self { content, metadata }
    }

    /// Reconstruct a request with an existing id (wire decoding, cloning).
    pub fn with_request_id(content: Vec<u8>, mut metadata: MetaData, request_id: &str) -> Self {
        metadata.set_value(KEY_REQUEST_ID, request_id);
        Self { content, metadata }
    }

    /// Serialize a typed payload into a new request.
    pub fn from_payload<T: Serialize>(
        payload: &T,
        metadata: MetaData,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(payload)?, metadata))
    }

    pub fn request_id(&self) -> &str {
        self.metadata
            .get(KEY_REQUEST_ID)
            .expect("request id is set at construction")
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetaData {
        &mut self.metadata
    }

    pub fn deserialize_content<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.content)
    }

    /// Detached copy with fresh content bytes and a fresh metadata map.
    /// This is the substitute for a real serialization boundary in the
    /// in-process transport.
    pub fn detached_clone(&self) -> Self {
        Self {
            content: self.content.clone(),
            metadata: MetaData::wrap(self.metadata.clone_map()),
        }
    }

    /// Copy for the next forwarding hop: same content and metadata, but a
    /// fresh request id -- every outbound call gets its own correlation id,
    /// and the forwarder remaps the eventual response onto the original.
    pub fn forwarded_copy(&self) -> Self {
        let mut map = self.metadata.clone_map();
        map.remove(KEY_REQUEST_ID);
        Self::new(self.content.clone(), MetaData::wrap(map))
    }
}

/// A response to a request: content bytes plus metadata carrying the
/// originating request id and a result code.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    content: Vec<u8>,
    metadata: MetaData,
}

impl NetworkResponse {
    pub fn new(content: Vec<u8>, request_id: &str, code: ResultCode) -> Self {
        let mut metadata = MetaData::empty();
        metadata.set_value(KEY_REQUEST_ID, request_id);
        metadata.set_value(KEY_RESULT_CODE, code.as_i32().to_string());
        Self { content, metadata }
    }

    /// Reconstruct from raw parts (wire decoding, cloning).
    pub fn from_parts(content: Vec<u8>, metadata: MetaData) -> Self {
        Self { content, metadata }
    }

    /// Success response carrying the given body.
    pub fn success(request: &NetworkRequest, body: Vec<u8>) -> Self {
        Self::new(body, request.request_id(), ResultCode::Success)
    }

    /// Success response with a serialized typed body.
    pub fn success_payload<T: Serialize>(
        request: &NetworkRequest,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::success(request, serde_json::to_vec(payload)?))
    }

    /// Failure: no request handler accepted the message.
    pub fn no_matching_handler(request: &NetworkRequest) -> Self {
        Self::new(
            Vec::new(),
            request.request_id(),
            ResultCode::NoMatchingHandler,
        )
    }

    /// Failure: the handler at the final destination failed.
    pub fn exception_at_destination(request: &NetworkRequest, cause: &str) -> Self {
        Self::new(
            cause.as_bytes().to_vec(),
            request.request_id(),
            ResultCode::ExceptionAtDestination,
        )
    }

    /// Failure: forwarding towards the destination failed at `event_node`.
    pub fn exception_while_forwarding(
        request: &NetworkRequest,
        event_node: &str,
        cause: &str,
    ) -> Self {
        let body = format!("at '{event_node}': {cause}");
        Self::new(
            body.into_bytes(),
            request.request_id(),
            ResultCode::ExceptionWhileForwarding,
        )
    }

    pub fn request_id(&self) -> &str {
        self.metadata.get(KEY_REQUEST_ID).unwrap_or("")
    }

    pub fn result_code(&self) -> ResultCode {
        let code = self
            .metadata
            .get(KEY_RESULT_CODE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        ResultCode::from_i32(code)
    }

    pub fn is_success(&self) -> bool {
        self.result_code() == ResultCode::Success
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    pub fn deserialize_content<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.content)
    }

    /// Detached copy; see `NetworkRequest::detached_clone`.
    pub fn detached_clone(&self) -> Self {
        Self {
            content: self.content.clone(),
            metadata: MetaData::wrap(self.metadata.clone_map()),
        }
    }
}
