//! Length-delimited envelope codec for byte-stream transports.
//!
//! Wire format: 4-byte big-endian length prefix + serde JSON envelope.
//! The in-process virtual transport bypasses this; socket-based transports
//! frame every request and response through it.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CommunicationError;
use crate::message::{NetworkRequest, NetworkResponse, KEY_REQUEST_ID};
use crate::metadata::MetaData;
use crate::params::DEFAULT_PARAMS;

/// Length prefix size in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// A framed message crossing a byte-stream transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireEnvelope {
    pub kind: EnvelopeKind,
    pub metadata: HashMap<String, String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Request,
    Response,
}

impl WireEnvelope {
    pub fn from_request(request: &NetworkRequest) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            metadata: request.metadata().clone_map(),
            content: request.content().to_vec(),
        }
    }

    pub fn from_response(response: &NetworkResponse) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            metadata: response.metadata().clone_map(),
            content: response.content().to_vec(),
        }
    }

    pub fn into_request(self) -> NetworkRequest {
        let metadata = MetaData::wrap(self.metadata);
        let request_id = metadata.get(KEY_REQUEST_ID).unwrap_or("").to_string();
        NetworkRequest::with_request_id(self.content, metadata, &request_id)
    }

    pub fn into_response(self) -> NetworkResponse {
        NetworkResponse::from_parts(self.content, MetaData::wrap(self.metadata))
    }
}

/// Codec framing `WireEnvelope` values over a byte stream.
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_PARAMS.max_frame_bytes,
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = WireEnvelope;
    type Error = CommunicationError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(CommunicationError::ConnectionBroken {
                connection_id: String::new(),
                reason: format!("frame of {length} bytes exceeds {} limit", self.max_frame_size),
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let frame = src.split_to(length);
        let envelope: WireEnvelope = serde_json::from_slice(&frame)?;
        Ok(Some(envelope))
    }
}

impl Encoder<WireEnvelope> for EnvelopeCodec {
    type Error = CommunicationError;

    fn encode(&mut self, item: WireEnvelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > self.max_frame_size {
            return Err(CommunicationError::ConnectionBroken {
                connection_id: String::new(),
                reason: format!(
                    "frame of {} bytes exceeds {} limit",
                    payload.len(),
                    self.max_frame_size
                ),
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
