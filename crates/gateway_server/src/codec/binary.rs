//! Compact binary codec.
//!
//! Envelopes and bodies are both bincode encoded and sent as binary frames.

use super::{decode_payload_with, encode_payload_with, validate_header, BodyFormat, Codec, FrameKind};
use crate::error::CodecError;
use crate::protocol::{Envelope, MessageHeader, Payload, ResponseBody};
use bincode::{deserialize, serialize};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Deserialize)]
struct InboundEnvelope {
    header: Option<MessageHeader>,
    body: Vec<u8>,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    header: Option<&'a MessageHeader>,
    body: &'a [u8],
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub fn new() -> Self {
        Self
    }
}

impl BodyFormat for BinaryCodec {
    fn read<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, String> {
        deserialize(bytes).map_err(|e| e.to_string())
    }

    fn write<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, String> {
        serialize(value).map_err(|e| e.to_string())
    }
}

impl Codec for BinaryCodec {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn frame_kind(&self) -> FrameKind {
        FrameKind::Binary
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let inbound: InboundEnvelope =
            deserialize(bytes).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))?;
        let header = inbound
            .header
            .ok_or_else(|| CodecError::MalformedEnvelope("missing header".to_string()))?;
        validate_header(&header)?;
        Ok(Envelope::new(header, inbound.body))
    }

    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let outbound = OutboundEnvelope {
            header: Some(&envelope.header),
            body: &envelope.body,
        };
        serialize(&outbound).map_err(|e| CodecError::EncodeFailure(e.to_string()))
    }

    fn decode_payload(&self, envelope: &Envelope) -> Result<Payload, CodecError> {
        decode_payload_with(self, envelope)
    }

    fn encode_payload(&self, kind: u32, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        encode_payload_with(self, kind, payload)
    }

    fn encode_response_body(&self, body: &ResponseBody) -> Result<Vec<u8>, CodecError> {
        self.write(body).map_err(CodecError::EncodeFailure)
    }

    fn decode_response_body(&self, bytes: &[u8]) -> Result<ResponseBody, CodecError> {
        self.read(bytes)
            .map_err(|e| CodecError::MalformedEnvelope(format!("response body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_header_is_malformed() {
        let codec = BinaryCodec::new();
        let bytes = serialize(&OutboundEnvelope { header: None, body: &[1, 2, 3] }).unwrap();
        assert!(matches!(
            codec.decode_envelope(&bytes),
            Err(CodecError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        let codec = BinaryCodec::new();
        let envelope = Envelope::new(MessageHeader::default(), vec![9; 16]);
        let bytes = codec.encode_envelope(&envelope).unwrap();
        assert!(matches!(
            codec.decode_envelope(&bytes[..bytes.len() / 2]),
            Err(CodecError::MalformedEnvelope(_))
        ));
    }
}
