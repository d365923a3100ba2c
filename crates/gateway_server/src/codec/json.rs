//! JSON codec.
//!
//! Envelopes travel as `{"header": {...}, "body": "<base64>"}` in text
//! frames. The body itself is the JSON encoding of the kind's payload.

use super::{decode_payload_with, encode_payload_with, validate_header, BodyFormat, Codec, FrameKind};
use crate::error::CodecError;
use crate::protocol::{Envelope, MessageHeader, Payload, ResponseBody};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(default)]
    header: Option<MessageHeader>,
    #[serde(default)]
    body: String,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    header: &'a MessageHeader,
    body: String,
}

/// Human-readable codec backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl BodyFormat for JsonCodec {
    fn read<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }

    fn write<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn frame_kind(&self) -> FrameKind {
        FrameKind::Text
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let inbound: InboundEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::MalformedEnvelope(format!("Invalid JSON: {e}")))?;
        let header = inbound
            .header
            .ok_or_else(|| CodecError::MalformedEnvelope("missing header".to_string()))?;
        validate_header(&header)?;

        let body = STANDARD
            .decode(inbound.body.as_bytes())
            .map_err(|e| CodecError::MalformedEnvelope(format!("body is not base64: {e}")))?;
        Ok(Envelope::new(header, body))
    }

    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let outbound = OutboundEnvelope {
            header: &envelope.header,
            body: STANDARD.encode(&envelope.body),
        };
        serde_json::to_vec(&outbound).map_err(|e| CodecError::EncodeFailure(e.to_string()))
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
    use crate::protocol::{ChatRequest, MessageKind};

    #[test]
    fn test_missing_header_is_malformed() {
        let codec = JsonCodec::new();
        for raw in [&br#"{"body":""}"#[..], br#"{"header":null}"#, b"not json", b"[]"] {
            assert!(matches!(
                codec.decode_envelope(raw),
                Err(CodecError::MalformedEnvelope(_))
            ));
        }
    }

    #[test]
    fn test_decodes_hand_written_frame() {
        let codec = JsonCodec::new();
        let body = STANDARD.encode(br#"{"chat_type":1,"content":"hi"}"#);
        let frame = format!(
            r#"{{"header":{{"msg_type":6,"msg_id":"m1","user_id":9,"room_id":"r1"}},"body":"{body}"}}"#
        );

        let envelope = codec.decode_envelope(frame.as_bytes()).unwrap();
        assert_eq!(envelope.header.kind(), Some(MessageKind::Chat));
        assert_eq!(envelope.header.user_id, 9);
        assert_eq!(envelope.header.game_id, "");

        match codec.decode_payload(&envelope).unwrap() {
            Payload::Chat(ChatRequest { chat_type, target_id, content }) => {
                assert_eq!(chat_type, 1);
                assert_eq!(target_id, 0);
                assert_eq!(content, "hi");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_bad_base64_body() {
        let codec = JsonCodec::new();
        let frame = br#"{"header":{"msg_type":0},"body":"***"}"#;
        assert!(matches!(
            codec.decode_envelope(frame),
            Err(CodecError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_malformed_payload() {
        let codec = JsonCodec::new();
        let envelope = Envelope::new(
            MessageHeader::new(MessageKind::Chat),
            br#"{"chat_type":"loud"}"#.to_vec(),
        );
        assert!(matches!(
            codec.decode_payload(&envelope),
            Err(CodecError::MalformedPayload { kind: 6, .. })
        ));
    }
}
