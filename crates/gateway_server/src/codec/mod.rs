//! Protocol codecs.
//!
//! A [`Codec`] turns raw frames into [`Envelope`]s and envelope bodies into
//! typed [`Payload`]s. Two implementations share the contract: [`JsonCodec`]
//! for text frames and [`BinaryCodec`] for binary frames. The format is picked
//! once at startup with [`create_codec`]; nothing downstream branches on it.
//!
//! Payload dispatch goes through the fixed kind table in
//! [`decode_payload_with`] and [`encode_payload_with`], so adding a kind is a
//! change to those two matches and nothing else.

pub mod binary;
pub mod json;

pub use binary::BinaryCodec;
pub use json::JsonCodec;

use crate::config::WireFormat;
use crate::error::CodecError;
use crate::protocol::{
    Envelope, MessageHeader, MessageKind, Payload, ResponseBody, ResponseData, RoomId, UserId,
    MAX_MESSAGE_KIND, RESPONSE_KIND_OFFSET,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// WebSocket frame type a codec produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// Encodes and decodes the gateway wire protocol.
pub trait Codec: Send + Sync + Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Frame type outbound bytes should be sent as.
    fn frame_kind(&self) -> FrameKind;

    /// Parses a frame. Fails if the header is missing or its kind is outside
    /// `0..=105`.
    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;

    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Decodes the body according to the envelope's kind.
    fn decode_payload(&self, envelope: &Envelope) -> Result<Payload, CodecError>;

    /// Encodes a body for `kind`. Fails with `UnsupportedKind` when the kind
    /// is unknown or the payload does not belong to it.
    fn encode_payload(&self, kind: u32, payload: &Payload) -> Result<Vec<u8>, CodecError>;

    fn encode_response_body(&self, body: &ResponseBody) -> Result<Vec<u8>, CodecError>;

    fn decode_response_body(&self, bytes: &[u8]) -> Result<ResponseBody, CodecError>;

    /// Builds the response to `request`.
    ///
    /// The response kind is `status + 1000`. Correlation id, timestamp and
    /// the user, room and game ids are copied from the request.
    fn build_response(
        &self,
        request: &Envelope,
        status: i32,
        message: &str,
        data: Option<ResponseData>,
    ) -> Result<Envelope, CodecError> {
        let body = self.encode_response_body(&ResponseBody {
            code: status,
            message: message.to_string(),
            data,
        })?;
        let header = MessageHeader {
            msg_type: (status + RESPONSE_KIND_OFFSET) as u32,
            ..request.header.clone()
        };
        Ok(Envelope::new(header, body))
    }

    /// Builds a server-initiated envelope. The timestamp is left at zero for
    /// the caller to fill.
    fn build_push(
        &self,
        kind: MessageKind,
        user_id: UserId,
        room_id: &str,
        game_id: &str,
        payload: &Payload,
    ) -> Result<Envelope, CodecError> {
        let body = self.encode_payload(kind.as_u32(), payload)?;
        let header = MessageHeader {
            msg_type: kind.as_u32(),
            msg_id: String::new(),
            timestamp: 0,
            user_id,
            room_id: RoomId::from(room_id),
            game_id: game_id.to_string(),
        };
        Ok(Envelope::new(header, body))
    }
}

/// Creates the codec for the configured wire format.
pub fn create_codec(format: WireFormat) -> Arc<dyn Codec> {
    match format {
        WireFormat::Json => Arc::new(JsonCodec::new()),
        WireFormat::Binary => Arc::new(BinaryCodec::new()),
    }
}

/// Serializer used for bodies inside an envelope.
pub(crate) trait BodyFormat {
    fn read<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, String>;
    fn write<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, String>;
}

pub(crate) fn validate_header(header: &MessageHeader) -> Result<(), CodecError> {
    if header.msg_type > MAX_MESSAGE_KIND {
        return Err(CodecError::MalformedEnvelope(format!(
            "message kind {} outside 0..={}",
            header.msg_type, MAX_MESSAGE_KIND
        )));
    }
    Ok(())
}

fn read_body<T, F>(format: &F, kind: u32, body: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned + Default,
    F: BodyFormat,
{
    if body.is_empty() {
        return Ok(T::default());
    }
    format
        .read(body)
        .map_err(|reason| CodecError::MalformedPayload { kind, reason })
}

pub(crate) fn decode_payload_with<F: BodyFormat>(
    format: &F,
    envelope: &Envelope,
) -> Result<Payload, CodecError> {
    let raw = envelope.header.msg_type;
    let kind = MessageKind::from_u32(raw).ok_or(CodecError::UnknownKind(raw))?;
    let body = envelope.body.as_slice();

    let payload = match kind {
        MessageKind::Heartbeat => Payload::Heartbeat(read_body(format, raw, body)?),
        MessageKind::Login => Payload::Login(read_body(format, raw, body)?),
        MessageKind::Logout => Payload::Logout(read_body(format, raw, body)?),
        MessageKind::JoinRoom => Payload::JoinRoom(read_body(format, raw, body)?),
        MessageKind::LeaveRoom => Payload::LeaveRoom(read_body(format, raw, body)?),
        MessageKind::GameAction => Payload::GameAction(read_body(format, raw, body)?),
        MessageKind::Chat => Payload::Chat(read_body(format, raw, body)?),
        MessageKind::UserInfoQuery => Payload::UserInfoQuery(read_body(format, raw, body)?),
        MessageKind::RoomListQuery => Payload::RoomListQuery(read_body(format, raw, body)?),
        MessageKind::PushGameState => Payload::GameState(read_body(format, raw, body)?),
        MessageKind::PushRoomInfo => Payload::RoomInfo(read_body(format, raw, body)?),
        MessageKind::PushUserUpdate => Payload::UserUpdate(read_body(format, raw, body)?),
        MessageKind::PushSystemMsg => Payload::SystemMessage(read_body(format, raw, body)?),
        MessageKind::PushChatMsg => Payload::ChatMessage(read_body(format, raw, body)?),
        MessageKind::PushBroadcast => Payload::Broadcast(read_body(format, raw, body)?),
    };
    Ok(payload)
}

pub(crate) fn encode_payload_with<F: BodyFormat>(
    format: &F,
    kind: u32,
    payload: &Payload,
) -> Result<Vec<u8>, CodecError> {
    let expected = MessageKind::from_u32(kind).ok_or(CodecError::UnsupportedKind(kind))?;
    if payload.kind() != expected {
        return Err(CodecError::UnsupportedKind(kind));
    }

    let encoded = match payload {
        Payload::Heartbeat(p) => format.write(p),
        Payload::Login(p) => format.write(p),
        Payload::Logout(p) => format.write(p),
        Payload::JoinRoom(p) => format.write(p),
        Payload::LeaveRoom(p) => format.write(p),
        Payload::GameAction(p) => format.write(p),
        Payload::Chat(p) => format.write(p),
        Payload::UserInfoQuery(p) => format.write(p),
        Payload::RoomListQuery(p) => format.write(p),
        Payload::GameState(p) => format.write(p),
        Payload::RoomInfo(p) => format.write(p),
        Payload::UserUpdate(p) => format.write(p),
        Payload::SystemMessage(p) => format.write(p),
        Payload::ChatMessage(p) => format.write(p),
        Payload::Broadcast(p) => format.write(p),
    };
    encoded.map_err(CodecError::EncodeFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{status, JoinRoomRequest, UserUpdatePush};

    fn codecs() -> Vec<Arc<dyn Codec>> {
        vec![create_codec(WireFormat::Json), create_codec(WireFormat::Binary)]
    }

    fn sample_request() -> Envelope {
        Envelope::new(
            MessageHeader {
                msg_type: MessageKind::JoinRoom.as_u32(),
                msg_id: "req-42".to_string(),
                timestamp: 1_700_000_000_123,
                user_id: 7,
                room_id: "r1".to_string(),
                game_id: "poker".to_string(),
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_envelope_round_trip() {
        for codec in codecs() {
            let mut envelope = sample_request();
            envelope.body = codec
                .encode_payload(
                    MessageKind::JoinRoom.as_u32(),
                    &Payload::JoinRoom(JoinRoomRequest { room_id: "r1".into() }),
                )
                .unwrap();

            let bytes = codec.encode_envelope(&envelope).unwrap();
            let decoded = codec.decode_envelope(&bytes).unwrap();
            assert_eq!(decoded, envelope, "codec {}", codec.name());

            let payload = codec.decode_payload(&decoded).unwrap();
            assert_eq!(
                payload,
                Payload::JoinRoom(JoinRoomRequest { room_id: "r1".into() })
            );
        }
    }

    #[test]
    fn test_decode_rejects_out_of_range_kind() {
        for codec in codecs() {
            let mut envelope = sample_request();
            envelope.header.msg_type = 106;
            let bytes = codec.encode_envelope(&envelope).unwrap();
            assert!(matches!(
                codec.decode_envelope(&bytes),
                Err(CodecError::MalformedEnvelope(_))
            ));
        }
    }

    #[test]
    fn test_decode_payload_unknown_kind() {
        for codec in codecs() {
            let mut envelope = sample_request();
            envelope.header.msg_type = 50;
            assert_eq!(
                codec.decode_payload(&envelope),
                Err(CodecError::UnknownKind(50))
            );
        }
    }

    #[test]
    fn test_encode_payload_kind_mismatch() {
        for codec in codecs() {
            let result = codec.encode_payload(
                MessageKind::Chat.as_u32(),
                &Payload::JoinRoom(JoinRoomRequest::default()),
            );
            assert_eq!(result, Err(CodecError::UnsupportedKind(6)));
            assert_eq!(
                codec.encode_payload(42, &Payload::JoinRoom(JoinRoomRequest::default())),
                Err(CodecError::UnsupportedKind(42))
            );
        }
    }

    #[test]
    fn test_empty_body_decodes_to_default() {
        for codec in codecs() {
            let envelope = sample_request();
            assert_eq!(
                codec.decode_payload(&envelope).unwrap(),
                Payload::JoinRoom(JoinRoomRequest::default())
            );
        }
    }

    #[test]
    fn test_build_response_copies_header() {
        for codec in codecs() {
            let request = sample_request();
            let response = codec
                .build_response(
                    &request,
                    status::OK,
                    "Joined room successfully",
                    Some(ResponseData::Room { room_id: "r1".into() }),
                )
                .unwrap();

            assert_eq!(response.header.msg_type, 1000);
            assert_eq!(response.header.msg_id, "req-42");
            assert_eq!(response.header.timestamp, request.header.timestamp);
            assert_eq!(response.header.user_id, 7);
            assert_eq!(response.header.room_id, "r1");
            assert_eq!(response.header.game_id, "poker");

            let body = codec.decode_response_body(&response.body).unwrap();
            assert_eq!(body.code, status::OK);
            assert_eq!(body.data, Some(ResponseData::Room { room_id: "r1".into() }));

            let limited = codec
                .build_response(&request, status::CONNECTION_LIMIT, "Connection limit reached", None)
                .unwrap();
            assert_eq!(limited.header.msg_type, 2001);
        }
    }

    #[test]
    fn test_build_push() {
        for codec in codecs() {
            let payload = Payload::UserUpdate(UserUpdatePush {
                user_id: 3,
                status: 1,
                location: "r1".into(),
            });
            let push = codec
                .build_push(MessageKind::PushUserUpdate, 3, "r1", "", &payload)
                .unwrap();
            assert_eq!(push.header.msg_type, 102);
            assert_eq!(push.header.timestamp, 0);
            assert!(push.header.msg_id.is_empty());
            assert_eq!(codec.decode_payload(&push).unwrap(), payload);
        }
    }
}
