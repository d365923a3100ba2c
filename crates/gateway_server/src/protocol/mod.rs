//! Wire protocol types.
//!
//! Every frame on the socket is an [`Envelope`]: a fixed [`MessageHeader`]
//! plus an opaque body whose schema is selected by the header's kind. The
//! body schemas live in [`payloads`].

pub mod payloads;

pub use payloads::*;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Numeric user identity assigned at login.
pub type UserId = u64;

/// Opaque room identity chosen by clients.
pub type RoomId = String;

/// Highest kind value accepted on decode.
pub const MAX_MESSAGE_KIND: u32 = 105;

/// Response kinds are `status + RESPONSE_KIND_OFFSET`.
pub const RESPONSE_KIND_OFFSET: i32 = 1000;

/// Status codes carried in [`ResponseBody::code`].
pub mod status {
    pub const OK: i32 = 0;
    pub const CONNECTION_LIMIT: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const NOT_AUTHENTICATED: i32 = 1003;
    pub const BAD_REQUEST: i32 = 1004;
    pub const NOT_FOUND: i32 = 1005;
    pub const INTERNAL: i32 = 1006;
}

/// Enumerated message kinds.
///
/// Client requests occupy the low range, server pushes start at 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Heartbeat = 0,
    Login = 1,
    Logout = 2,
    JoinRoom = 3,
    LeaveRoom = 4,
    GameAction = 5,
    Chat = 6,
    UserInfoQuery = 7,
    RoomListQuery = 8,
    PushGameState = 100,
    PushRoomInfo = 101,
    PushUserUpdate = 102,
    PushSystemMsg = 103,
    PushChatMsg = 104,
    PushBroadcast = 105,
}

impl MessageKind {
    /// Kinds a client may send.
    pub const CLIENT_KINDS: [MessageKind; 9] = [
        MessageKind::Heartbeat,
        MessageKind::Login,
        MessageKind::Logout,
        MessageKind::JoinRoom,
        MessageKind::LeaveRoom,
        MessageKind::GameAction,
        MessageKind::Chat,
        MessageKind::UserInfoQuery,
        MessageKind::RoomListQuery,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        let kind = match value {
            0 => MessageKind::Heartbeat,
            1 => MessageKind::Login,
            2 => MessageKind::Logout,
            3 => MessageKind::JoinRoom,
            4 => MessageKind::LeaveRoom,
            5 => MessageKind::GameAction,
            6 => MessageKind::Chat,
            7 => MessageKind::UserInfoQuery,
            8 => MessageKind::RoomListQuery,
            100 => MessageKind::PushGameState,
            101 => MessageKind::PushRoomInfo,
            102 => MessageKind::PushUserUpdate,
            103 => MessageKind::PushSystemMsg,
            104 => MessageKind::PushChatMsg,
            105 => MessageKind::PushBroadcast,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Envelope header.
///
/// `msg_type` stays a raw integer so response kinds (`status + 1000`) can be
/// carried in the same structure as request kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageHeader {
    pub msg_type: u32,
    /// Correlation id chosen by the client, echoed in responses.
    pub msg_id: String,
    pub timestamp: i64,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub game_id: String,
}

impl MessageHeader {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            msg_type: kind.as_u32(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_u32(self.msg_type)
    }
}

/// A decoded frame: header plus opaque body bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(header: MessageHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
