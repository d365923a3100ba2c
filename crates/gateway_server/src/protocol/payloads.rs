//! Typed message bodies, one per message kind.
//!
//! Every struct derives `Default` so an empty body decodes to the zero value
//! of its kind. Field order matters for the binary codec and must not change
//! without bumping the protocol.

use super::{MessageKind, RoomId, UserId};
use serde::{Deserialize, Serialize};

/// Heartbeat request and acknowledgement. The ack echoes `client_time`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heartbeat {
    pub client_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub token: String,
    /// Identity the client claims; verified by the authenticator.
    pub user_id: UserId,
    pub device_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRoomRequest {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaveRoomRequest {
    pub room_id: RoomId,
}

/// Game specific action. The gateway logs and acknowledges it without
/// interpreting `action_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameActionRequest {
    pub action_type: String,
    pub action_data: String,
}

/// Chat scope values for [`ChatRequest::chat_type`].
pub mod chat_scope {
    pub const GLOBAL: i32 = 0;
    pub const ROOM: i32 = 1;
    pub const DIRECT: i32 = 2;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub chat_type: i32,
    /// Recipient for direct chat, ignored otherwise.
    pub target_id: UserId,
    pub content: String,
}

/// `user_id == 0` queries the caller's own profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfoQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomListQuery {
    pub page: u32,
    pub page_size: u32,
    /// Empty matches every game type.
    pub game_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameStatePush {
    pub game_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomInfoPush {
    pub room: RoomInfo,
}

/// `status` is 1 when the user entered `location`, 0 when they left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserUpdatePush {
    pub user_id: UserId,
    pub status: i32,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemMessagePush {
    pub level: i32,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessagePush {
    pub sender_id: UserId,
    pub sender_name: String,
    pub chat_type: i32,
    pub target_id: UserId,
    pub content: String,
    pub send_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastPush {
    pub content: String,
}

/// Decoded body of any known kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Heartbeat(Heartbeat),
    Login(LoginRequest),
    Logout(LogoutRequest),
    JoinRoom(JoinRoomRequest),
    LeaveRoom(LeaveRoomRequest),
    GameAction(GameActionRequest),
    Chat(ChatRequest),
    UserInfoQuery(UserInfoQuery),
    RoomListQuery(RoomListQuery),
    GameState(GameStatePush),
    RoomInfo(RoomInfoPush),
    UserUpdate(UserUpdatePush),
    SystemMessage(SystemMessagePush),
    ChatMessage(ChatMessagePush),
    Broadcast(BroadcastPush),
}

impl Payload {
    /// The kind this body belongs to.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Heartbeat(_) => MessageKind::Heartbeat,
            Payload::Login(_) => MessageKind::Login,
            Payload::Logout(_) => MessageKind::Logout,
            Payload::JoinRoom(_) => MessageKind::JoinRoom,
            Payload::LeaveRoom(_) => MessageKind::LeaveRoom,
            Payload::GameAction(_) => MessageKind::GameAction,
            Payload::Chat(_) => MessageKind::Chat,
            Payload::UserInfoQuery(_) => MessageKind::UserInfoQuery,
            Payload::RoomListQuery(_) => MessageKind::RoomListQuery,
            Payload::GameState(_) => MessageKind::PushGameState,
            Payload::RoomInfo(_) => MessageKind::PushRoomInfo,
            Payload::UserUpdate(_) => MessageKind::PushUserUpdate,
            Payload::SystemMessage(_) => MessageKind::PushSystemMsg,
            Payload::ChatMessage(_) => MessageKind::PushChatMsg,
            Payload::Broadcast(_) => MessageKind::PushBroadcast,
        }
    }
}

/// Profile returned by the user directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub user_id: UserId,
    pub nickname: String,
    pub level: u32,
    pub coins: i64,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub room_name: String,
    pub game_type: String,
    pub player_count: u32,
    pub max_players: u32,
    pub room_status: i32,
    pub create_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomInfo>,
    pub total_count: u32,
    pub page: u32,
    pub page_size: u32,
}

/// Kind specific data attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseData {
    Login { user_id: UserId },
    Room { room_id: RoomId },
    UserInfo(UserProfile),
    RoomList(RoomListResponse),
    Error { error: String, details: String },
}

/// Body of every response envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub code: i32,
    pub message: String,
    pub data: Option<ResponseData>,
}
