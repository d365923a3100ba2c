//! Built-in handler for every client message kind.

use super::router::MessageHandler;
use crate::connection::{Connection, ConnectionRegistry};
use crate::dispatch::Broadcaster;
use crate::error::{CodecError, ServerError};
use crate::protocol::{
    chat_scope, current_timestamp, status, ChatMessagePush, ChatRequest, Envelope,
    GameActionRequest, JoinRoomRequest, LeaveRoomRequest, LoginRequest, LogoutRequest,
    MessageKind, Payload, ResponseData, RoomListQuery, UserId, UserInfoQuery, UserProfile,
    UserUpdatePush,
};
use crate::services::Services;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Presence values carried by `PushUserUpdate`.
const PRESENCE_OFFLINE: i32 = 0;
const PRESENCE_ONLINE: i32 = 1;

pub struct GatewayHandler {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    services: Services,
    profile_ttl: Duration,
}

impl GatewayHandler {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        services: Services,
        profile_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            services,
            profile_ttl,
        }
    }

    /// User bound to the connection, or the id the client put in its header.
    async fn acting_user(&self, connection: &Connection, envelope: &Envelope) -> UserId {
        self.registry
            .lookup_by_connection(connection.id())
            .await
            .map(|info| info.user_id)
            .unwrap_or(envelope.header.user_id)
    }

    async fn bound_user(&self, connection: &Connection) -> Result<UserId, ServerError> {
        self.registry
            .lookup_by_connection(connection.id())
            .await
            .map(|info| info.user_id)
            .ok_or(ServerError::NotAuthenticated)
    }

    fn push(
        &self,
        kind: MessageKind,
        user_id: UserId,
        room_id: &str,
        payload: &Payload,
    ) -> Result<Envelope, ServerError> {
        let mut envelope = self
            .broadcaster
            .codec()
            .build_push(kind, user_id, room_id, "", payload)?;
        envelope.header.timestamp = current_timestamp();
        Ok(envelope)
    }

    fn presence_update(
        &self,
        user_id: UserId,
        status: i32,
        room_id: &str,
        location: &str,
    ) -> Result<Envelope, ServerError> {
        self.push(
            MessageKind::PushUserUpdate,
            user_id,
            room_id,
            &Payload::UserUpdate(UserUpdatePush {
                user_id,
                status,
                location: location.to_string(),
            }),
        )
    }

    async fn on_heartbeat(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        client_time: i64,
    ) -> Result<(), ServerError> {
        if !self.registry.touch(connection.id()).await {
            debug!("Heartbeat from unregistered connection {}", connection.id());
        }
        self.broadcaster
            .send_heartbeat_ack(connection, envelope, client_time)
            .await
    }

    async fn on_login(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        request: LoginRequest,
    ) -> Result<(), ServerError> {
        let user_id = self.services.authenticator.authenticate(&request).await?;
        if self.registry.add(connection.clone(), user_id).await.is_none() {
            return Err(ServerError::CapacityExceeded);
        }

        info!(
            "🔑 User {} logged in on connection {} (device '{}')",
            user_id,
            connection.id(),
            request.device_id
        );
        self.broadcaster
            .send_response(
                connection,
                envelope,
                status::OK,
                "Login successful",
                Some(ResponseData::Login { user_id }),
            )
            .await
    }

    async fn on_logout(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        request: LogoutRequest,
    ) -> Result<(), ServerError> {
        if let Some(info) = self.registry.remove(connection.id()).await {
            info!(
                "👋 User {} logged out from connection {} ({})",
                info.user_id,
                connection.id(),
                if request.reason.is_empty() { "no reason" } else { request.reason.as_str() }
            );
            if let Some(room_id) = info.room_id {
                let update =
                    self.presence_update(info.user_id, PRESENCE_OFFLINE, &room_id, "")?;
                self.broadcaster.to_room(&room_id, update, None);
            }
        }
        self.broadcaster
            .send_ok(connection, envelope, "Logout successful")
            .await
    }

    async fn on_join_room(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        request: JoinRoomRequest,
    ) -> Result<(), ServerError> {
        let user_id = self.bound_user(connection).await?;
        if request.room_id.is_empty() {
            return Err(CodecError::MalformedPayload {
                kind: MessageKind::JoinRoom.as_u32(),
                reason: "room_id is empty".to_string(),
            }
            .into());
        }

        let left = self.registry.join_room(connection.id(), &request.room_id).await?;
        if let Some(left) = &left {
            let update = self.presence_update(user_id, PRESENCE_OFFLINE, left, "")?;
            self.broadcaster.to_room(left, update, None);
        }
        info!("🚪 User {} joined room {}", user_id, request.room_id);

        self.broadcaster
            .send_response(
                connection,
                envelope,
                status::OK,
                "Joined room",
                Some(ResponseData::Room {
                    room_id: request.room_id.clone(),
                }),
            )
            .await?;

        let update = self.presence_update(
            user_id,
            PRESENCE_ONLINE,
            &request.room_id,
            &request.room_id,
        )?;
        self.broadcaster.to_room(&request.room_id, update, Some(user_id));
        Ok(())
    }

    async fn on_leave_room(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        request: LeaveRoomRequest,
    ) -> Result<(), ServerError> {
        let user_id = self.bound_user(connection).await?;
        let left = self.registry.leave_room(connection.id()).await;
        if let Some(room_id) = &left {
            if !request.room_id.is_empty() && &request.room_id != room_id {
                debug!(
                    "User {} asked to leave {} but was in {}",
                    user_id, request.room_id, room_id
                );
            }
            info!("🚶 User {} left room {}", user_id, room_id);
        }

        let room_id = left.clone().unwrap_or(request.room_id);
        self.broadcaster
            .send_response(
                connection,
                envelope,
                status::OK,
                "Left room",
                Some(ResponseData::Room {
                    room_id: room_id.clone(),
                }),
            )
            .await?;

        if let Some(left) = left {
            let update = self.presence_update(user_id, PRESENCE_OFFLINE, &left, "")?;
            self.broadcaster.to_room(&left, update, None);
        }
        Ok(())
    }

    async fn on_game_action(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        request: GameActionRequest,
    ) -> Result<(), ServerError> {
        let user_id = self.acting_user(connection, envelope).await;
        info!(
            "🎮 Game action '{}' from user {} in room '{}' ({} bytes of data)",
            request.action_type,
            user_id,
            envelope.header.room_id,
            request.action_data.len()
        );
        self.broadcaster
            .send_ok(connection, envelope, "Game action processed")
            .await
    }

    async fn on_chat(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        request: ChatRequest,
    ) -> Result<(), ServerError> {
        let sender_id = self.bound_user(connection).await?;

        let room_id = match request.chat_type {
            chat_scope::ROOM if !envelope.header.room_id.is_empty() => {
                envelope.header.room_id.clone()
            }
            chat_scope::ROOM => self
                .registry
                .lookup_by_connection(connection.id())
                .await
                .and_then(|info| info.room_id)
                .ok_or_else(|| CodecError::MalformedPayload {
                    kind: MessageKind::Chat.as_u32(),
                    reason: "room chat without a room".to_string(),
                })?,
            chat_scope::GLOBAL | chat_scope::DIRECT => String::new(),
            other => {
                return Err(CodecError::MalformedPayload {
                    kind: MessageKind::Chat.as_u32(),
                    reason: format!("unknown chat scope {other}"),
                }
                .into())
            }
        };

        let push = self.push(
            MessageKind::PushChatMsg,
            sender_id,
            &room_id,
            &Payload::ChatMessage(ChatMessagePush {
                sender_id,
                sender_name: format!("User_{sender_id}"),
                chat_type: request.chat_type,
                target_id: request.target_id,
                content: request.content,
                send_time: envelope.header.timestamp,
            }),
        )?;

        let queued = match request.chat_type {
            chat_scope::GLOBAL => self.broadcaster.to_all(push),
            chat_scope::ROOM => self.broadcaster.to_room(&room_id, push, None),
            _ => self.broadcaster.to_user(request.target_id, push),
        };
        if !queued {
            warn!("Chat message from user {} was not queued", sender_id);
        }

        self.broadcaster
            .send_ok(connection, envelope, "Chat message sent")
            .await
    }

    async fn on_user_info(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        query: UserInfoQuery,
    ) -> Result<(), ServerError> {
        let user_id = match query.user_id {
            0 => self.acting_user(connection, envelope).await,
            id => id,
        };
        let profile = self.load_profile(user_id).await?;
        self.broadcaster
            .send_response(
                connection,
                envelope,
                status::OK,
                "User info",
                Some(ResponseData::UserInfo(profile)),
            )
            .await
    }

    /// Profile lookup behind the shared cache.
    async fn load_profile(&self, user_id: UserId) -> Result<UserProfile, ServerError> {
        let users = self.services.users.clone();
        let blob = self
            .services
            .cache
            .get_or_load(
                &format!("user_profile:{user_id}"),
                Some(self.profile_ttl),
                Box::pin(async move {
                    let profile = users.fetch_user_profile(user_id).await?;
                    serde_json::to_vec(&profile).map_err(|e| ServerError::Internal(e.to_string()))
                }),
            )
            .await?;
        serde_json::from_slice(&blob).map_err(|e| ServerError::Internal(e.to_string()))
    }

    async fn on_room_list(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        query: RoomListQuery,
    ) -> Result<(), ServerError> {
        let rooms = self.services.rooms.list_rooms(&query).await?;
        self.broadcaster
            .send_response(
                connection,
                envelope,
                status::OK,
                "Room list",
                Some(ResponseData::RoomList(rooms)),
            )
            .await
    }
}

#[async_trait]
impl MessageHandler for GatewayHandler {
    async fn handle(
        &self,
        connection: &Arc<Connection>,
        envelope: &Envelope,
        payload: Payload,
    ) -> Result<(), ServerError> {
        match payload {
            Payload::Heartbeat(heartbeat) => {
                self.on_heartbeat(connection, envelope, heartbeat.client_time)
                    .await
            }
            Payload::Login(request) => self.on_login(connection, envelope, request).await,
            Payload::Logout(request) => self.on_logout(connection, envelope, request).await,
            Payload::JoinRoom(request) => self.on_join_room(connection, envelope, request).await,
            Payload::LeaveRoom(request) => {
                self.on_leave_room(connection, envelope, request).await
            }
            Payload::GameAction(request) => {
                self.on_game_action(connection, envelope, request).await
            }
            Payload::Chat(request) => self.on_chat(connection, envelope, request).await,
            Payload::UserInfoQuery(query) => self.on_user_info(connection, envelope, query).await,
            Payload::RoomListQuery(query) => self.on_room_list(connection, envelope, query).await,
            other => Err(CodecError::UnsupportedKind(other.kind().as_u32()).into()),
        }
    }
}
