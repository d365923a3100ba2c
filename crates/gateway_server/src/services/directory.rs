//! Authentication, user and room lookups.

use crate::error::{AuthError, DirectoryError};
use crate::protocol::{LoginRequest, RoomInfo, RoomListQuery, RoomListResponse, UserId, UserProfile};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Verifies login credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &LoginRequest) -> Result<UserId, AuthError>;
}

/// Looks up user profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn fetch_user_profile(&self, user_id: UserId) -> Result<UserProfile, DirectoryError>;
}

/// Lists joinable rooms.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn list_rooms(&self, query: &RoomListQuery) -> Result<RoomListResponse, DirectoryError>;
}

/// Accepts any non-empty token and trusts the claimed user id.
///
/// Only suitable for local development and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevAuthenticator;

#[async_trait]
impl Authenticator for DevAuthenticator {
    #[instrument(skip(self, request), fields(user_id = request.user_id))]
    async fn authenticate(&self, request: &LoginRequest) -> Result<UserId, AuthError> {
        if request.token.trim().is_empty() {
            return Err(AuthError::InvalidCredentials("empty token".to_string()));
        }
        if request.user_id == 0 {
            return Err(AuthError::InvalidCredentials("missing user id".to_string()));
        }
        debug!("Accepted development login");
        Ok(request.user_id)
    }
}

/// Synthesizes a profile for every non-zero user id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderUserDirectory;

#[async_trait]
impl UserDirectory for PlaceholderUserDirectory {
    async fn fetch_user_profile(&self, user_id: UserId) -> Result<UserProfile, DirectoryError> {
        if user_id == 0 {
            return Err(DirectoryError::NotFound("user 0".to_string()));
        }
        Ok(UserProfile {
            user_id,
            nickname: format!("User_{user_id}"),
            level: 1,
            coins: 1000,
            status: "online".to_string(),
        })
    }
}

/// Default page size when a query leaves it at zero.
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Serves a fixed room list with filtering and pagination.
#[derive(Debug, Clone)]
pub struct StaticRoomDirectory {
    rooms: Vec<RoomInfo>,
}

impl StaticRoomDirectory {
    pub fn new(rooms: Vec<RoomInfo>) -> Self {
        Self { rooms }
    }
}

impl Default for StaticRoomDirectory {
    fn default() -> Self {
        Self::new(vec![
            RoomInfo {
                room_id: "room_001".to_string(),
                room_name: "Texas Hold'em beginner table".to_string(),
                game_type: "texas_poker".to_string(),
                player_count: 5,
                max_players: 9,
                room_status: 1,
                create_time: "2024-01-01 12:00:00".to_string(),
            },
            RoomInfo {
                room_id: "room_002".to_string(),
                room_name: "Niu Niu intermediate table".to_string(),
                game_type: "niu_niu".to_string(),
                player_count: 3,
                max_players: 6,
                room_status: 1,
                create_time: "2024-01-01 12:30:00".to_string(),
            },
        ])
    }
}

#[async_trait]
impl RoomDirectory for StaticRoomDirectory {
    async fn list_rooms(&self, query: &RoomListQuery) -> Result<RoomListResponse, DirectoryError> {
        let matching: Vec<&RoomInfo> = self
            .rooms
            .iter()
            .filter(|room| query.game_type.is_empty() || room.game_type == query.game_type)
            .collect();

        let page = query.page.max(1);
        let page_size = if query.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.page_size
        };
        let start = ((page - 1) as usize).saturating_mul(page_size as usize);

        Ok(RoomListResponse {
            rooms: matching
                .iter()
                .skip(start)
                .take(page_size as usize)
                .map(|room| (*room).clone())
                .collect(),
            total_count: matching.len() as u32,
            page,
            page_size,
        })
    }
}
