use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Stored record of one spin.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub game_id: String,
    pub bet_cents: i64,
    pub win_cents: i64,
    pub symbols: Vec<String>,
    pub created_at: DateTime<Utc>,
}
