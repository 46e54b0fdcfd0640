use crate::database::sqlite::SqliteDatabase;
use crate::errors::Result;
use crate::models::transaction::Transaction;
use crate::models::user::UserProfile;
use crate::services::audit;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const MAX_HISTORY: i64 = 200;

/// Profile and wallet reads. Balance changes go through the ledger methods
/// on the database so each one lands with its transaction row.
pub struct UserService {
    pub db: Arc<SqliteDatabase>,
}

impl UserService {
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self { db }
    }

    pub async fn profile(&self, user_id: &Uuid) -> Result<UserProfile> {
        Ok(self.db.get_user_by_id(user_id).await?.into())
    }

    pub async fn balance_cents(&self, user_id: &Uuid) -> Result<i64> {
        Ok(self.db.get_user_by_id(user_id).await?.balance_cents)
    }

    pub async fn transactions(&self, user_id: &Uuid, limit: Option<i64>) -> Result<Vec<Transaction>> {
        let limit = limit.unwrap_or(50).clamp(1, MAX_HISTORY);
        self.db.get_transactions(user_id, limit).await
    }

    pub async fn promote_admin(&self, email: &str) -> Result<()> {
        let email = email.trim().to_lowercase();
        self.db.set_admin(&email, true).await?;
        if let Some(user) = self.db.get_user_by_email(&email).await? {
            audit::record(&self.db, user.id, "ADMIN_GRANTED", json!({ "email": email })).await;
        }
        info!(action = "admin_granted", email = %email);
        Ok(())
    }
}
