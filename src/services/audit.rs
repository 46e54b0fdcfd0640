use crate::database::sqlite::SqliteDatabase;
use crate::models::audit::AuditEntry;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

/// Writes an audit row. A failed write is logged and never fails the caller.
pub async fn record(db: &SqliteDatabase, user_id: Uuid, event_type: &str, event_data: serde_json::Value) {
    let entry = AuditEntry {
        id: Uuid::new_v4(),
        user_id,
        event_type: event_type.to_string(),
        event_data,
        created_at: Utc::now(),
    };

    if let Err(e) = db.insert_audit(&entry).await {
        warn!(action = "audit_write_failed", user_id = %user_id, event = %event_type, error = %e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_is_readable() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        record(&db, user_id, "LIMITS_UPDATED", json!({ "daily_bet_cents": 100 })).await;

        let entries = db.list_audit(&user_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "LIMITS_UPDATED");
        assert_eq!(entries[0].event_data["daily_bet_cents"], 100);
    }
}
