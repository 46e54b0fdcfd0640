use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::payment_request::{RequestStatus, WithdrawalRequest};
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::models::user::KycStatus;
use crate::services::audit;
use crate::utils::money::to_cents;
use crate::utils::validation::classify_pix_key;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct WithdrawalService {
    db: Arc<SqliteDatabase>,
}

impl WithdrawalService {
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self { db }
    }

    /// Holds the amount from the balance and queues the payout for an operator.
    pub async fn request_withdrawal(&self, user_id: &Uuid, amount: f64, pix_key: &str) -> Result<WithdrawalRequest> {
        let amount_cents = to_cents(amount)?;
        let pix_key = pix_key.trim();
        let kind = classify_pix_key(pix_key)?;

        let user = self.db.get_user_by_id(user_id).await?;
        if user.kyc_status != KycStatus::Approved {
            return Err(AppError::Forbidden(
                "Complete a verificação de identidade para sacar.".to_string(),
            ));
        }

        let entry = Transaction::new(
            *user_id,
            TransactionType::Withdrawal,
            amount_cents,
            "Saque via PIX",
            TransactionStatus::Pending,
        );
        let request = WithdrawalRequest {
            id: Uuid::new_v4(),
            user_id: *user_id,
            amount_cents,
            pix_key: pix_key.to_string(),
            transaction_id: entry.id,
            status: RequestStatus::Pending,
            requested_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        };
        self.db.create_withdrawal_request(&request, &entry).await?;

        audit::record(
            &self.db,
            *user_id,
            "WITHDRAWAL_REQUESTED",
            json!({ "request_id": request.id, "amount_cents": amount_cents, "key_kind": kind }),
        )
        .await;
        info!(action = "withdrawal_requested", user_id = %user_id, request_id = %request.id, amount_cents = amount_cents);
        Ok(request)
    }

    pub async fn user_withdrawals(&self, user_id: &Uuid) -> Result<Vec<WithdrawalRequest>> {
        self.db.list_user_withdrawals(user_id).await
    }

    /// Pending requests, oldest first.
    pub async fn pending_withdrawals(&self) -> Result<Vec<WithdrawalRequest>> {
        self.db.list_withdrawals(Some(RequestStatus::Pending)).await
    }

    pub async fn decide_withdrawal(&self, admin_id: &Uuid, request_id: &Uuid, approve: bool) -> Result<WithdrawalRequest> {
        let request = self.db.decide_withdrawal(request_id, admin_id, approve).await?;

        let event = if approve { "WITHDRAWAL_APPROVED" } else { "WITHDRAWAL_REJECTED" };
        audit::record(
            &self.db,
            request.user_id,
            event,
            json!({ "request_id": request.id, "amount_cents": request.amount_cents, "admin_id": admin_id }),
        )
        .await;
        info!(action = "withdrawal_decided", request_id = %request.id, admin_id = %admin_id, approved = approve);
        Ok(request)
    }
}
