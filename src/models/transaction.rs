use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Bet,
    Win,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Bet => "bet",
            TransactionType::Win => "win",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "bet" => Ok(TransactionType::Bet),
            "win" => Ok(TransactionType::Win),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "rejected" => Ok(TransactionStatus::Rejected),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// One ledger line. Amounts are always positive; the type gives the sign.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: TransactionType,
    pub amount_cents: i64,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: Uuid,
        tx_type: TransactionType,
        amount_cents: i64,
        description: impl Into<String>,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx_type,
            amount_cents,
            description: description.into(),
            status,
            created_at: Utc::now(),
        }
    }
}
