use crate::models::user::KycStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub cep: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycSubmission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cpf: String,
    pub cpf_validated: bool,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub phone: String,
    pub address: Address,
    pub document_front_url: String,
    pub document_back_url: String,
    pub selfie_url: String,
    pub status: KycStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub rejection_reason: Option<String>,
}
