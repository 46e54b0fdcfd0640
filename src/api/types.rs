use crate::models::kyc::KycSubmission;
use crate::models::limits::{ActivitySummary, LimitSettings, ResponsibleGamingLimits};
use crate::models::payment_request::{DepositRequest, RequestStatus, WithdrawalRequest};
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::models::user::KycStatus;
use crate::services::responsible_gaming::ActivityReport;
use crate::utils::money::to_reais;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// Amounts crossing the API are reais (f64); storage stays in centavos.

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    pub id: Uuid,
    pub tx_type: TransactionType,
    pub amount: f64,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            tx_type: tx.tx_type,
            amount: to_reais(tx.amount_cents),
            description: tx.description,
            status: tx.status,
            created_at: tx.created_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Maximum number of entries, newest first.
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SpinRequest {
    pub bet: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SpinResponse {
    pub session_id: Uuid,
    pub game_id: String,
    pub symbols: Vec<String>,
    pub bet: f64,
    pub win: f64,
    pub multiplier: f64,
    pub balance: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LimitsView {
    pub daily_deposit: f64,
    pub monthly_deposit: f64,
    pub daily_bet: f64,
    pub monthly_bet: f64,
    pub daily_loss: f64,
    pub monthly_loss: f64,
    pub max_session_minutes: i64,
    pub alerts_enabled: bool,
}

impl From<LimitSettings> for LimitsView {
    fn from(s: LimitSettings) -> Self {
        Self {
            daily_deposit: to_reais(s.daily_deposit_cents),
            monthly_deposit: to_reais(s.monthly_deposit_cents),
            daily_bet: to_reais(s.daily_bet_cents),
            monthly_bet: to_reais(s.monthly_bet_cents),
            daily_loss: to_reais(s.daily_loss_cents),
            monthly_loss: to_reais(s.monthly_loss_cents),
            max_session_minutes: s.max_session_minutes,
            alerts_enabled: s.alerts_enabled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PendingLimitsView {
    pub limits: LimitsView,
    pub effective_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LimitsResponse {
    pub limits: LimitsView,
    pub pending: Option<PendingLimitsView>,
    pub self_excluded_until: Option<DateTime<Utc>>,
}

impl From<ResponsibleGamingLimits> for LimitsResponse {
    fn from(l: ResponsibleGamingLimits) -> Self {
        Self {
            limits: l.settings.into(),
            pending: l.pending.map(|p| PendingLimitsView {
                limits: p.settings.into(),
                effective_at: p.effective_at,
            }),
            self_excluded_until: l.self_excluded_until,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityResponse {
    pub deposited_today: f64,
    pub deposited_month: f64,
    pub bet_today: f64,
    pub bet_month: f64,
    pub lost_today: f64,
    pub lost_month: f64,
}

impl From<ActivitySummary> for ActivityResponse {
    fn from(a: ActivitySummary) -> Self {
        Self {
            deposited_today: to_reais(a.deposited_today_cents),
            deposited_month: to_reais(a.deposited_month_cents),
            bet_today: to_reais(a.bet_today_cents),
            bet_month: to_reais(a.bet_month_cents),
            lost_today: to_reais(a.lost_today_cents),
            lost_month: to_reais(a.lost_month_cents),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SelfExclusionRequest {
    pub days: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SelfExclusionResponse {
    pub self_excluded_until: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// Defaults to 30 days before `to`.
    pub from: Option<DateTime<Utc>>,
    /// Defaults to now.
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub limits: LimitsView,
    pub total_deposited: f64,
    pub total_bet: f64,
    pub total_won: f64,
    pub total_withdrawn: f64,
    pub transactions: Vec<TransactionView>,
}

impl From<ActivityReport> for ReportResponse {
    fn from(r: ActivityReport) -> Self {
        Self {
            from: r.from,
            to: r.to,
            limits: r.limits.into(),
            total_deposited: to_reais(r.deposited_cents),
            total_bet: to_reais(r.bet_cents),
            total_won: to_reais(r.won_cents),
            total_withdrawn: to_reais(r.withdrawn_cents),
            transactions: r.transactions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateDepositRequest {
    pub amount: f64,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DepositView {
    pub txid: String,
    pub amount: f64,
    pub status: RequestStatus,
    pub pix_key: String,
    /// PIX "copia e cola" payload.
    pub br_code: String,
    /// Base64 SVG; only returned when the charge is created.
    pub qr_code_base64: Option<String>,
    /// Deposit limit left once this charge is paid; only returned when the charge is created.
    pub remaining_deposit_limit: Option<f64>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl DepositView {
    pub fn new(request: DepositRequest, qr_code_base64: Option<String>, remaining_limit_cents: Option<i64>) -> Self {
        Self {
            txid: request.external_id,
            amount: to_reais(request.amount_cents),
            status: request.status,
            pix_key: request.pix_key,
            br_code: request.br_code,
            qr_code_base64,
            remaining_deposit_limit: remaining_limit_cents.map(to_reais),
            expires_at: request.expires_at,
            created_at: request.created_at,
            decided_at: request.decided_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    pub credited: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateWithdrawalRequest {
    pub amount: f64,
    pub pix_key: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub pix_key: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
}

impl From<WithdrawalRequest> for WithdrawalView {
    fn from(w: WithdrawalRequest) -> Self {
        Self {
            id: w.id,
            user_id: w.user_id,
            amount: to_reais(w.amount_cents),
            pix_key: w.pix_key,
            status: w.status,
            requested_at: w.requested_at,
            decided_at: w.decided_at,
            decided_by: w.decided_by,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalDecisionRequest {
    pub approve: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct KycReviewRequest {
    pub approve: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct KycListQuery {
    pub status: Option<KycStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycStatusResponse {
    pub status: KycStatus,
    pub submission: Option<KycSubmission>,
}

/// Multipart form accepted by `POST /api/kyc`.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct KycUploadForm {
    pub cpf: String,
    pub full_name: String,
    /// `YYYY-MM-DD`.
    pub birth_date: String,
    pub phone: String,
    pub cep: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    #[schema(value_type = String, format = Binary)]
    pub document_front: Vec<u8>,
    #[schema(value_type = String, format = Binary)]
    pub document_back: Vec<u8>,
    #[schema(value_type = String, format = Binary)]
    pub selfie: Vec<u8>,
}
