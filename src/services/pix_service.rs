use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::payment_request::{DepositRequest, RequestStatus};
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::models::user::KycStatus;
use crate::services::audit;
use crate::services::responsible_gaming::ResponsibleGamingService;
use crate::utils::crypto::secrets_match;
use crate::utils::money::{format_brl, to_cents};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const MIN_DEPOSIT_CENTS: i64 = 2_00;
pub const CHARGE_TTL_MINUTES: i64 = 30;

/// Receiver identity embedded in every BR Code.
#[derive(Debug, Clone)]
pub struct PixReceiver {
    pub key: String,
    pub merchant_name: String,
    pub merchant_city: String,
}

#[derive(Debug, Clone)]
pub struct DepositCharge {
    pub request: DepositRequest,
    /// SVG QR code of the BR Code, base64 encoded.
    pub qr_code_base64: String,
    /// Deposit limit left once this charge is paid.
    pub remaining_limit_cents: i64,
}

/// Payment notification pushed by the gateway.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PixWebhook {
    #[serde(alias = "transactionId")]
    pub txid: String,
    /// `pending`, `approved` or `rejected`; only `approved` credits.
    pub status: String,
    /// Paid amount in reais, checked against the charge when present.
    pub amount: Option<f64>,
}

fn tlv(id: &str, value: &str) -> String {
    format!("{}{:02}{}", id, value.len(), value)
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'ê' | 'è' | 'É' | 'Ê' | 'È' => 'E',
        'í' | 'î' | 'Í' | 'Î' => 'I',
        'ó' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ü' | 'Ú' | 'Ü' => 'U',
        'ç' | 'Ç' => 'C',
        other => other,
    }
}

/// Restricts free text to what BR Code readers accept and to the field size.
fn emv_text(value: &str, max: usize) -> String {
    value
        .chars()
        .map(fold_accent)
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .take(max)
        .collect::<String>()
        .to_uppercase()
}

/// CRC16-CCITT (polynomial 0x1021, initial value 0xFFFF).
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Builds an EMV "copia e cola" payload for a one-time charge.
pub fn build_br_code(receiver: &PixReceiver, amount_cents: i64, txid: &str) -> String {
    let account = format!("{}{}", tlv("00", "br.gov.bcb.pix"), tlv("01", &receiver.key));
    let amount = format!("{}.{:02}", amount_cents / 100, amount_cents % 100);

    let mut payload = String::new();
    payload.push_str(&tlv("00", "01"));
    payload.push_str(&tlv("01", "12"));
    payload.push_str(&tlv("26", &account));
    payload.push_str(&tlv("52", "0000"));
    payload.push_str(&tlv("53", "986"));
    payload.push_str(&tlv("54", &amount));
    payload.push_str(&tlv("58", "BR"));
    payload.push_str(&tlv("59", &emv_text(&receiver.merchant_name, 25)));
    payload.push_str(&tlv("60", &emv_text(&receiver.merchant_city, 15)));
    payload.push_str(&tlv("62", &tlv("05", txid)));
    payload.push_str("6304");

    let crc = crc16_ccitt(payload.as_bytes());
    format!("{}{:04X}", payload, crc)
}

pub fn qr_code_base64(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| AppError::InternalError(format!("Failed to build QR code: {}", e)))?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .build();
    Ok(STANDARD.encode(image))
}

fn new_txid() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TXN{}", &id[..22])
}

pub struct PixService {
    db: Arc<SqliteDatabase>,
    limits: Arc<ResponsibleGamingService>,
    receiver: PixReceiver,
    webhook_secret: String,
}

impl PixService {
    pub fn new(
        db: Arc<SqliteDatabase>,
        limits: Arc<ResponsibleGamingService>,
        receiver: PixReceiver,
        webhook_secret: String,
    ) -> Self {
        Self { db, limits, receiver, webhook_secret }
    }

    pub async fn create_deposit(&self, user_id: &Uuid, amount: f64, description: Option<&str>) -> Result<DepositCharge> {
        let user = self.db.get_user_by_id(user_id).await?;
        if user.kyc_status != KycStatus::Approved {
            return Err(AppError::Forbidden(
                "KYC não verificado. Por favor, complete a verificação de identidade para depositar.".to_string(),
            ));
        }

        let amount_cents = to_cents(amount)?;
        if amount_cents < MIN_DEPOSIT_CENTS {
            return Err(AppError::ValidationError(format!(
                "Valor mínimo de depósito: {}",
                format_brl(MIN_DEPOSIT_CENTS)
            )));
        }

        let now = Utc::now();
        let headroom = self.limits.check_deposit(user_id, amount_cents, now).await?;

        let txid = new_txid();
        let br_code = build_br_code(&self.receiver, amount_cents, &txid);
        let qr_code_base64 = qr_code_base64(&br_code)?;

        let entry = Transaction::new(
            *user_id,
            TransactionType::Deposit,
            amount_cents,
            description
                .filter(|d| !d.trim().is_empty())
                .map_or_else(|| "Depósito via PIX".to_string(), |d| d.trim().to_string()),
            TransactionStatus::Pending,
        );
        let request = DepositRequest {
            id: Uuid::new_v4(),
            user_id: *user_id,
            amount_cents,
            pix_key: self.receiver.key.clone(),
            external_id: txid,
            br_code,
            transaction_id: entry.id,
            status: RequestStatus::Pending,
            expires_at: now + Duration::minutes(CHARGE_TTL_MINUTES),
            created_at: now,
            decided_at: None,
        };
        self.db.create_deposit_request(&request, &entry).await?;

        audit::record(
            &self.db,
            *user_id,
            "DEPOSIT_REQUESTED",
            json!({ "txid": request.external_id, "amount_cents": amount_cents }),
        )
        .await;
        info!(action = "deposit_requested", user_id = %user_id, txid = %request.external_id, amount_cents = amount_cents);

        Ok(DepositCharge { request, qr_code_base64, remaining_limit_cents: headroom.remaining_cents })
    }

    async fn owned_request(&self, user_id: &Uuid, external_id: &str) -> Result<DepositRequest> {
        match self.db.get_deposit_by_external_id(external_id).await? {
            Some(request) if request.user_id == *user_id => Ok(request),
            _ => Err(AppError::NotFound("Depósito não encontrado.".to_string())),
        }
    }

    /// Current state of a charge. A pending charge past its expiry is closed as rejected.
    pub async fn deposit_status(&self, user_id: &Uuid, external_id: &str, now: DateTime<Utc>) -> Result<DepositRequest> {
        let mut request = self.owned_request(user_id, external_id).await?;
        if request.status == RequestStatus::Pending && request.expires_at <= now {
            if self.db.reject_deposit(external_id).await? {
                info!(action = "deposit_expired", user_id = %user_id, txid = %external_id);
            }
            request = self.owned_request(user_id, external_id).await?;
        }
        Ok(request)
    }

    pub async fn cancel_deposit(&self, user_id: &Uuid, external_id: &str) -> Result<DepositRequest> {
        self.owned_request(user_id, external_id).await?;
        if !self.db.reject_deposit(external_id).await? {
            return Err(AppError::Conflict("Este depósito já foi processado.".to_string()));
        }
        audit::record(&self.db, *user_id, "DEPOSIT_CANCELLED", json!({ "txid": external_id })).await;
        info!(action = "deposit_cancelled", user_id = %user_id, txid = %external_id);
        self.owned_request(user_id, external_id).await
    }

    pub fn verify_webhook_secret(&self, presented: Option<&str>) -> Result<()> {
        match presented {
            Some(secret) if !self.webhook_secret.is_empty() && secrets_match(secret, &self.webhook_secret) => Ok(()),
            _ => Err(AppError::AuthenticationError("Webhook não autorizado.".to_string())),
        }
    }

    /// Applies a gateway notification. Returns true only when this call credited the player.
    /// A charge still pending past its expiry is closed as rejected and never credited.
    pub async fn confirm_deposit(&self, webhook: &PixWebhook, now: DateTime<Utc>) -> Result<bool> {
        if webhook.status != "approved" {
            info!(action = "webhook_ignored", txid = %webhook.txid, status = %webhook.status);
            return Ok(false);
        }

        let request = self
            .db
            .get_deposit_by_external_id(&webhook.txid)
            .await?
            .ok_or_else(|| AppError::NotFound("Depósito não encontrado.".to_string()))?;

        if let Some(amount) = webhook.amount {
            if to_cents(amount)? != request.amount_cents {
                warn!(action = "webhook_amount_mismatch", txid = %webhook.txid, expected = request.amount_cents);
                return Err(AppError::ValidationError("Valor pago diverge da cobrança.".to_string()));
            }
        }

        if request.status == RequestStatus::Pending && request.expires_at <= now {
            if self.db.reject_deposit(&webhook.txid).await? {
                info!(action = "deposit_expired", user_id = %request.user_id, txid = %webhook.txid);
            }
            warn!(action = "webhook_for_expired_charge", txid = %webhook.txid);
            return Err(AppError::Conflict("Cobrança expirada.".to_string()));
        }

        let credited = self.db.approve_deposit(&webhook.txid, now).await?;
        if credited {
            audit::record(
                &self.db,
                request.user_id,
                "DEPOSIT_CONFIRMED",
                json!({ "txid": webhook.txid, "amount_cents": request.amount_cents }),
            )
            .await;
            info!(action = "deposit_confirmed", user_id = %request.user_id, txid = %webhook.txid);
        } else {
            info!(action = "webhook_replayed", txid = %webhook.txid, status = request.status.as_str());
        }
        Ok(credited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::tests::{backdate_deposit_expiry, seed_user};
    use crate::models::user::User;
    use chrono::FixedOffset;

    fn receiver() -> PixReceiver {
        PixReceiver {
            key: "chave-pix-luckyybet@exemplo.com".to_string(),
            merchant_name: "LuckyYBet".to_string(),
            merchant_city: "São Paulo".to_string(),
        }
    }

    async fn setup() -> (Arc<SqliteDatabase>, PixService, User) {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let user = seed_user(&db, "a@exemplo.com", 0).await;
        let limits = Arc::new(ResponsibleGamingService::new(db.clone(), FixedOffset::west_opt(3 * 3600).unwrap()));
        let service = PixService::new(db.clone(), limits, receiver(), "webhook-secret".to_string());
        (db, service, user)
    }

    fn approved(txid: &str) -> PixWebhook {
        PixWebhook { txid: txid.to_string(), status: "approved".to_string(), amount: None }
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_br_code_crc_verifies() {
        let code = build_br_code(&receiver(), 10_50, "TXN123");
        let (body, crc) = code.split_at(code.len() - 4);
        assert!(body.ends_with("6304"));
        assert_eq!(u16::from_str_radix(crc, 16).unwrap(), crc16_ccitt(body.as_bytes()));
        assert!(code.contains("540510.50"));
        assert!(code.contains("0014br.gov.bcb.pix"));
        assert!(code.contains("6009SAO PAULO"));
    }

    #[test]
    fn test_txid_fits_emv_field() {
        let txid = new_txid();
        assert_eq!(txid.len(), 25);
        assert!(txid.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_kyc_required() {
        let (db, service, user) = setup().await;
        mark_kyc(&db, &user.id, KycStatus::Pending).await;
        assert!(matches!(service.create_deposit(&user.id, 10.0, None).await, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_minimum_deposit() {
        let (_, service, user) = setup().await;
        assert!(matches!(service.create_deposit(&user.id, 1.99, None).await, Err(AppError::ValidationError(_))));
        assert!(service.create_deposit(&user.id, 2.0, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_confirm_twice_credits_once() {
        let (db, service, user) = setup().await;
        let charge = service.create_deposit(&user.id, 25.0, None).await.unwrap();
        assert!(!charge.qr_code_base64.is_empty());
        assert_eq!(db.get_user_by_id(&user.id).await.unwrap().balance_cents, 0);

        let txid = charge.request.external_id.clone();
        assert!(service.confirm_deposit(&approved(&txid), Utc::now()).await.unwrap());
        assert!(!service.confirm_deposit(&approved(&txid), Utc::now()).await.unwrap());

        assert_eq!(db.get_user_by_id(&user.id).await.unwrap().balance_cents, 25_00);
        let ledger = db.get_transactions(&user.id, 10).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_charge_cannot_be_confirmed() {
        let (db, service, user) = setup().await;
        let charge = service.create_deposit(&user.id, 10.0, None).await.unwrap();
        let txid = charge.request.external_id;

        let cancelled = service.cancel_deposit(&user.id, &txid).await.unwrap();
        assert_eq!(cancelled.status, RequestStatus::Rejected);
        assert!(!service.confirm_deposit(&approved(&txid), Utc::now()).await.unwrap());
        assert_eq!(db.get_user_by_id(&user.id).await.unwrap().balance_cents, 0);
        assert!(matches!(service.cancel_deposit(&user.id, &txid).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_expired_charge_reads_rejected() {
        let (_, service, user) = setup().await;
        let charge = service.create_deposit(&user.id, 10.0, None).await.unwrap();
        let txid = charge.request.external_id;

        let later = Utc::now() + Duration::minutes(CHARGE_TTL_MINUTES + 1);
        let status = service.deposit_status(&user.id, &txid, later).await.unwrap();
        assert_eq!(status.status, RequestStatus::Rejected);
    }

    #[tokio::test]
    async fn test_amount_mismatch_and_foreign_owner() {
        let (db, service, user) = setup().await;
        let charge = service.create_deposit(&user.id, 10.0, None).await.unwrap();
        let txid = charge.request.external_id;

        let wrong = PixWebhook { amount: Some(9.99), ..approved(&txid) };
        assert!(service.confirm_deposit(&wrong, Utc::now()).await.is_err());

        let other = seed_user(&db, "b@exemplo.com", 0).await;
        assert!(matches!(service.deposit_status(&other.id, &txid, Utc::now()).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deposit_limit_counts_open_charges() {
        let (_, service, user) = setup().await;
        service.create_deposit(&user.id, 400.0, None).await.unwrap();
        assert!(matches!(service.create_deposit(&user.id, 200.0, None).await, Err(AppError::LimitExceeded(_))));
    }

    #[tokio::test]
    async fn test_expired_charge_frees_deposit_limit() {
        let (db, service, user) = setup().await;
        let first = service.create_deposit(&user.id, 400.0, None).await.unwrap();
        assert_eq!(first.remaining_limit_cents, 100_00);
        backdate_deposit_expiry(&db, &first.request.external_id, CHARGE_TTL_MINUTES + 1).await;

        let second = service.create_deposit(&user.id, 200.0, None).await.unwrap();
        assert_eq!(second.remaining_limit_cents, 300_00);
    }

    #[tokio::test]
    async fn test_expired_charge_is_never_credited() {
        let (db, service, user) = setup().await;
        let charge = service.create_deposit(&user.id, 50.0, None).await.unwrap();
        let txid = charge.request.external_id;
        backdate_deposit_expiry(&db, &txid, 1).await;

        assert!(matches!(
            service.confirm_deposit(&approved(&txid), Utc::now()).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(db.get_user_by_id(&user.id).await.unwrap().balance_cents, 0);
        let ledger = db.get_transactions(&user.id, 10).await.unwrap();
        assert_eq!(ledger[0].status, TransactionStatus::Rejected);
        assert!(!service.confirm_deposit(&approved(&txid), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_webhook_secret() {
        let (_, service, _) = setup().await;
        assert!(service.verify_webhook_secret(Some("webhook-secret")).is_ok());
        assert!(service.verify_webhook_secret(Some("webhook-secreT")).is_err());
        assert!(service.verify_webhook_secret(None).is_err());
    }

    async fn mark_kyc(db: &SqliteDatabase, user_id: &Uuid, status: KycStatus) {
        let kyc = crate::models::kyc::KycSubmission {
            id: Uuid::new_v4(),
            user_id: *user_id,
            cpf: "52998224725".to_string(),
            cpf_validated: true,
            full_name: "Ana Souza".to_string(),
            birth_date: chrono::NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            phone: "11999999999".to_string(),
            address: Default::default(),
            document_front_url: "f".to_string(),
            document_back_url: "b".to_string(),
            selfie_url: "s".to_string(),
            status,
            submitted_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
            rejection_reason: None,
        };
        db.create_kyc_submission(&kyc).await.unwrap();
    }
}
