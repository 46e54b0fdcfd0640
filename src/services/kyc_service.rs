use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::kyc::{Address, KycSubmission};
use crate::models::user::KycStatus;
use crate::services::audit;
use crate::services::document_store::{check_document, extension_for, DocumentStore};
use crate::utils::validation::{clean_cep, clean_cpf, Validator};
use chrono::{FixedOffset, NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Personal data typed into the verification form.
#[derive(Debug, Clone)]
pub struct KycApplication {
    pub cpf: String,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub phone: String,
    pub address: Address,
}

#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct KycDocuments {
    pub front: UploadedDocument,
    pub back: UploadedDocument,
    pub selfie: UploadedDocument,
}

pub struct KycService {
    db: Arc<SqliteDatabase>,
    store: Arc<dyn DocumentStore>,
    offset: FixedOffset,
}

impl KycService {
    pub fn new(db: Arc<SqliteDatabase>, store: Arc<dyn DocumentStore>, offset: FixedOffset) -> Self {
        Self { db, store, offset }
    }

    fn validate(application: &KycApplication, today: NaiveDate) -> Result<()> {
        Validator::validate_cpf(&application.cpf)?;
        Validator::validate_adult(application.birth_date, today)?;

        let address = &application.address;
        for (field, value) in [
            ("nome completo", application.full_name.as_str()),
            ("telefone", application.phone.as_str()),
            ("CEP", address.cep.as_str()),
            ("logradouro", address.street.as_str()),
            ("número", address.number.as_str()),
            ("cidade", address.city.as_str()),
            ("estado", address.state.as_str()),
        ] {
            Validator::validate_required(field, value)?;
        }
        clean_cep(&address.cep)?;
        Ok(())
    }

    async fn upload(&self, user_id: &Uuid, folder: &str, label: &str, document: &UploadedDocument) -> Result<String> {
        let ext = extension_for(&document.content_type)?;
        let path = format!(
            "{}/{}_{}_{}.{}",
            folder,
            user_id,
            label,
            Utc::now().timestamp_millis(),
            ext
        );
        self.store.put(&path, &document.bytes, &document.content_type).await
    }

    pub async fn submit(
        &self,
        user_id: &Uuid,
        application: KycApplication,
        documents: KycDocuments,
    ) -> Result<KycSubmission> {
        let today = Utc::now().with_timezone(&self.offset).date_naive();
        Self::validate(&application, today)?;

        if let Some(latest) = self.db.get_latest_kyc(user_id).await? {
            match latest.status {
                KycStatus::Pending => {
                    return Err(AppError::Conflict(
                        "Sua verificação já está em análise.".to_string(),
                    ))
                }
                KycStatus::Approved => {
                    return Err(AppError::Conflict("Sua identidade já foi verificada.".to_string()))
                }
                KycStatus::Rejected | KycStatus::NotSubmitted => {}
            }
        }

        for document in [&documents.front, &documents.back, &documents.selfie] {
            check_document(&document.bytes, &document.content_type)?;
        }

        let document_front_url = self.upload(user_id, "documentos", "frente", &documents.front).await?;
        let document_back_url = self.upload(user_id, "documentos", "verso", &documents.back).await?;
        let selfie_url = self.upload(user_id, "selfies", "selfie", &documents.selfie).await?;

        let mut address = application.address;
        address.cep = clean_cep(&address.cep)?;
        address.complement = address.complement.filter(|c| !c.trim().is_empty());

        let submission = KycSubmission {
            id: Uuid::new_v4(),
            user_id: *user_id,
            cpf: clean_cpf(&application.cpf),
            cpf_validated: true,
            full_name: application.full_name.trim().to_string(),
            birth_date: application.birth_date,
            phone: application.phone.trim().to_string(),
            address,
            document_front_url,
            document_back_url,
            selfie_url,
            status: KycStatus::Pending,
            submitted_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
            rejection_reason: None,
        };
        self.db.create_kyc_submission(&submission).await?;

        audit::record(&self.db, *user_id, "KYC_SUBMITTED", json!({ "cpf_validated": true })).await;
        info!(action = "kyc_submitted", user_id = %user_id, submission_id = %submission.id);
        Ok(submission)
    }

    pub async fn status(&self, user_id: &Uuid) -> Result<Option<KycSubmission>> {
        self.db.get_latest_kyc(user_id).await
    }

    pub async fn list(&self, status: Option<KycStatus>) -> Result<Vec<KycSubmission>> {
        self.db.list_kyc_submissions(status).await
    }

    pub async fn review(
        &self,
        admin_id: &Uuid,
        submission_id: &Uuid,
        approve: bool,
        reason: Option<&str>,
    ) -> Result<KycSubmission> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if !approve && reason.is_none() {
            return Err(AppError::ValidationError("Informe o motivo da rejeição.".to_string()));
        }

        let status = if approve { KycStatus::Approved } else { KycStatus::Rejected };
        let submission = self
            .db
            .review_kyc(submission_id, admin_id, status, if approve { None } else { reason })
            .await?;

        let event = if approve { "KYC_APPROVED" } else { "KYC_REJECTED" };
        audit::record(
            &self.db,
            submission.user_id,
            event,
            json!({ "submission_id": submission.id, "admin_id": admin_id, "reason": reason }),
        )
        .await;
        info!(action = "kyc_reviewed", submission_id = %submission.id, admin_id = %admin_id, approved = approve);
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::tests::seed_user;
    use crate::services::document_store::LocalDocumentStore;

    fn application() -> KycApplication {
        KycApplication {
            cpf: "529.982.247-25".to_string(),
            full_name: "Ana Souza".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 5, 20).unwrap(),
            phone: "(11) 98765-4321".to_string(),
            address: Address {
                cep: "01001-000".to_string(),
                street: "Praça da Sé".to_string(),
                number: "100".to_string(),
                complement: Some(" ".to_string()),
                neighborhood: "Sé".to_string(),
                city: "São Paulo".to_string(),
                state: "SP".to_string(),
            },
        }
    }

    fn png() -> UploadedDocument {
        UploadedDocument { bytes: vec![0x89, b'P', b'N', b'G'], content_type: "image/png".to_string() }
    }

    fn documents() -> KycDocuments {
        KycDocuments { front: png(), back: png(), selfie: png() }
    }

    async fn setup(dir: &tempfile::TempDir) -> (Arc<SqliteDatabase>, KycService, Uuid) {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let user = seed_user(&db, "a@exemplo.com", 0).await;
        let store: Arc<dyn DocumentStore> = Arc::new(LocalDocumentStore::new(dir.path(), "http://files"));
        let service = KycService::new(db.clone(), store, FixedOffset::west_opt(3 * 3600).unwrap());
        (db, service, user.id)
    }

    #[tokio::test]
    async fn test_submit_stores_pending_and_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let (db, service, user_id) = setup(&dir).await;

        let submission = service.submit(&user_id, application(), documents()).await.unwrap();
        assert_eq!(submission.status, KycStatus::Pending);
        assert_eq!(submission.cpf, "52998224725");
        assert_eq!(submission.address.cep, "01001000");
        assert!(submission.address.complement.is_none());
        assert!(submission.document_front_url.starts_with("http://files/kyc-documents/documentos/"));
        assert!(submission.selfie_url.starts_with("http://files/kyc-documents/selfies/"));

        assert_eq!(db.get_user_by_id(&user_id).await.unwrap().kyc_status, KycStatus::Pending);
        assert!(dir.path().join("kyc-documents/selfies").read_dir().unwrap().next().is_some());
        let audit = db.list_audit(&user_id).await.unwrap();
        assert!(audit.iter().any(|e| e.event_type == "KYC_SUBMITTED"));
    }

    #[tokio::test]
    async fn test_pending_submission_blocks_resubmission() {
        let dir = tempfile::tempdir().unwrap();
        let (_, service, user_id) = setup(&dir).await;
        service.submit(&user_id, application(), documents()).await.unwrap();
        assert!(matches!(
            service.submit(&user_id, application(), documents()).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let (_, service, user_id) = setup(&dir).await;

        let mut bad_cpf = application();
        bad_cpf.cpf = "111.111.111-11".to_string();
        assert!(service.submit(&user_id, bad_cpf, documents()).await.is_err());

        let mut minor = application();
        minor.birth_date = Utc::now().date_naive() - chrono::Duration::days(365 * 10);
        assert!(service.submit(&user_id, minor, documents()).await.is_err());

        let mut missing = application();
        missing.address.number = "  ".to_string();
        assert!(service.submit(&user_id, missing, documents()).await.is_err());

        let mut gif = documents();
        gif.selfie.content_type = "image/gif".to_string();
        assert!(service.submit(&user_id, application(), gif).await.is_err());
        assert!(service.status(&user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_review_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (db, service, user_id) = setup(&dir).await;
        let admin = seed_user(&db, "admin@exemplo.com", 0).await;
        let submission = service.submit(&user_id, application(), documents()).await.unwrap();

        assert!(matches!(
            service.review(&admin.id, &submission.id, false, Some("  ")).await,
            Err(AppError::ValidationError(_))
        ));

        let rejected = service.review(&admin.id, &submission.id, false, Some("Selfie ilegível")).await.unwrap();
        assert_eq!(rejected.status, KycStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Selfie ilegível"));
        assert_eq!(db.get_user_by_id(&user_id).await.unwrap().kyc_status, KycStatus::Rejected);

        let again = service.submit(&user_id, application(), documents()).await.unwrap();
        service.review(&admin.id, &again.id, true, None).await.unwrap();
        assert_eq!(db.get_user_by_id(&user_id).await.unwrap().kyc_status, KycStatus::Approved);
        assert_eq!(service.list(Some(KycStatus::Pending)).await.unwrap().len(), 0);
    }
}
