use crate::config::Config;
use crate::database::sqlite::SqliteDatabase;
use crate::errors::Result;
use crate::services::auth::AuthService;
use crate::services::document_store::{DocumentStore, LocalDocumentStore};
use crate::services::games::GameService;
use crate::services::kyc_service::KycService;
use crate::services::pix_service::{PixReceiver, PixService};
use crate::services::postal_code::PostalCodeService;
use crate::services::responsible_gaming::ResponsibleGamingService;
use crate::services::user_service::UserService;
use crate::services::withdrawal_service::WithdrawalService;
use std::sync::Arc;

/// Services shared by every request handler and CLI command.
pub struct AppState {
    pub db: Arc<SqliteDatabase>,
    pub auth: AuthService,
    pub users: UserService,
    pub limits: Arc<ResponsibleGamingService>,
    pub games: GameService,
    pub pix: PixService,
    pub withdrawals: WithdrawalService,
    pub kyc: KycService,
    pub postal: PostalCodeService,
}

impl AppState {
    pub fn new(db: Arc<SqliteDatabase>, config: &Config) -> Result<Self> {
        let limits = Arc::new(ResponsibleGamingService::new(db.clone(), config.business_offset));
        let store: Arc<dyn DocumentStore> = Arc::new(LocalDocumentStore::new(
            config.document_root.clone(),
            config.public_base_url.clone(),
        ));
        let receiver = PixReceiver {
            key: config.pix_receiver_key.clone(),
            merchant_name: config.pix_merchant_name.clone(),
            merchant_city: config.pix_merchant_city.clone(),
        };

        Ok(Self {
            auth: AuthService::new(db.clone(), config.jwt_secret.clone(), config.welcome_credit_cents),
            users: UserService::new(db.clone()),
            games: GameService::new(db.clone(), limits.clone()),
            pix: PixService::new(db.clone(), limits.clone(), receiver, config.pix_webhook_secret.clone()),
            withdrawals: WithdrawalService::new(db.clone()),
            kyc: KycService::new(db.clone(), store, config.business_offset),
            postal: PostalCodeService::new(config.cep_api_base.clone())?,
            limits,
            db,
        })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Arc::new(SqliteDatabase::new(&config.database_path).await?);
        Self::new(db, config)
    }
}
