use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::models::user::{KycStatus, User};
use crate::services::audit;
use crate::services::jwt::{AuthenticatedUser, JwtManager};
use crate::utils::crypto::{sha256_hex, PasswordManager};
use crate::utils::validation::Validator;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct AuthService {
    jwt_manager: JwtManager,
    database: Arc<SqliteDatabase>,
    welcome_credit_cents: i64,
}

impl AuthService {
    pub fn new(database: Arc<SqliteDatabase>, jwt_secret: String, welcome_credit_cents: i64) -> Self {
        Self {
            jwt_manager: JwtManager::new(jwt_secret),
            database,
            welcome_credit_cents,
        }
    }

    pub async fn register(&self, email: &str, password: &str, display_name: &str) -> Result<Uuid> {
        let email = email.trim().to_lowercase();
        Validator::validate_email(&email)?;
        Validator::validate_password(password)?;
        Validator::validate_display_name(display_name)?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            display_name: display_name.trim().to_string(),
            password_hash: PasswordManager::hash_password(password)?,
            balance_cents: 0,
            kyc_status: KycStatus::NotSubmitted,
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        let welcome = (self.welcome_credit_cents > 0).then(|| {
            Transaction::new(
                user.id,
                TransactionType::Deposit,
                self.welcome_credit_cents,
                "Bônus de boas-vindas",
                TransactionStatus::Completed,
            )
        });
        self.database.create_user_with_credit(&user, welcome.as_ref()).await?;

        audit::record(&self.database, user.id, "USER_REGISTERED", json!({ "email": user.email })).await;
        info!(action = "user_registered", user_id = %user.id);
        Ok(user.id)
    }

    pub async fn authenticate_user(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .database
            .get_user_by_email(&email.trim().to_lowercase())
            .await?
            .ok_or_else(|| AppError::AuthenticationError("Usuário não encontrado.".to_string()))?;

        if !PasswordManager::verify_password(password, &user.password_hash)? {
            return Err(AppError::AuthenticationError("Senha incorreta.".to_string()));
        }

        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let user = self.authenticate_user(email, password).await?;

        let (token, claims) = self.jwt_manager.generate_token(&user.id, &user.email)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AppError::InternalError("Token expiry out of range".to_string()))?;

        self.database
            .store_user_token(&user.id, &claims.jti, &sha256_hex(&token), expires_at)
            .await?;

        if let Err(e) = self.database.cleanup_expired_tokens().await {
            tracing::warn!(action = "token_cleanup_failed", error = %e);
        }

        info!(action = "user_logged_in", user_id = %user.id);
        Ok(token)
    }

    pub async fn validate_token(&self, token: &str) -> Result<AuthenticatedUser> {
        let token_data = self.jwt_manager.validate_token(token)?;

        if !self
            .database
            .is_token_valid(&token_data.claims.jti, &sha256_hex(token))
            .await?
        {
            return Err(AppError::AuthenticationError(
                "Sessão encerrada. Faça login novamente.".to_string(),
            ));
        }

        AuthenticatedUser::try_from(token_data.claims)
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        let user = self.validate_token(token).await?;
        self.database.revoke_token(&user.token_id).await?;
        info!(action = "user_logged_out", user_id = %user.user_id);
        Ok(())
    }

    /// Reads the admin flag from the user row, not from the token.
    pub async fn require_admin(&self, user: &AuthenticatedUser) -> Result<User> {
        let user = self.database.get_user_by_id(&user.user_id).await?;
        if !user.is_admin {
            return Err(AppError::Forbidden("Acesso restrito a administradores.".to_string()));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service(welcome: i64) -> AuthService {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        AuthService::new(db, "test-secret-that-is-long-enough".to_string(), welcome)
    }

    #[tokio::test]
    async fn test_register_login_logout() {
        let auth = service(0).await;
        let id = auth.register("Jogador@Exemplo.com", "senha1234", "Jogador").await.unwrap();

        let token = auth.login("jogador@exemplo.com", "senha1234").await.unwrap();
        let user = auth.validate_token(&token).await.unwrap();
        assert_eq!(user.user_id, id);

        auth.logout(&token).await.unwrap();
        assert!(auth.validate_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_login_messages() {
        let auth = service(0).await;
        auth.register("a@exemplo.com", "senha1234", "Ana").await.unwrap();

        match auth.login("b@exemplo.com", "senha1234").await {
            Err(AppError::AuthenticationError(msg)) => assert!(msg.contains("Usuário não encontrado")),
            other => panic!("unexpected {:?}", other),
        }
        match auth.login("a@exemplo.com", "errada123").await {
            Err(AppError::AuthenticationError(msg)) => assert!(msg.contains("Senha incorreta")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let auth = service(0).await;
        auth.register("a@exemplo.com", "senha1234", "Ana").await.unwrap();
        assert!(matches!(
            auth.register("A@exemplo.com", "senha1234", "Ana").await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_welcome_credit_is_a_completed_deposit() {
        let auth = service(10_00).await;
        let id = auth.register("a@exemplo.com", "senha1234", "Ana").await.unwrap();
        let user = auth.database.get_user_by_id(&id).await.unwrap();
        assert_eq!(user.balance_cents, 10_00);

        let ledger = auth.database.get_transactions(&id, 10).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].tx_type, TransactionType::Deposit);
        assert_eq!(ledger[0].status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_require_admin_reads_the_user_row() {
        let auth = service(0).await;
        auth.register("a@exemplo.com", "senha1234", "Ana").await.unwrap();
        let token = auth.login("a@exemplo.com", "senha1234").await.unwrap();
        let user = auth.validate_token(&token).await.unwrap();

        assert!(matches!(auth.require_admin(&user).await, Err(AppError::Forbidden(_))));
        auth.database.set_admin("a@exemplo.com", true).await.unwrap();
        assert!(auth.require_admin(&user).await.is_ok());
    }
}
