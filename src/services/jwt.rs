use crate::errors::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SESSION_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub struct JwtManager {
    secret: String,
}

impl JwtManager {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn generate_token(&self, user_id: &Uuid, email: &str) -> Result<(String, Claims)> {
        let now = Utc::now();
        let expiration = now + Duration::hours(SESSION_HOURS);

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: expiration.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .map_err(|e| AppError::AuthenticationError(format!("Failed to generate token: {}", e)))?;

        Ok((token, claims))
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        Ok(decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::default(),
        )?)
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub token_id: String,
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|e| AppError::AuthenticationError(format!("Invalid user ID in token: {}", e)))?;

        Ok(Self {
            user_id,
            email: claims.email,
            token_id: claims.jti,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_keeps_subject() {
        let manager = JwtManager::new("a-secret-long-enough-for-tests".to_string());
        let user_id = Uuid::new_v4();
        let (token, claims) = manager.generate_token(&user_id, "jogador@exemplo.com").unwrap();

        let decoded = manager.validate_token(&token).unwrap();
        let user = AuthenticatedUser::try_from(decoded.claims).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.token_id, claims.jti);
        assert_eq!(claims.exp - claims.iat, SESSION_HOURS * 3600);
    }

    #[test]
    fn test_foreign_signature_is_rejected() {
        let ours = JwtManager::new("a-secret-long-enough-for-tests".to_string());
        let theirs = JwtManager::new("some-other-secret-entirely".to_string());
        let (token, _) = theirs.generate_token(&Uuid::new_v4(), "x@exemplo.com").unwrap();
        let err = ours.validate_token(&token).unwrap_err();
        assert!(matches!(err, AppError::JwtError(_)));
        assert_eq!(err.user_message(), "Sessão inválida ou expirada. Faça login novamente.");
    }
}
