//! Credential hashing and token issuing

use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{User, UserClaims},
};

/// One-way credential hashing
pub trait CredentialHasher: Send + Sync {
    /// Hashes `plaintext` into a self-describing string.
    fn hash(&self, plaintext: &str) -> AppResult<String>;

    fn verify(&self, plaintext: &str, hash: &str) -> AppResult<bool>;
}

/// argon2id with default parameters, PHC string output
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Hasher;

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
        Ok(hash.to_string())
    }

    fn verify(&self, plaintext: &str, hash: &str) -> AppResult<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
        Ok(Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok())
    }
}

#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
    hasher: Arc<dyn CredentialHasher>,
}

impl AuthService {
    pub fn new(config: AuthConfig, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { config, hasher }
    }

    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        self.hasher.hash(password)
    }

    pub fn verify_password(&self, user: &User, password: &str) -> AppResult<bool> {
        self.hasher.verify(password, &user.credential_hash)
    }

    /// Signed bearer token for `user`
    pub fn issue_token(&self, user: &User) -> AppResult<String> {
        let now = Utc::now();
        let expiration = Duration::hours(self.config.jwt_expiration_hours as i64);
        let claims = UserClaims {
            sub: user.id.clone(),
            role: user.role,
            exp: (now + expiration).timestamp(),
            iat: now.timestamp(),
        };

        claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    /// Decodes and validates a bearer token
    pub fn verify_token(&self, token: &str) -> AppResult<UserClaims> {
        UserClaims::from_token(token, &self.config.jwt_secret)
            .map_err(|_| AppError::Authentication("Invalid or expired token".to_string()))
    }
}
