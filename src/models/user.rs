//! User model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::AppError;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Librarian,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Librarian => "librarian",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "student" => Ok(UserRole::Student),
            "librarian" => Ok(UserRole::Librarian),
            _ => Err(format!("Invalid user role: {}", s)),
        }
    }
}

/// Key under which an email is indexed.
pub fn normalize_email(email: &str) -> String {
    email.to_lowercase()
}

/// Stored user record. Never leaves the crate as-is; see [`PublicUser`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    /// Opaque credential hash (argon2 PHC string)
    pub credential_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn from_new(id: String, new: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: new.email,
            credential_hash: new.credential_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            role: new.role,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn email_key(&self) -> String {
        normalize_email(&self.email)
    }

    pub fn is_librarian(&self) -> bool {
        self.role == UserRole::Librarian
    }

    /// Merges a patch; `id` and `created_at` never change.
    pub fn apply(&self, patch: UpdateUser, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            email: patch.email.unwrap_or_else(|| self.email.clone()),
            credential_hash: patch
                .credential_hash
                .unwrap_or_else(|| self.credential_hash.clone()),
            first_name: patch.first_name.unwrap_or_else(|| self.first_name.clone()),
            last_name: patch.last_name.unwrap_or_else(|| self.last_name.clone()),
            role: patch.role.unwrap_or(self.role),
            created_at: self.created_at,
            updated_at: now,
        }
    }

    /// The view of this user that may be returned to callers.
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// User without credential material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a user
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub credential_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub credential_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
}

/// Registration request
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
}

/// Login request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Missing email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Missing password"))]
    pub password: String,
}

/// Token plus the public user it was issued for
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
}

/// Who is acting on a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: UserRole,
}

impl Actor {
    pub fn is_librarian(&self) -> bool {
        self.role == UserRole::Librarian
    }
}

/// JWT Claims for authenticated users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// User id
    pub sub: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

impl UserClaims {
    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.sub.clone(),
            role: self.role,
        }
    }

    pub fn require_librarian(&self) -> Result<(), AppError> {
        if self.role == UserRole::Librarian {
            Ok(())
        } else {
            Err(AppError::Authorization("Insufficient permissions".to_string()))
        }
    }
}
