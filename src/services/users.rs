//! Registration, login and profile lookup

use crate::{
    error::{AppError, AppResult},
    models::user::{AuthResponse, LoginRequest, NewUser, PublicUser, RegisterUser, User, UserRole},
    repository::Repository,
    services::auth::AuthService,
};

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
    auth: AuthService,
}

impl UsersService {
    pub fn new(repository: Repository, auth: AuthService) -> Self {
        Self { repository, auth }
    }

    /// Register a student account and sign it in
    pub async fn register(&self, request: RegisterUser) -> AppResult<AuthResponse> {
        if self
            .repository
            .users
            .find_by_email(&request.email)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let credential_hash = self.auth.hash_password(&request.password)?;
        let user = self
            .repository
            .users
            .create(NewUser {
                email: request.email,
                credential_hash,
                first_name: request.first_name,
                last_name: request.last_name,
                role: UserRole::Student,
            })
            .await?;

        tracing::info!(user_id = %user.id, "User registered");
        self.respond(&user)
    }

    /// Check credentials and issue a token
    pub async fn login(&self, request: LoginRequest) -> AppResult<AuthResponse> {
        let user = self
            .repository
            .users
            .find_by_email(&request.email)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid credentials".to_string()))?;

        if !self.auth.verify_password(&user, &request.password)? {
            return Err(AppError::Authentication("Invalid credentials".to_string()));
        }

        tracing::debug!(user_id = %user.id, "User logged in");
        self.respond(&user)
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: &str) -> AppResult<PublicUser> {
        self.repository
            .users
            .find_by_id(id)
            .await?
            .map(|user| user.to_public())
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    fn respond(&self, user: &User) -> AppResult<AuthResponse> {
        Ok(AuthResponse {
            token: self.auth.issue_token(user)?,
            user: user.to_public(),
        })
    }
}
