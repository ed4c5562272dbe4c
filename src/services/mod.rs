//! Business logic services

pub mod auth;
pub mod catalog;
pub mod loans;
pub mod maintenance;
pub mod users;

use std::sync::Arc;

use crate::{config::AppConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub catalog: catalog::CatalogService,
    pub users: users::UsersService,
    pub loans: loans::LoansService,
    pub maintenance: maintenance::MaintenanceService,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(
        repository: Repository,
        config: &AppConfig,
        hasher: Arc<dyn auth::CredentialHasher>,
    ) -> Self {
        let auth = auth::AuthService::new(config.auth.clone(), hasher);
        Self {
            users: users::UsersService::new(repository.clone(), auth.clone()),
            auth,
            catalog: catalog::CatalogService::new(repository.clone()),
            loans: loans::LoansService::new(repository.clone(), config.loans.clone()),
            maintenance: maintenance::MaintenanceService::new(repository),
        }
    }
}
