//! Biblion lending library server
//!
//! Catalog, accounts and loans kept in an ordered key-value store, served
//! over a REST JSON API.

use std::sync::Arc;

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod repository;
pub mod services;
pub mod store;
pub mod validation;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
