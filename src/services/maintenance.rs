//! Store health and index maintenance

use crate::{
    error::AppResult,
    repository::{reconcile::ReconcileReport, Repository},
};

#[derive(Clone)]
pub struct MaintenanceService {
    repository: Repository,
}

impl MaintenanceService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Round-trip to the store backend
    pub async fn ping(&self) -> AppResult<()> {
        Ok(self.repository.store.ping().await?)
    }

    /// Repair secondary indexes
    pub async fn reconcile(&self) -> AppResult<ReconcileReport> {
        self.repository.reconciler().run().await
    }
}
