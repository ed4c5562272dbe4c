//! Maintenance endpoints

use axum::{extract::State, Json};

use crate::{error::AppResult, repository::reconcile::ReconcileReport, AppState};

use super::AuthenticatedUser;

/// Rebuild missing secondary index entries and drop orphans
#[utoipa::path(
    post,
    path = "/maintenance/reconcile",
    tag = "maintenance",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reconciliation report", body = ReconcileReport),
        (status = 403, description = "Librarian role required", body = crate::error::ErrorResponse)
    )
)]
pub async fn reconcile(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ReconcileReport>> {
    claims.require_librarian()?;

    let report = state.services.maintenance.reconcile().await?;
    Ok(Json(report))
}
