// crates/core/src/management.rs
//! Listing and deleting operation records.
//!
//! Separate from `OperationHandle`: these calls act on records the server
//! keeps, typically for operations that already finished.

use std::sync::Arc;

use crate::error::TrackerError;
use crate::source::{ListFilter, OperationAdmin};
use crate::status::{OperationId, OperationStatus};

/// Thin management client over an [`OperationAdmin`] collaborator.
pub struct OperationManager<S> {
    admin: Arc<dyn OperationAdmin<S>>,
}

impl<S> Clone for OperationManager<S> {
    fn clone(&self) -> Self {
        Self {
            admin: Arc::clone(&self.admin),
        }
    }
}

impl<S: Send + Sync> OperationManager<S> {
    pub fn new(admin: Arc<dyn OperationAdmin<S>>) -> Self {
        Self { admin }
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<OperationStatus<S>>, TrackerError> {
        let statuses = self.admin.list(filter).await?;
        tracing::debug!(count = statuses.len(), ?filter, "listed operations");
        Ok(statuses)
    }

    /// Delete the server-side record of `id`.
    pub async fn delete(&self, id: &OperationId) -> Result<(), TrackerError> {
        self.admin.delete(id).await?;
        tracing::info!(operation_id = %id, "operation record deleted");
        Ok(())
    }
}
