// crates/core/src/shared.rs
//! Lazily initialised, process-shared client objects.
//!
//! Building a transport client can be expensive (TLS setup, auth handshake,
//! metadata discovery). [`SharedClient`] runs that setup exactly once no
//! matter how many tasks race to use the client first, and hands every
//! caller the same `Arc`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

/// One-shot async initialisation guard.
///
/// Only the transition into "initialising" is serialised; once the value is
/// set, `get` is a lock-free read. If the initialiser fails the cell stays
/// empty and the next caller runs its own initialiser.
pub struct SharedClient<T> {
    label: &'static str,
    cell: OnceCell<Arc<T>>,
}

impl<T> SharedClient<T> {
    /// Usable in `static` items.
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            cell: OnceCell::const_new(),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Return the shared value, running `init` if no value exists yet.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let label = self.label;
        let value = self
            .cell
            .get_or_try_init(|| async move {
                tracing::debug!(client = label, "initialising shared client");
                match init().await {
                    Ok(value) => {
                        tracing::info!(client = label, "shared client ready");
                        Ok(Arc::new(value))
                    }
                    Err(e) => {
                        tracing::warn!(client = label, error = %e, "shared client initialisation failed");
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(value))
    }
}

impl<T> std::fmt::Debug for SharedClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedClient")
            .field("label", &self.label)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
