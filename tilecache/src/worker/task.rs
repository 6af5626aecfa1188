//! Task trait and task errors.
//!
//! A task is one unit of work for the [`AsyncWorker`](super::AsyncWorker).
//! It runs in two phases on the worker thread:
//!
//! 1. [`Task::execute`] does the I/O (storage read, download, write) and
//!    keeps whatever it produced inside the task.
//! 2. [`Task::notify`] consumes the task and hands the result to whoever is
//!    waiting for it.
//!
//! `notify` runs whether or not `execute` succeeded, so observers always hear
//! back. Tasks discarded at shutdown are dropped without `notify`.
//!
//! # Example
//!
//! ```ignore
//! struct Touch { path: PathBuf }
//!
//! impl Task for Touch {
//!     fn name(&self) -> &str { "Touch" }
//!
//!     fn execute(&mut self) -> Result<(), TaskError> {
//!         std::fs::write(&self.path, b"").map_err(StorageError::from)?;
//!         Ok(())
//!     }
//!
//!     fn notify(self: Box<Self>, success: bool) {
//!         tracing::info!(success, "touched");
//!     }
//! }
//! ```

use thiserror::Error;

use crate::provider::ProviderError;
use crate::storage::StorageError;

/// A unit of work run on the worker thread.
pub trait Task: Send + 'static {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Performs the task's I/O.
    ///
    /// An error is logged by the worker and reported to [`Task::notify`] as
    /// `success == false`.
    fn execute(&mut self) -> Result<(), TaskError>;

    /// Consumes the task and reports the outcome.
    fn notify(self: Box<Self>, success: bool);
}

/// Why a task failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A region file had no room left for a tile without losing another.
    #[error("region '{0}' storage is full")]
    RegionFull(String),
}
