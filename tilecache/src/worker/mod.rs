//! Background worker serializing storage I/O and downloads.
//!
//! All disk and network work of a [`Cache`](crate::cache::Cache) runs on one
//! [`AsyncWorker`] thread as boxed [`Task`]s.

mod service;
mod task;

pub use service::AsyncWorker;
pub use task::{Task, TaskError};
