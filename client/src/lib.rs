//! Client side of DocChat document uploads.
//!
//! [`controller::UploadController`] owns the list of tracked files. Each new
//! file is validated, then [`driver::UploadDriver`] takes it through the
//! pipeline while the controller persists every change through
//! [`store::SessionStore`]. [`poller::StatusPoller`] follows documents the
//! backend is still processing, and [`reconcile`] adopts a previous session
//! when a new process starts.

pub mod api;
pub mod controller;
pub mod driver;
pub mod error;
pub mod poller;
pub mod reconcile;
pub mod render;
pub mod store;
pub mod validate;

#[cfg(test)]
mod testing;

pub use api::{DocumentBackend, HttpBackend};
pub use controller::{UploadConfig, UploadController};
pub use error::{ClientError, ClientResult};
pub use store::{FileStore, MemoryStore, SessionStore};
