//! repsync-core - Core library for repsync
//!
//! This crate contains the versioned record model, the on-device store, the
//! push/pull reconciler, the document transform layer, and the remote store
//! backends shared by the CLI and the fan-out service.

pub mod background;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod remote;
pub mod sync;
pub mod transform;
pub mod util;

pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use models::{RecordId, SyncRecord, SyncResult, SyncStatus, SyncTable};
