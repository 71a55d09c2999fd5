//! Push/pull reconciliation between the on-device store and the relational store
//!
//! Each `(table, user)` pair moves through `idle -> syncing -> success|error`.
//! Conflicts are settled by version alone: a pulled record replaces the local
//! copy only when its version is strictly higher. Wall-clock timestamps never
//! decide the outcome.

mod locks;
mod reconciler;

pub use locks::{SyncGuard, SyncLocks};
pub use reconciler::{resolve, Reconciler, Resolution, SyncDirection, SyncRequest, SyncTrigger};
