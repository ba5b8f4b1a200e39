//! Reconciles Nextcloud News style sync batches into a local SQLite store
//! and serves the joined read model.

pub mod config;
pub mod storage;
pub mod sync;
pub mod util;
