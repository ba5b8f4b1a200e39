//! Synchronization with the remote news service.
//!
//! A round flows through four pieces:
//!
//! - **Source** ([`SyncSource`]): produces a [`SyncResults`] batch for a
//!   [`SyncRequest`] carrying pending local state changes
//! - **Reconciler** ([`Reconciler`]): pure diff of the batch against a
//!   [`LocalSnapshot`](crate::storage::LocalSnapshot) into ordered mutations
//! - **Store**: applies the mutations in one transaction
//! - **Synchronizer** ([`Synchronizer`]): runs the above as one cancellable,
//!   single-writer unit
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedsync::storage::Database;
//! use feedsync::sync::{CancelFlag, JsonFileSource, ReconcileOptions, Synchronizer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open("feedsync.db").await?;
//! let source = Arc::new(JsonFileSource::new("batch.json"));
//! let sync = Synchronizer::new(db, source, ReconcileOptions::default());
//!
//! let report = sync.synchronize(&CancelFlag::new()).await?;
//! println!("{} items changed", report.summary.items.changed());
//! # Ok(())
//! # }
//! ```

mod batch;
mod reconciler;
mod runner;
mod source;

pub use batch::{RemoteFeed, RemoteFolder, RemoteItem, SyncRequest, SyncResults, SyncType};
pub use reconciler::{
    fingerprint, EntitySummary, ReconcileOptions, Reconciler, Reconciliation, SyncSummary,
    ValidationError,
};
pub use runner::{CancelFlag, SyncError, SyncHandle, SyncReport, Synchronizer};
pub use source::{FetchError, JsonFileSource, SyncSource};
