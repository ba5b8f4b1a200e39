//! SQLite-backed local store: folders, feeds, items, pending user-state
//! changes and sync bookkeeping, plus the joined read-model projections.

mod apply;
mod feeds;
mod items;
mod projection;
mod schema;
mod sync_state;
mod types;

pub use apply::SyncTransaction;
pub use schema::Database;
pub use types::{
    ApplyReport, DatabaseError, Feed, FeedUpsert, Folder, FolderUpsert, FolderWithFeeds, Item,
    ItemQuery, ItemUpsert, ItemWithFeed, LocalSnapshot, Mutation, PendingStateChange,
    SnapshotFeed, SnapshotFolder, SnapshotItem,
};
