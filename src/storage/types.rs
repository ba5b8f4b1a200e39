use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another feedsync process appears to hold the database lock. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A write violated a schema constraint (dangling reference, duplicate key, ...)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A sync transaction hit an error earlier and can only be rolled back
    #[error("Sync transaction failed: {0}")]
    TransactionFailed(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error into lock, constraint, or generic failures
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        if let sqlx::Error::Database(db_err) = &err {
            if !matches!(db_err.kind(), sqlx::error::ErrorKind::Other) {
                return DatabaseError::Constraint(db_err.message().to_string());
            }
        }

        DatabaseError::Other(err)
    }

    /// True when the error came from a constraint violation
    pub fn is_constraint(&self) -> bool {
        matches!(self, DatabaseError::Constraint(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Folder content to insert or update, keyed by remote identifier
#[derive(Debug, Clone, PartialEq)]
pub struct FolderUpsert {
    pub remote_id: String,
    pub name: String,
}

/// Feed content to insert or update, keyed by remote identifier.
///
/// The parent folder is referenced by remote identifier and resolved to a
/// local id inside the applying transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpsert {
    pub remote_id: String,
    pub name: String,
    pub url: String,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub folder_remote_id: Option<String>,
}

/// Item content to insert or update, keyed by remote identifier.
///
/// `read` and `starred` only apply when the row is inserted; an existing
/// row keeps its local user state.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpsert {
    pub remote_id: String,
    pub feed_remote_id: String,
    pub guid: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub image_link: Option<String>,
    pub author: Option<String>,
    pub pub_date: Option<i64>,
    pub read_time: f64,
    pub read: bool,
    pub starred: bool,
    pub fingerprint: String,
}

/// One write against the local store, as emitted by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    UpsertFolder(FolderUpsert),
    UpsertFeed(FeedUpsert),
    UpsertItem(ItemUpsert),
    DeleteItem { remote_id: String },
    DeleteFeed { remote_id: String },
    DeleteFolder { remote_id: String },
}

impl Mutation {
    /// Short label used in logs and for grouping consecutive writes
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::UpsertFolder(_) => "upsert_folder",
            Mutation::UpsertFeed(_) => "upsert_feed",
            Mutation::UpsertItem(_) => "upsert_item",
            Mutation::DeleteItem { .. } => "delete_item",
            Mutation::DeleteFeed { .. } => "delete_feed",
            Mutation::DeleteFolder { .. } => "delete_folder",
        }
    }
}

/// Row counts written by one mutation batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub folders_upserted: u64,
    pub feeds_upserted: u64,
    pub items_upserted: u64,
    pub items_deleted: u64,
    pub feeds_deleted: u64,
    pub folders_deleted: u64,
}

impl ApplyReport {
    pub fn total(&self) -> u64 {
        self.folders_upserted
            + self.feeds_upserted
            + self.items_upserted
            + self.items_deleted
            + self.feeds_deleted
            + self.folders_deleted
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFolder {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFeed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub folder_remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotItem {
    pub id: i64,
    pub feed_remote_id: String,
    pub read: bool,
    pub starred: bool,
    pub fingerprint: String,
}

/// Local state keyed by remote identifier, read in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    pub folders: HashMap<String, SnapshotFolder>,
    pub feeds: HashMap<String, SnapshotFeed>,
    pub items: HashMap<String, SnapshotItem>,
}

impl LocalSnapshot {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.feeds.is_empty() && self.items.is_empty()
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for the item/feed join (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemWithFeedRow {
    pub id: i64,
    pub remote_id: String,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub image_link: Option<String>,
    pub author: Option<String>,
    pub pub_date: Option<i64>,
    pub read_time: f64,
    pub read: bool,
    pub starred: bool,
    pub fingerprint: String,
    pub feed_name: String,
    pub folder_name: Option<String>,
}

impl ItemWithFeedRow {
    pub(crate) fn into_projection(self) -> ItemWithFeed {
        ItemWithFeed {
            item: Item {
                id: self.id,
                remote_id: self.remote_id,
                feed_id: self.feed_id,
                guid: self.guid,
                title: Arc::from(self.title),
                description: self.description,
                content: self.content.map(Arc::from),
                link: self.link,
                image_link: self.image_link,
                author: self.author,
                pub_date: self.pub_date,
                read_time: self.read_time,
                read: self.read,
                starred: self.starred,
                fingerprint: self.fingerprint,
            },
            feed_name: Arc::from(self.feed_name),
            folder_name: self.folder_name.map(Arc::from),
        }
    }
}

/// Row type for feed query with unread count
pub(crate) type FeedRow = (
    i64,
    String,
    Option<i64>,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
);

pub(crate) fn feed_from_row(row: FeedRow) -> Feed {
    let (id, remote_id, folder_id, name, url, site_url, icon_url, unread_count) = row;
    Feed {
        id,
        remote_id,
        folder_id,
        name: Arc::from(name),
        url,
        site_url,
        icon_url,
        unread_count,
    }
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,
    pub remote_id: String,
    pub name: String,
}

/// Feed data from database, with its unread item count
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub remote_id: String,
    pub folder_id: Option<i64>,
    pub name: Arc<str>,
    pub url: String,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub unread_count: i64,
}

/// Item data from database
///
/// `title` and `content` use `Arc<str>` so projections can be cloned cheaply
/// by consumers holding them across renders.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: i64,
    pub remote_id: String,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub title: Arc<str>,
    pub description: Option<String>,
    pub content: Option<Arc<str>>,
    pub link: Option<String>,
    pub image_link: Option<String>,
    pub author: Option<String>,
    pub pub_date: Option<i64>,
    /// Estimated reading time in minutes
    pub read_time: f64,
    pub read: bool,
    pub starred: bool,
    pub fingerprint: String,
}

/// Read-only projection: an item joined with its owning feed's name and,
/// when the feed is filed, its folder's name.
///
/// Never persisted; recomputed from the join on every query.
#[derive(Debug, Clone)]
pub struct ItemWithFeed {
    pub item: Item,
    pub feed_name: Arc<str>,
    pub folder_name: Option<Arc<str>>,
}

/// A folder with the feeds filed under it. `folder` is `None` for the
/// unfiled group.
#[derive(Debug, Clone)]
pub struct FolderWithFeeds {
    pub folder: Option<Folder>,
    pub feeds: Vec<Feed>,
}

impl FolderWithFeeds {
    pub fn unread_count(&self) -> i64 {
        self.feeds.iter().map(|f| f.unread_count).sum()
    }
}

/// A read/star change made locally and not yet acknowledged remotely.
///
/// `read`/`starred` are `None` when that flag was not touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStateChange {
    pub id: i64,
    pub item_id: i64,
    pub remote_id: String,
    pub read: Option<bool>,
    pub starred: Option<bool>,
}

/// Filters for [`Database::get_items_with_feed`](super::Database::get_items_with_feed)
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub feed_id: Option<i64>,
    pub folder_id: Option<i64>,
    pub unread_only: bool,
    pub starred_only: bool,
    pub limit: Option<i64>,
}
