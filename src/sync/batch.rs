use serde::{Deserialize, Serialize};

use crate::storage::PendingStateChange;

/// A folder as received from the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub remote_id: String,
    pub name: String,
}

/// A feed as received from the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFeed {
    pub remote_id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    /// Remote id of the parent folder; `None` for unfiled feeds
    #[serde(default)]
    pub folder_remote_id: Option<String>,
}

/// An item as received from the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub remote_id: String,
    pub feed_remote_id: String,
    #[serde(default)]
    pub guid: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub image_link: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Publication time, unix seconds
    #[serde(default)]
    pub pub_date: Option<i64>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub starred: bool,
}

/// One synchronization round-trip worth of remote state.
///
/// The three sequences keep the order the remote service returned them in.
/// The batch has no identity and is dropped once reconciled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResults {
    #[serde(default)]
    pub folders: Vec<RemoteFolder>,
    #[serde(default)]
    pub feeds: Vec<RemoteFeed>,
    #[serde(default)]
    pub items: Vec<RemoteItem>,
}

impl SyncResults {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.feeds.is_empty() && self.items.is_empty()
    }
}

/// Whether a batch is the complete remote state or a delta since the last round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// First round: the batch describes everything the remote has
    Initial,
    /// Later rounds: the batch only holds what changed since `last_modified`
    Incremental,
}

impl SyncType {
    pub fn for_last_modified(last_modified: Option<i64>) -> Self {
        match last_modified {
            Some(_) => SyncType::Incremental,
            None => SyncType::Initial,
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncType::Initial => f.write_str("initial"),
            SyncType::Incremental => f.write_str("incremental"),
        }
    }
}

/// What a source is asked for at the start of a round
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub sync_type: SyncType,
    /// Timestamp of the last committed round, unix seconds
    pub last_modified: Option<i64>,
    /// Local read/star changes to push upstream
    pub state_changes: Vec<PendingStateChange>,
}

impl SyncRequest {
    /// Remote ids of items marked read locally
    pub fn read_ids(&self) -> Vec<&str> {
        self.state_changes
            .iter()
            .filter(|c| c.read == Some(true))
            .map(|c| c.remote_id.as_str())
            .collect()
    }

    /// Remote ids of items marked unread locally
    pub fn unread_ids(&self) -> Vec<&str> {
        self.state_changes
            .iter()
            .filter(|c| c.read == Some(false))
            .map(|c| c.remote_id.as_str())
            .collect()
    }

    /// Remote ids of items starred locally
    pub fn starred_ids(&self) -> Vec<&str> {
        self.state_changes
            .iter()
            .filter(|c| c.starred == Some(true))
            .map(|c| c.remote_id.as_str())
            .collect()
    }

    /// Remote ids of items unstarred locally
    pub fn unstarred_ids(&self) -> Vec<&str> {
        self.state_changes
            .iter()
            .filter(|c| c.starred == Some(false))
            .map(|c| c.remote_id.as_str())
            .collect()
    }

    /// Highest pending change id carried by this request
    pub fn state_watermark(&self) -> Option<i64> {
        self.state_changes.iter().map(|c| c.id).max()
    }
}
