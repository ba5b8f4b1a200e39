//! Diff a fetched batch against the local snapshot.
//!
//! The reconciler is pure: it reads a [`LocalSnapshot`] and a
//! [`SyncResults`] batch and returns the ordered [`Mutation`] list that
//! brings the store in line with the remote. It never touches the database.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use super::batch::{RemoteFeed, RemoteFolder, RemoteItem, SyncResults, SyncType};
use crate::storage::{FeedUpsert, FolderUpsert, ItemUpsert, LocalSnapshot, Mutation};
use crate::util::{estimate_read_time, sanitize_name, DEFAULT_WORDS_PER_MINUTE};

/// A batch that cannot be applied without breaking referential integrity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Item {item_remote_id} references unknown feed {feed_remote_id}")]
    UnknownFeed {
        item_remote_id: String,
        feed_remote_id: String,
    },
    #[error("Remote {kind} without an identifier")]
    MissingRemoteId { kind: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// On full syncs, delete local items the remote no longer lists
    pub delete_missing_items: bool,
    /// Reading speed for `read_time`
    pub words_per_minute: u32,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            delete_missing_items: true,
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
        }
    }
}

/// Per-entity counts of what a reconciliation decided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntitySummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl EntitySummary {
    pub fn changed(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub folders: EntitySummary,
    pub feeds: EntitySummary,
    pub items: EntitySummary,
}

/// Result of a successful reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Folder upserts, feed upserts, item upserts, then item, feed and
    /// folder deletes
    pub mutations: Vec<Mutation>,
    pub summary: SyncSummary,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Compute the mutations that bring `local` in line with `remote`.
    ///
    /// Folders and feeds in the batch are the complete remote set, so local
    /// ones it no longer lists are deleted on every round. Items missing from
    /// the batch are only deleted on `Initial` rounds.
    ///
    /// Remote wins on content fields. Existing items keep their local
    /// read/starred flags; new items take the remote's.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownFeed`] when an item's feed is not in
    /// the batch, and [`ValidationError::MissingRemoteId`]
    /// when any entity has an empty remote identifier.
    pub fn reconcile(
        &self,
        local: &LocalSnapshot,
        remote: SyncResults,
        sync_type: SyncType,
    ) -> Result<Reconciliation, ValidationError> {
        let folders = dedupe("folder", remote.folders, |f: &RemoteFolder| &f.remote_id)?;
        let feeds = dedupe("feed", remote.feeds, |f: &RemoteFeed| &f.remote_id)?;
        let items = dedupe("item", remote.items, |i: &RemoteItem| &i.remote_id)?;

        let full = sync_type == SyncType::Initial;
        let mut summary = SyncSummary::default();
        let mut upserts = Vec::new();
        let mut deletes = Vec::new();

        // Folders and feeds are always the complete remote set; only items
        // arrive as a delta on incremental rounds.
        let known_folders: HashSet<&str> = folders.iter().map(|f| f.remote_id.as_str()).collect();

        for folder in &folders {
            let name = sanitize_name(&folder.name, &folder.remote_id);
            match local.folders.get(&folder.remote_id) {
                Some(existing) if existing.name == name => summary.folders.unchanged += 1,
                existing => {
                    if existing.is_some() {
                        summary.folders.updated += 1;
                    } else {
                        summary.folders.inserted += 1;
                    }
                    upserts.push(Mutation::UpsertFolder(FolderUpsert {
                        remote_id: folder.remote_id.clone(),
                        name,
                    }));
                }
            }
        }

        // Feeds
        let known_feeds: HashSet<&str> = feeds.iter().map(|f| f.remote_id.as_str()).collect();

        for feed in &feeds {
            let folder_remote_id = match feed.folder_remote_id.as_deref() {
                None | Some("") => None,
                Some(id) if known_folders.contains(id) => Some(id.to_string()),
                Some(id) => {
                    tracing::warn!(
                        feed = %feed.remote_id,
                        folder = %id,
                        "Feed references unknown folder, filing as unfiled"
                    );
                    None
                }
            };

            let upsert = FeedUpsert {
                remote_id: feed.remote_id.clone(),
                name: sanitize_name(&feed.name, &feed.remote_id),
                url: feed.url.clone(),
                site_url: feed.site_url.clone(),
                icon_url: feed.icon_url.clone(),
                folder_remote_id,
            };

            match local.feeds.get(&feed.remote_id) {
                Some(existing)
                    if existing.name == upsert.name
                        && existing.url == upsert.url
                        && existing.site_url == upsert.site_url
                        && existing.icon_url == upsert.icon_url
                        && existing.folder_remote_id == upsert.folder_remote_id =>
                {
                    summary.feeds.unchanged += 1;
                }
                existing => {
                    if existing.is_some() {
                        summary.feeds.updated += 1;
                    } else {
                        summary.feeds.inserted += 1;
                    }
                    upserts.push(Mutation::UpsertFeed(upsert));
                }
            }
        }

        // Items
        let mut seen_items: HashSet<&str> = HashSet::with_capacity(items.len());

        for item in &items {
            if !known_feeds.contains(item.feed_remote_id.as_str()) {
                return Err(ValidationError::UnknownFeed {
                    item_remote_id: item.remote_id.clone(),
                    feed_remote_id: item.feed_remote_id.clone(),
                });
            }
            seen_items.insert(item.remote_id.as_str());

            let fingerprint = fingerprint(item);
            let (read, starred) = match local.items.get(&item.remote_id) {
                Some(existing)
                    if existing.fingerprint == fingerprint
                        && existing.feed_remote_id == item.feed_remote_id =>
                {
                    summary.items.unchanged += 1;
                    continue;
                }
                Some(existing) => {
                    summary.items.updated += 1;
                    (existing.read, existing.starred)
                }
                None => {
                    summary.items.inserted += 1;
                    (item.read, item.starred)
                }
            };

            let text = item
                .content
                .as_deref()
                .or(item.description.as_deref())
                .unwrap_or("");

            upserts.push(Mutation::UpsertItem(ItemUpsert {
                remote_id: item.remote_id.clone(),
                feed_remote_id: item.feed_remote_id.clone(),
                guid: item.guid.clone(),
                title: item.title.clone(),
                description: item.description.clone(),
                content: item.content.clone(),
                link: item.link.clone(),
                image_link: item.image_link.clone(),
                author: item.author.clone(),
                pub_date: item.pub_date,
                read_time: estimate_read_time(text, self.options.words_per_minute),
                read,
                starred,
                fingerprint,
            }));
        }

        if full && self.options.delete_missing_items {
            for (remote_id, _) in missing(&local.items, |id| seen_items.contains(id), |i| i.id) {
                summary.items.deleted += 1;
                deletes.push(Mutation::DeleteItem { remote_id });
            }
        }

        // Items of a removed feed go with it through the cascade.
        for (remote_id, _) in missing(&local.feeds, |id| known_feeds.contains(id), |f| f.id) {
            summary.feeds.deleted += 1;
            deletes.push(Mutation::DeleteFeed { remote_id });
        }

        for (remote_id, _) in missing(&local.folders, |id| known_folders.contains(id), |f| f.id) {
            summary.folders.deleted += 1;
            deletes.push(Mutation::DeleteFolder { remote_id });
        }

        tracing::debug!(
            %sync_type,
            upserts = upserts.len(),
            deletes = deletes.len(),
            unchanged_items = summary.items.unchanged,
            "Reconciled batch"
        );

        upserts.append(&mut deletes);
        Ok(Reconciliation {
            mutations: upserts,
            summary,
        })
    }
}

/// Collapse duplicate remote ids: the last occurrence wins, kept at the
/// position of the first.
fn dedupe<T>(
    kind: &'static str,
    entries: Vec<T>,
    key: impl Fn(&T) -> &String,
) -> Result<Vec<T>, ValidationError> {
    let mut out: Vec<T> = Vec::with_capacity(entries.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.len());

    for entry in entries {
        let id = key(&entry);
        if id.trim().is_empty() {
            return Err(ValidationError::MissingRemoteId { kind });
        }
        match index.get(id) {
            Some(&pos) => {
                tracing::debug!(kind, remote_id = %id, "Duplicate remote id in batch, last one wins");
                out[pos] = entry;
            }
            None => {
                index.insert(id.clone(), out.len());
                out.push(entry);
            }
        }
    }

    Ok(out)
}

/// Local entries whose remote id is not retained, ordered by local id
fn missing<V>(
    local: &HashMap<String, V>,
    retained: impl Fn(&str) -> bool,
    local_id: impl Fn(&V) -> i64,
) -> Vec<(String, i64)> {
    let mut gone: Vec<(String, i64)> = local
        .iter()
        .filter(|(remote_id, _)| !retained(remote_id.as_str()))
        .map(|(remote_id, v)| (remote_id.clone(), local_id(v)))
        .collect();
    gone.sort_by_key(|(_, id)| *id);
    gone
}

/// SHA-256 over an item's content fields, hex encoded.
///
/// Each field is length-prefixed so adjacent fields cannot run together.
pub fn fingerprint(item: &RemoteItem) -> String {
    let mut hasher = Sha256::new();

    let mut field = |value: Option<&str>| match value {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update((v.len() as u64).to_le_bytes());
            hasher.update(v.as_bytes());
        }
        None => hasher.update([0u8]),
    };

    field(Some(item.feed_remote_id.as_str()));
    field(item.guid.as_deref());
    field(Some(item.title.as_str()));
    field(item.description.as_deref());
    field(item.content.as_deref());
    field(item.link.as_deref());
    field(item.image_link.as_deref());
    field(item.author.as_deref());
    let pub_date = item.pub_date.map(|d| d.to_string());
    field(pub_date.as_deref());

    format!("{:x}", hasher.finalize())
}
