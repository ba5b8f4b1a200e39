use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::batch::{SyncRequest, SyncType};
use super::reconciler::{ReconcileOptions, Reconciler, SyncSummary, ValidationError};
use super::source::{FetchError, SyncSource};
use crate::storage::{ApplyReport, Database, DatabaseError};

// ============================================================================
// Errors
// ============================================================================

/// Why a synchronization round did not commit.
///
/// Whatever the variant, nothing from the round is visible in the store.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Sync batch rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] DatabaseError),

    #[error("Sync cancelled before commit")]
    Cancelled,

    #[error("A sync round is already running")]
    AlreadyRunning,

    /// The spawned round panicked or was aborted
    #[error("Sync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation for a sync round.
///
/// Checked between phases and once more right before commit. Clones share
/// the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Outcome of a committed round
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub sync_type: SyncType,
    pub summary: SyncSummary,
    pub applied: ApplyReport,
    /// Pending state changes handed to the source in the request.
    ///
    /// Only these are cleared on commit; changes made while the round ran
    /// stay queued for the next one.
    pub state_changes_sent: u64,
    /// Timestamp recorded as the new `last_modified`
    pub synced_at: i64,
}

/// Drives fetch, reconcile and apply as one atomic round.
///
/// Only one round runs at a time per synchronizer; a second concurrent call
/// fails fast with [`SyncError::AlreadyRunning`]. Readers of the store are
/// never blocked and see either the old or the new state.
#[derive(Clone)]
pub struct Synchronizer {
    db: Database,
    source: Arc<dyn SyncSource>,
    reconciler: Reconciler,
    round: Arc<Mutex<()>>,
}

impl Synchronizer {
    pub fn new(db: Database, source: Arc<dyn SyncSource>, options: ReconcileOptions) -> Self {
        Self {
            db,
            source,
            reconciler: Reconciler::new(options),
            round: Arc::new(Mutex::new(())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run one synchronization round.
    ///
    /// 1. Build the request from pending state changes and `last_modified`
    /// 2. Fetch the remote batch while loading the local snapshot
    /// 3. Reconcile, then apply everything in one transaction together with
    ///    the new `last_modified` and the cleared state changes
    ///
    /// # Errors
    ///
    /// On any error, or when `cancel` fires before commit, the transaction is
    /// rolled back and the store is left exactly as it was.
    pub async fn synchronize(&self, cancel: &CancelFlag) -> Result<SyncReport, SyncError> {
        let _round = self.round.try_lock().map_err(|_| SyncError::AlreadyRunning)?;

        let synced_at = chrono::Utc::now().timestamp();

        let (last_modified, state_changes) = futures::try_join!(
            self.db.get_last_modified(),
            self.db.get_pending_state_changes()
        )?;

        let request = SyncRequest {
            sync_type: SyncType::for_last_modified(last_modified),
            last_modified,
            state_changes,
        };
        let watermark = request.state_watermark();

        tracing::info!(
            sync_type = %request.sync_type,
            last_modified = ?last_modified,
            state_changes = request.state_changes.len(),
            "Starting sync round"
        );
        cancel.check()?;

        let (remote, snapshot) = futures::try_join!(
            async { self.source.fetch(&request).await.map_err(SyncError::from) },
            async { self.db.load_snapshot().await.map_err(SyncError::from) }
        )?;
        cancel.check()?;

        let reconciliation = self
            .reconciler
            .reconcile(&snapshot, remote, request.sync_type)
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected sync batch"))?;
        cancel.check()?;

        let mut tx = self.db.begin_sync().await?;
        tx.apply(&reconciliation.mutations).await?;
        tx.set_last_modified(synced_at).await?;
        let state_changes_cleared = match watermark {
            Some(watermark) => tx.clear_state_changes(watermark).await?,
            None => 0,
        };
        let state_changes_sent = request.state_changes.len() as u64;

        if cancel.is_cancelled() {
            tx.rollback().await?;
            tracing::info!("Sync round cancelled, changes rolled back");
            return Err(SyncError::Cancelled);
        }

        let applied = tx.commit().await?;

        tracing::info!(
            sync_type = %request.sync_type,
            folders = reconciliation.summary.folders.changed(),
            feeds = reconciliation.summary.feeds.changed(),
            items = reconciliation.summary.items.changed(),
            unchanged_items = reconciliation.summary.items.unchanged,
            state_changes_sent,
            state_changes_cleared,
            "Sync round committed"
        );

        Ok(SyncReport {
            sync_type: request.sync_type,
            summary: reconciliation.summary,
            applied,
            state_changes_sent,
            synced_at,
        })
    }

    /// Run a round on a background task.
    pub fn spawn(&self) -> SyncHandle {
        let cancel = CancelFlag::new();
        let this = self.clone();
        let flag = cancel.clone();
        let task = tokio::spawn(async move { this.synchronize(&flag).await });
        SyncHandle { cancel, task }
    }
}

/// Handle to a round running on a background task
pub struct SyncHandle {
    cancel: CancelFlag,
    task: JoinHandle<Result<SyncReport, SyncError>>,
}

impl SyncHandle {
    /// Ask the round to stop at its next checkpoint
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the round at its current await point.
    ///
    /// An open transaction is dropped and rolled back.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<SyncReport, SyncError> {
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ItemQuery;
    use crate::sync::{RemoteFeed, RemoteItem, SyncResults};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn feed(id: &str) -> RemoteFeed {
        RemoteFeed {
            remote_id: id.to_string(),
            name: format!("Feed {id}"),
            url: format!("https://{id}.example/rss"),
            site_url: None,
            icon_url: None,
            folder_remote_id: None,
        }
    }

    fn item(id: &str, feed: &str) -> RemoteItem {
        RemoteItem {
            remote_id: id.to_string(),
            feed_remote_id: feed.to_string(),
            guid: None,
            title: format!("Item {id}"),
            description: None,
            content: None,
            link: None,
            image_link: None,
            author: None,
            pub_date: Some(1_700_000_000),
            read: false,
            starred: false,
        }
    }

    fn batch() -> SyncResults {
        SyncResults {
            folders: Vec::new(),
            feeds: vec![feed("10")],
            items: vec![item("100", "10"), item("101", "10")],
        }
    }

    /// Replays queued batches and records every request it sees
    #[derive(Default)]
    struct FakeSource {
        batches: StdMutex<Vec<SyncResults>>,
        requests: StdMutex<Vec<SyncRequest>>,
    }

    impl FakeSource {
        fn with(batches: Vec<SyncResults>) -> Arc<Self> {
            Arc::new(Self {
                batches: StdMutex::new(batches),
                requests: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl SyncSource for FakeSource {
        async fn fetch(&self, request: &SyncRequest) -> Result<SyncResults, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                return Err(FetchError::Unavailable("no batch queued".into()));
            }
            Ok(batches.remove(0))
        }
    }

    /// Blocks in `fetch` until released
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl SyncSource for GatedSource {
        async fn fetch(&self, _request: &SyncRequest) -> Result<SyncResults, FetchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(batch())
        }
    }

    async fn synchronizer(source: Arc<dyn SyncSource>) -> Synchronizer {
        let db = Database::open(":memory:").await.unwrap();
        Synchronizer::new(db, source, ReconcileOptions::default())
    }

    async fn item_count(db: &Database) -> usize {
        db.get_items_with_feed(&ItemQuery::default()).await.unwrap().len()
    }

    /// A later round that lists the same feeds but no new items
    fn feeds_only() -> SyncResults {
        SyncResults {
            items: Vec::new(),
            ..batch()
        }
    }

    #[tokio::test]
    async fn test_first_round_is_initial_then_incremental() {
        let source = FakeSource::with(vec![batch(), feeds_only()]);
        let sync = synchronizer(source.clone()).await;

        let first = sync.synchronize(&CancelFlag::new()).await.unwrap();
        assert_eq!(first.sync_type, SyncType::Initial);
        assert_eq!(first.summary.items.inserted, 2);
        assert_eq!(first.applied.items_upserted, 2);
        assert_eq!(
            sync.database().get_last_modified().await.unwrap(),
            Some(first.synced_at)
        );

        let second = sync.synchronize(&CancelFlag::new()).await.unwrap();
        assert_eq!(second.sync_type, SyncType::Incremental);
        assert_eq!(second.applied.total(), 0);
        assert_eq!(item_count(sync.database()).await, 2);

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[0].last_modified, None);
        assert_eq!(requests[1].last_modified, Some(first.synced_at));
    }

    #[tokio::test]
    async fn test_same_batch_twice_applies_nothing() {
        let source = FakeSource::with(vec![batch(), batch()]);
        let sync = synchronizer(source).await;

        sync.synchronize(&CancelFlag::new()).await.unwrap();
        let second = sync.synchronize(&CancelFlag::new()).await.unwrap();

        assert_eq!(second.applied, ApplyReport::default());
        assert_eq!(second.summary.items.unchanged, 2);
    }

    #[tokio::test]
    async fn test_rejected_batch_leaves_state_unchanged() {
        let bad = SyncResults {
            items: vec![item("200", "nowhere")],
            ..Default::default()
        };
        let source = FakeSource::with(vec![batch(), bad]);
        let sync = synchronizer(source).await;

        let first = sync.synchronize(&CancelFlag::new()).await.unwrap();
        let err = sync.synchronize(&CancelFlag::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::Validation(ValidationError::UnknownFeed { .. })));
        assert_eq!(item_count(sync.database()).await, 2);
        assert_eq!(
            sync.database().get_last_modified().await.unwrap(),
            Some(first.synced_at)
        );
    }

    #[tokio::test]
    async fn test_fetch_error_surfaces() {
        let sync = synchronizer(FakeSource::with(Vec::new())).await;

        let err = sync.synchronize(&CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(FetchError::Unavailable(_))));
        assert_eq!(sync.database().get_last_modified().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_changes_sent_and_cleared() {
        let source = FakeSource::with(vec![batch(), feeds_only()]);
        let sync = synchronizer(source.clone()).await;
        sync.synchronize(&CancelFlag::new()).await.unwrap();

        let items = sync
            .database()
            .get_items_with_feed(&ItemQuery::default())
            .await
            .unwrap();
        sync.database().mark_item_read(items[0].item.id, true).await.unwrap();

        let report = sync.synchronize(&CancelFlag::new()).await.unwrap();
        assert_eq!(report.state_changes_sent, 1);
        assert!(sync.database().get_pending_state_changes().await.unwrap().is_empty());

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[1].read_ids(), vec![items[0].item.remote_id.as_str()]);
    }

    #[tokio::test]
    async fn test_changes_made_during_round_stay_pending() {
        let db = Database::open(":memory:").await.unwrap();
        let seed = Synchronizer::new(db.clone(), FakeSource::with(vec![batch()]), ReconcileOptions::default());
        seed.synchronize(&CancelFlag::new()).await.unwrap();

        let items = db.get_items_with_feed(&ItemQuery::default()).await.unwrap();
        let (first, second) = (items[0].item.id, items[1].item.id);
        db.mark_item_read(first, true).await.unwrap();

        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sync = Synchronizer::new(db.clone(), source.clone(), ReconcileOptions::default());
        let handle = sync.spawn();
        source.entered.notified().await;

        // Toggling an item already in the request re-queues it past the watermark
        db.mark_item_starred(first, true).await.unwrap();
        db.mark_item_read(second, true).await.unwrap();
        source.release.notify_one();

        let report = handle.join().await.unwrap();
        assert_eq!(report.state_changes_sent, 1);

        let pending = db.get_pending_state_changes().await.unwrap();
        let pending: Vec<(i64, Option<bool>, Option<bool>)> =
            pending.iter().map(|c| (c.item_id, c.read, c.starred)).collect();
        assert_eq!(
            pending,
            vec![(first, Some(true), Some(true)), (second, Some(true), None)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_changes_nothing() {
        let sync = synchronizer(FakeSource::with(vec![batch()])).await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = sync.synchronize(&cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(item_count(sync.database()).await, 0);
        assert_eq!(sync.database().get_last_modified().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_during_fetch_discards_round() {
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sync = synchronizer(source.clone()).await;

        let handle = sync.spawn();
        source.entered.notified().await;
        handle.cancel();
        source.release.notify_one();

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(item_count(sync.database()).await, 0);
    }

    #[tokio::test]
    async fn test_abort_discards_round() {
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sync = synchronizer(source.clone()).await;

        let handle = sync.spawn();
        source.entered.notified().await;
        handle.abort();

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, SyncError::Task(e) if e.is_cancelled()));
        assert_eq!(item_count(sync.database()).await, 0);
        assert_eq!(sync.database().get_last_modified().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_concurrent_round_rejected() {
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sync = synchronizer(source.clone()).await;

        let handle = sync.spawn();
        source.entered.notified().await;

        let err = sync.synchronize(&CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning));

        source.release.notify_one();
        let report = handle.join().await.unwrap();
        assert_eq!(report.applied.items_upserted, 2);
    }
}
