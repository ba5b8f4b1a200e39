use super::apply::LAST_MODIFIED_KEY;
use super::schema::Database;
use super::types::{
    DatabaseError, LocalSnapshot, SnapshotFeed, SnapshotFolder, SnapshotItem,
};

impl Database {
    // ========================================================================
    // Sync Bookkeeping
    // ========================================================================

    /// Timestamp of the last committed sync round, if any
    pub async fn get_last_modified(&self) -> Result<Option<i64>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(LAST_MODIFIED_KEY)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(value,)| match value.parse::<i64>() {
            Ok(ts) => Some(ts),
            Err(e) => {
                tracing::warn!(value = %value, error = %e, "Ignoring malformed last_modified");
                None
            }
        }))
    }

    /// Read the local state the reconciler diffs against.
    ///
    /// Folders, feeds and items are read inside one transaction so the
    /// snapshot is consistent even while other connections write.
    pub async fn load_snapshot(&self) -> Result<LocalSnapshot, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let folders: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT id, remote_id, name FROM folders")
                .fetch_all(&mut *tx)
                .await?;

        let feeds: Vec<(
            i64,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            r#"
            SELECT f.id, f.remote_id, f.name, f.url, f.site_url, f.icon_url, d.remote_id
            FROM feeds f
            LEFT JOIN folders d ON d.id = f.folder_id
        "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let items: Vec<(i64, String, String, bool, bool, String)> = sqlx::query_as(
            r#"
            SELECT i.id, i.remote_id, f.remote_id, i.read, i.starred, i.fingerprint
            FROM items i
            INNER JOIN feeds f ON f.id = i.feed_id
        "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let snapshot = LocalSnapshot {
            folders: folders
                .into_iter()
                .map(|(id, remote_id, name)| (remote_id, SnapshotFolder { id, name }))
                .collect(),
            feeds: feeds
                .into_iter()
                .map(
                    |(id, remote_id, name, url, site_url, icon_url, folder_remote_id)| {
                        (
                            remote_id,
                            SnapshotFeed {
                                id,
                                name,
                                url,
                                site_url,
                                icon_url,
                                folder_remote_id,
                            },
                        )
                    },
                )
                .collect(),
            items: items
                .into_iter()
                .map(|(id, remote_id, feed_remote_id, read, starred, fingerprint)| {
                    (
                        remote_id,
                        SnapshotItem {
                            id,
                            feed_remote_id,
                            read,
                            starred,
                            fingerprint,
                        },
                    )
                })
                .collect(),
        };

        tracing::debug!(
            folders = snapshot.folders.len(),
            feeds = snapshot.feeds.len(),
            items = snapshot.items.len(),
            "Loaded local snapshot"
        );

        Ok(snapshot)
    }
}
