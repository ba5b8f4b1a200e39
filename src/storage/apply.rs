use sqlx::{QueryBuilder, Sqlite, SqliteConnection, Transaction};

use super::schema::Database;
use super::types::{ApplyReport, DatabaseError, FeedUpsert, FolderUpsert, ItemUpsert, Mutation};

/// Rows per multi-row INSERT. Item rows bind 15 parameters, so 50 rows stay
/// well under SQLite's 999 parameter limit.
const ITEM_BATCH_SIZE: usize = 50;
const FEED_BATCH_SIZE: usize = 100;
const FOLDER_BATCH_SIZE: usize = 200;
const DELETE_BATCH_SIZE: usize = 500;

pub(crate) const LAST_MODIFIED_KEY: &str = "last_modified";

impl Database {
    /// Apply a mutation batch atomically.
    ///
    /// Either every mutation is written or none is: any failure rolls the
    /// transaction back and leaves the previous state visible.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Constraint` when a mutation violates the schema,
    /// e.g. an item whose feed does not exist.
    pub async fn apply_mutations(&self, mutations: &[Mutation]) -> Result<ApplyReport, DatabaseError> {
        let mut tx = self.begin_sync().await?;
        tx.apply(mutations).await?;
        tx.commit().await
    }

    /// Begin a write transaction for one synchronization round.
    ///
    /// Dropping the returned [`SyncTransaction`] without calling
    /// [`SyncTransaction::commit`] rolls every write back.
    pub async fn begin_sync(&self) -> Result<SyncTransaction, DatabaseError> {
        let tx = self.pool.begin().await?;
        Ok(SyncTransaction {
            tx,
            report: ApplyReport::default(),
            failed: false,
        })
    }
}

/// An open write transaction collecting the writes of one sync round.
pub struct SyncTransaction {
    tx: Transaction<'static, Sqlite>,
    report: ApplyReport,
    failed: bool,
}

impl SyncTransaction {
    /// Apply mutations in order, batching consecutive mutations of the same kind.
    ///
    /// Returns the row counts written by this call. After an error the
    /// transaction refuses to commit.
    pub async fn apply(&mut self, mutations: &[Mutation]) -> Result<ApplyReport, DatabaseError> {
        if self.failed {
            return Err(DatabaseError::TransactionFailed(
                "an earlier write failed, roll back before retrying".to_string(),
            ));
        }

        match apply_all(&mut self.tx, mutations).await {
            Ok(delta) => {
                self.report.folders_upserted += delta.folders_upserted;
                self.report.feeds_upserted += delta.feeds_upserted;
                self.report.items_upserted += delta.items_upserted;
                self.report.items_deleted += delta.items_deleted;
                self.report.feeds_deleted += delta.feeds_deleted;
                self.report.folders_deleted += delta.folders_deleted;
                Ok(delta)
            }
            Err(e) => {
                self.failed = true;
                tracing::warn!(error = %e, "Mutation batch failed, transaction will roll back");
                Err(e)
            }
        }
    }

    /// Record the timestamp of this sync round.
    pub async fn set_last_modified(&mut self, timestamp: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(LAST_MODIFIED_KEY)
        .bind(timestamp.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Drop pending state changes up to and including `watermark`.
    ///
    /// Changes recorded after the round's request was built have larger ids
    /// and survive.
    pub async fn clear_state_changes(&mut self, watermark: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM item_state_changes WHERE id <= ?")
            .bind(watermark)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    /// Commit all writes, making them visible to readers at once.
    pub async fn commit(self) -> Result<ApplyReport, DatabaseError> {
        if self.failed {
            self.tx.rollback().await?;
            return Err(DatabaseError::TransactionFailed(
                "refusing to commit after a failed write".to_string(),
            ));
        }
        self.tx.commit().await?;
        Ok(self.report)
    }

    /// Discard all writes.
    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn apply_all(
    conn: &mut SqliteConnection,
    mutations: &[Mutation],
) -> Result<ApplyReport, DatabaseError> {
    let mut report = ApplyReport::default();

    for run in mutations.chunk_by(|a, b| a.kind() == b.kind()) {
        tracing::trace!(kind = run[0].kind(), count = run.len(), "Applying mutation run");

        match &run[0] {
            Mutation::UpsertFolder(_) => {
                let folders: Vec<&FolderUpsert> = run
                    .iter()
                    .filter_map(|m| match m {
                        Mutation::UpsertFolder(f) => Some(f),
                        _ => None,
                    })
                    .collect();
                report.folders_upserted += upsert_folders(conn, &folders).await?;
            }
            Mutation::UpsertFeed(_) => {
                let feeds: Vec<&FeedUpsert> = run
                    .iter()
                    .filter_map(|m| match m {
                        Mutation::UpsertFeed(f) => Some(f),
                        _ => None,
                    })
                    .collect();
                report.feeds_upserted += upsert_feeds(conn, &feeds).await?;
            }
            Mutation::UpsertItem(_) => {
                let items: Vec<&ItemUpsert> = run
                    .iter()
                    .filter_map(|m| match m {
                        Mutation::UpsertItem(i) => Some(i),
                        _ => None,
                    })
                    .collect();
                report.items_upserted += upsert_items(conn, &items).await?;
            }
            Mutation::DeleteItem { .. } => {
                report.items_deleted += delete_by_remote_id(conn, "items", run).await?;
            }
            Mutation::DeleteFeed { .. } => {
                report.feeds_deleted += delete_by_remote_id(conn, "feeds", run).await?;
            }
            Mutation::DeleteFolder { .. } => {
                report.folders_deleted += delete_by_remote_id(conn, "folders", run).await?;
            }
        }
    }

    Ok(report)
}

async fn upsert_folders(
    conn: &mut SqliteConnection,
    folders: &[&FolderUpsert],
) -> Result<u64, DatabaseError> {
    let mut affected = 0;

    for chunk in folders.chunks(FOLDER_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO folders (remote_id, name) ");

        builder.push_values(chunk, |mut b, folder| {
            b.push_bind(&folder.remote_id).push_bind(&folder.name);
        });

        builder.push(" ON CONFLICT(remote_id) DO UPDATE SET name = excluded.name");

        affected += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}

async fn upsert_feeds(
    conn: &mut SqliteConnection,
    feeds: &[&FeedUpsert],
) -> Result<u64, DatabaseError> {
    let mut affected = 0;

    for chunk in feeds.chunks(FEED_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO feeds (remote_id, folder_id, name, url, site_url, icon_url) ",
        );

        // The folder is resolved by remote id inside the transaction, so a
        // folder upserted earlier in the same batch is already visible.
        builder.push_values(chunk, |mut b, feed| {
            b.push_bind(&feed.remote_id)
                .push("(SELECT id FROM folders WHERE remote_id = ")
                .push_bind_unseparated(&feed.folder_remote_id)
                .push_unseparated(")")
                .push_bind(&feed.name)
                .push_bind(&feed.url)
                .push_bind(&feed.site_url)
                .push_bind(&feed.icon_url);
        });

        builder.push(
            " ON CONFLICT(remote_id) DO UPDATE SET \
             folder_id = excluded.folder_id, name = excluded.name, url = excluded.url, \
             site_url = excluded.site_url, icon_url = excluded.icon_url",
        );

        affected += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}

/// Insert new items and refresh content of existing ones.
///
/// Existing rows keep `read`, `starred` and `fetched_at`; a feed that
/// cannot be resolved yields a NULL `feed_id` and fails the NOT NULL constraint.
async fn upsert_items(
    conn: &mut SqliteConnection,
    items: &[&ItemUpsert],
) -> Result<u64, DatabaseError> {
    let now = chrono::Utc::now().timestamp();
    let mut affected = 0;

    for chunk in items.chunks(ITEM_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO items (remote_id, feed_id, guid, title, description, content, link, \
             image_link, author, pub_date, read_time, read, starred, fingerprint, fetched_at) ",
        );

        builder.push_values(chunk, |mut b, item| {
            b.push_bind(&item.remote_id)
                .push("(SELECT id FROM feeds WHERE remote_id = ")
                .push_bind_unseparated(&item.feed_remote_id)
                .push_unseparated(")")
                .push_bind(&item.guid)
                .push_bind(&item.title)
                .push_bind(&item.description)
                .push_bind(&item.content)
                .push_bind(&item.link)
                .push_bind(&item.image_link)
                .push_bind(&item.author)
                .push_bind(item.pub_date)
                .push_bind(item.read_time)
                .push_bind(item.read)
                .push_bind(item.starred)
                .push_bind(&item.fingerprint)
                .push_bind(now);
        });

        builder.push(
            " ON CONFLICT(remote_id) DO UPDATE SET \
             feed_id = excluded.feed_id, guid = excluded.guid, title = excluded.title, \
             description = excluded.description, content = excluded.content, \
             link = excluded.link, image_link = excluded.image_link, author = excluded.author, \
             pub_date = excluded.pub_date, read_time = excluded.read_time, \
             fingerprint = excluded.fingerprint",
        );

        affected += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}

async fn delete_by_remote_id(
    conn: &mut SqliteConnection,
    table: &'static str,
    run: &[Mutation],
) -> Result<u64, DatabaseError> {
    let remote_ids: Vec<&str> = run
        .iter()
        .filter_map(|m| match m {
            Mutation::DeleteItem { remote_id }
            | Mutation::DeleteFeed { remote_id }
            | Mutation::DeleteFolder { remote_id } => Some(remote_id.as_str()),
            _ => None,
        })
        .collect();

    let mut affected = 0;
    for chunk in remote_ids.chunks(DELETE_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("DELETE FROM {table} WHERE remote_id IN ("));
        let mut separated = builder.separated(", ");
        for remote_id in chunk {
            separated.push_bind(*remote_id);
        }
        separated.push_unseparated(")");

        affected += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(affected)
}
