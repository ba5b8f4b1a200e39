use super::schema::Database;
use super::types::{DatabaseError, PendingStateChange};

/// Which user-state flag a local change touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateFlag {
    Read,
    Starred,
}

impl Database {
    // ========================================================================
    // User State Operations
    // ========================================================================

    /// Mark an item read or unread and queue the change for the next sync.
    ///
    /// Returns `false` if no item has this id.
    pub async fn mark_item_read(&self, item_id: i64, read: bool) -> Result<bool, DatabaseError> {
        self.set_item_flag(item_id, StateFlag::Read, read).await
    }

    /// Star or unstar an item and queue the change for the next sync.
    ///
    /// Returns `false` if no item has this id.
    pub async fn mark_item_starred(
        &self,
        item_id: i64,
        starred: bool,
    ) -> Result<bool, DatabaseError> {
        self.set_item_flag(item_id, StateFlag::Starred, starred).await
    }

    /// Update the flag and its pending change in one transaction.
    ///
    /// The pending row is deleted and re-inserted so its id moves past any
    /// watermark handed to an in-flight sync round.
    async fn set_item_flag(
        &self,
        item_id: i64,
        flag: StateFlag,
        value: bool,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let update = match flag {
            StateFlag::Read => "UPDATE items SET read = ? WHERE id = ?",
            StateFlag::Starred => "UPDATE items SET starred = ? WHERE id = ?",
        };
        let result = sqlx::query(update)
            .bind(value)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(item_id = item_id, "No item to update");
            return Ok(false);
        }

        let previous: Option<(bool, bool, bool, bool)> = sqlx::query_as(
            "DELETE FROM item_state_changes WHERE item_id = ? \
             RETURNING read_change, star_change, read, starred",
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (mut read_change, mut star_change, mut read, mut starred) =
            previous.unwrap_or((false, false, false, false));
        match flag {
            StateFlag::Read => {
                read_change = true;
                read = value;
            }
            StateFlag::Starred => {
                star_change = true;
                starred = value;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO item_state_changes (item_id, read_change, star_change, read, starred)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(item_id)
        .bind(read_change)
        .bind(star_change)
        .bind(read)
        .bind(starred)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Local read/star changes not yet acknowledged by the remote, oldest first
    pub async fn get_pending_state_changes(&self) -> Result<Vec<PendingStateChange>, DatabaseError> {
        let rows: Vec<(i64, i64, String, bool, bool, bool, bool)> = sqlx::query_as(
            r#"
            SELECT c.id, c.item_id, i.remote_id, c.read_change, c.star_change, c.read, c.starred
            FROM item_state_changes c
            INNER JOIN items i ON i.id = c.item_id
            ORDER BY c.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, item_id, remote_id, read_change, star_change, read, starred)| {
                    PendingStateChange {
                        id,
                        item_id,
                        remote_id,
                        read: read_change.then_some(read),
                        starred: star_change.then_some(starred),
                    }
                },
            )
            .collect())
    }
}
