use super::schema::Database;
use super::types::{feed_from_row, DatabaseError, Feed, FeedRow, Folder};

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Get all feeds with their unread item counts, ordered by name
    pub async fn get_feeds_with_unread_counts(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.remote_id, f.folder_id, f.name, f.url, f.site_url, f.icon_url,
                    COUNT(CASE WHEN i.read = 0 THEN 1 END) as unread_count
                FROM feeds f
                LEFT JOIN items i ON f.id = i.feed_id
                GROUP BY f.id
                ORDER BY f.name COLLATE NOCASE, f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    /// Look up a single feed by its remote identifier
    pub async fn get_feed_by_remote_id(&self, remote_id: &str) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.remote_id, f.folder_id, f.name, f.url, f.site_url, f.icon_url,
                    COUNT(CASE WHEN i.read = 0 THEN 1 END) as unread_count
                FROM feeds f
                LEFT JOIN items i ON f.id = i.feed_id
                WHERE f.remote_id = ?
                GROUP BY f.id
            "#,
        )
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(feed_from_row))
    }

    // ========================================================================
    // Folder Queries
    // ========================================================================

    /// Get all folders ordered by name
    pub async fn get_folders(&self) -> Result<Vec<Folder>, DatabaseError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, remote_id, name FROM folders ORDER BY name COLLATE NOCASE, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, remote_id, name)| Folder { id, remote_id, name })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, FeedUpsert, FolderUpsert, Mutation};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn feed(remote_id: &str, name: &str, folder: Option<&str>) -> Mutation {
        Mutation::UpsertFeed(FeedUpsert {
            remote_id: remote_id.to_string(),
            name: name.to_string(),
            url: format!("https://feed{remote_id}.example.com/rss"),
            site_url: Some(format!("https://feed{remote_id}.example.com")),
            icon_url: None,
            folder_remote_id: folder.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_feeds_ordered_by_name() {
        let db = test_db().await;
        db.apply_mutations(&[
            feed("1", "zeta", None),
            feed("2", "Alpha", None),
            feed("3", "beta", None),
        ])
        .await
        .unwrap();

        let feeds = db.get_feeds_with_unread_counts().await.unwrap();
        let names: Vec<&str> = feeds.iter().map(|f| &*f.name).collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
        assert!(feeds.iter().all(|f| f.unread_count == 0));
    }

    #[tokio::test]
    async fn test_feed_upsert_updates_fields_and_folder() {
        let db = test_db().await;
        db.apply_mutations(&[
            Mutation::UpsertFolder(FolderUpsert {
                remote_id: "f1".into(),
                name: "News".into(),
            }),
            feed("1", "Old", Some("f1")),
        ])
        .await
        .unwrap();

        db.apply_mutations(&[feed("1", "New", None)]).await.unwrap();

        let stored = db.get_feed_by_remote_id("1").await.unwrap().unwrap();
        assert_eq!(&*stored.name, "New");
        assert_eq!(stored.folder_id, None);
        assert_eq!(stored.site_url.as_deref(), Some("https://feed1.example.com"));
    }

    #[tokio::test]
    async fn test_get_feed_by_remote_id_missing() {
        let db = test_db().await;
        assert!(db.get_feed_by_remote_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_folders() {
        let db = test_db().await;
        db.apply_mutations(&[
            Mutation::UpsertFolder(FolderUpsert {
                remote_id: "b".into(),
                name: "Science".into(),
            }),
            Mutation::UpsertFolder(FolderUpsert {
                remote_id: "a".into(),
                name: "Art".into(),
            }),
        ])
        .await
        .unwrap();

        let folders = db.get_folders().await.unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].name, "Art");
        assert_eq!(folders[0].remote_id, "a");
        assert_eq!(folders[1].name, "Science");
    }
}
