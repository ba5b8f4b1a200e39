use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{
    DatabaseError, Folder, FolderWithFeeds, ItemQuery, ItemWithFeed, ItemWithFeedRow,
};

/// Maximum number of items to return from any single query (OOM protection)
const MAX_ITEMS: i64 = 2000;

/// Default page size when the caller does not set a limit
const DEFAULT_ITEM_LIMIT: i64 = 500;

/// Columns of the item/feed join, in `ItemWithFeedRow` order
const ITEM_WITH_FEED_SELECT: &str = r#"
    SELECT
        i.id, i.remote_id, i.feed_id, i.guid, i.title, i.description, i.content,
        i.link, i.image_link, i.author, i.pub_date, i.read_time, i.read, i.starred,
        i.fingerprint, f.name AS feed_name, d.name AS folder_name
    FROM items i
    INNER JOIN feeds f ON i.feed_id = f.id
    LEFT JOIN folders d ON f.folder_id = d.id
"#;

impl Database {
    // ========================================================================
    // Read-model Projections
    // ========================================================================

    /// Items joined with their feed name, newest first.
    ///
    /// Filters combine with AND. The limit defaults to 500 and is capped at
    /// 2000.
    pub async fn get_items_with_feed(
        &self,
        query: &ItemQuery,
    ) -> Result<Vec<ItemWithFeed>, DatabaseError> {
        let limit = query.limit.unwrap_or(DEFAULT_ITEM_LIMIT).clamp(0, MAX_ITEMS);

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(ITEM_WITH_FEED_SELECT);
        builder.push(" WHERE 1 = 1");
        if let Some(feed_id) = query.feed_id {
            builder.push(" AND i.feed_id = ").push_bind(feed_id);
        }
        if let Some(folder_id) = query.folder_id {
            builder.push(" AND f.folder_id = ").push_bind(folder_id);
        }
        if query.unread_only {
            builder.push(" AND i.read = 0");
        }
        if query.starred_only {
            builder.push(" AND i.starred = 1");
        }
        builder
            .push(" ORDER BY i.pub_date DESC, i.id DESC LIMIT ")
            .push_bind(limit);

        let rows: Vec<ItemWithFeedRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        tracing::debug!(
            rows = rows.len(),
            limit = limit,
            feed_id = ?query.feed_id,
            folder_id = ?query.folder_id,
            "get_items_with_feed"
        );

        Ok(rows.into_iter().map(ItemWithFeedRow::into_projection).collect())
    }

    /// A single item joined with its feed name
    pub async fn get_item_with_feed(
        &self,
        item_id: i64,
    ) -> Result<Option<ItemWithFeed>, DatabaseError> {
        let row: Option<ItemWithFeedRow> =
            sqlx::query_as(&format!("{ITEM_WITH_FEED_SELECT} WHERE i.id = ?"))
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(ItemWithFeedRow::into_projection))
    }

    /// Folders with their feeds and unread counts.
    ///
    /// Folders are sorted by name and keep an empty feed list when nothing is
    /// filed under them. Unfiled feeds come last, in a group with no folder.
    pub async fn get_folders_with_feeds(&self) -> Result<Vec<FolderWithFeeds>, DatabaseError> {
        // Read both lists from one snapshot so a concurrent sync can't split them.
        let mut tx = self.pool.begin().await?;

        let folders: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, remote_id, name FROM folders ORDER BY name COLLATE NOCASE, id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let feeds: Vec<super::types::FeedRow> = sqlx::query_as(
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
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut groups: Vec<FolderWithFeeds> = folders
            .into_iter()
            .map(|(id, remote_id, name)| FolderWithFeeds {
                folder: Some(Folder { id, remote_id, name }),
                feeds: Vec::new(),
            })
            .collect();
        let mut unfiled = Vec::new();

        for feed in feeds.into_iter().map(super::types::feed_from_row) {
            let slot = feed.folder_id.and_then(|folder_id| {
                groups
                    .iter_mut()
                    .find(|g| g.folder.as_ref().map(|f| f.id) == Some(folder_id))
            });
            match slot {
                Some(group) => group.feeds.push(feed),
                None => unfiled.push(feed),
            }
        }

        if !unfiled.is_empty() {
            groups.push(FolderWithFeeds {
                folder: None,
                feeds: unfiled,
            });
        }

        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{
        Database, FeedUpsert, FolderUpsert, ItemQuery, ItemUpsert, Mutation,
    };

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn folder(remote_id: &str, name: &str) -> Mutation {
        Mutation::UpsertFolder(FolderUpsert {
            remote_id: remote_id.into(),
            name: name.into(),
        })
    }

    fn feed(remote_id: &str, name: &str, folder: Option<&str>) -> Mutation {
        Mutation::UpsertFeed(FeedUpsert {
            remote_id: remote_id.into(),
            name: name.into(),
            url: format!("https://{remote_id}.example.com/rss"),
            site_url: None,
            icon_url: None,
            folder_remote_id: folder.map(str::to_string),
        })
    }

    fn item(remote_id: &str, feed: &str, pub_date: i64) -> Mutation {
        Mutation::UpsertItem(ItemUpsert {
            remote_id: remote_id.into(),
            feed_remote_id: feed.into(),
            guid: None,
            title: format!("Item {remote_id}"),
            description: Some("desc".into()),
            content: Some("content".into()),
            link: None,
            image_link: None,
            author: Some("Author".into()),
            pub_date: Some(pub_date),
            read_time: 1.5,
            read: false,
            starred: false,
            fingerprint: format!("fp-{remote_id}"),
        })
    }

    async fn seeded() -> Database {
        let db = test_db().await;
        db.apply_mutations(&[
            folder("tech", "Tech"),
            folder("empty", "Archive"),
            feed("a", "Alpha News", Some("tech")),
            feed("b", "Beta Blog", None),
            item("1", "a", 100),
            item("2", "a", 300),
            item("3", "b", 200),
        ])
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_items_carry_feed_name_newest_first() {
        let db = seeded().await;
        let items = db.get_items_with_feed(&ItemQuery::default()).await.unwrap();

        let got: Vec<(&str, &str)> = items
            .iter()
            .map(|i| (i.item.remote_id.as_str(), &*i.feed_name))
            .collect();
        assert_eq!(
            got,
            vec![("2", "Alpha News"), ("3", "Beta Blog"), ("1", "Alpha News")]
        );
        assert_eq!(items[0].item.author.as_deref(), Some("Author"));
        assert_eq!(items[0].item.read_time, 1.5);
    }

    #[tokio::test]
    async fn test_items_carry_folder_name_when_filed() {
        let db = seeded().await;
        let items = db.get_items_with_feed(&ItemQuery::default()).await.unwrap();

        let got: Vec<(&str, Option<&str>)> = items
            .iter()
            .map(|i| (i.item.remote_id.as_str(), i.folder_name.as_deref()))
            .collect();
        assert_eq!(got, vec![("2", Some("Tech")), ("3", None), ("1", Some("Tech"))]);

        // Deleting the folder unfiles the feed; its items stay
        db.apply_mutations(&[Mutation::DeleteFolder {
            remote_id: "tech".into(),
        }])
        .await
        .unwrap();
        let item1 = db
            .get_item_with_feed(items[2].item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item1.folder_name, None);
        assert_eq!(&*item1.feed_name, "Alpha News");
    }

    #[tokio::test]
    async fn test_feed_rename_shows_in_projection() {
        let db = seeded().await;
        db.apply_mutations(&[feed("b", "Beta Renamed", None)])
            .await
            .unwrap();

        let items = db.get_items_with_feed(&ItemQuery::default()).await.unwrap();
        let item3 = items.iter().find(|i| i.item.remote_id == "3").unwrap();
        assert_eq!(&*item3.feed_name, "Beta Renamed");
    }

    #[tokio::test]
    async fn test_item_query_filters() {
        let db = seeded().await;
        let feeds = db.get_feeds_with_unread_counts().await.unwrap();
        let alpha = feeds.iter().find(|f| f.remote_id == "a").unwrap();

        let by_feed = db
            .get_items_with_feed(&ItemQuery {
                feed_id: Some(alpha.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_feed.len(), 2);

        let folder_id = alpha.folder_id.unwrap();
        let by_folder = db
            .get_items_with_feed(&ItemQuery {
                folder_id: Some(folder_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_folder.len(), 2);

        db.mark_item_read(by_feed[0].item.id, true).await.unwrap();
        db.mark_item_starred(by_feed[1].item.id, true).await.unwrap();

        let unread = db
            .get_items_with_feed(&ItemQuery {
                unread_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unread.len(), 2);

        let starred = db
            .get_items_with_feed(&ItemQuery {
                starred_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(starred.len(), 1);
        assert_eq!(starred[0].item.id, by_feed[1].item.id);

        let limited = db
            .get_items_with_feed(&ItemQuery {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_get_item_with_feed() {
        let db = seeded().await;
        let items = db.get_items_with_feed(&ItemQuery::default()).await.unwrap();

        let single = db.get_item_with_feed(items[1].item.id).await.unwrap().unwrap();
        assert_eq!(single.item.remote_id, items[1].item.remote_id);
        assert_eq!(single.feed_name, items[1].feed_name);

        assert!(db.get_item_with_feed(424242).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_folders_with_feeds_groups_and_orders() {
        let db = seeded().await;
        let groups = db.get_folders_with_feeds().await.unwrap();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].folder.as_ref().unwrap().name, "Archive");
        assert!(groups[0].feeds.is_empty());

        assert_eq!(groups[1].folder.as_ref().unwrap().name, "Tech");
        assert_eq!(groups[1].feeds.len(), 1);
        assert_eq!(&*groups[1].feeds[0].name, "Alpha News");
        assert_eq!(groups[1].unread_count(), 2);

        assert!(groups[2].folder.is_none());
        assert_eq!(&*groups[2].feeds[0].name, "Beta Blog");
        assert_eq!(groups[2].unread_count(), 1);
    }

    #[tokio::test]
    async fn test_folders_with_feeds_without_unfiled() {
        let db = test_db().await;
        db.apply_mutations(&[folder("x", "Only"), feed("f", "Filed", Some("x"))])
            .await
            .unwrap();

        let groups = db.get_folders_with_feeds().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].folder.is_some());
    }
}
