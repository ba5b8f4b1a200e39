use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use feedsync::config::Config;
use feedsync::storage::{Database, DatabaseError, ItemQuery};
use feedsync::sync::{CancelFlag, JsonFileSource, SyncError, Synchronizer};
use feedsync::util::strip_control_chars;

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Sync a news service into a local reading store")]
struct Args {
    /// Config file (defaults to ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a sync batch read from a JSON file
    Sync {
        #[arg(value_name = "BATCH")]
        batch: PathBuf,
    },
    /// List items, newest first
    Items {
        #[arg(long)]
        feed: Option<i64>,
        #[arg(long)]
        folder: Option<i64>,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        starred: bool,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// List folders with their feeds and unread counts
    Folders,
    /// Mark an item read (or unread with --unread)
    Read {
        id: i64,
        #[arg(long)]
        unread: bool,
    },
    /// Star an item (or unstar with --unstar)
    Star {
        id: i64,
        #[arg(long)]
        unstar: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        for suffix in ["-wal", "-shm"] {
            let mut side = db_path.clone().into_os_string();
            side.push(suffix);
            std::fs::remove_file(PathBuf::from(side)).ok();
        }
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another feedsync process appears to be writing. Please wait and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Sync { batch } => run_sync(db, &config, batch).await,
        Command::Items {
            feed,
            folder,
            unread,
            starred,
            limit,
        } => {
            let query = ItemQuery {
                feed_id: feed,
                folder_id: folder,
                unread_only: unread,
                starred_only: starred,
                limit: Some(limit),
            };
            list_items(&db, &query).await
        }
        Command::Folders => list_folders(&db).await,
        Command::Read { id, unread } => {
            let found = db
                .mark_item_read(id, !unread)
                .await
                .context("Failed to update read state")?;
            report_flag(found, id, if unread { "unread" } else { "read" })
        }
        Command::Star { id, unstar } => {
            let found = db
                .mark_item_starred(id, !unstar)
                .await
                .context("Failed to update starred state")?;
            report_flag(found, id, if unstar { "unstarred" } else { "starred" })
        }
    }
}

async fn run_sync(db: Database, config: &Config, batch: PathBuf) -> Result<()> {
    let source = Arc::new(JsonFileSource::new(batch));
    let sync = Synchronizer::new(db, source, config.reconcile_options());
    let cancel = CancelFlag::new();
    let round = sync.synchronize(&cancel);
    tokio::pin!(round);

    let result = tokio::select! {
        result = &mut round => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling sync...");
            cancel.cancel();
            round.await
        }
    };

    match result {
        Ok(report) => {
            println!(
                "{} sync: folders +{} ~{} -{}, feeds +{} ~{} -{}, items +{} ~{} -{} ({} unchanged), {} state changes sent",
                report.sync_type,
                report.summary.folders.inserted,
                report.summary.folders.updated,
                report.summary.folders.deleted,
                report.summary.feeds.inserted,
                report.summary.feeds.updated,
                report.summary.feeds.deleted,
                report.summary.items.inserted,
                report.summary.items.updated,
                report.summary.items.deleted,
                report.summary.items.unchanged,
                report.state_changes_sent,
            );
            Ok(())
        }
        Err(SyncError::Validation(e)) => {
            Err(anyhow::anyhow!(e).context("Sync batch rejected, local state unchanged"))
        }
        Err(e) => Err(anyhow::anyhow!(e).context("Sync failed, local state unchanged")),
    }
}

async fn list_items(db: &Database, query: &ItemQuery) -> Result<()> {
    let items = db
        .get_items_with_feed(query)
        .await
        .context("Failed to load items")?;

    for entry in &items {
        let item = &entry.item;
        let date = item
            .pub_date
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        let flags = format!(
            "{}{}",
            if item.read { ' ' } else { '*' },
            if item.starred { '★' } else { ' ' }
        );
        let source = match &entry.folder_name {
            Some(folder) => format!("{} / {}", folder, entry.feed_name),
            None => entry.feed_name.to_string(),
        };
        println!(
            "{:>6} {} {} [{}] {} ({:.0} min)",
            item.id,
            flags,
            date,
            strip_control_chars(&source),
            strip_control_chars(&item.title),
            item.read_time.ceil()
        );
    }

    if items.is_empty() {
        println!("No items.");
    }
    Ok(())
}

async fn list_folders(db: &Database) -> Result<()> {
    let groups = db
        .get_folders_with_feeds()
        .await
        .context("Failed to load folders")?;

    for group in &groups {
        let name = group
            .folder
            .as_ref()
            .map(|f| f.name.as_str())
            .unwrap_or("(unfiled)");
        println!("{} ({} unread)", strip_control_chars(name), group.unread_count());
        for feed in &group.feeds {
            println!(
                "  {:>6} {} ({} unread)",
                feed.id,
                strip_control_chars(&feed.name),
                feed.unread_count
            );
        }
    }

    if groups.is_empty() {
        println!("No feeds. Run `feedsync sync <batch.json>` first.");
    }
    Ok(())
}

fn report_flag(found: bool, id: i64, state: &str) -> Result<()> {
    if !found {
        anyhow::bail!("No item with id {}", id);
    }
    println!("Item {} marked {}.", id, state);
    Ok(())
}
