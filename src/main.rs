use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use satchel::api::ApiClient;
use satchel::bookmarks::BookmarkManager;
use satchel::config::{Config, TOKEN_ENV_VAR};
use satchel::news;
use satchel::session::Session;
use satchel::storage::{Database, StorageError};

/// Get the config directory path (~/.config/satchel/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("satchel");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "satchel", about = "Offline-first companion for a news API")]
struct Args {
    /// Work from the local cache only, without network requests
    #[arg(long)]
    offline: bool,

    /// Alternate config file (default: ~/.config/satchel/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new posts into the local cache and prune it
    Refresh,
    /// List cached posts, newest first
    Posts,
    /// Add, remove, or toggle bookmarks
    Bookmark {
        #[command(subcommand)]
        action: BookmarkAction,
    },
    /// Deliver queued bookmark changes and adopt the server's state
    Sync,
    /// Show cache, bookmark, and session state
    Status,
}

#[derive(Subcommand, Debug)]
enum BookmarkAction {
    /// Bookmark a post
    Add { post_id: i64 },
    /// Remove a bookmark
    Remove { post_id: i64 },
    /// Flip a post's bookmark state
    Toggle { post_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Set up config directory
    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // Set directory permissions on Unix (user-only access); the database
    // holds per-account bookmark state.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let client = ApiClient::new(&config.api_base_url, config.request_timeout_secs)
        .with_context(|| format!("Invalid api_base_url '{}'", config.api_base_url))?;

    // One-shot commands never transition the session mid-run.
    let session = Session::fixed(config.resolve_token(), !args.offline);

    let db_path = config_dir.join("satchel.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StorageError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of satchel appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match args.command {
        Command::Refresh => {
            let outcome = news::refresh_posts(&db, &client, &session, config.max_cached_posts)
                .await
                .context("Refresh failed")?;
            println!(
                "Fetched {} posts ({} stored, {} expired, {} evicted)",
                outcome.fetched, outcome.stored, outcome.expired, outcome.evicted
            );
        }
        Command::Posts => {
            let posts = db.get_posts().await.context("Failed to read post cache")?;
            if posts.is_empty() {
                println!("No cached posts. Run `satchel refresh` first.");
            }
            for post in &posts {
                println!(
                    "{:>6}  {}  {}",
                    post.id,
                    post.created_at,
                    post.title().unwrap_or("(untitled)")
                );
            }
        }
        Command::Bookmark { action } => {
            let manager = BookmarkManager::new(db, client, session.clone());
            manager
                .initialize()
                .await
                .context("Failed to load bookmark state")?;

            match action {
                BookmarkAction::Add { post_id } => {
                    manager.add(post_id).await?;
                    println!("Bookmarked post {post_id}{}", queued_note(&manager).await);
                }
                BookmarkAction::Remove { post_id } => {
                    manager.remove(post_id).await?;
                    println!(
                        "Removed bookmark for post {post_id}{}",
                        queued_note(&manager).await
                    );
                }
                BookmarkAction::Toggle { post_id } => {
                    let bookmarked = manager.toggle(post_id).await?;
                    if bookmarked {
                        println!("Bookmarked post {post_id}{}", queued_note(&manager).await);
                    } else {
                        println!(
                            "Removed bookmark for post {post_id}{}",
                            queued_note(&manager).await
                        );
                    }
                }
            }
        }
        Command::Sync => {
            if !session.is_authenticated() {
                eprintln!(
                    "Error: No session token set. Set {TOKEN_ENV_VAR} or auth_token in config.toml."
                );
                std::process::exit(1);
            }
            if args.offline {
                eprintln!("Error: Cannot sync with --offline.");
                std::process::exit(1);
            }

            // initialize() drains the queue and adopts the server
            // snapshot when the session allows, which is exactly this
            // command's job.
            let manager = BookmarkManager::new(db, client, session.clone());
            manager.initialize().await.context("Bookmark sync failed")?;
            println!(
                "{} bookmarks, {} still queued",
                manager.bookmarked_ids().len(),
                manager.pending_len().await
            );
        }
        Command::Status => {
            let stats = db.cache_stats().await.context("Failed to read cache stats")?;
            let manager = BookmarkManager::new(db.clone(), client, session.clone());
            manager
                .initialize()
                .await
                .context("Failed to load bookmark state")?;

            println!("Cache: {} posts", stats.total_posts);
            if let (Some(oldest), Some(newest)) = (&stats.oldest_entry, &stats.newest_entry) {
                println!("  cached between {oldest} and {newest} (UTC)");
            }
            println!(
                "Bookmarks: {} saved, {} queued for sync",
                manager.bookmarked_ids().len(),
                manager.pending_len().await
            );
            println!(
                "Session: {}, {}",
                if session.is_authenticated() {
                    "authenticated"
                } else {
                    "anonymous"
                },
                if session.network_reachable() {
                    "online"
                } else {
                    "offline"
                }
            );
        }
    }

    Ok(())
}

/// Suffix for bookmark output when changes are still waiting on the server.
async fn queued_note(manager: &BookmarkManager) -> &'static str {
    if manager.pending_len().await > 0 {
        " (queued for sync)"
    } else {
        ""
    }
}
