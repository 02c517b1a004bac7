//! Tankobon CLI - resolve chapter catalogues and inspect reading state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tankobon::catalog::{ChapterCache, ResolveRequest, SecondaryStatus};
use tankobon::config::Config;
use tankobon::console::Console;
use tankobon::progress::ProgressStore;
use tankobon::settings::SettingsStore;
use tankobon::store::{FileStore, KeyValueStore};
use tankobon::{CatalogResolver, ChapterFeedClient, LibrarySource, SystemClock, logging};

/// Chapter catalogue and reading progress tool.
#[derive(Parser, Debug)]
#[command(name = "tankobon")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve and list the chapters of a content item.
    Resolve {
        content_id: String,

        /// Only list chapters from the local library.
        #[arg(long, conflicts_with = "secondary_only")]
        local_only: bool,

        /// Only list chapters backfilled from the remote feed.
        #[arg(long)]
        secondary_only: bool,

        /// Ignore the chapter cache and query the remote feed again.
        #[arg(long)]
        refresh: bool,
    },

    /// Show the stored reading progress of a content item.
    Progress {
        content_id: String,

        /// Delete the stored progress instead.
        #[arg(long)]
        clear: bool,
    },

    /// Inspect or change reader settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the current settings.
    Show,
    /// Restore the default settings.
    Reset,
    /// Set the auto-scroll speed multiplier (0.5 - 5.0).
    Speed { value: f64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let console = Console::new();

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    logging::init(&config.logging).context("Failed to initialise logging")?;

    let data_dir = config.data_dir().context("No data directory available")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir));

    match args.command {
        Command::Resolve {
            content_id,
            local_only,
            secondary_only,
            refresh,
        } => {
            let mut request = ResolveRequest::new(content_id);
            if local_only {
                request = request.local_only();
            }
            if secondary_only {
                request = request.secondary_only();
            }
            if refresh {
                request = request.refreshing();
            }
            resolve(&config, store, &request, &console).await
        }
        Command::Progress { content_id, clear } => {
            let progress = ProgressStore::new(store, config.storage.progress_debounce());
            show_progress(&progress, &content_id, clear, &console).await
        }
        Command::Settings { action } => {
            settings(&SettingsStore::new(store), action, &console).await
        }
    }
}

async fn resolve(
    config: &Config,
    store: Arc<dyn KeyValueStore>,
    request: &ResolveRequest,
    console: &Console,
) -> Result<()> {
    let library_path = config
        .library_path()
        .context("No library path available")?;
    let remote = ChapterFeedClient::new(&config.remote).context("Invalid remote feed settings")?;
    let cache = ChapterCache::new(
        store.clone(),
        Arc::new(SystemClock),
        config.catalog.cache_ttl(),
    );
    let resolver = CatalogResolver::new(
        Arc::new(LibrarySource::open(library_path)),
        Arc::new(remote),
        cache,
        config.catalog.clone(),
    );

    console.section(&format!("Chapters of {}", request.content_id));
    let resolution = resolver
        .resolve_with_progress(request, |percent| {
            console.progress_update(&format!("Resolving... {}%", percent));
        })
        .await
        .with_context(|| format!("Content '{}' is unavailable", request.content_id))?;
    console.clear_line();
    println!();

    let progress = ProgressStore::new(store, config.storage.progress_debounce());
    let current = progress
        .read(&request.content_id)
        .await
        .context("Failed to read reading progress")?;

    for chapter in &resolution.chapters {
        let marker = match &current {
            Some(saved) if saved.chapter_id == chapter.id => {
                format!(" {}", console.percent(saved.percent()))
            }
            _ => String::new(),
        };
        println!("  {}{}", console.chapter_line(chapter), marker);
    }

    console.success(&format!(
        "{} chapters",
        console.count(resolution.chapters.len())
    ));
    match &resolution.secondary {
        SecondaryStatus::Cached => console.info("Remote chapters served from cache"),
        SecondaryStatus::Incomplete(failure) => console.warning(&format!(
            "Remote chapters are incomplete ({}); run again to retry",
            failure
        )),
        SecondaryStatus::NotRequested | SecondaryStatus::Complete => {}
    }
    Ok(())
}

async fn show_progress(
    progress: &ProgressStore,
    content_id: &str,
    clear: bool,
    console: &Console,
) -> Result<()> {
    if clear {
        progress
            .clear(content_id)
            .await
            .context("Failed to clear reading progress")?;
        console.success(&format!("Cleared progress of {}", content_id));
        return Ok(());
    }

    match progress
        .read(content_id)
        .await
        .context("Failed to read reading progress")?
    {
        Some(saved) => {
            console.section(if saved.content_title.is_empty() {
                content_id
            } else {
                saved.content_title.as_str()
            });
            console.info(&format!(
                "Chapter {} {}",
                saved.chapter_number,
                console.muted(&saved.chapter_title)
            ));
            console.info(&format!(
                "Page {}/{} {}",
                saved.current_page,
                saved.total_pages,
                console.percent(saved.percent())
            ));
        }
        None => console.info(&format!("No reading progress for {}", content_id)),
    }
    Ok(())
}

async fn settings(store: &SettingsStore, action: SettingsAction, console: &Console) -> Result<()> {
    let current = match action {
        SettingsAction::Show => store.load().await.context("Failed to load settings")?,
        SettingsAction::Reset => {
            store.reset().await.context("Failed to reset settings")?;
            console.success("Settings reset to defaults");
            store.load().await.context("Failed to load settings")?
        }
        SettingsAction::Speed { value } => {
            let updated = store
                .update(|settings| settings.auto_scroll_speed = value)
                .await
                .context("Failed to save settings")?;
            console.success(&format!(
                "Auto-scroll speed set to {}",
                updated.auto_scroll_speed
            ));
            updated
        }
    };

    let rendered = serde_json::to_string_pretty(&current).context("Failed to render settings")?;
    println!("{}", rendered);
    Ok(())
}
