//! keepsake - browse and curate extracted exchanges
//!
//! The curation surface over the normalized graph: list and inspect
//! exchanges, delete messages or whole exchanges, merge exchanges from the
//! same source file, and administer the extraction cache.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use keepsake_core::types::{ExchangeSummary, MessageRow, SortOrder};
use keepsake_core::{Config, CurationEngine, Database};

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(about = "Browse and curate memorable exchanges")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List exchanges, ordered by their first message's date and time
    List {
        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Exchanges per page
        #[arg(long, default_value_t = 20)]
        page_size: u32,

        /// Sort order: asc or desc
        #[arg(long, default_value = "asc")]
        order: String,
    },

    /// Show one exchange with all of its messages
    Show { id: i64 },

    /// Delete an exchange and, via cascade, all of its messages
    DeleteExchange { id: i64 },

    /// Delete individual messages by id; their exchanges are re-indexed
    DeleteMessages {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Merge exchanges into the one with the smallest id
    Merge {
        #[arg(required = true, num_args = 2..)]
        ids: Vec<i64>,
    },

    /// Drop all cache entries; the exchange graph is untouched
    CacheClear,

    /// Show database statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        keepsake_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let engine = CurationEngine::new(&db);

    match cli.command {
        Command::List {
            page,
            page_size,
            order,
        } => {
            let order: SortOrder = order.parse().map_err(|e: String| anyhow!(e))?;
            let listing = db.list_exchanges(page, page_size, order)?;

            if listing.items.is_empty() {
                println!("No exchanges on page {}.", listing.page);
            } else {
                for item in &listing.items {
                    println!("{}", summary_line(item));
                }
            }
            println!(
                "\nPage {} ({} exchange(s) total{})",
                listing.page,
                listing.total_items,
                if listing.has_more {
                    ", more pages available"
                } else {
                    ""
                }
            );
        }

        Command::Show { id } => {
            let Some(detail) = db.get_exchange(id)? else {
                bail!("exchange {} not found", id);
            };
            println!(
                "Exchange #{} (source: {}, result index: {})",
                detail.id, detail.source_file, detail.exchange_index
            );
            if detail.messages.is_empty() {
                println!("  (no messages)");
            }
            for message in &detail.messages {
                println!("  [{:>4}] {}", message.id, message_line(message));
            }
        }

        Command::DeleteExchange { id } => {
            engine.delete_exchange(id)?;
            println!("Deleted exchange {} and its messages.", id);
        }

        Command::DeleteMessages { ids } => {
            let deleted = engine.delete_messages(&ids)?;
            println!("Deleted {} message(s).", deleted);
        }

        Command::Merge { ids } => {
            let target = engine.merge_exchanges(&ids)?;
            println!("Merged {} exchanges into {}.", ids.len(), target);
        }

        Command::CacheClear => {
            let removed = db.clear_cache()?;
            println!("Removed {} cache entr(y/ies); exchanges untouched.", removed);
        }

        Command::Stats => {
            println!("Database: {}", db_path.display());
            println!("  Exchanges:     {}", db.exchange_count()?);
            println!("  Messages:      {}", db.message_count()?);
            println!("  Cache entries: {}", db.cache_entry_count()?);
        }
    }

    Ok(())
}

/// One-line listing entry: id, first-message timestamp, and a preview.
fn summary_line(item: &ExchangeSummary) -> String {
    match &item.first_message {
        Some(first) => format!("#{:>5}  {}", item.id, message_line(first)),
        None => format!("#{:>5}  (empty exchange)", item.id),
    }
}

fn message_line(message: &MessageRow) -> String {
    let date = message.date.as_deref().unwrap_or("??.??.??");
    let time = message.time.as_deref().unwrap_or("??:??:??");
    let person = message.person.as_deref().unwrap_or("?");
    let quote = message.quote.as_deref().unwrap_or("");
    format!("[{}, {}] {}: {}", date, time, person, preview(quote, 60))
}

/// Truncate on a character boundary with an ellipsis.
fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
