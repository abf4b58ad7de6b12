//! Ticketlore CLI - support-ticket knowledge learning pipeline

use std::sync::Arc;

use clap::{Parser, Subcommand};
use ticketlore_core::api;
use ticketlore_core::config::Config;
use ticketlore_core::knowledge::{ArticleStore, RetrievalService};
use ticketlore_core::learning::{
    ArticleSynthesizer, BatchProcessor, EffectivenessScorer, LearningQueue, LearningWorker,
    PatternExtractor,
};
use ticketlore_core::llm::{Embedder, GenerationProvider, LlmClient};
use ticketlore_core::storage::Database;
use ticketlore_core::tickets::TicketStore;

#[derive(Parser)]
#[command(name = "ticketlore")]
#[command(author, version, about = "Learn knowledge articles from resolved support tickets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background learning worker
    Worker,

    /// Process all tickets resolved in a date range
    Batch {
        /// Range start (YYYY-MM-DD or RFC 3339), inclusive
        #[arg(long)]
        start: String,
        /// Range end (YYYY-MM-DD or RFC 3339), exclusive
        #[arg(long)]
        end: String,
    },

    /// Enqueue a resolved ticket for learning
    Enqueue {
        /// Ticket ID
        ticket_id: String,
    },

    /// Search published knowledge articles
    Search {
        /// Search query
        query: String,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show learning queue status
    Status,

    /// Show knowledge base analytics
    Analytics,

    /// Recompute effectiveness scores for published articles
    Score,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ticketlore=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Worker => cmd_worker(cli.quiet).await,
        Commands::Batch { start, end } => cmd_batch(&start, &end, cli.format, cli.quiet).await,
        Commands::Enqueue { ticket_id } => cmd_enqueue(&ticket_id, cli.quiet).await,
        Commands::Search { query, limit } => cmd_search(&query, limit, cli.format).await,
        Commands::Status => cmd_status(cli.format).await,
        Commands::Analytics => cmd_analytics(cli.format).await,
        Commands::Score => cmd_score(cli.quiet).await,
        Commands::Config { action } => cmd_config(action, cli.quiet),
        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

/// Build the LLM client from configuration and the environment API key
fn build_client(config: &Config) -> anyhow::Result<LlmClient> {
    let api_key = config.llm.resolved_api_key()?.ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured. Set TICKETLORE_API_KEY or OPENROUTER_API_KEY environment variable."
        )
    })?;
    Ok(LlmClient::new(config.llm.clone(), api_key)?)
}

async fn cmd_worker(quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let client = build_client(&config)?;
    let db = Database::default().await?;

    let queue = LearningQueue::new(db.clone());
    let tickets = TicketStore::new(db.clone());
    let store = ArticleStore::new(db.clone());

    let provider: Arc<dyn GenerationProvider> = Arc::new(client.clone());
    let embedder: Arc<dyn Embedder> = Arc::new(client);

    let extractor = PatternExtractor::new(embedder.clone(), &config.learning);
    let synthesizer =
        ArticleSynthesizer::new(provider, embedder, store.clone(), &config.llm, &config.learning);
    let scorer = EffectivenessScorer::new(store, &config.learning);
    let worker = LearningWorker::new(queue, tickets, extractor, synthesizer, &config.learning)
        .with_scorer(scorer);

    if !quiet {
        println!("Starting learning worker (Ctrl-C to stop)...");
    }
    worker.run().await?;
    Ok(())
}

async fn cmd_batch(
    start: &str,
    end: &str,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let client = build_client(&config)?;
    let db = Database::default().await?;

    let tickets = TicketStore::new(db.clone());
    let store = ArticleStore::new(db.clone());

    let provider: Arc<dyn GenerationProvider> = Arc::new(client.clone());
    let embedder: Arc<dyn Embedder> = Arc::new(client);

    let extractor = PatternExtractor::new(embedder.clone(), &config.learning);
    let synthesizer =
        ArticleSynthesizer::new(provider, embedder, store, &config.llm, &config.learning);
    let processor = BatchProcessor::new(db, tickets, extractor, synthesizer);

    let request = api::BatchProcessRequest {
        start_date: normalize_date(start),
        end_date: normalize_date(end),
    };
    let response = api::batch_process(&processor, request).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => {
            if !quiet {
                println!("Run {} complete:", response.run_id);
            }
            println!("  Tickets processed:  {}", response.ticket_count);
            println!("  Patterns found:     {}", response.patterns_found);
            println!("  Articles created:   {}", response.articles_created);
            println!("  Articles published: {}", response.articles_published);
            println!("  Duplicates skipped: {}", response.duplicates_skipped);
            println!("  Failures:           {}", response.failures);
        }
    }
    Ok(())
}

/// Accept bare dates on the command line by pinning them to UTC midnight
fn normalize_date(value: &str) -> String {
    if value.len() == 10 && value.as_bytes().get(4) == Some(&b'-') {
        format!("{}T00:00:00Z", value)
    } else {
        value.to_string()
    }
}

async fn cmd_enqueue(ticket_id: &str, quiet: bool) -> anyhow::Result<()> {
    let db = Database::default().await?;
    let queue = LearningQueue::new(db);

    let inserted = queue.enqueue(ticket_id).await?;
    if !quiet {
        if inserted {
            println!("Enqueued ticket {}", ticket_id);
        } else {
            println!("Ticket {} is already in the queue", ticket_id);
        }
    }
    Ok(())
}

async fn cmd_search(query: &str, limit: Option<usize>, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let client = build_client(&config)?;
    let db = Database::default().await?;

    let store = ArticleStore::new(db);
    let embedder: Arc<dyn Embedder> = Arc::new(client);
    let retrieval = RetrievalService::new(
        embedder,
        store.clone(),
        config.llm.embedding_model.clone(),
        &config.retrieval,
    );

    let hits = api::search(
        &retrieval,
        &store,
        api::SearchRequest {
            query: query.to_string(),
            limit,
        },
    )
    .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&hits)?),
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("No matching articles.");
            }
            for hit in hits {
                println!(
                    "{}. [{:.2}] {} ({})",
                    hit.rank, hit.similarity_score, hit.title, hit.category
                );
                println!("   {}", hit.summary);
            }
        }
    }
    Ok(())
}

async fn cmd_status(format: OutputFormat) -> anyhow::Result<()> {
    let db = Database::default().await?;
    let queue = LearningQueue::new(db);

    let status = api::queue_status(&queue).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            println!("Learning queue:");
            println!("  Pending:         {}", status.pending);
            println!("  Processing:      {}", status.processing);
            println!("  Failed:          {}", status.failed);
            println!("  Completed today: {}", status.completed_today);
        }
    }
    Ok(())
}

async fn cmd_analytics(format: OutputFormat) -> anyhow::Result<()> {
    let db = Database::default().await?;
    let store = ArticleStore::new(db);

    let analytics = api::analytics(&store).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analytics)?),
        OutputFormat::Text => {
            println!("Knowledge base analytics:");
            println!("  Articles created (AI):  {}", analytics.articles_created);
            println!("  Avg effectiveness:      {:.2}", analytics.avg_effectiveness);
            println!("  Auto-responses sent:    {}", analytics.auto_responses_sent);
            println!("  Tickets resolved by AI: {}", analytics.tickets_resolved_by_ai);
            if !analytics.top_categories.is_empty() {
                println!("  Top categories:");
                for entry in &analytics.top_categories {
                    println!("    {} ({})", entry.category, entry.count);
                }
            }
        }
    }
    Ok(())
}

async fn cmd_score(quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let db = Database::default().await?;
    let store = ArticleStore::new(db);

    let scorer = EffectivenessScorer::new(store, &config.learning);
    let updated = scorer.recompute_all().await?;
    if !quiet {
        println!("Recomputed effectiveness scores for {} articles", updated);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for key in Config::list_keys() {
                println!("{} = {}", key, config.get(key)?);
            }
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Ticketlore Health Check");
        println!("=======================");
        println!();
    }

    let mut all_ok = true;

    match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }

            match config.llm.resolved_api_key() {
                Ok(Some(_)) => {
                    if !quiet {
                        let redacted = config.llm.redacted_api_key()?.unwrap_or_default();
                        println!("[OK] API Key: Configured ({})", redacted);
                    }
                }
                Ok(None) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] API Key: Not configured");
                        println!(
                            "     Set TICKETLORE_API_KEY or OPENROUTER_API_KEY environment variable"
                        );
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] API Key: Error - {}", e);
                    }
                }
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
        }
    }

    match Database::default().await {
        Ok(db) => match db.health_check().await {
            Ok(()) => {
                if !quiet {
                    println!("[OK] Database: {}", db.path().display());
                }
                let queue = LearningQueue::new(db);
                if let Ok(stats) = queue.stats().await {
                    if !quiet {
                        println!(
                            "[OK] Queue: {} pending, {} processing, {} failed",
                            stats.pending, stats.processing, stats.failed
                        );
                    }
                }
            }
            Err(e) => {
                all_ok = false;
                if !quiet {
                    println!("[!!] Database: Health check failed - {}", e);
                }
            }
        },
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Error - {}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    if all_ok {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_batch_args() {
        let cli = Cli::try_parse_from([
            "ticketlore",
            "batch",
            "--start",
            "2025-06-01",
            "--end",
            "2025-06-08",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch { start, end } => {
                assert_eq!(start, "2025-06-01");
                assert_eq!(end, "2025-06-08");
            }
            _ => panic!("expected batch command"),
        }
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("2025-06-01"), "2025-06-01T00:00:00Z");
        assert_eq!(
            normalize_date("2025-06-01T12:30:00Z"),
            "2025-06-01T12:30:00Z"
        );
    }

    #[test]
    fn test_parse_search_with_limit() {
        let cli =
            Cli::try_parse_from(["ticketlore", "search", "vpn drops", "--limit", "5"]).unwrap();
        match cli.command {
            Commands::Search { query, limit } => {
                assert_eq!(query, "vpn drops");
                assert_eq!(limit, Some(5));
            }
            _ => panic!("expected search command"),
        }
    }
}
