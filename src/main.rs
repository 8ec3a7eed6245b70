use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use gig_discovery::domain::{LinkStatus, Origin, SourceDefinition};
use gig_discovery::infra::ReqwestFetcher;
use gig_discovery::logging;
use gig_discovery::observability;
use gig_discovery::pipeline::processing::parent::derive_calendar_url;
use gig_discovery::pipeline::processing::probe::ProbeSummary;
use gig_discovery::pipeline::storage::{seed_from_config, DiscoveryStore, SqliteStore};
use gig_discovery::{Config, DiscoveryOrchestrator};

#[derive(Parser)]
#[command(name = "gig_discovery")]
#[command(about = "Turn dropped links into gig sources, events and taste signals")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, default_value = "discovery.toml")]
    config: PathBuf,

    /// Expose Prometheus metrics on this address, e.g. 127.0.0.1:9464
    #[arg(long)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a URL to the link log
    Add {
        url: String,
        /// Why this link is interesting
        #[arg(long)]
        note: Option<String>,
    },
    /// Process pending links
    Run {
        /// Also retry links that ended unclear or failed
        #[arg(long)]
        rerun: bool,
    },
    /// List logged links
    Links {
        /// Only links with this status (pending, processed, unclear, failed)
        #[arg(long)]
        status: Option<LinkStatus>,
    },
    /// List registered sources
    Sources {
        /// Write the source registry to this TOML file
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// List stored events
    Events {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List taste entries
    Taste,
    /// Classify and extract a URL without storing anything
    Inspect { url: String },
}

#[derive(Serialize)]
struct SourceExport<'a> {
    sources: Vec<&'a SourceDefinition>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    let _guard = logging::init_logging(&config.discovery.log_dir);

    if let Some(ref addr) = cli.metrics_addr {
        observability::metrics::init(addr);
    }

    let store = Arc::new(
        SqliteStore::open(&config.discovery.database_path).context("opening discovery store")?,
    );
    seed_from_config(store.as_ref(), &config).context("seeding curated sources")?;

    let fetcher = Arc::new(ReqwestFetcher::new(&config.discovery, &config.renderer)?);
    let orchestrator = DiscoveryOrchestrator::new(fetcher, store.clone(), config);

    match cli.command {
        Commands::Add { url, note } => {
            let link = orchestrator.add_link(&url, note)?;
            match link.status {
                LinkStatus::Pending => println!("🔗 Queued {}", link.url),
                status => println!("🔗 {} is already logged ({})", link.url, status),
            }
        }
        Commands::Run { rerun } => {
            println!("🔄 Processing links...");
            let summary = orchestrator.run(rerun).await?;
            println!("\n📊 Discovery Results:");
            println!("   Links processed: {}", summary.links_processed);
            println!("   Sources registered: {}", summary.sources_registered);
            println!("   Events found: {}", summary.events_found);
            println!("   Unclear: {}", summary.links_unclear);
            println!("   Failed: {}", summary.links_failed);
            let counts = store.counts()?;
            println!(
                "\n🗂️  Store: {} links, {} sources, {} events, {} taste entries",
                counts.links, counts.sources, counts.events, counts.taste
            );
            if summary.links_unclear > 0 || summary.links_failed > 0 {
                println!("\n⚠️  Some links need attention; see `links --status unclear` and `links --status failed`");
            }
        }
        Commands::Links { status } => {
            let links = match status {
                Some(status) => store.links_with_status(status)?,
                None => store.links()?,
            };
            for link in &links {
                println!(
                    "{:<10} {:<13} {:>3} events  {}",
                    link.status,
                    link.classified_as.map(|k| k.to_string()).unwrap_or_else(|| "-".into()),
                    link.events_found,
                    link.url
                );
                if let Some(ref note) = link.status_note {
                    println!("           {}", note);
                }
            }
            println!("\n{} links", links.len());
        }
        Commands::Sources { export } => {
            let sources = store.sources()?;
            for source in &sources {
                let strategy = source
                    .extraction
                    .strategy
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "cascade".into());
                println!(
                    "{:<24} {:<10} {:<18} {}",
                    source.name, source.origin, strategy, source.url
                );
            }
            if let Some(path) = export {
                let export = SourceExport {
                    sources: sources.iter().collect(),
                };
                std::fs::write(&path, toml::to_string_pretty(&export)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                let discovered = sources.iter().filter(|s| s.origin == Origin::Discovered).count();
                println!(
                    "✅ Exported {} sources ({} discovered) to {}",
                    sources.len(),
                    discovered,
                    path.display()
                );
            }
        }
        Commands::Events { limit } => {
            let events = store.events()?;
            for row in events.iter().take(limit) {
                let e = &row.event;
                let when = e
                    .start_datetime
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "undated".into());
                println!("{:<16} {:<6} {} @ {}", when, e.confidence, e.title, e.venue_name);
            }
            println!("\n{} events stored", events.len());
        }
        Commands::Taste => {
            for entry in store.taste_entries()? {
                let marker = if entry.manual { "✋" } else { "🤖" };
                println!("{} {:<6} {:<32} {:.2}", marker, entry.kind, entry.key, entry.weight);
            }
        }
        Commands::Inspect { url } => {
            let probe = orchestrator.inspect(&url).await?;
            println!("{}", serde_json::to_string_pretty(&ProbeSummary::from(&probe))?);
            if let Ok(original) = url::Url::parse(&probe.url) {
                match derive_calendar_url(&probe.facts, &original) {
                    Some(calendar) => println!("📅 Parent calendar candidate: {}", calendar),
                    None => println!("📅 No parent calendar candidate"),
                }
            }
        }
    }

    info!("Done");
    Ok(())
}
