//! `atlas` command line.
//!
//! Logs go to stderr; results go to stdout so they can be piped.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use atlas_core::{FetchStrategy, RouteTable, SourceDocument};
use atlas_runtime::{RuntimeConfig, VerdictChunk, VerificationService, VerifyEvent};

#[derive(Parser)]
#[command(name = "atlas")]
#[command(about = "Check an answer against evidence from the web")]
#[command(version)]
struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the web for a query, without refinement
    Search {
        query: String,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify an answer against the best source for a query
    Verify {
        #[arg(short, long)]
        query: String,

        #[arg(short, long)]
        answer: String,
    },

    /// Fetch the evidence text behind one search result
    Scrape {
        query: String,

        /// 1-based result rank
        #[arg(short, long, default_value_t = 1)]
        index: u32,
    },

    /// Show how a URL would be fetched
    Route { url: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "atlas=debug" } else { "atlas=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[derive(Serialize)]
struct RouteReport<'a> {
    url: &'a str,
    host: &'a str,
    strategy: FetchStrategy,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    // Routing needs no credentials, so skip building the pipeline
    if let Commands::Route { url } = &cli.command {
        return print_route(&config.routes, url);
    }

    let service = VerificationService::from_config(Arc::new(config))?;

    tokio::select! {
        result = run(&service, cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted");
            bail!("interrupted")
        }
    }
}

async fn run(service: &VerificationService, command: Commands) -> Result<()> {
    match command {
        Commands::Search { query, json } => {
            let response = service.search(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if response.results.is_empty() {
                println!("No results.");
            } else {
                for result in &response.results {
                    println!("{:>2}. {}\n    {}", result.rank, result.title, result.link);
                }
            }
        }
        Commands::Scrape { query, index } => {
            let document = service.scrape(&query, index).await?;
            print_document(&document);
        }
        Commands::Verify { query, answer } => verify(service, query, answer).await?,
        Commands::Route { url } => print_route(&service.orchestrator().config().routes, &url)?,
    }
    Ok(())
}

async fn verify(service: &VerificationService, query: String, answer: String) -> Result<()> {
    let mut events = service.spawn_verify(query, answer);
    while let Some(event) = events.next().await {
        match event {
            VerifyEvent::Degraded(response) => {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
            VerifyEvent::Source { rank, document } => {
                eprintln!(
                    "source #{}: {} ({}{})",
                    rank,
                    document.url,
                    document.strategy,
                    if document.fetch_succeeded { "" } else { ", fetch failed" }
                );
            }
            VerifyEvent::Chunk(VerdictChunk::Fragment(text)) => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            VerifyEvent::Chunk(VerdictChunk::Complete(verdict)) => {
                println!();
                eprintln!("verdict: {}", verdict.status);
                if let (Some(claimed), Some(evidence)) =
                    (&verdict.hallucinated_span, &verdict.evidence_span)
                {
                    eprintln!("  answer:   {}\n  evidence: {}", claimed, evidence);
                }
            }
            VerifyEvent::Chunk(VerdictChunk::Error(e)) => {
                println!();
                bail!("verification failed: {}", e)
            }
        }
    }
    Ok(())
}

fn print_route(routes: &RouteTable, url: &str) -> Result<()> {
    let parsed = Url::parse(url).with_context(|| format!("not a URL: {}", url))?;
    let report = RouteReport {
        url,
        host: parsed.host_str().unwrap_or_default(),
        strategy: routes.strategy_for(&parsed),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_document(document: &SourceDocument) {
    eprintln!(
        "{} via {} (status {})",
        document.url,
        document.strategy,
        document
            .http_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("{}", document.extracted_text);
}
