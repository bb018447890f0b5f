//! CLI entry point for the geo-corpus pipeline.

use anyhow::Result;
use clap::{Parser, Subcommand};
use geo_corpus::orchestrator::{EnrichmentOptions, SearchFilters, SearchRequest};
use geo_corpus::{analysis, Config, GeoId, Orchestrator};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "geo-corpus")]
#[command(author, version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search GEO and optionally enrich the results with full text
    Search {
        /// Free-text query
        query: String,
        /// Maximum datasets to return
        #[arg(short = 'n', long, default_value_t = 5)]
        max_results: usize,
        /// Restrict to an organism
        #[arg(long)]
        organism: Option<String>,
        /// Minimum sample count
        #[arg(long)]
        min_samples: Option<u32>,
        /// Also discover citing papers and download PDFs
        #[arg(long)]
        enrich: bool,
        /// Inline parsed section text in the output
        #[arg(long)]
        full_content: bool,
    },
    /// Run the enrichment pipeline for one GEO series
    Enrich {
        /// GEO series accession (GSE...)
        geo_id: String,
        /// Skip PDF downloads, discover only
        #[arg(long)]
        no_download: bool,
    },
    /// Build an LLM-ready analysis context from stored content
    Analyze {
        /// GEO series accession (GSE...)
        geo_id: String,
        /// Optional question to focus the context
        #[arg(short, long)]
        question: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::load(args.config.as_deref())?;
    let orchestrator = Orchestrator::new(config).await?;

    match args.command {
        Command::Search {
            query,
            max_results,
            organism,
            min_samples,
            enrich,
            full_content,
        } => {
            let request = SearchRequest {
                query,
                filters: SearchFilters {
                    organism,
                    min_samples,
                    ..SearchFilters::default()
                },
                max_results,
                enrichment: EnrichmentOptions {
                    include_citing_papers: Some(enrich),
                    download_pdfs: Some(enrich),
                    include_full_content: Some(full_content),
                },
            };
            let response = orchestrator.search(request).await?;
            info!(
                datasets = response.datasets.len(),
                elapsed_ms = response.elapsed_ms,
                partial = response.partial,
                "search finished"
            );
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Enrich { geo_id, no_download } => {
            let geo_id = GeoId::new(&geo_id)?;
            let options = EnrichmentOptions {
                include_citing_papers: Some(true),
                download_pdfs: Some(!no_download),
                include_full_content: Some(false),
            };
            let view = orchestrator.enrich_dataset(&geo_id, &options).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Analyze { geo_id, question } => {
            let geo_id = GeoId::new(&geo_id)?;
            let context = analysis::build_context(
                &orchestrator.index(),
                &orchestrator.store(),
                geo_id.as_str(),
                question,
            )
            .await?;
            println!("{}", context.to_prompt());
        }
    }

    Ok(())
}
