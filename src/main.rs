use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use knowledge_rag::commands::{
    build_index, check_index, knowledge_search, recommend, search, show_stats,
};
use knowledge_rag::config::{Config, show_config, write_default_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "knowledge-rag")]
#[command(about = "Document indexing and retrieval over local files and a domain knowledge base")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.knowledge-rag)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, chunk and embed the data directory into a vector index
    Build {
        /// Override the configured data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Override the configured index directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Search the vector index
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Only return chunks of this source file
        #[arg(long)]
        source: Option<String>,
        /// Only return documents of this type, e.g. "file"
        #[arg(long = "type")]
        doc_type: Option<String>,
    },
    /// Show index statistics
    Stats,
    /// Check that the index files agree with each other
    Check,
    /// Search the structured knowledge base
    KbSearch {
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// One of "feature", "solution" or "concept"
        #[arg(long = "type")]
        doc_type: Option<String>,
    },
    /// Recommend fixes for an anomaly, features strongest first
    Recommend {
        #[arg(long, value_delimiter = ',', required = true)]
        features: Vec<String>,
        /// The T² statistic flagged the anomaly
        #[arg(long)]
        t2: bool,
        /// The SPE statistic flagged the anomaly
        #[arg(long)]
        spe: bool,
    },
    /// Show or initialise the configuration
    Config {
        /// Show current configuration
        #[arg(long, conflicts_with = "init")]
        show: bool,
        /// Write a default config.toml
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir()?,
    };

    if let Commands::Config { init: true, .. } = cli.command {
        if write_default_config(&config_dir)? {
            println!(
                "✅ Wrote default configuration to {}",
                style(config_dir.join("config.toml").display()).cyan()
            );
        } else {
            println!("Configuration already exists in {}", config_dir.display());
        }
        return Ok(());
    }

    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Build {
            data_dir,
            output_dir,
        } => {
            build_index(config, data_dir, output_dir)?;
        }
        Commands::Search {
            query,
            top_k,
            source,
            doc_type,
        } => {
            search(
                &config,
                &query,
                top_k,
                source.as_deref(),
                doc_type.as_deref(),
            )?;
        }
        Commands::Stats => {
            show_stats(&config)?;
        }
        Commands::Check => {
            check_index(&config)?;
        }
        Commands::KbSearch {
            query,
            top_k,
            doc_type,
        } => {
            knowledge_search(&config, &query, top_k, doc_type.as_deref())?;
        }
        Commands::Recommend { features, t2, spe } => {
            recommend(&config, &features, t2, spe)?;
        }
        Commands::Config { .. } => {
            show_config(&config)?;
        }
    }

    Ok(())
}
