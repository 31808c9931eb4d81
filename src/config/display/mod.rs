
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::{Config, EmbeddingMethod, PdfBackend};
use crate::embeddings::chunking::ChunkingStrategy;

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Paths:").bold().yellow());
    eprintln!(
        "  Data Directory: {}",
        style(config.paths.data_dir.display()).cyan()
    );
    eprintln!(
        "  Output Directory: {}",
        style(config.paths.output_dir.display()).cyan()
    );
    eprintln!(
        "  Knowledge Directory: {}",
        style(config.paths.knowledge_dir.display()).cyan()
    );
    eprintln!(
        "  Extensions: {}",
        style(config.paths.extensions.join(", ")).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    for line in chunking_summary(config) {
        eprintln!("  {}", line);
    }

    eprintln!();
    eprintln!("{}", style("Embedding:").bold().yellow());
    eprintln!("  Method: {}", style(config.embedding.method).cyan());
    eprintln!(
        "  Max Features: {}",
        style(config.embedding.max_features).cyan()
    );
    if config.embedding.method != EmbeddingMethod::Simple {
        eprintln!("  Endpoint: {}", style(&config.embedding.base_url).cyan());
        eprintln!("  Model: {}", style(&config.embedding.model).cyan());
        eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
        eprintln!(
            "  API Key ({}): {}",
            config.embedding.api_key_env,
            key_status(config.embedding.api_key().is_some())
        );
    }

    eprintln!();
    eprintln!("{}", style("PDF Parsing:").bold().yellow());
    eprintln!("  Backend: {}", style(backend_name(config.parser.pdf_backend)).cyan());
    if config.parser.pdf_backend != PdfBackend::Local {
        eprintln!("  Service: {}", style(&config.parser.base_url).cyan());
        eprintln!(
            "  Polling: every {} ms, at most {} times",
            config.parser.poll_interval_ms, config.parser.max_polls
        );
        eprintln!(
            "  Local Fallback: {}",
            style(config.parser.local_fallback).cyan()
        );
        eprintln!(
            "  API Key ({}): {}",
            config.parser.api_key_env,
            key_status(config.parser.api_key().is_some())
        );
    }

    let config_path = config.config_file_path();
    eprintln!();
    if config_path.exists() {
        eprintln!("Config file: {}", style(config_path.display()).dim());
    } else {
        eprintln!(
            "Config file: {} {}",
            style(config_path.display()).dim(),
            style("(not created, using defaults)").yellow()
        );
    }

    Ok(())
}

/// Write a default `config.toml` into `config_dir` unless one already exists.
/// Returns whether a file was written.
#[inline]
pub fn write_default_config(config_dir: &Path) -> Result<bool> {
    let config = Config {
        base_dir: config_dir.to_path_buf(),
        ..Config::default()
    };

    if config.config_file_path().exists() {
        return Ok(false);
    }

    config.save().context("Failed to write default configuration")?;
    Ok(true)
}

fn chunking_summary(config: &Config) -> Vec<String> {
    let chunking = &config.chunking;
    match chunking.strategy {
        ChunkingStrategy::Fixed => vec![
            format!("Strategy: {}", style("fixed").cyan()),
            format!("Chunk Size: {}", style(chunking.chunk_size).cyan()),
            format!("Overlap: {}", style(chunking.chunk_overlap).cyan()),
        ],
        ChunkingStrategy::Semantic => vec![
            format!("Strategy: {}", style("semantic").cyan()),
            format!("Max Chunk Size: {}", style(chunking.max_chunk_size).cyan()),
            format!("Min Chunk Size: {}", style(chunking.min_chunk_size).cyan()),
        ],
    }
}

fn backend_name(backend: PdfBackend) -> &'static str {
    match backend {
        PdfBackend::Local => "local",
        PdfBackend::Remote => "remote",
        PdfBackend::Auto => "auto",
    }
}

fn key_status(present: bool) -> String {
    if present {
        style("set").green().to_string()
    } else {
        style("missing").red().to_string()
    }
}
