use anyhow::{Context, Result};
use console::style;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::embeddings::create_embedder;
use crate::index::DocumentMetadata;
use crate::indexer::{ConsistencyValidator, OfflineProcessor, PipelineStage};
use crate::knowledge::{AnomalyReport, KnowledgeBase, KnowledgeRetriever};
use crate::retriever::{OnlineRetriever, RetrievalResult};


const PREVIEW_CHARS: usize = 200;

/// Parse every document in the data directory and write the index
#[inline]
pub fn build_index(
    mut config: Config,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    if let Some(data_dir) = data_dir {
        config.paths.data_dir = data_dir;
    }
    if let Some(output_dir) = output_dir {
        config.paths.output_dir = output_dir;
    }
    config.validate().context("Invalid configuration")?;

    info!("Building index from {}", config.paths.data_dir.display());
    let processor = OfflineProcessor::new(&config).context("Failed to set up the processor")?;
    let stats = processor
        .process_directory()
        .context("Failed to build the index")?;

    println!(
        "📁 Files: {} found, {} processed, {} failed",
        stats.total_files, stats.processed_files, stats.failed_files
    );
    for file in &stats.files {
        println!(
            "   ✅ {} ({} chunks, {} chars)",
            file.filename, file.chunks, file.chars
        );
    }
    for failure in &stats.failures {
        println!("   ❌ {} ({} failed)", failure.filename, failure.reason);
    }

    match stats.stage {
        PipelineStage::Persisted => {
            println!(
                "📄 Indexed {} chunks at dimension {}",
                stats.total_chunks,
                stats.dimension.unwrap_or_default()
            );
            println!(
                "💾 Saved to {}",
                style(config.paths.output_dir.display()).cyan()
            );
        }
        PipelineStage::Scanning => {
            println!("📭 No matching files, index left untouched");
        }
        _ => {
            println!("⚠️  No chunks produced, index left untouched");
        }
    }

    Ok(())
}

/// Query the persisted index
#[inline]
pub fn search(
    config: &Config,
    query: &str,
    top_k: usize,
    source: Option<&str>,
    doc_type: Option<&str>,
) -> Result<()> {
    let retriever = open_retriever(config)?;
    let results = match source {
        Some(source) => retriever.search_by_source(query, source, top_k)?,
        None => retriever.search(query, top_k, doc_type)?,
    };

    if results.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }

    println!("🔍 {} results for '{}':", results.len(), query);
    println!();
    for (rank, result) in results.iter().enumerate() {
        print_result(rank + 1, result);
    }

    Ok(())
}

/// Show what the persisted index holds
#[inline]
pub fn show_stats(config: &Config) -> Result<()> {
    let retriever = open_retriever(config)?;
    let stats = retriever.stats();

    println!("{}", style("📊 Index Statistics").bold().cyan());
    println!("   Documents: {}", stats.total_documents);
    println!("   Dimension: {}", stats.dimension);
    println!("   Metric: {:?}", stats.metric);

    if let Some(manifest) = retriever.manifest() {
        println!(
            "   Built: {} with {} embeddings",
            manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
            manifest.embedding_method
        );
    }

    if stats.source_files.is_empty() {
        println!("   Source Files: none recorded");
    } else {
        println!("   Source Files ({}):", stats.source_files.len());
        for file in &stats.source_files {
            println!("     • {}", file);
        }
    }

    Ok(())
}

/// Cross-check the persisted artifacts
#[inline]
pub fn check_index(config: &Config) -> Result<()> {
    let paths = config.index_paths();
    let report = ConsistencyValidator::new(&paths)
        .validate()
        .context("Failed to check index consistency")?;

    if report.is_consistent() {
        println!("✅ {}", report.summary());
    } else {
        println!("⚠️  {}", report.summary());
        for issue in &report.issues {
            println!("   ❌ {}", issue);
        }
    }
    if !report.has_manifest {
        println!("   ℹ️  No build manifest found");
    }

    Ok(())
}

/// Vector search over the structured knowledge base
#[inline]
pub fn knowledge_search(
    config: &Config,
    query: &str,
    top_k: usize,
    doc_type: Option<&str>,
) -> Result<()> {
    let retriever = open_knowledge(config)?;
    let hits = retriever.search(query, top_k, doc_type)?;

    if hits.is_empty() {
        println!("No knowledge entries for '{}'", query);
        return Ok(());
    }

    println!("📚 {} knowledge entries for '{}':", hits.len(), query);
    println!();
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{}] score {:.4}",
            rank + 1,
            hit.metadata.kind(),
            hit.score
        );
        println!("   {}", preview(&hit.document));
        println!();
    }

    Ok(())
}

/// Recommendations for an anomaly implicating `features`
#[inline]
pub fn recommend(config: &Config, features: &[String], t2: bool, spe: bool) -> Result<()> {
    let retriever = open_knowledge(config)?;
    let report = anomaly_report(features, t2, spe);
    let recommendations = retriever.recommendations(&report)?;

    if recommendations.feature_names.is_empty() {
        println!("No features given, nothing to recommend");
        return Ok(());
    }

    println!("{}", style(&recommendations.summary).bold());
    println!();

    println!("{}", style("Features:").bold().yellow());
    for name in &recommendations.feature_names {
        match recommendations.feature_explanations.get(name) {
            Some(info) => println!("   • {} ({}): {}", name, info.name, info.description),
            None => println!("   • {}: no description available", name),
        }
    }

    if !recommendations.solutions.is_empty() {
        println!();
        println!("{}", style("Solutions:").bold().yellow());
        for scored in &recommendations.solutions {
            println!(
                "   🔧 {} [{}] (score {:.4})",
                scored.solution.problem, scored.solution.priority, scored.relevance_score
            );
            for step in &scored.solution.solutions {
                println!("      - {}", step);
            }
        }
    }

    if !recommendations.relevant_concepts.is_empty() {
        println!();
        println!("{}", style("Concepts:").bold().yellow());
        for scored in &recommendations.relevant_concepts {
            println!("   💡 {}: {}", scored.concept.term, scored.concept.definition);
        }
    }

    Ok(())
}

/// Treat the order of `features` as their contribution ranking.
/// Without either flag the features are reported as T² contributors.
fn anomaly_report(features: &[String], t2: bool, spe: bool) -> AnomalyReport {
    let ranked: BTreeMap<String, f64> = features
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .rev()
        .zip(1_u32..)
        .map(|(name, weight)| (name.to_string(), f64::from(weight)))
        .collect();

    let t2_top_features = if t2 || !spe {
        ranked.clone()
    } else {
        BTreeMap::new()
    };
    let spe_top_features = if spe { ranked } else { BTreeMap::new() };

    AnomalyReport {
        t2_anomaly: t2,
        spe_anomaly: spe,
        t2_top_features,
        spe_top_features,
    }
}

fn open_retriever(config: &Config) -> Result<OnlineRetriever> {
    let embedder = create_embedder(&config.embedding)?;
    OnlineRetriever::open(&config.index_paths(), embedder).with_context(|| {
        format!(
            "Failed to open the index in {} (run 'knowledge-rag build' first)",
            config.paths.output_dir.display()
        )
    })
}

fn open_knowledge(config: &Config) -> Result<KnowledgeRetriever> {
    let kb = KnowledgeBase::load(&config.paths.knowledge_dir)?;
    let embedder = create_embedder(&config.embedding)?;
    Ok(KnowledgeRetriever::new(kb, embedder)?)
}

fn print_result(rank: usize, result: &RetrievalResult) {
    let origin = match &result.metadata {
        Some(DocumentMetadata::File {
            source_file,
            chunk_index,
            ..
        }) => format!("{} #{}", source_file, chunk_index),
        Some(other) => other.kind().to_string(),
        None => "unknown source".to_string(),
    };

    println!("{}. {} (score {:.4})", rank, style(origin).cyan(), result.score);
    println!("   {}", preview(&result.document));
    println!();
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        format!("{}...", flat.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        flat
    }
}
