// Indexer module
// Offline build: scan, parse, chunk, embed and persist the vector index

pub mod consistency;


use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, EmbeddingMethod};
use crate::embeddings::{Chunker, UntrainedEmbedder, create_embedder};
use crate::index::{
    Document, DocumentMetadata, FlatIndex, IndexPaths, Metric, StagedFile, commit_all,
    read_json, stage_json, stage_metadata,
};
use crate::parser::{DocumentParser, SUPPORTED_EXTENSIONS, file_extension};
use crate::{RagError, Result};

pub use consistency::{ConsistencyIssue, ConsistencyReport, ConsistencyValidator};

const SAMPLE_CHUNKS: usize = 3;

/// How far a build got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Scanning,
    ParsingChunking,
    Embedding,
    Indexing,
    Persisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDetail {
    pub filename: String,
    pub chunks: usize,
    pub chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub filename: String,
    /// `parse` or `chunk`
    pub reason: String,
}

/// Statistics about one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub total_chunks: usize,
    pub files: Vec<FileDetail>,
    pub failures: Vec<FileFailure>,
    pub dimension: Option<usize>,
    pub stage: PipelineStage,
}

impl ProcessingStats {
    fn new(total_files: usize) -> Self {
        Self {
            total_files,
            processed_files: 0,
            failed_files: 0,
            total_chunks: 0,
            files: Vec::new(),
            failures: Vec::new(),
            dimension: None,
            stage: PipelineStage::Scanning,
        }
    }

    fn record_failure(&mut self, filename: &str, reason: &str) {
        self.failed_files += 1;
        self.failures.push(FileFailure {
            filename: filename.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Parse-and-chunk preview of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub filename: String,
    pub chunks: usize,
    pub chars: usize,
    pub sample_chunks: Vec<String>,
}

/// Written next to the index so readers can tell how it was built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub created_at: DateTime<Utc>,
    pub embedding_method: EmbeddingMethod,
    pub dimension: usize,
    pub total_chunks: usize,
    pub source_files: Vec<String>,
}

impl BuildManifest {
    /// `None` when the index was built without a manifest
    #[inline]
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        read_json(path).map(Some)
    }
}

/// Offline document processor that builds the persisted index
#[derive(Debug, Clone)]
pub struct OfflineProcessor {
    data_dir: PathBuf,
    extensions: Vec<String>,
    paths: IndexPaths,
    parser: DocumentParser,
    chunker: Chunker,
    embedder: UntrainedEmbedder,
}

impl OfflineProcessor {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let chunker = Chunker::from_config(&config.chunking)
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            data_dir: config.paths.data_dir.clone(),
            extensions: config.paths.extensions.clone(),
            paths: config.index_paths(),
            parser: DocumentParser::from_config(&config.parser)?,
            chunker,
            embedder: create_embedder(&config.embedding)?,
        })
    }

    /// Build from explicit parts. Every supported extension is scanned.
    #[inline]
    pub fn with_components(
        data_dir: PathBuf,
        output_dir: &Path,
        parser: DocumentParser,
        chunker: Chunker,
        embedder: UntrainedEmbedder,
    ) -> Self {
        Self {
            data_dir,
            extensions: SUPPORTED_EXTENSIONS.iter().map(|ext| (*ext).to_string()).collect(),
            paths: IndexPaths::in_dir(output_dir),
            parser,
            chunker,
            embedder,
        }
    }

    #[inline]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    #[inline]
    pub fn index_paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Process every matching file in the data directory and persist the index.
    /// Files that fail to parse or chunk are recorded and skipped.
    #[inline]
    pub fn process_directory(&self) -> Result<ProcessingStats> {
        let files = self.scan_directory()?;
        info!(
            "Found {} files to process in {}",
            files.len(),
            self.data_dir.display()
        );

        let mut stats = ProcessingStats::new(files.len());
        if files.is_empty() {
            warn!("No matching files in {}", self.data_dir.display());
            return Ok(stats);
        }

        stats.stage = PipelineStage::ParsingChunking;
        let progress = progress_bar(files.len());
        let mut documents: Vec<Document> = Vec::new();

        for path in &files {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            progress.set_message(filename.clone());

            match self.parse_and_chunk(path) {
                Err(reason) => {
                    warn!("Skipping {} ({} failed)", filename, reason);
                    stats.record_failure(&filename, reason);
                }
                Ok((text, chunks)) => {
                    debug!("{}: {} chunks", filename, chunks.len());
                    stats.processed_files += 1;
                    stats.files.push(FileDetail {
                        filename: filename.clone(),
                        chunks: chunks.len(),
                        chars: text.chars().count(),
                    });

                    let file_path = path.display().to_string();
                    for chunk in chunks {
                        let chunk_index = documents.len();
                        documents.push(Document {
                            text: chunk,
                            metadata: DocumentMetadata::File {
                                source_file: filename.clone(),
                                file_path: file_path.clone(),
                                chunk_index,
                            },
                        });
                    }
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        stats.total_chunks = documents.len();
        info!(
            "Parsing and chunking finished: {} processed, {} failed, {} chunks",
            stats.processed_files, stats.failed_files, stats.total_chunks
        );

        if documents.is_empty() {
            warn!("No chunks produced, index left untouched");
            return Ok(stats);
        }

        let (texts, metadata): (Vec<String>, Vec<DocumentMetadata>) = documents
            .into_iter()
            .map(|doc| (doc.text, doc.metadata))
            .unzip();

        stats.stage = PipelineStage::Embedding;
        info!("Embedding {} chunks", texts.len());
        let embedder = self.embedder.clone().fit(&texts)?;
        let vectors = embedder.embed(&texts)?;
        let dimension = vectors.first().map_or(0, Vec::len);
        stats.dimension = Some(dimension);

        stats.stage = PipelineStage::Indexing;
        let mut index = FlatIndex::new(dimension, Metric::L2);
        index.add(vectors, texts)?;

        let manifest = BuildManifest {
            created_at: Utc::now(),
            embedding_method: embedder.method(),
            dimension,
            total_chunks: index.len(),
            source_files: stats.files.iter().map(|f| f.filename.clone()).collect(),
        };
        self.persist(&index, &metadata, &manifest)?;
        stats.stage = PipelineStage::Persisted;

        info!(
            "Index built: {} chunks from {} files, dimension {}",
            stats.total_chunks, stats.processed_files, dimension
        );
        Ok(stats)
    }

    /// Parse and chunk one file without touching the index
    #[inline]
    pub fn process_single_file(&self, path: &Path) -> Result<FileReport> {
        let (text, chunks) = self.parse_and_chunk(path).map_err(|reason| {
            RagError::Parse(format!("{} failed for {}", reason, path.display()))
        })?;

        Ok(FileReport {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            chunks: chunks.len(),
            chars: text.chars().count(),
            sample_chunks: chunks.into_iter().take(SAMPLE_CHUNKS).collect(),
        })
    }

    fn parse_and_chunk(&self, path: &Path) -> std::result::Result<(String, Vec<String>), &'static str> {
        let text = self.parser.parse(path).ok_or("parse")?;
        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            return Err("chunk");
        }
        Ok((text, chunks))
    }

    /// Regular files directly inside the data directory with a configured
    /// extension, sorted by path
    fn scan_directory(&self) -> Result<Vec<PathBuf>> {
        if !self.data_dir.is_dir() {
            return Err(RagError::Config(format!(
                "Data directory does not exist: {}",
                self.data_dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if file_extension(&path).is_some_and(|ext| self.extensions.contains(&ext)) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn persist(
        &self,
        index: &FlatIndex,
        metadata: &[DocumentMetadata],
        manifest: &BuildManifest,
    ) -> Result<()> {
        let mut staged = index.stage(&self.paths.index, &self.paths.documents)?;
        stage_or_discard(&mut staged, stage_metadata(&self.paths.metadata, metadata))?;
        stage_or_discard(&mut staged, stage_json(&self.paths.manifest, manifest))?;

        commit_all(staged)?;
        info!(
            "Saved index, documents, metadata and manifest to {}",
            self.paths
                .index
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .display()
        );
        Ok(())
    }
}

/// Keep `next` with the other staged files, or throw all of them away
fn stage_or_discard(staged: &mut Vec<StagedFile>, next: Result<StagedFile>) -> Result<()> {
    match next {
        Ok(file) => {
            staged.push(file);
            Ok(())
        }
        Err(e) => {
            std::mem::take(staged)
                .into_iter()
                .for_each(StagedFile::discard);
            Err(e)
        }
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(u64::try_from(len).unwrap_or(u64::MAX));
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{pos}/{len}] Processing {msg}") {
        bar.set_style(style);
    }
    bar
}
