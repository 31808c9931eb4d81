// Retriever module
// Online search over an index built by the offline processor


use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Result;
use crate::embeddings::{Embedder, UntrainedEmbedder};
use crate::index::{DocumentMetadata, FlatIndex, IndexPaths, Metric, load_metadata};
use crate::indexer::BuildManifest;

/// Over-fetch factor used when results are filtered by source file
const SOURCE_OVERFETCH: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub document: String,
    pub score: f32,
    pub metadata: Option<DocumentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrieverStats {
    pub total_documents: usize,
    pub dimension: usize,
    pub metric: Metric,
    /// Distinct source files, sorted
    pub source_files: Vec<String>,
}

/// Search service over a persisted index
#[derive(Debug, Clone)]
pub struct OnlineRetriever {
    index: FlatIndex,
    metadata: Option<Vec<DocumentMetadata>>,
    manifest: Option<BuildManifest>,
    embedder: Embedder,
}

impl OnlineRetriever {
    /// Load the persisted index and prepare `embedder` for queries.
    /// Trainable embedders are fitted on the stored document texts.
    #[inline]
    pub fn open(paths: &IndexPaths, embedder: UntrainedEmbedder) -> Result<Self> {
        let index = FlatIndex::load(&paths.index, &paths.documents)?;

        let metadata = if paths.metadata.exists() {
            match load_metadata(&paths.metadata) {
                Ok(metadata) if metadata.len() == index.len() => {
                    info!("Loaded {} metadata entries", metadata.len());
                    Some(metadata)
                }
                Ok(metadata) => {
                    warn!(
                        "Metadata has {} entries for {} documents, ignoring it",
                        metadata.len(),
                        index.len()
                    );
                    None
                }
                Err(e) => {
                    warn!("Unreadable metadata, results will carry none: {}", e);
                    None
                }
            }
        } else {
            warn!(
                "No metadata at {}, results will carry none",
                paths.metadata.display()
            );
            None
        };

        let manifest = BuildManifest::load(&paths.manifest).unwrap_or_else(|e| {
            warn!("Ignoring unreadable build manifest: {}", e);
            None
        });
        if let Some(manifest) = &manifest {
            if manifest.embedding_method != embedder.method() {
                warn!(
                    "Index was built with {:?} embeddings but {:?} is configured",
                    manifest.embedding_method,
                    embedder.method()
                );
            }
        }

        if embedder.is_trainable() {
            debug!("Fitting embedder on {} stored documents", index.len());
        }
        let embedder = embedder.fit(index.documents())?;

        info!(
            "Index loaded: {} documents, dimension {}",
            index.len(),
            index.dimension()
        );

        Ok(Self {
            index,
            metadata,
            manifest,
            embedder,
        })
    }

    #[inline]
    pub fn manifest(&self) -> Option<&BuildManifest> {
        self.manifest.as_ref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Most similar chunks, optionally restricted to one metadata type
    #[inline]
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        doc_type: Option<&str>,
    ) -> Result<Vec<RetrievalResult>> {
        match doc_type {
            None => self.search_filtered(query, top_k, top_k, |_| true),
            Some(kind) => self.search_filtered(query, self.index.len(), top_k, |metadata| {
                metadata.is_some_and(|m| m.kind() == kind)
            }),
        }
    }

    /// Search restricted to chunks of one source file
    #[inline]
    pub fn search_by_source(
        &self,
        query: &str,
        source_file: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        self.search_filtered(
            query,
            top_k.saturating_mul(SOURCE_OVERFETCH),
            top_k,
            |metadata| metadata.and_then(DocumentMetadata::source_file) == Some(source_file),
        )
    }

    fn search_filtered<F>(
        &self,
        query: &str,
        fetch: usize,
        top_k: usize,
        keep: F,
    ) -> Result<Vec<RetrievalResult>>
    where
        F: Fn(Option<&DocumentMetadata>) -> bool,
    {
        if query.trim().is_empty() || top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_one(query)?;
        if query_vector.len() != self.index.dimension() {
            warn!(
                "Query embedded to {} dimensions but the index holds {}; rebuild the index with the configured embedder",
                query_vector.len(),
                self.index.dimension()
            );
        }
        let hits = self.index.search(&query_vector, fetch)?;

        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter_map(|hit| {
                let metadata = self
                    .metadata
                    .as_ref()
                    .and_then(|all| all.get(hit.position));
                keep(metadata).then(|| RetrievalResult {
                    document: hit.text,
                    score: hit.similarity,
                    metadata: metadata.cloned(),
                })
            })
            .take(top_k)
            .collect();

        debug!("Query '{}' returned {} results", query, results.len());
        Ok(results)
    }

    #[inline]
    pub fn stats(&self) -> RetrieverStats {
        let source_files: BTreeSet<&str> = self
            .metadata
            .iter()
            .flatten()
            .filter_map(DocumentMetadata::source_file)
            .collect();

        let index_stats = self.index.stats();
        RetrieverStats {
            total_documents: index_stats.total_documents,
            dimension: index_stats.dimension,
            metric: index_stats.metric,
            source_files: source_files.into_iter().map(str::to_string).collect(),
        }
    }
}
