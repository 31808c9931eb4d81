
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{StagedFile, commit_all, read_json, stage_file, stage_json};
use crate::embeddings::Embeddings;
use crate::{RagError, Result};

/// Distance used to rank neighbours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean distance, similarity `1 / (1 + d)`
    L2,
    /// Cosine similarity
    Cosine,
}

/// Exhaustive nearest-neighbour index over vectors and their texts.
/// Position `i` of the vector list always belongs to position `i` of the text list.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    vectors: Embeddings,
    texts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Insertion position, also the position in any aligned metadata list
    pub position: usize,
    pub text: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub total_documents: usize,
    pub dimension: usize,
    pub metric: Metric,
}

/// Row counts of the stored files, read without requiring them to agree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredShape {
    pub vectors: usize,
    pub dimension: usize,
    /// Rows whose width differs from `dimension`
    pub ragged_rows: usize,
    pub texts: usize,
}

/// Binary vector file layout
#[derive(Deserialize)]
struct StoredVectors {
    dimension: usize,
    metric: Metric,
    vectors: Embeddings,
}

#[derive(Serialize)]
struct StoredVectorsRef<'a> {
    dimension: usize,
    metric: Metric,
    vectors: &'a [Vec<f32>],
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            vectors: Vec::new(),
            texts: Vec::new(),
        }
    }

    /// Append `vectors` with their `texts`. Nothing is added unless every row
    /// has the index dimension and the two lists have the same length.
    #[inline]
    pub fn add(&mut self, vectors: Embeddings, texts: Vec<String>) -> Result<()> {
        if vectors.len() != texts.len() {
            return Err(RagError::LengthMismatch {
                vectors: vectors.len(),
                texts: texts.len(),
            });
        }

        if let Some(row) = vectors.iter().find(|row| row.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: row.len(),
            });
        }

        debug!("Adding {} vectors to index", vectors.len());
        self.vectors.extend(vectors);
        self.texts.extend(texts);
        Ok(())
    }

    /// Up to `k` nearest neighbours of `query`, most similar first
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, self.similarity(query, vector)))
            .k_smallest_by(k, |(pos_a, sim_a), (pos_b, sim_b)| {
                sim_b.total_cmp(sim_a).then_with(|| pos_a.cmp(pos_b))
            })
            .map(|(position, similarity)| SearchHit {
                position,
                text: self.texts[position].clone(),
                similarity,
            })
            .collect();

        Ok(hits)
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::L2 => {
                let distance: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                1.0 / (1.0 + distance)
            }
            Metric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        }
    }

    /// Write both files under temporary names without making them visible
    #[inline]
    pub fn stage(&self, index_path: &Path, docs_path: &Path) -> Result<Vec<StagedFile>> {
        let stored = StoredVectorsRef {
            dimension: self.dimension,
            metric: self.metric,
            vectors: &self.vectors,
        };

        let vectors = stage_file(index_path, |writer| {
            bincode::serialize_into(writer, &stored).context("Failed to encode vectors")
        })?;
        let documents = match stage_json(docs_path, &self.texts) {
            Ok(staged) => staged,
            Err(e) => {
                vectors.discard();
                return Err(e);
            }
        };

        Ok(vec![vectors, documents])
    }

    #[inline]
    pub fn save(&self, index_path: &Path, docs_path: &Path) -> Result<()> {
        commit_all(self.stage(index_path, docs_path)?)?;
        info!(
            "Saved index with {} vectors to {}",
            self.len(),
            index_path.display()
        );
        Ok(())
    }

    #[inline]
    pub fn load(index_path: &Path, docs_path: &Path) -> Result<Self> {
        let stored = read_vectors(index_path)?;
        let texts: Vec<String> = read_json(docs_path)?;

        if stored.vectors.len() != texts.len() {
            return Err(RagError::LengthMismatch {
                vectors: stored.vectors.len(),
                texts: texts.len(),
            });
        }

        if let Some(row) = stored
            .vectors
            .iter()
            .find(|row| row.len() != stored.dimension)
        {
            return Err(RagError::DimensionMismatch {
                expected: stored.dimension,
                actual: row.len(),
            });
        }

        info!(
            "Loaded index with {} vectors of dimension {}",
            texts.len(),
            stored.dimension
        );

        Ok(Self {
            dimension: stored.dimension,
            metric: stored.metric,
            vectors: stored.vectors,
            texts,
        })
    }

    #[inline]
    pub fn inspect(index_path: &Path, docs_path: &Path) -> Result<StoredShape> {
        let stored = read_vectors(index_path)?;
        let texts: Vec<String> = read_json(docs_path)?;

        Ok(StoredShape {
            vectors: stored.vectors.len(),
            dimension: stored.dimension,
            ragged_rows: stored
                .vectors
                .iter()
                .filter(|row| row.len() != stored.dimension)
                .count(),
            texts: texts.len(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Stored texts in insertion order
    #[inline]
    pub fn documents(&self) -> &[String] {
        &self.texts
    }

    #[inline]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_documents: self.len(),
            dimension: self.dimension,
            metric: self.metric,
        }
    }
}

fn read_vectors(index_path: &Path) -> Result<StoredVectors> {
    if !index_path.exists() {
        return Err(RagError::IndexNotFound(index_path.to_path_buf()));
    }

    let file = File::open(index_path)?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
        RagError::Index(format!("Failed to decode {}: {}", index_path.display(), e))
    })
}
