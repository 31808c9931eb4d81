// Index consistency validation module
// Ensures the persisted vectors, documents, metadata and manifest agree


use std::fmt;

use tracing::{debug, info, warn};

use super::BuildManifest;
use crate::Result;
use crate::index::{DocumentMetadata, FlatIndex, IndexPaths, load_metadata};

/// A single disagreement between the persisted artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// Vector file and document list have different lengths
    DocumentCount { vectors: usize, documents: usize },
    /// Stored rows that do not have the index dimension
    RaggedVectors { rows: usize, dimension: usize },
    MissingMetadata,
    MetadataCount { documents: usize, metadata: usize },
    /// A file chunk whose `chunk_index` is not its position
    MisplacedChunk { position: usize, chunk_index: usize },
    ManifestChunks { manifest: usize, documents: usize },
    ManifestDimension { manifest: usize, index: usize },
}

impl fmt::Display for ConsistencyIssue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocumentCount { vectors, documents } => {
                write!(f, "{vectors} vectors but {documents} documents")
            }
            Self::RaggedVectors { rows, dimension } => {
                write!(f, "{rows} vectors do not have dimension {dimension}")
            }
            Self::MissingMetadata => write!(f, "metadata file is missing"),
            Self::MetadataCount {
                documents,
                metadata,
            } => write!(f, "{documents} documents but {metadata} metadata entries"),
            Self::MisplacedChunk {
                position,
                chunk_index,
            } => write!(f, "document {position} carries chunk_index {chunk_index}"),
            Self::ManifestChunks {
                manifest,
                documents,
            } => write!(f, "manifest records {manifest} chunks, index holds {documents}"),
            Self::ManifestDimension { manifest, index } => {
                write!(f, "manifest records dimension {manifest}, index has {index}")
            }
        }
    }
}

/// Consistency check results for one index directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub vectors: usize,
    pub documents: usize,
    pub metadata: Option<usize>,
    pub has_manifest: bool,
    pub issues: Vec<ConsistencyIssue>,
}

/// Cross-checks the artifacts written by one build
pub struct ConsistencyValidator<'a> {
    paths: &'a IndexPaths,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(paths: &'a IndexPaths) -> Self {
        Self { paths }
    }

    /// Missing vector or document files are an error; everything else that
    /// disagrees is reported as an issue
    #[inline]
    pub fn validate(&self) -> Result<ConsistencyReport> {
        info!("Starting index consistency validation");

        let shape = FlatIndex::inspect(&self.paths.index, &self.paths.documents)?;
        debug!(
            "Found {} vectors and {} documents",
            shape.vectors, shape.texts
        );

        let mut issues = Vec::new();
        if shape.vectors != shape.texts {
            issues.push(ConsistencyIssue::DocumentCount {
                vectors: shape.vectors,
                documents: shape.texts,
            });
        }
        if shape.ragged_rows > 0 {
            issues.push(ConsistencyIssue::RaggedVectors {
                rows: shape.ragged_rows,
                dimension: shape.dimension,
            });
        }

        let metadata = if self.paths.metadata.exists() {
            let metadata = load_metadata(&self.paths.metadata)?;
            issues.extend(check_metadata(&metadata, shape.texts));
            Some(metadata.len())
        } else {
            issues.push(ConsistencyIssue::MissingMetadata);
            None
        };

        let manifest = BuildManifest::load(&self.paths.manifest)?;
        if let Some(manifest) = &manifest {
            if manifest.total_chunks != shape.texts {
                issues.push(ConsistencyIssue::ManifestChunks {
                    manifest: manifest.total_chunks,
                    documents: shape.texts,
                });
            }
            if shape.vectors > 0 && manifest.dimension != shape.dimension {
                issues.push(ConsistencyIssue::ManifestDimension {
                    manifest: manifest.dimension,
                    index: shape.dimension,
                });
            }
        }

        let report = ConsistencyReport {
            vectors: shape.vectors,
            documents: shape.texts,
            metadata,
            has_manifest: manifest.is_some(),
            issues,
        };

        if report.is_consistent() {
            info!("Index consistency validation passed");
        } else {
            warn!("Index consistency validation found issues");
            for issue in &report.issues {
                warn!("Consistency issue: {}", issue);
            }
        }

        Ok(report)
    }
}

fn check_metadata(metadata: &[DocumentMetadata], documents: usize) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();
    if metadata.len() != documents {
        issues.push(ConsistencyIssue::MetadataCount {
            documents,
            metadata: metadata.len(),
        });
    }

    issues.extend(
        metadata
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| match entry {
                DocumentMetadata::File { chunk_index, .. } if *chunk_index != position => {
                    Some(ConsistencyIssue::MisplacedChunk {
                        position,
                        chunk_index: *chunk_index,
                    })
                }
                _ => None,
            }),
    );
    issues
}

impl ConsistencyReport {
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent() {
            format!(
                "Index is consistent: {} vectors, {} documents, {} metadata entries",
                self.vectors,
                self.documents,
                self.metadata.unwrap_or_default()
            )
        } else {
            format!(
                "Index inconsistencies found: {} issues ({} vectors, {} documents, {} metadata entries)",
                self.total_issues(),
                self.vectors,
                self.documents,
                self.metadata
                    .map_or_else(|| "no".to_string(), |count| count.to_string())
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.issues.len()
    }
}
