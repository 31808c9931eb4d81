// Index module
// Document model, flat vector store and on-disk artifacts


pub mod vector_store;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::knowledge::{Concept, FeatureInfo, Solution};
use crate::{RagError, Result};

pub use vector_store::{FlatIndex, IndexStats, Metric, SearchHit, StoredShape};

const INDEX_FILE: &str = "vectors.bin";
const DOCUMENTS_FILE: &str = "documents.json";
const METADATA_FILE: &str = "metadata.json";
const MANIFEST_FILE: &str = "manifest.json";

/// A retrievable unit of text and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DocumentMetadata {
    /// A chunk of a source file. `chunk_index` counts across the whole build.
    File {
        source_file: String,
        file_path: String,
        chunk_index: usize,
    },
    Feature {
        name: String,
        info: FeatureInfo,
    },
    Solution {
        problem: String,
        priority: String,
        solution: Solution,
    },
    Concept {
        term: String,
        category: String,
        concept: Concept,
    },
}

impl DocumentMetadata {
    /// The `type` tag used for filtering
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Feature { .. } => "feature",
            Self::Solution { .. } => "solution",
            Self::Concept { .. } => "concept",
        }
    }

    #[inline]
    pub fn source_file(&self) -> Option<&str> {
        match self {
            Self::File { source_file, .. } => Some(source_file),
            _ => None,
        }
    }
}

/// Locations of the persisted artifacts of one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub index: PathBuf,
    pub documents: PathBuf,
    pub metadata: PathBuf,
    pub manifest: PathBuf,
}

impl IndexPaths {
    #[inline]
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            index: dir.join(INDEX_FILE),
            documents: dir.join(DOCUMENTS_FILE),
            metadata: dir.join(METADATA_FILE),
            manifest: dir.join(MANIFEST_FILE),
        }
    }
}

/// A fully written file waiting to be renamed over its target
#[derive(Debug)]
#[must_use = "staged files are only visible after commit"]
pub struct StagedFile {
    staged: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    #[inline]
    pub fn commit(self) -> Result<()> {
        fs::rename(&self.staged, &self.target).with_context(|| {
            format!(
                "Failed to move {} into place",
                self.target.display()
            )
        })?;
        Ok(())
    }

    #[inline]
    pub fn discard(self) {
        // Best effort
        let _ = fs::remove_file(&self.staged);
    }

    #[inline]
    pub fn target(&self) -> &Path {
        &self.target
    }
}

/// Rename every staged file into place. Files are fully written before any
/// rename happens, so readers see either the old or the new set.
#[inline]
pub fn commit_all(staged: Vec<StagedFile>) -> Result<()> {
    for file in staged {
        file.commit()?;
    }
    Ok(())
}

/// Write `target` under a `.tmp` name using `write`
#[inline]
pub fn stage_file<F>(target: &Path, write: F) -> Result<StagedFile>
where
    F: FnOnce(&mut BufWriter<File>) -> anyhow::Result<()>,
{
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut staged_name = target.as_os_str().to_owned();
    staged_name.push(".tmp");
    let staged = PathBuf::from(staged_name);

    let file = File::create(&staged)
        .with_context(|| format!("Failed to create {}", staged.display()))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer).with_context(|| format!("Failed to write {}", target.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", staged.display()))?;

    Ok(StagedFile {
        staged,
        target: target.to_path_buf(),
    })
}

pub(crate) fn stage_json<T: Serialize + ?Sized>(target: &Path, value: &T) -> Result<StagedFile> {
    stage_file(target, |writer| {
        serde_json::to_writer_pretty(writer, value).context("Failed to serialize JSON")
    })
}

/// Read a JSON artifact. A missing file is `IndexNotFound`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(RagError::IndexNotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| RagError::Index(format!("Failed to parse {}: {}", path.display(), e)))
}

#[inline]
pub fn stage_metadata(path: &Path, metadata: &[DocumentMetadata]) -> Result<StagedFile> {
    stage_json(path, metadata)
}

/// Persist the metadata list, aligned by position with the document list
#[inline]
pub fn save_metadata(path: &Path, metadata: &[DocumentMetadata]) -> Result<()> {
    stage_metadata(path, metadata)?.commit()
}

#[inline]
pub fn load_metadata(path: &Path) -> Result<Vec<DocumentMetadata>> {
    read_json(path)
}
