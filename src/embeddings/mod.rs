// Embeddings module
// Chunking, local TF-IDF and remote embedders, and the hybrid fallback

#[cfg(test)]
mod tests;

pub mod chunking;
pub mod remote;
pub mod tfidf;

use tracing::{debug, info, warn};

pub use chunking::{
    Chunker, ChunkingConfig, ChunkingStrategy, FixedSizeChunker, SemanticChunker,
    estimate_token_count,
};
pub use remote::RemoteEmbedder;
pub use tfidf::{TfidfModel, TfidfVectorizer};

use crate::config::{EmbeddingConfig, EmbeddingMethod};
use crate::{RagError, Result};

/// One row per input text, every row the same width
pub type Embeddings = Vec<Vec<f32>>;

/// An embedder that may still need to see the corpus before it can embed
#[derive(Debug, Clone)]
pub enum UntrainedEmbedder {
    Tfidf(TfidfVectorizer),
    Remote(RemoteEmbedder),
    Hybrid {
        remote: Option<RemoteEmbedder>,
        local: TfidfVectorizer,
    },
}

/// A ready-to-use embedder
#[derive(Debug, Clone)]
pub enum Embedder {
    Tfidf(TfidfModel),
    Remote(RemoteEmbedder),
    Hybrid(HybridEmbedder),
}

/// Build the configured embedder. Remote embedding without an API key is a
/// configuration error; the hybrid embedder degrades to local-only instead.
#[inline]
pub fn create_embedder(config: &EmbeddingConfig) -> Result<UntrainedEmbedder> {
    let local = TfidfVectorizer::new(config.max_features);

    match config.method {
        EmbeddingMethod::Simple => Ok(UntrainedEmbedder::Tfidf(local)),
        EmbeddingMethod::Remote => Ok(UntrainedEmbedder::Remote(RemoteEmbedder::from_config(
            config,
        )?)),
        EmbeddingMethod::Hybrid => {
            let remote = match RemoteEmbedder::from_config(config) {
                Ok(remote) => Some(remote),
                Err(e) => {
                    warn!("Remote embedder unavailable, hybrid will use TF-IDF only: {}", e);
                    None
                }
            };
            Ok(UntrainedEmbedder::Hybrid { remote, local })
        }
    }
}

impl UntrainedEmbedder {
    /// Whether `fit` must see a corpus before the embedder is usable
    #[inline]
    pub fn is_trainable(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }

    #[inline]
    pub fn method(&self) -> EmbeddingMethod {
        match self {
            Self::Tfidf(_) => EmbeddingMethod::Simple,
            Self::Remote(_) => EmbeddingMethod::Remote,
            Self::Hybrid { .. } => EmbeddingMethod::Hybrid,
        }
    }

    /// Fit the trainable parts on `corpus`. Non-trainable embedders ignore it.
    #[inline]
    pub fn fit(self, corpus: &[String]) -> Result<Embedder> {
        match self {
            Self::Tfidf(vectorizer) => Ok(Embedder::Tfidf(vectorizer.fit(corpus)?)),
            Self::Remote(remote) => {
                debug!("Remote embedder needs no fitting, ignoring corpus");
                Ok(Embedder::Remote(remote))
            }
            Self::Hybrid { remote, local } => Ok(Embedder::Hybrid(HybridEmbedder::new(
                remote,
                local.fit(corpus)?,
            ))),
        }
    }

    /// Use the embedder without a corpus. Fails for trainable embedders.
    #[inline]
    pub fn ready(self) -> Result<Embedder> {
        match self {
            Self::Remote(remote) => Ok(Embedder::Remote(remote)),
            Self::Tfidf(_) | Self::Hybrid { .. } => Err(RagError::EmbedderNotFitted),
        }
    }
}

impl Embedder {
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        match self {
            Self::Tfidf(model) => Ok(model.embed(texts)),
            Self::Remote(remote) => remote.embed(texts),
            Self::Hybrid(hybrid) => Ok(hybrid.embed(texts)),
        }
    }

    #[inline]
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RagError::Embedding("Empty embedding response".to_string()))
    }

    #[inline]
    pub fn method(&self) -> EmbeddingMethod {
        match self {
            Self::Tfidf(_) => EmbeddingMethod::Simple,
            Self::Remote(_) => EmbeddingMethod::Remote,
            Self::Hybrid(_) => EmbeddingMethod::Hybrid,
        }
    }

    /// Width of the vectors when it is known without calling a remote service
    #[inline]
    pub fn dimension_hint(&self) -> Option<usize> {
        match self {
            Self::Tfidf(model) => Some(model.dimension()),
            Self::Remote(_) => None,
            Self::Hybrid(hybrid) if hybrid.remote.is_none() => Some(hybrid.local.dimension()),
            Self::Hybrid(_) => None,
        }
    }
}

/// Remote first, fitted TF-IDF when the remote call fails
#[derive(Debug, Clone)]
pub struct HybridEmbedder {
    remote: Option<RemoteEmbedder>,
    local: TfidfModel,
}

impl HybridEmbedder {
    #[inline]
    pub fn new(remote: Option<RemoteEmbedder>, local: TfidfModel) -> Self {
        Self { remote, local }
    }

    #[inline]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Width of the vectors produced when the remote service is unavailable
    #[inline]
    pub fn local_dimension(&self) -> usize {
        self.local.dimension()
    }

    /// Never fails: any remote error falls back to the local model
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Embeddings {
        if let Some(remote) = &self.remote {
            match remote.embed(texts) {
                Ok(embeddings) => {
                    info!("Embedded {} texts with remote service", texts.len());
                    return embeddings;
                }
                Err(e) => warn!(
                    "Remote embedding failed, falling back to TF-IDF ({} dimensions): {}",
                    self.local_dimension(),
                    e
                ),
            }
        }

        info!("Embedded {} texts with local TF-IDF", texts.len());
        self.local.embed(texts)
    }
}
