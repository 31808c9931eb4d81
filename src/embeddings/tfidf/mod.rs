
use std::collections::{BTreeMap, HashMap};

use fancy_regex::Regex;
use tracing::debug;

use super::Embeddings;
use crate::{RagError, Result};

/// Words of two or more word characters
const TOKEN_PATTERN: &str = r"\b\w\w+\b";

/// Untrained TF-IDF vectorizer over unigrams and bigrams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfidfVectorizer {
    max_features: usize,
}

/// Fitted vocabulary and inverse document frequencies
#[derive(Debug, Clone)]
pub struct TfidfModel {
    tokenizer: Regex,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    #[inline]
    pub fn new(max_features: usize) -> Self {
        Self { max_features }
    }

    #[inline]
    pub fn max_features(&self) -> usize {
        self.max_features
    }

    /// Learn the vocabulary and idf weights from `corpus`
    #[inline]
    pub fn fit(&self, corpus: &[String]) -> Result<TfidfModel> {
        if corpus.is_empty() {
            return Err(RagError::Embedding(
                "Cannot fit TF-IDF on an empty corpus".to_string(),
            ));
        }

        let tokenizer = Regex::new(TOKEN_PATTERN)
            .map_err(|e| RagError::Embedding(format!("Invalid token pattern: {}", e)))?;

        let mut term_counts: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for document in corpus {
            let mut seen: HashMap<String, usize> = HashMap::new();
            for term in analyze(&tokenizer, document) {
                *seen.entry(term).or_default() += 1;
            }
            for (term, count) in seen {
                *term_counts.entry(term.clone()).or_default() += count;
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        if term_counts.is_empty() {
            return Err(RagError::Embedding(
                "Corpus contains no tokens to build a vocabulary from".to_string(),
            ));
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|(term_a, count_a), (term_b, count_b)| {
            count_b.cmp(count_a).then_with(|| term_a.cmp(term_b))
        });
        ranked.truncate(self.max_features);

        // Feature columns are ordered alphabetically
        let selected: BTreeMap<String, usize> = ranked
            .into_iter()
            .map(|(term, _)| {
                let df = document_frequency.get(&term).copied().unwrap_or(0);
                (term, df)
            })
            .collect();

        let n_documents = corpus.len() as f64;
        let mut vocabulary = HashMap::with_capacity(selected.len());
        let mut idf = Vec::with_capacity(selected.len());
        for (column, (term, df)) in selected.into_iter().enumerate() {
            let weight = ((1.0 + n_documents) / (1.0 + df as f64)).ln() + 1.0;
            idf.push(weight as f32);
            vocabulary.insert(term, column);
        }

        debug!(
            "Fitted TF-IDF on {} documents with {} features",
            corpus.len(),
            vocabulary.len()
        );

        Ok(TfidfModel {
            tokenizer,
            vocabulary,
            idf,
        })
    }
}

impl TfidfModel {
    /// Number of columns in every embedding row
    #[inline]
    pub fn dimension(&self) -> usize {
        self.idf.len()
    }

    #[inline]
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    #[inline]
    pub fn contains_term(&self, term: &str) -> bool {
        self.vocabulary.contains_key(term)
    }

    /// L2-normalised tf-idf rows. Text with no known terms maps to the zero vector.
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Embeddings {
        texts.iter().map(|text| self.embed_text(text)).collect()
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut row = vec![0.0_f64; self.idf.len()];

        for term in analyze(&self.tokenizer, text) {
            if let Some(&column) = self.vocabulary.get(&term) {
                row[column] += 1.0;
            }
        }

        for (value, weight) in row.iter_mut().zip(&self.idf) {
            *value *= f64::from(*weight);
        }

        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            row.iter_mut().for_each(|v| *v /= norm);
        }

        row.into_iter().map(|v| v as f32).collect()
    }
}

/// Lower-cased unigrams followed by space-joined bigrams
fn analyze(tokenizer: &Regex, text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = tokenizer
        .find_iter(&lowered)
        .flatten()
        .map(|m| m.as_str())
        .collect();

    let bigrams = tokens.windows(2).map(|pair| pair.join(" "));
    tokens
        .iter()
        .map(|t| (*t).to_string())
        .chain(bigrams)
        .collect()
}
