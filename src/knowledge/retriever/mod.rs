#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Concept, FeatureInfo, KnowledgeBase, Solution};
use crate::embeddings::{Embedder, UntrainedEmbedder};
use crate::index::{DocumentMetadata, FlatIndex, Metric};
use crate::Result;

const MAX_RECOMMENDED_FEATURES: usize = 5;
const SUMMARY_FEATURE_DETAILS: usize = 2;
const T2_CONCEPT_QUERY: &str = "T2 statistic anomaly";
const SPE_CONCEPT_QUERY: &str = "SPE statistic anomaly";

/// A knowledge-base document matched by a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeHit {
    pub document: String,
    pub score: f32,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureExplanations {
    pub features: BTreeMap<String, FeatureInfo>,
    /// Other catalogue features similar to the requested ones
    pub related_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSolution {
    #[serde(flatten)]
    pub solution: Solution,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredConcept {
    #[serde(flatten)]
    pub concept: Concept,
    pub relevance_score: f32,
}

/// Output of the anomaly detector that the recommendations are built from.
/// Feature maps hold each feature's contribution to the statistic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    #[serde(rename = "T2X_anomaly", default)]
    pub t2_anomaly: bool,
    #[serde(rename = "SPEX_anomaly", default)]
    pub spe_anomaly: bool,
    #[serde(rename = "T2X_top_features", default)]
    pub t2_top_features: BTreeMap<String, f64>,
    #[serde(rename = "SPEX_top_features", default)]
    pub spe_top_features: BTreeMap<String, f64>,
}

impl AnomalyReport {
    /// Features named by either statistic, strongest contributors first,
    /// without duplicates and capped at five
    #[inline]
    pub fn implicated_features(&self) -> Vec<String> {
        let by_contribution = |features: &BTreeMap<String, f64>| {
            features
                .iter()
                .sorted_by(|(name_a, a), (name_b, b)| {
                    b.total_cmp(a).then_with(|| name_a.cmp(name_b))
                })
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>()
        };

        by_contribution(&self.t2_top_features)
            .into_iter()
            .chain(by_contribution(&self.spe_top_features))
            .unique()
            .take(MAX_RECOMMENDED_FEATURES)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendations {
    pub feature_names: Vec<String>,
    pub feature_explanations: BTreeMap<String, FeatureInfo>,
    pub solutions: Vec<ScoredSolution>,
    pub relevant_concepts: Vec<ScoredConcept>,
    pub summary: String,
}

/// In-memory vector search over a knowledge base
#[derive(Debug, Clone)]
pub struct KnowledgeRetriever {
    kb: KnowledgeBase,
    metadata: Vec<DocumentMetadata>,
    embedder: Option<Embedder>,
    index: FlatIndex,
}

impl KnowledgeRetriever {
    /// Flatten `kb` into documents, fit the embedder on them and index the
    /// result. An empty knowledge base gives a retriever that finds nothing.
    #[inline]
    pub fn new(kb: KnowledgeBase, embedder: UntrainedEmbedder) -> Result<Self> {
        let (texts, metadata): (Vec<String>, Vec<DocumentMetadata>) = kb
            .documents()
            .into_iter()
            .map(|doc| (doc.text, doc.metadata))
            .unzip();

        if texts.is_empty() {
            warn!("Knowledge base is empty, nothing to index");
            return Ok(Self {
                kb,
                metadata,
                embedder: None,
                index: FlatIndex::new(0, Metric::Cosine),
            });
        }

        let embedder = embedder.fit(&texts)?;
        let vectors = embedder.embed(&texts)?;
        let dimension = vectors.first().map_or(0, Vec::len);

        let mut index = FlatIndex::new(dimension, Metric::Cosine);
        index.add(vectors, texts)?;

        info!(
            "Indexed {} knowledge documents ({} dimensions)",
            index.len(),
            dimension
        );

        Ok(Self {
            kb,
            metadata,
            embedder: Some(embedder),
            index,
        })
    }

    #[inline]
    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Most similar documents, optionally restricted to one document type
    /// (`feature`, `solution` or `concept`)
    #[inline]
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        doc_type: Option<&str>,
    ) -> Result<Vec<KnowledgeHit>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = embedder.embed_one(query)?;
        let hits = self.index.search(&query_vector, self.index.len())?;

        let results: Vec<KnowledgeHit> = hits
            .into_iter()
            .filter_map(|hit| {
                let metadata = self.metadata.get(hit.position)?;
                if doc_type.is_some_and(|kind| metadata.kind() != kind) {
                    return None;
                }
                Some(KnowledgeHit {
                    document: hit.text,
                    score: hit.similarity,
                    metadata: metadata.clone(),
                })
            })
            .take(top_k)
            .collect();

        debug!(
            "Knowledge search for '{}' ({:?}) returned {} results",
            query,
            doc_type,
            results.len()
        );
        Ok(results)
    }

    /// Catalogue entries for `names`, plus similar features when `include_related`
    #[inline]
    pub fn feature_explanations(
        &self,
        names: &[String],
        include_related: bool,
    ) -> Result<FeatureExplanations> {
        let features: BTreeMap<String, FeatureInfo> = self
            .kb
            .features_info(names)
            .into_iter()
            .map(|(name, info)| (name, info.clone()))
            .collect();

        let mut related_features = Vec::new();
        if include_related && !features.is_empty() {
            let query = features.values().map(|info| info.name.as_str()).join(" ");
            related_features = self
                .search(&query, 3, Some("feature"))?
                .into_iter()
                .filter_map(|hit| match hit.metadata {
                    DocumentMetadata::Feature { name, .. } if !names.contains(&name) => Some(name),
                    _ => None,
                })
                .collect();
        }

        Ok(FeatureExplanations {
            features,
            related_features,
        })
    }

    /// Solutions for a problem description, with the query enriched by the
    /// names and related systems of `feature_names`
    #[inline]
    pub fn find_solutions(
        &self,
        problem: &str,
        feature_names: &[String],
        top_k: usize,
    ) -> Result<Vec<ScoredSolution>> {
        let mut query_parts = vec![problem.to_string()];
        for info in feature_names.iter().filter_map(|name| self.kb.feature_info(name)) {
            query_parts.push(info.name.clone());
            query_parts.push(info.related_to.clone());
        }
        let query = query_parts.join(" ");

        Ok(self
            .search(&query, top_k, Some("solution"))?
            .into_iter()
            .filter_map(|hit| match hit.metadata {
                DocumentMetadata::Solution { solution, .. } => Some(ScoredSolution {
                    solution,
                    relevance_score: hit.score,
                }),
                _ => None,
            })
            .collect())
    }

    #[inline]
    pub fn search_concepts(&self, query: &str, top_k: usize) -> Result<Vec<ScoredConcept>> {
        Ok(self
            .search(query, top_k, Some("concept"))?
            .into_iter()
            .filter_map(|hit| match hit.metadata {
                DocumentMetadata::Concept { concept, .. } => Some(ScoredConcept {
                    concept,
                    relevance_score: hit.score,
                }),
                _ => None,
            })
            .collect())
    }

    /// Definitions, solutions, concepts and a short summary for an anomaly
    #[inline]
    pub fn recommendations(&self, report: &AnomalyReport) -> Result<Recommendations> {
        let feature_names = report.implicated_features();
        if feature_names.is_empty() {
            return Ok(Recommendations::default());
        }

        let feature_explanations = self.feature_explanations(&feature_names, false)?.features;

        let problem = format!("Anomaly detected in {}", feature_names.join(", "));
        let solutions = self.find_solutions(&problem, &feature_names, 3)?;

        let mut relevant_concepts = Vec::new();
        if report.t2_anomaly {
            relevant_concepts.extend(self.search_concepts(T2_CONCEPT_QUERY, 1)?);
        }
        if report.spe_anomaly {
            relevant_concepts.extend(self.search_concepts(SPE_CONCEPT_QUERY, 1)?);
        }

        let details = feature_names
            .iter()
            .filter_map(|name| {
                feature_explanations
                    .get(name)
                    .map(|info| format!("{}({}): {}", name, info.name, info.impact))
            })
            .take(SUMMARY_FEATURE_DETAILS)
            .join(" ");
        let summary = format!(
            "Anomaly detected, mainly involving features: {}. {}",
            feature_names.join(", "),
            details
        )
        .trim_end()
        .to_string();

        Ok(Recommendations {
            feature_names,
            feature_explanations,
            solutions,
            relevant_concepts,
            summary,
        })
    }
}
