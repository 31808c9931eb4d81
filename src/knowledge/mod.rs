// Knowledge module
// Structured knowledge base, the retriever over it and the agent tool facade

#[cfg(test)]
pub(crate) mod tests;

pub mod retriever;
pub mod tools;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::index::{Document, DocumentMetadata};
use crate::{RagError, Result};

pub use retriever::{
    AnomalyReport, FeatureExplanations, KnowledgeHit, KnowledgeRetriever, Recommendations,
    ScoredConcept, ScoredSolution,
};
pub use tools::{RagTools, ToolResponse, tool_definitions};

const FEATURES_FILE: &str = "features.json";
const SOLUTIONS_FILE: &str = "solutions.json";
const DOMAIN_FILE: &str = "domain_knowledge.json";

/// Physical meaning of a monitored feature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureInfo {
    pub name: String,
    pub description: String,
    pub unit: String,
    /// Free-form; catalogues use both strings and `[min, max]` pairs
    pub normal_range: serde_json::Value,
    pub related_to: String,
    pub anomaly_causes: Vec<String>,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Solution {
    pub problem: String,
    pub symptoms: Vec<String>,
    pub root_causes: Vec<String>,
    pub solutions: Vec<String>,
    pub priority: String,
    pub typical_resolution_time: Option<String>,
}

impl Default for Solution {
    #[inline]
    fn default() -> Self {
        Self {
            problem: String::new(),
            symptoms: Vec::new(),
            root_causes: Vec::new(),
            solutions: Vec::new(),
            priority: "medium".to_string(),
            typical_resolution_time: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Concept {
    pub term: String,
    pub definition: String,
    pub interpretation: String,
    pub category: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeaturesFile {
    features: BTreeMap<String, FeatureInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SolutionsFile {
    solutions: Vec<Solution>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DomainFile {
    concepts: Vec<Concept>,
    best_practices: Vec<serde_json::Value>,
    troubleshooting_tips: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KnowledgeStatistics {
    pub features: usize,
    pub solutions: usize,
    pub concepts: usize,
    pub best_practices: usize,
    pub troubleshooting_tips: usize,
}

/// Feature catalogue, solution catalogue and domain concepts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeBase {
    features: BTreeMap<String, FeatureInfo>,
    solutions: Vec<Solution>,
    concepts: Vec<Concept>,
    best_practices: Vec<serde_json::Value>,
    troubleshooting_tips: Vec<serde_json::Value>,
}

impl KnowledgeBase {
    /// Load the three catalogue files from `dir`. Missing files leave their
    /// category empty; malformed files are an error.
    #[inline]
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let features: FeaturesFile = read_catalogue(&dir.join(FEATURES_FILE))?;
        let solutions: SolutionsFile = read_catalogue(&dir.join(SOLUTIONS_FILE))?;
        let domain: DomainFile = read_catalogue(&dir.join(DOMAIN_FILE))?;

        let kb = Self {
            features: features.features,
            solutions: solutions.solutions,
            concepts: domain.concepts,
            best_practices: domain.best_practices,
            troubleshooting_tips: domain.troubleshooting_tips,
        };

        let stats = kb.statistics();
        info!(
            "Loaded knowledge base from {}: {} features, {} solutions, {} concepts",
            dir.display(),
            stats.features,
            stats.solutions,
            stats.concepts
        );

        Ok(kb)
    }

    #[inline]
    pub fn from_parts(
        features: BTreeMap<String, FeatureInfo>,
        solutions: Vec<Solution>,
        concepts: Vec<Concept>,
    ) -> Self {
        Self {
            features,
            solutions,
            concepts,
            ..Self::default()
        }
    }

    #[inline]
    pub fn feature_info(&self, name: &str) -> Option<&FeatureInfo> {
        self.features.get(name)
    }

    /// Known features among `names`, unknown names are skipped
    #[inline]
    pub fn features_info<'a>(&'a self, names: &[String]) -> BTreeMap<String, &'a FeatureInfo> {
        names
            .iter()
            .filter_map(|name| self.feature_info(name).map(|info| (name.clone(), info)))
            .collect()
    }

    /// Solutions whose problem, symptoms or root causes contain any keyword
    #[inline]
    pub fn search_solutions(&self, keywords: &[String]) -> Vec<&Solution> {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        self.solutions
            .iter()
            .filter(|solution| {
                let haystack = format!(
                    "{} {} {}",
                    solution.problem,
                    solution.symptoms.join(" "),
                    solution.root_causes.join(" ")
                )
                .to_lowercase();
                keywords.iter().any(|k| haystack.contains(k.as_str()))
            })
            .collect()
    }

    #[inline]
    pub fn solutions_by_priority(&self, priority: &str) -> Vec<&Solution> {
        self.solutions
            .iter()
            .filter(|s| s.priority == priority)
            .collect()
    }

    /// Case-insensitive exact match on the concept term
    #[inline]
    pub fn search_concept(&self, term: &str) -> Option<&Concept> {
        let term = term.to_lowercase();
        self.concepts.iter().find(|c| c.term.to_lowercase() == term)
    }

    #[inline]
    pub fn features(&self) -> &BTreeMap<String, FeatureInfo> {
        &self.features
    }

    #[inline]
    pub fn solutions(&self) -> &[Solution] {
        &self.solutions
    }

    #[inline]
    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    #[inline]
    pub fn statistics(&self) -> KnowledgeStatistics {
        KnowledgeStatistics {
            features: self.features.len(),
            solutions: self.solutions.len(),
            concepts: self.concepts.len(),
            best_practices: self.best_practices.len(),
            troubleshooting_tips: self.troubleshooting_tips.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty() && self.solutions.is_empty() && self.concepts.is_empty()
    }

    /// Flatten every entry into a searchable document: features first, then
    /// solutions, then concepts
    #[inline]
    pub fn documents(&self) -> Vec<Document> {
        let features = self.features.iter().map(|(name, info)| Document {
            text: format!(
                "{} {}. {} Related system: {}. Possible anomaly causes: {}. Impact: {}",
                name,
                info.name,
                info.description,
                info.related_to,
                info.anomaly_causes.join(", "),
                info.impact
            ),
            metadata: DocumentMetadata::Feature {
                name: name.clone(),
                info: info.clone(),
            },
        });

        let solutions = self.solutions.iter().map(|solution| Document {
            text: format!(
                "Problem: {}. Symptoms: {}. Root causes: {}. Solutions: {}",
                solution.problem,
                solution.symptoms.join(", "),
                solution.root_causes.join(", "),
                solution.solutions.join(", ")
            ),
            metadata: DocumentMetadata::Solution {
                problem: solution.problem.clone(),
                priority: solution.priority.clone(),
                solution: solution.clone(),
            },
        });

        let concepts = self.concepts.iter().map(|concept| Document {
            text: format!(
                "{}: {}. {}",
                concept.term, concept.definition, concept.interpretation
            ),
            metadata: DocumentMetadata::Concept {
                term: concept.term.clone(),
                category: concept.category.clone(),
                concept: concept.clone(),
            },
        });

        features.chain(solutions).chain(concepts).collect()
    }
}

fn read_catalogue<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        warn!("Knowledge file not found: {}", path.display());
        return Ok(T::default());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| RagError::Knowledge(format!("Failed to parse {}: {}", path.display(), e)))
}
