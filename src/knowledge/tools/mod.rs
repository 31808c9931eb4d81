//! Agent tool facade
//!
//! Wraps a [`KnowledgeRetriever`] behind the three function-calling tools an
//! agent can invoke, plus the aggregated analysis used to enrich anomaly
//! reports. Failures never escape as errors: every call answers with a
//! [`ToolResponse`] whose `success` flag tells the caller what happened.


use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use super::retriever::{AnomalyReport, KnowledgeRetriever};
use crate::Result;

const DEFAULT_TOP_K: usize = 3;
const MAX_LISTED_SOLUTIONS: usize = 3;
const MAX_LISTED_CONCEPTS: usize = 2;
const UNKNOWN_FEATURE_DESCRIPTION: &str = "Physical meaning not yet recorded in the knowledge base";

/// Result of a tool call as handed back to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl ToolResponse {
    #[inline]
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    #[inline]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
        }
    }

    fn from_result(action: &str, result: Result<(String, Value)>) -> Self {
        match result {
            Ok((message, data)) => Self::ok(message, data),
            Err(e) => {
                error!("{} failed: {}", action, e);
                Self::failure(format!("{} failed: {}", action, e))
            }
        }
    }
}

/// Function schemas for the tools `dispatch` understands
#[inline]
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "search_knowledge",
                "description": "Search the domain knowledge base for explanations, concept definitions and technical details.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search query, e.g. 'causes of voltage sensor anomaly'"
                        },
                        "top_k": {
                            "type": "integer",
                            "description": "Number of results (default: 3)",
                            "default": DEFAULT_TOP_K
                        },
                        "doc_type": {
                            "type": "string",
                            "enum": ["feature", "solution", "concept"],
                            "description": "Optional: restrict results to one document type"
                        }
                    },
                    "required": ["query"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "explain_features",
                "description": "Explain the physical meaning, normal range and likely anomaly causes of monitored features.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "feature_names": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Feature names, e.g. ['feature1', 'feature3']"
                        },
                        "include_solutions": {
                            "type": "boolean",
                            "description": "Also suggest related solutions (default: false)",
                            "default": false
                        }
                    },
                    "required": ["feature_names"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "get_troubleshooting_solutions",
                "description": "Suggest troubleshooting steps and solutions for a problem description and the features involved.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "problem_description": {
                            "type": "string",
                            "description": "Problem description, e.g. 'unstable beam intensity'"
                        },
                        "feature_names": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Optional: anomalous features related to the problem"
                        }
                    },
                    "required": ["problem_description"]
                }
            }
        }),
    ]
}

/// Tool entry points over an owned knowledge retriever
#[derive(Debug, Clone)]
pub struct RagTools {
    retriever: KnowledgeRetriever,
}

impl RagTools {
    #[inline]
    pub fn new(retriever: KnowledgeRetriever) -> Self {
        Self { retriever }
    }

    #[inline]
    pub fn retriever(&self) -> &KnowledgeRetriever {
        &self.retriever
    }

    #[inline]
    pub fn search_knowledge(
        &self,
        query: &str,
        top_k: usize,
        doc_type: Option<&str>,
    ) -> ToolResponse {
        ToolResponse::from_result(
            "Knowledge search",
            self.retriever
                .search(query, top_k, doc_type)
                .map(|hits| {
                    let results: Vec<Value> = hits
                        .into_iter()
                        .map(|hit| {
                            json!({
                                "content": hit.document,
                                "score": hit.score,
                                "type": hit.metadata.kind(),
                                "metadata": hit.metadata,
                            })
                        })
                        .collect();
                    (
                        format!("Found {} results for '{}'", results.len(), query),
                        json!({
                            "query": query,
                            "results_count": results.len(),
                            "results": results,
                        }),
                    )
                }),
        )
    }

    /// Catalogue entries for `feature_names`; unknown names get a placeholder
    #[inline]
    pub fn explain_features(&self, feature_names: &[String], include_solutions: bool) -> ToolResponse {
        ToolResponse::from_result(
            "Feature explanation",
            self.explain(feature_names, include_solutions),
        )
    }

    fn explain(&self, feature_names: &[String], include_solutions: bool) -> Result<(String, Value)> {
        let explanations = self.retriever.feature_explanations(feature_names, false)?;

        let features: serde_json::Map<String, Value> = feature_names
            .iter()
            .map(|name| {
                let entry = match explanations.features.get(name) {
                    Some(info) => json!(info),
                    None => json!({
                        "name": name,
                        "description": UNKNOWN_FEATURE_DESCRIPTION,
                    }),
                };
                (name.clone(), entry)
            })
            .collect();

        let mut data = json!({
            "feature_count": feature_names.len(),
            "features": features,
        });

        if include_solutions {
            let problem = format!("{} anomaly", feature_names.join(", "));
            let related: Vec<Value> = self
                .retriever
                .find_solutions(&problem, feature_names, 2)?
                .into_iter()
                .map(|scored| {
                    let steps: Vec<&String> =
                        scored.solution.solutions.iter().take(MAX_LISTED_SOLUTIONS).collect();
                    json!({
                        "problem": scored.solution.problem,
                        "solutions": steps,
                        "priority": scored.solution.priority,
                    })
                })
                .collect();
            data["related_solutions"] = Value::Array(related);
        }

        Ok((
            format!(
                "Explained {} of {} features",
                explanations.features.len(),
                feature_names.len()
            ),
            data,
        ))
    }

    #[inline]
    pub fn troubleshooting_solutions(
        &self,
        problem_description: &str,
        feature_names: &[String],
    ) -> ToolResponse {
        ToolResponse::from_result(
            "Solution lookup",
            self.retriever
                .find_solutions(problem_description, feature_names, DEFAULT_TOP_K)
                .map(|solutions| {
                    (
                        format!("Found {} solutions", solutions.len()),
                        json!({
                            "query": problem_description,
                            "solutions_count": solutions.len(),
                            "solutions": solutions,
                        }),
                    )
                }),
        )
    }

    /// Aggregated explanations, solutions and concepts for an anomaly report
    #[inline]
    pub fn comprehensive_analysis(&self, report: &AnomalyReport) -> ToolResponse {
        ToolResponse::from_result(
            "Comprehensive analysis",
            self.retriever.recommendations(report).map(|recommendations| {
                let solutions: Vec<_> = recommendations
                    .solutions
                    .iter()
                    .take(MAX_LISTED_SOLUTIONS)
                    .collect();
                let concepts: Vec<_> = recommendations
                    .relevant_concepts
                    .iter()
                    .take(MAX_LISTED_CONCEPTS)
                    .collect();
                (
                    recommendations.summary.clone(),
                    json!({
                        "has_recommendations": !recommendations.solutions.is_empty(),
                        "summary": recommendations.summary,
                        "feature_explanations": recommendations.feature_explanations,
                        "solutions": solutions,
                        "relevant_concepts": concepts,
                    }),
                )
            }),
        )
    }

    /// Invoke a tool by name with JSON arguments as produced by an agent
    #[inline]
    pub fn dispatch(&self, name: &str, args: &Value) -> ToolResponse {
        debug!("Dispatching tool '{}' with {}", name, args);

        match name {
            "search_knowledge" => {
                let Some(query) = args.get("query").and_then(Value::as_str) else {
                    return ToolResponse::failure("Missing required parameter: query");
                };
                let top_k = args
                    .get("top_k")
                    .and_then(Value::as_u64)
                    .and_then(|k| usize::try_from(k).ok())
                    .unwrap_or(DEFAULT_TOP_K);
                let doc_type = args.get("doc_type").and_then(Value::as_str);
                self.search_knowledge(query, top_k, doc_type)
            }
            "explain_features" => {
                let Some(names) = string_list(args, "feature_names") else {
                    return ToolResponse::failure("Missing required parameter: feature_names");
                };
                let include_solutions = args
                    .get("include_solutions")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                self.explain_features(&names, include_solutions)
            }
            "get_troubleshooting_solutions" => {
                let Some(problem) = args.get("problem_description").and_then(Value::as_str) else {
                    return ToolResponse::failure("Missing required parameter: problem_description");
                };
                let names = string_list(args, "feature_names").unwrap_or_default();
                self.troubleshooting_solutions(problem, &names)
            }
            other => ToolResponse::failure(format!("Unknown tool: {}", other)),
        }
    }
}

fn string_list(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key)?.as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}
