use super::*;
use crate::embeddings::TfidfVectorizer;
use crate::knowledge::tests::sample_knowledge_base;

fn retriever() -> KnowledgeRetriever {
    KnowledgeRetriever::new(
        sample_knowledge_base(),
        UntrainedEmbedder::Tfidf(TfidfVectorizer::new(1000)),
    )
    .expect("retriever should build")
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn indexes_every_document() {
    let retriever = retriever();
    assert_eq!(retriever.len(), 6);
    assert!(!retriever.is_empty());
    assert_eq!(retriever.knowledge_base().features().len(), 3);
}

#[test]
fn empty_knowledge_base_finds_nothing() {
    let retriever = KnowledgeRetriever::new(
        KnowledgeBase::default(),
        UntrainedEmbedder::Tfidf(TfidfVectorizer::new(100)),
    )
    .expect("empty knowledge base should still build");

    assert!(retriever.is_empty());
    assert!(
        retriever
            .search("pressure", 5, None)
            .expect("search should succeed")
            .is_empty()
    );
}

#[test]
fn search_ranks_matching_document_first() {
    let hits = retriever()
        .search("crankshaft rotational speed", 3, None)
        .expect("search should succeed");

    assert_eq!(hits.len(), 3);
    assert!(matches!(
        &hits[0].metadata,
        DocumentMetadata::Feature { name, .. } if name == "N_rpm"
    ));
    assert!(hits[0].document.starts_with("N_rpm Engine speed."));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn type_filter_is_applied_after_ranking() {
    let retriever = retriever();

    let hits = retriever
        .search("pressure", 10, Some("solution"))
        .expect("search should succeed");
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.metadata.kind() == "solution"));

    let none = retriever
        .search("pressure", 10, Some("nonexistent"))
        .expect("search should succeed");
    assert!(none.is_empty());
}

#[test]
fn blank_query_returns_nothing() {
    let retriever = retriever();
    assert!(retriever.search("   ", 3, None).expect("search").is_empty());
    assert!(retriever.search("pressure", 0, None).expect("search").is_empty());
}

#[test]
fn feature_explanations_skip_unknown_names() {
    let explanations = retriever()
        .feature_explanations(&names(&["P_cyl", "unknown"]), false)
        .expect("explanations should succeed");

    assert_eq!(explanations.features.len(), 1);
    assert_eq!(explanations.features["P_cyl"].name, "Cylinder pressure");
    assert!(explanations.related_features.is_empty());
}

#[test]
fn related_features_exclude_requested_ones() {
    let explanations = retriever()
        .feature_explanations(&names(&["P_cyl"]), true)
        .expect("explanations should succeed");

    assert!(!explanations.related_features.contains(&"P_cyl".to_string()));
    assert!(explanations.related_features.len() <= 3);
}

#[test]
fn find_solutions_returns_scored_solutions() {
    let solutions = retriever()
        .find_solutions("pressure too high", &names(&["P_cyl"]), 2)
        .expect("find should succeed");

    assert!(!solutions.is_empty());
    assert!(solutions.len() <= 2);
    assert_eq!(solutions[0].solution.problem, "Cylinder pressure too high");

    let json = serde_json::to_value(&solutions[0]).expect("should serialize");
    assert_eq!(json["problem"], "Cylinder pressure too high");
    assert!(json["relevance_score"].is_number());
}

#[test]
fn search_concepts_returns_concepts() {
    let concepts = retriever()
        .search_concepts("SPE statistic anomaly", 1)
        .expect("search should succeed");

    assert_eq!(concepts.len(), 1);
    assert_eq!(concepts[0].concept.term, "SPE");
}

#[test]
fn implicated_features_are_ordered_and_deduplicated() {
    let report = AnomalyReport {
        t2_anomaly: true,
        spe_anomaly: true,
        t2_top_features: BTreeMap::from([
            ("a".to_string(), 0.1),
            ("b".to_string(), 0.7),
            ("c".to_string(), 0.7),
        ]),
        spe_top_features: BTreeMap::from([
            ("b".to_string(), 0.9),
            ("d".to_string(), 0.5),
            ("e".to_string(), 0.4),
            ("f".to_string(), 0.3),
        ]),
    };

    assert_eq!(report.implicated_features(), names(&["b", "c", "a", "d", "e"]));
}

#[test]
fn anomaly_report_uses_detector_field_names() {
    let report: AnomalyReport = serde_json::from_str(
        r#"{"T2X_anomaly": true, "T2X_top_features": {"P_cyl": 0.8}}"#,
    )
    .expect("should parse");

    assert!(report.t2_anomaly);
    assert!(!report.spe_anomaly);
    assert_eq!(report.implicated_features(), names(&["P_cyl"]));
}

#[test]
fn recommendations_for_anomaly() {
    let report = AnomalyReport {
        t2_anomaly: true,
        spe_anomaly: true,
        t2_top_features: BTreeMap::from([("P_cyl".to_string(), 0.8)]),
        spe_top_features: BTreeMap::from([("T_exh".to_string(), 0.6)]),
    };

    let recommendations = retriever()
        .recommendations(&report)
        .expect("recommendations should succeed");

    assert_eq!(recommendations.feature_names, names(&["P_cyl", "T_exh"]));
    assert_eq!(recommendations.feature_explanations.len(), 2);
    assert!(!recommendations.solutions.is_empty());
    assert!(recommendations.solutions.len() <= 3);
    assert!(recommendations.relevant_concepts.len() <= 2);
    assert!(
        recommendations
            .summary
            .starts_with("Anomaly detected, mainly involving features: P_cyl, T_exh.")
    );
    assert!(
        recommendations
            .summary
            .contains("P_cyl(Cylinder pressure): Affects combustion efficiency")
    );
}

#[test]
fn no_implicated_features_gives_empty_recommendations() {
    let recommendations = retriever()
        .recommendations(&AnomalyReport::default())
        .expect("recommendations should succeed");
    assert_eq!(recommendations, Recommendations::default());
}
