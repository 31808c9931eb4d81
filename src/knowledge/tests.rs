use super::*;
use tempfile::TempDir;

fn feature(name: &str, description: &str, related_to: &str, causes: &[&str], impact: &str) -> FeatureInfo {
    FeatureInfo {
        name: name.to_string(),
        description: description.to_string(),
        unit: String::new(),
        normal_range: serde_json::Value::Null,
        related_to: related_to.to_string(),
        anomaly_causes: causes.iter().map(|c| (*c).to_string()).collect(),
        impact: impact.to_string(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Three features, two solutions and one concept
pub(crate) fn sample_knowledge_base() -> KnowledgeBase {
    let features = BTreeMap::from([
        (
            "P_cyl".to_string(),
            feature(
                "Cylinder pressure",
                "Peak pressure inside the cylinder during combustion.",
                "Combustion system",
                &["Injector fault", "Valve leakage"],
                "Affects combustion efficiency",
            ),
        ),
        (
            "T_exh".to_string(),
            feature(
                "Exhaust temperature",
                "Gas temperature at the exhaust manifold.",
                "Exhaust system",
                &["Turbocharger fouling"],
                "Indicates thermal load",
            ),
        ),
        (
            "N_rpm".to_string(),
            feature(
                "Engine speed",
                "Crankshaft rotational speed.",
                "Governor",
                &["Load change"],
                "Drives power output",
            ),
        ),
    ]);

    let solutions = vec![
        Solution {
            problem: "Cylinder pressure too high".to_string(),
            symptoms: strings(&["High peak pressure", "Knocking"]),
            root_causes: strings(&["Early injection timing"]),
            solutions: strings(&["Check injection timing", "Inspect injectors"]),
            priority: "high".to_string(),
            typical_resolution_time: Some("2 hours".to_string()),
        },
        Solution {
            problem: "Exhaust temperature too high".to_string(),
            symptoms: strings(&["Hot exhaust gas"]),
            root_causes: strings(&["Turbocharger fouling"]),
            solutions: strings(&["Clean turbocharger"]),
            ..Solution::default()
        },
    ];

    let concepts = vec![Concept {
        term: "SPE".to_string(),
        definition: "Squared prediction error of the residual subspace".to_string(),
        interpretation: "A high SPE statistic anomaly means the correlation structure changed"
            .to_string(),
        category: "statistics".to_string(),
    }];

    KnowledgeBase::from_parts(features, solutions, concepts)
}

#[test]
fn load_reads_all_catalogues() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join(FEATURES_FILE),
        r#"{"features": {"P_cyl": {"name": "Cylinder pressure", "normal_range": [80, 120]}}}"#,
    )
    .expect("should write features");
    fs::write(
        temp_dir.path().join(SOLUTIONS_FILE),
        r#"{"solutions": [{"problem": "Leak", "priority": "high"}, {"problem": "Drift"}]}"#,
    )
    .expect("should write solutions");
    fs::write(
        temp_dir.path().join(DOMAIN_FILE),
        r#"{"concepts": [{"term": "T2"}], "best_practices": [{"title": "Calibrate"}], "troubleshooting_tips": []}"#,
    )
    .expect("should write domain knowledge");

    let kb = KnowledgeBase::load(temp_dir.path()).expect("load should succeed");

    assert_eq!(
        kb.statistics(),
        KnowledgeStatistics {
            features: 1,
            solutions: 2,
            concepts: 1,
            best_practices: 1,
            troubleshooting_tips: 0,
        }
    );
    let info = kb.feature_info("P_cyl").expect("feature should exist");
    assert_eq!(info.normal_range, serde_json::json!([80, 120]));
    assert_eq!(kb.solutions()[1].priority, "medium");
}

#[test]
fn missing_files_give_empty_categories() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join(SOLUTIONS_FILE),
        r#"{"solutions": [{"problem": "Leak"}]}"#,
    )
    .expect("should write solutions");

    let kb = KnowledgeBase::load(temp_dir.path()).expect("load should succeed");
    assert!(kb.features().is_empty());
    assert!(kb.concepts().is_empty());
    assert_eq!(kb.solutions().len(), 1);
    assert!(!kb.is_empty());

    let empty = KnowledgeBase::load(temp_dir.path().join("absent")).expect("load should succeed");
    assert!(empty.is_empty());
}

#[test]
fn malformed_file_is_an_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(temp_dir.path().join(FEATURES_FILE), "{\"features\": [").expect("should write");

    assert!(matches!(
        KnowledgeBase::load(temp_dir.path()),
        Err(RagError::Knowledge(_))
    ));
}

#[test]
fn lookups() {
    let kb = sample_knowledge_base();

    assert_eq!(
        kb.feature_info("T_exh").map(|f| f.name.as_str()),
        Some("Exhaust temperature")
    );
    assert!(kb.feature_info("missing").is_none());

    let known = kb.features_info(&strings(&["P_cyl", "missing", "N_rpm"]));
    assert_eq!(known.keys().collect::<Vec<_>>(), vec!["N_rpm", "P_cyl"]);

    let found = kb.search_solutions(&strings(&["TURBOCHARGER"]));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].problem, "Exhaust temperature too high");

    assert_eq!(kb.solutions_by_priority("high").len(), 1);
    assert_eq!(kb.solutions_by_priority("medium").len(), 1);
    assert!(kb.solutions_by_priority("low").is_empty());

    assert_eq!(kb.search_concept("spe").map(|c| c.category.as_str()), Some("statistics"));
    assert!(kb.search_concept("T2").is_none());
}

#[test]
fn documents_are_grouped_by_type() {
    let docs = sample_knowledge_base().documents();
    let kinds: Vec<&str> = docs.iter().map(|d| d.metadata.kind()).collect();
    assert_eq!(
        kinds,
        vec!["feature", "feature", "feature", "solution", "solution", "concept"]
    );

    assert_eq!(
        docs[0].text,
        "N_rpm Engine speed. Crankshaft rotational speed. Related system: Governor. \
         Possible anomaly causes: Load change. Impact: Drives power output"
    );
    assert!(docs[3].text.starts_with("Problem: Cylinder pressure too high. Symptoms: High peak pressure, Knocking."));
    assert!(docs[5].text.starts_with("SPE: Squared prediction error"));
}
