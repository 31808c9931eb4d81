use super::*;
use serial_test::serial;

fn corpus() -> Vec<String> {
    vec![
        "alpha beta gamma".to_string(),
        "delta epsilon zeta".to_string(),
        "beta delta theta".to_string(),
    ]
}

fn unreachable_remote() -> RemoteEmbedder {
    RemoteEmbedder::new("http://127.0.0.1:1/v1", "test-model", "test-key".to_string())
        .expect("valid embedder")
        .with_timeout(std::time::Duration::from_secs(2))
}

#[test]
fn untrained_tfidf_cannot_be_used_without_fitting() {
    let untrained = UntrainedEmbedder::Tfidf(TfidfVectorizer::new(100));
    assert!(untrained.is_trainable());
    assert!(matches!(untrained.ready(), Err(RagError::EmbedderNotFitted)));

    let hybrid = UntrainedEmbedder::Hybrid {
        remote: None,
        local: TfidfVectorizer::new(100),
    };
    assert!(matches!(hybrid.ready(), Err(RagError::EmbedderNotFitted)));
}

#[test]
fn remote_embedder_is_ready_without_corpus() {
    let untrained = UntrainedEmbedder::Remote(unreachable_remote());
    assert!(!untrained.is_trainable());
    assert_eq!(untrained.method(), EmbeddingMethod::Remote);

    let embedder = untrained.ready().expect("remote needs no fitting");
    assert_eq!(embedder.method(), EmbeddingMethod::Remote);
    assert_eq!(embedder.dimension_hint(), None);
}

#[test]
fn fitted_tfidf_embeds_with_fixed_width() {
    let embedder = UntrainedEmbedder::Tfidf(TfidfVectorizer::new(1000))
        .fit(&corpus())
        .expect("fit should succeed");

    let width = embedder.dimension_hint().expect("tfidf width is known");
    let rows = embedder.embed(&corpus()).expect("embed should succeed");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.len() == width));

    let query = embedder.embed_one("alpha beta").expect("embed should succeed");
    assert_eq!(query.len(), width);
}

#[test]
fn hybrid_falls_back_to_local_model() {
    let embedder = UntrainedEmbedder::Hybrid {
        remote: Some(unreachable_remote()),
        local: TfidfVectorizer::new(1000),
    }
    .fit(&corpus())
    .expect("fit should succeed");

    let local = TfidfVectorizer::new(1000)
        .fit(&corpus())
        .expect("fit should succeed");

    let rows = embedder
        .embed(&["alpha beta".to_string()])
        .expect("hybrid embedding never fails");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), local.dimension());
    assert_eq!(rows, local.embed(&["alpha beta".to_string()]));
}

#[test]
fn fallback_vectors_have_local_width() {
    let embedder = UntrainedEmbedder::Hybrid {
        remote: Some(unreachable_remote()),
        local: TfidfVectorizer::new(1000),
    }
    .fit(&corpus())
    .expect("fit should succeed");

    let Embedder::Hybrid(hybrid) = &embedder else {
        panic!("expected hybrid embedder");
    };
    assert!(hybrid.has_remote());
    assert_eq!(embedder.dimension_hint(), None);

    let vector = embedder
        .embed_one("gamma delta")
        .expect("hybrid embedding never fails");
    assert_eq!(vector.len(), hybrid.local_dimension());
}

#[test]
fn local_only_hybrid_reports_local_width() {
    let embedder = UntrainedEmbedder::Hybrid {
        remote: None,
        local: TfidfVectorizer::new(1000),
    }
    .fit(&corpus())
    .expect("fit should succeed");

    let Embedder::Hybrid(hybrid) = &embedder else {
        panic!("expected hybrid embedder");
    };
    assert!(!hybrid.has_remote());
    assert_eq!(embedder.dimension_hint(), Some(hybrid.local.dimension()));
}

#[test]
#[serial]
fn create_embedder_follows_configuration() {
    // SAFETY: serialised with other environment-mutating tests
    unsafe { std::env::remove_var("KNOWLEDGE_RAG_TEST_FACTORY_KEY") };

    let mut config = EmbeddingConfig {
        api_key_env: "KNOWLEDGE_RAG_TEST_FACTORY_KEY".to_string(),
        ..EmbeddingConfig::default()
    };

    let simple = create_embedder(&config).expect("simple needs no key");
    assert_eq!(simple.method(), EmbeddingMethod::Simple);

    config.method = EmbeddingMethod::Remote;
    assert!(matches!(
        create_embedder(&config),
        Err(RagError::Config(_))
    ));

    config.method = EmbeddingMethod::Hybrid;
    let hybrid = create_embedder(&config).expect("hybrid degrades without a key");
    assert!(matches!(
        hybrid,
        UntrainedEmbedder::Hybrid { remote: None, .. }
    ));

    unsafe { std::env::set_var("KNOWLEDGE_RAG_TEST_FACTORY_KEY", "secret") };
    let hybrid = create_embedder(&config).expect("hybrid with key");
    assert!(matches!(
        hybrid,
        UntrainedEmbedder::Hybrid {
            remote: Some(_),
            ..
        }
    ));
    unsafe { std::env::remove_var("KNOWLEDGE_RAG_TEST_FACTORY_KEY") };
}
