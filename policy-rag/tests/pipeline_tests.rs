//! End-to-end tests of ingestion, answering and chat sessions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use policy_rag::{
    AnswerGenerator, Document, EmbeddingProvider, IndexCache, RagConfig, RagError, RagPipeline,
    RetryPolicy, Role, VectorIndex,
};

use common::{
    Failure, FlakyEmbedder, KeywordEmbedder, POLICY_TEXT, RejectingEmbedder, ScriptedGenerator,
};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        timeout: Duration::from_secs(5),
    }
}

fn small_config() -> RagConfig {
    RagConfig::builder()
        .chunk_size(40)
        .chunk_overlap(10)
        .top_k(1)
        .retry(fast_retry(3))
        .build()
        .unwrap()
}

fn pipeline_with(
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
) -> Arc<RagPipeline> {
    Arc::new(
        RagPipeline::builder()
            .config(config)
            .embedding_provider(embedder)
            .generator(generator)
            .build()
            .unwrap(),
    )
}

fn keyword_pipeline(config: RagConfig, generator: Arc<ScriptedGenerator>) -> Arc<RagPipeline> {
    pipeline_with(config, Arc::new(KeywordEmbedder::new()), generator)
}

#[tokio::test]
async fn answers_from_the_chunk_about_coverage() {
    let generator = Arc::new(ScriptedGenerator::answering());
    let pipeline = keyword_pipeline(small_config(), generator.clone());
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();

    let answer = pipeline.answer("When does coverage begin?").await.unwrap();

    assert_eq!(answer.sources.len(), 1);
    let top = &answer.sources[0].chunk;
    assert!(top.text.contains("Coverage begins 24 hours"), "top chunk: {:?}", top.text);
    let prompt = generator.last_prompt().unwrap();
    assert!(prompt.context.contains(&top.text));
    assert!(prompt.text.contains("Question: When does coverage begin?"));
    assert!(answer.dropped_chunks.is_empty());
}

#[tokio::test]
async fn session_records_exchange_and_reset_clears_it() {
    let pipeline = pipeline_with(
        small_config(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::answering()),
    );
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let mut session = pipeline.session();

    let answer = session.ask("When does coverage begin?").await.unwrap();
    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "When does coverage begin?");
    assert_eq!(history[1].content, answer.text);
    assert_eq!(history[1].sources, Some(answer.source_texts()));

    session.reset();
    assert!(session.history().is_empty());
    session.ask("How long do I have to file claims?").await.unwrap();
    assert_eq!(session.history()[0].content, "How long do I have to file claims?");
    assert_eq!(session.history().len(), 2);

    // The index survives a conversation reset.
    assert!(pipeline.index().await.is_ok());
}

#[tokio::test]
async fn sessions_have_independent_histories() {
    let pipeline = pipeline_with(
        small_config(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::answering()),
    );
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();

    let mut alice = pipeline.session();
    let bob = pipeline.session();
    alice.ask("When does coverage begin?").await.unwrap();

    assert_ne!(alice.id(), bob.id());
    assert_eq!(alice.history().len(), 2);
    assert!(bob.history().is_empty());
}

#[tokio::test]
async fn oversized_context_drops_lowest_ranked_chunks() {
    let generator = Arc::new(ScriptedGenerator::answering());
    let config = RagConfig::builder()
        .chunk_size(40)
        .chunk_overlap(10)
        .top_k(3)
        .max_prompt_chars(280)
        .build()
        .unwrap();
    let pipeline = keyword_pipeline(config, generator.clone());
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();

    let answer = pipeline.answer("When does coverage begin?").await.unwrap();
    let prompt = generator.last_prompt().unwrap();

    assert!(prompt.text.chars().count() <= 280);
    assert!(!answer.dropped_chunks.is_empty());
    assert_eq!(answer.sources.len() + answer.dropped_chunks.len(), 3);
    assert_eq!(
        answer.sources.iter().map(|s| s.chunk.id).collect::<Vec<_>>(),
        prompt.included
    );
    // The best chunk is kept whenever anything is.
    if let Some(first) = answer.sources.first() {
        assert!(first.chunk.text.contains("Coverage begins"));
    }
}

#[tokio::test]
async fn question_too_large_for_prompt_limit_is_rejected() {
    let config =
        RagConfig::builder().chunk_size(40).chunk_overlap(10).max_prompt_chars(50).build().unwrap();
    let pipeline = pipeline_with(
        config,
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::answering()),
    );
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();

    let err = pipeline.answer("When does coverage begin?").await.unwrap_err();
    assert!(matches!(err, RagError::PromptTooLarge { limit: 50, .. }));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_and_recorded_once() {
    let generator = Arc::new(ScriptedGenerator::failing(2, Failure::Transient));
    let pipeline = keyword_pipeline(small_config(), generator.clone());
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let mut session = pipeline.session();

    let answer = session.ask("When does coverage begin?").await.unwrap();

    assert_eq!(generator.calls(), 3);
    assert!(answer.text.starts_with("Per the policy:"));
    assert_eq!(session.history().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_history_untouched() {
    let generator = Arc::new(ScriptedGenerator::failing(10, Failure::Transient));
    let pipeline = keyword_pipeline(small_config(), generator.clone());
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let mut session = pipeline.session();

    let err = session.ask("When does coverage begin?").await.unwrap_err();

    assert!(matches!(err, RagError::RetriesExhausted { attempts: 3, .. }));
    assert!(err.is_recoverable());
    assert_eq!(generator.calls(), 3);
    assert!(session.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_are_not_retried() {
    let generator = Arc::new(ScriptedGenerator::failing(1, Failure::Permanent));
    let pipeline = keyword_pipeline(small_config(), generator.clone());
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let mut session = pipeline.session();

    let err = session.ask("When does coverage begin?").await.unwrap_err();

    assert!(matches!(err, RagError::GenerationFailure { .. }));
    assert_eq!(generator.calls(), 1);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn answering_before_ingest_reports_missing_index() {
    let pipeline = pipeline_with(
        small_config(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::answering()),
    );
    assert!(matches!(pipeline.index().await, Err(RagError::IndexNotBuilt)));
    assert!(matches!(
        pipeline.answer("When does coverage begin?").await,
        Err(RagError::IndexNotBuilt)
    ));
}

#[tokio::test]
async fn blank_documents_and_questions_are_rejected() {
    let pipeline = pipeline_with(
        small_config(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::answering()),
    );
    let err = pipeline.ingest(&Document::new("blank", " \n ")).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyDocument { ref document_id } if document_id == "blank"));

    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    assert!(matches!(pipeline.answer("  ").await, Err(RagError::InvalidInput(_))));
}

#[tokio::test]
async fn failed_build_installs_no_index() {
    let embedder = Arc::new(RejectingEmbedder::new());
    let cache = Arc::new(IndexCache::new());
    let pipeline = Arc::new(
        RagPipeline::builder()
            .config(small_config())
            .embedding_provider(embedder.clone())
            .generator(Arc::new(ScriptedGenerator::answering()))
            .index_cache(cache.clone())
            .build()
            .unwrap(),
    );

    let err = pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap_err();

    assert!(matches!(err, RagError::EmbeddingFailure { .. }));
    assert!(matches!(pipeline.index().await, Err(RagError::IndexNotBuilt)));
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn loading_an_index_from_another_embedding_space_fails() {
    let document = Document::new("policy", POLICY_TEXT);
    let producer = pipeline_with(
        small_config(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::answering()),
    );
    let index = producer.ingest(&document).await.unwrap();
    let json = index.to_json().unwrap();

    let consumer = pipeline_with(
        small_config(),
        Arc::new(KeywordEmbedder::new().with_model("keywords-v2")),
        Arc::new(ScriptedGenerator::answering()),
    );
    let err = consumer.load_index(VectorIndex::from_json(&json).unwrap()).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingSpaceMismatch { .. }));
    assert!(matches!(consumer.index().await, Err(RagError::IndexNotBuilt)));

    let same_space = pipeline_with(
        small_config(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::answering()),
    );
    same_space.load_index(VectorIndex::from_json(&json).unwrap()).await.unwrap();
    let answer = same_space.answer("When does coverage begin?").await.unwrap();
    assert!(answer.sources[0].chunk.text.contains("Coverage begins 24 hours"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_ingest_builds_the_index_once() {
    let embedder = Arc::new(KeywordEmbedder::new().with_delay(Duration::from_millis(50)));
    let cache = Arc::new(IndexCache::new());
    let build = || {
        Arc::new(
            RagPipeline::builder()
                .config(small_config())
                .embedding_provider(embedder.clone())
                .generator(Arc::new(ScriptedGenerator::answering()))
                .index_cache(cache.clone())
                .build()
                .unwrap(),
        )
    };
    let (first, second) = (build(), build());
    let document = Document::new("policy", POLICY_TEXT);

    let (a, b) = tokio::join!(first.ingest(&document), second.ingest(&document));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(embedder.batch_calls(), 1);
    assert_eq!(cache.len().await, 1);

    // A later ingest of identical content is a cache hit.
    first.ingest(&Document::new("policy-copy", POLICY_TEXT)).await.unwrap();
    assert_eq!(embedder.batch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_ingest_shares_one_failed_build() {
    let embedder = Arc::new(RejectingEmbedder::new().with_delay(Duration::from_millis(50)));
    let cache = Arc::new(IndexCache::new());
    let build = || {
        Arc::new(
            RagPipeline::builder()
                .config(small_config())
                .embedding_provider(embedder.clone())
                .generator(Arc::new(ScriptedGenerator::answering()))
                .index_cache(cache.clone())
                .build()
                .unwrap(),
        )
    };
    let (first, second, third) = (build(), build(), build());
    let document = Document::new("policy", POLICY_TEXT);

    let (a, b, c) = tokio::join!(
        first.ingest(&document),
        second.ingest(&document),
        third.ingest(&document)
    );

    assert_eq!(embedder.calls(), 1);
    for outcome in [a, b, c] {
        assert!(matches!(outcome, Err(RagError::EmbeddingFailure { .. })));
    }
    assert!(cache.is_empty().await);

    // The failure is not cached: the next ingest tries again.
    assert!(first.ingest(&document).await.is_err());
    assert_eq!(embedder.calls(), 2);
}

#[tokio::test]
async fn cache_hit_is_labelled_with_the_new_document_id() {
    let embedder = Arc::new(KeywordEmbedder::new());
    let pipeline =
        pipeline_with(small_config(), embedder.clone(), Arc::new(ScriptedGenerator::answering()));

    let original = pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let renewal = pipeline.ingest(&Document::new("renewal-2026", POLICY_TEXT)).await.unwrap();

    assert_eq!(embedder.batch_calls(), 1);
    assert_eq!(original.document_id(), "policy");
    assert_eq!(renewal.document_id(), "renewal-2026");
    assert_eq!(renewal.entries(), original.entries());
    assert_eq!(pipeline.index().await.unwrap().document_id(), "renewal-2026");

    // Re-ingesting under the first id still hands back the cached vectors.
    let again = pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    assert_eq!(again.document_id(), "policy");
    assert_eq!(embedder.batch_calls(), 1);
}

#[tokio::test]
async fn odd_history_cap_keeps_whole_exchanges() {
    let config = RagConfig::builder()
        .chunk_size(40)
        .chunk_overlap(10)
        .top_k(1)
        .history_retention(3)
        .build()
        .unwrap();
    let pipeline = keyword_pipeline(config, Arc::new(ScriptedGenerator::answering()));
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let mut session = pipeline.session();

    session.ask("How long do I have to file claims?").await.unwrap();
    let answer = session.ask("When does coverage begin?").await.unwrap();

    let roles: Vec<Role> = session.history().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(session.history()[0].content, "When does coverage begin?");
    assert_eq!(session.history()[1].content, answer.text);
}

#[tokio::test]
async fn retention_too_small_for_an_exchange_is_rejected() {
    let config = RagConfig { history_retention: Some(1), ..small_config() };
    let built = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(KeywordEmbedder::new()))
        .generator(Arc::new(ScriptedGenerator::answering()))
        .build();
    assert!(matches!(built, Err(RagError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn similarity_threshold_limits_answer_sources() {
    let config = |threshold: Option<f32>| RagConfig {
        top_k: 3,
        similarity_threshold: threshold,
        ..small_config()
    };

    let open = keyword_pipeline(config(None), Arc::new(ScriptedGenerator::answering()));
    open.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let answer = open.answer("When does coverage begin?").await.unwrap();
    assert_eq!(answer.sources.len(), 3);

    let strict = keyword_pipeline(config(Some(0.5)), Arc::new(ScriptedGenerator::answering()));
    strict.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let answer = strict.answer("When does coverage begin?").await.unwrap();
    assert_eq!(answer.sources.len(), 1);
    assert!(answer.sources[0].score >= 0.5);
    assert!(answer.sources[0].chunk.text.contains("Coverage begins 24 hours"));
}

#[tokio::test(start_paused = true)]
async fn transient_embedding_failures_during_ingest_are_retried() {
    let embedder = Arc::new(FlakyEmbedder::new(2, 0));
    let pipeline =
        pipeline_with(small_config(), embedder.clone(), Arc::new(ScriptedGenerator::answering()));

    let index = pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();

    assert_eq!(embedder.batch_calls(), 3);
    assert_eq!(index.len(), 3);
    assert!(pipeline.answer("When does coverage begin?").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn exhausted_embedding_retries_fail_the_build() {
    let embedder = Arc::new(FlakyEmbedder::new(10, 0));
    let pipeline =
        pipeline_with(small_config(), embedder.clone(), Arc::new(ScriptedGenerator::answering()));

    let err = pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap_err();

    let exhausted = matches!(
        &err,
        RagError::EmbeddingFailure { message, .. } if message.contains("3 attempts")
    );
    assert!(exhausted, "{err}");
    assert_eq!(embedder.batch_calls(), 3);
    assert!(matches!(pipeline.index().await, Err(RagError::IndexNotBuilt)));
}

#[tokio::test(start_paused = true)]
async fn exhausted_query_embedding_leaves_history_untouched() {
    let embedder = Arc::new(FlakyEmbedder::new(0, 10));
    let generator = Arc::new(ScriptedGenerator::answering());
    let pipeline = pipeline_with(small_config(), embedder.clone(), generator.clone());
    pipeline.ingest(&Document::new("policy", POLICY_TEXT)).await.unwrap();
    let mut session = pipeline.session();

    let err = session.ask("When does coverage begin?").await.unwrap_err();

    let exhausted = matches!(
        &err,
        RagError::RetriesExhausted { operation, attempts: 3, .. } if operation == "embed"
    );
    assert!(exhausted, "{err}");
    assert!(err.is_recoverable());
    assert_eq!(embedder.query_calls(), 3);
    assert_eq!(generator.calls(), 0);
    assert!(session.history().is_empty());
}
