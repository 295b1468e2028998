use std::sync::Arc;

use common::{
    error::AppError,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use corpus_store::{CorpusManager, Fragment};
use serde::Serialize;
use tracing::{info, warn};

use crate::generation::ChatModel;

/// Fixed response for queries against an empty corpus. A deliberate
/// short-circuit, not an error: no generation call is made.
pub const EMPTY_CORPUS_ANSWER: &str =
    "No documents have been uploaded yet. Please upload documents first.";

/// Upper bound on the snippet length carried in a source attribution.
const SOURCE_PREVIEW_CHARS: usize = 500;

const PROMPT_TEMPLATE: &str = "You are a helpful AI assistant that answers questions based on the provided context.

Use the following pieces of context to answer the question at the end.
If you don't know the answer based on the context, just say that you don't know, don't try to make up an answer.
Keep your answer concise and relevant to the question.

Context:
{context}

Question: {question}

Answer:";

/// Per-query knobs. `None` falls back to the configured default; an explicit
/// value always wins and is never silently ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    pub k: Option<usize>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Where an answer's supporting text came from. `content` is a display
/// preview capped at 500 characters; the full fragment text is never returned
/// to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceAttribution {
    pub content: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceAttribution>,
    pub question: String,
}

/// Liveness view: generation availability and corpus readiness are reported
/// independently and never gate the query path.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthStatus {
    pub generation_ready: bool,
    pub corpus_ready: bool,
    pub fragment_count: usize,
}

/// Turns a question into an answer with attributed sources: retrieve up to
/// `k` fragments from the corpus, render them into the prompt, run one
/// generation call, and return its text verbatim.
pub struct QueryPipeline {
    chat: Option<Arc<dyn ChatModel>>,
    embeddings: Arc<EmbeddingProvider>,
    default_k: usize,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl QueryPipeline {
    pub fn new(
        chat: Option<Arc<dyn ChatModel>>,
        embeddings: Arc<EmbeddingProvider>,
        default_k: usize,
        default_temperature: f32,
        default_max_tokens: u32,
    ) -> Self {
        Self {
            chat,
            embeddings,
            default_k,
            default_temperature,
            default_max_tokens,
        }
    }

    pub fn from_config(
        chat: Option<Arc<dyn ChatModel>>,
        embeddings: Arc<EmbeddingProvider>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            chat,
            embeddings,
            config.retrieval_k,
            config.temperature,
            config.max_tokens,
        )
    }

    pub async fn answer(
        &self,
        corpus: &CorpusManager,
        question: &str,
        options: QueryOptions,
    ) -> Result<QueryResponse, AppError> {
        if !corpus.is_ready() {
            info!("Query received against an empty corpus");
            return Ok(QueryResponse {
                answer: EMPTY_CORPUS_ANSWER.to_string(),
                sources: Vec::new(),
                question: question.to_string(),
            });
        }

        let k = options.k.unwrap_or(self.default_k);
        let Some(retriever) = corpus.retriever(k) else {
            // is_ready() was checked above; this guard only trips if the
            // store emptied between the two calls within one caller.
            warn!("Corpus reported ready but produced no retriever");
            return Ok(QueryResponse {
                answer: EMPTY_CORPUS_ANSWER.to_string(),
                sources: Vec::new(),
                question: question.to_string(),
            });
        };

        let query_embedding = self
            .embeddings
            .embed(question)
            .await
            .map_err(|err| AppError::Embedding(err.to_string()))?;

        // A reloaded index built under a different embedding configuration
        // must fail here, not rank on truncated dot products.
        if let Some(dimension) = corpus.dimension() {
            if query_embedding.len() != dimension {
                return Err(AppError::Embedding(format!(
                    "query embedding dimension {} does not match index dimension {dimension}; \
                     the index was built with a different embedding configuration",
                    query_embedding.len()
                )));
            }
        }

        let fragments = retriever.retrieve(&query_embedding);
        let prompt = render_prompt(&fragments, question);

        let temperature = options.temperature.unwrap_or(self.default_temperature);
        let max_tokens = options.max_tokens.unwrap_or(self.default_max_tokens);

        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| AppError::Generation("no generation client configured".into()))?;

        info!(
            retrieved = fragments.len(),
            k, temperature, max_tokens, "Running answer generation"
        );
        let answer = chat.complete(&prompt, temperature, max_tokens).await?;

        Ok(QueryResponse {
            answer,
            sources: format_sources(&fragments),
            question: question.to_string(),
        })
    }

    pub fn health(&self, corpus: &CorpusManager) -> HealthStatus {
        HealthStatus {
            generation_ready: self.chat.is_some(),
            corpus_ready: corpus.is_ready(),
            fragment_count: corpus.stats().fragment_count,
        }
    }
}

fn render_prompt(fragments: &[&Fragment], question: &str) -> String {
    let context = fragments
        .iter()
        .map(|fragment| fragment.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    PROMPT_TEMPLATE
        .replace("{context}", &context)
        .replace("{question}", question)
}

fn format_sources(fragments: &[&Fragment]) -> Vec<SourceAttribution> {
    fragments
        .iter()
        .map(|fragment| SourceAttribution {
            content: preview(&fragment.text),
            source: fragment.source_document.clone(),
            page: fragment.page,
        })
        .collect()
}

/// First 500 characters plus an ellipsis marker when truncated. A display
/// convenience only; retrieval always works on the full text.
fn preview(text: &str) -> String {
    if text.chars().count() > SOURCE_PREVIEW_CHARS {
        let mut snippet: String = text.chars().take(SOURCE_PREVIEW_CHARS).collect();
        snippet.push_str("...");
        snippet
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use corpus_store::manager::{INDEX_FILE, LEDGER_FILE};

    #[derive(Debug, Default)]
    struct RecordedCall {
        prompt: String,
        temperature: f32,
        max_tokens: u32,
    }

    struct MockChat {
        reply: String,
        calls: AtomicUsize,
        last_call: Mutex<Option<RecordedCall>>,
    }

    impl MockChat {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                last_call: Mutex::new(None),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for MockChat {
        async fn complete(
            &self,
            prompt: &str,
            temperature: f32,
            max_tokens: u32,
        ) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut guard) = self.last_call.lock() {
                *guard = Some(RecordedCall {
                    prompt: prompt.to_string(),
                    temperature,
                    max_tokens,
                });
            }
            Ok(self.reply.clone())
        }
    }

    fn hashed_provider() -> Arc<EmbeddingProvider> {
        Arc::new(EmbeddingProvider::new_hashed(32).expect("hashed provider"))
    }

    async fn seeded_corpus(
        dir: &std::path::Path,
        embeddings: &EmbeddingProvider,
        texts: &[(&str, &str)],
    ) -> CorpusManager {
        let mut corpus = CorpusManager::open(dir.join(INDEX_FILE), dir.join(LEDGER_FILE));
        for (document, text) in texts {
            let embedding = embeddings.embed(text).await.expect("embed");
            let fragment = Fragment::new((*text).to_string(), embedding, Some(1), 0);
            corpus.ingest(vec![fragment], document).expect("ingest");
        }
        corpus
    }

    fn pipeline(
        chat: Option<Arc<dyn ChatModel>>,
        embeddings: Arc<EmbeddingProvider>,
    ) -> QueryPipeline {
        QueryPipeline::new(chat, embeddings, 4, 0.7, 1024)
    }

    #[tokio::test]
    async fn test_empty_corpus_short_circuits_without_generation() {
        let dir = tempfile::tempdir().expect("temp dir");
        let embeddings = hashed_provider();
        let corpus = CorpusManager::open(
            dir.path().join(INDEX_FILE),
            dir.path().join(LEDGER_FILE),
        );

        let mock = MockChat::new("should never be used");
        let pipeline = pipeline(Some(mock.clone()), embeddings);

        let response = pipeline
            .answer(&corpus, "what is in my documents?", QueryOptions::default())
            .await
            .expect("empty corpus is not an error");

        assert_eq!(response.answer, EMPTY_CORPUS_ANSWER);
        assert!(response.sources.is_empty());
        assert_eq!(response.question, "what is in my documents?");
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_answer_returns_generated_text_and_sources() {
        let dir = tempfile::tempdir().expect("temp dir");
        let embeddings = hashed_provider();
        let corpus = seeded_corpus(
            dir.path(),
            &embeddings,
            &[("hive.txt", "Bees store honey in hexagonal wax cells.")],
        )
        .await;

        let mock = MockChat::new("Bees store honey in wax cells.");
        let pipeline = pipeline(Some(mock.clone()), embeddings);

        let response = pipeline
            .answer(&corpus, "where do bees store honey?", QueryOptions::default())
            .await
            .expect("answer should succeed");

        assert_eq!(response.answer, "Bees store honey in wax cells.");
        assert_eq!(mock.call_count(), 1);
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].source, "hive.txt");
        assert_eq!(response.sources[0].page, Some(1));

        let call = mock.last_call.lock().expect("mutex").take().expect("call");
        assert!(call.prompt.contains("hexagonal wax cells"));
        assert!(call.prompt.contains("where do bees store honey?"));
        assert!(call.prompt.contains("just say that you don't know"));
        assert!((call.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(call.max_tokens, 1024);
    }

    #[tokio::test]
    async fn test_explicit_options_override_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let embeddings = hashed_provider();
        let corpus = seeded_corpus(dir.path(), &embeddings, &[("a.txt", "alpha")]).await;

        let mock = MockChat::new("ok");
        let pipeline = pipeline(Some(mock.clone()), embeddings);

        pipeline
            .answer(
                &corpus,
                "anything",
                QueryOptions {
                    k: Some(1),
                    temperature: Some(0.2),
                    max_tokens: Some(64),
                },
            )
            .await
            .expect("answer should succeed");

        let call = mock.last_call.lock().expect("mutex").take().expect("call");
        assert!((call.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(call.max_tokens, 64);
    }

    #[tokio::test]
    async fn test_k_bounds_source_count() {
        let dir = tempfile::tempdir().expect("temp dir");
        let embeddings = hashed_provider();
        let corpus = seeded_corpus(
            dir.path(),
            &embeddings,
            &[
                ("a.txt", "alpha text"),
                ("b.txt", "beta text"),
                ("c.txt", "gamma text"),
            ],
        )
        .await;

        let mock = MockChat::new("ok");
        let pipeline = pipeline(Some(mock), embeddings);

        let response = pipeline
            .answer(
                &corpus,
                "text",
                QueryOptions {
                    k: Some(2),
                    ..QueryOptions::default()
                },
            )
            .await
            .expect("answer should succeed");

        assert_eq!(response.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_long_fragment_preview_is_truncated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let embeddings = hashed_provider();
        let long_text = "honey ".repeat(200);
        let corpus = seeded_corpus(dir.path(), &embeddings, &[("long.txt", &long_text)]).await;

        let mock = MockChat::new("ok");
        let pipeline = pipeline(Some(mock), embeddings);

        let response = pipeline
            .answer(&corpus, "honey", QueryOptions::default())
            .await
            .expect("answer should succeed");

        let content = &response.sources[0].content;
        assert!(content.ends_with("..."));
        assert_eq!(content.chars().count(), SOURCE_PREVIEW_CHARS + 3);
    }

    #[tokio::test]
    async fn test_mismatched_embedding_dimension_is_rejected_without_generation() {
        let dir = tempfile::tempdir().expect("temp dir");
        let seeding = hashed_provider();
        let corpus = seeded_corpus(dir.path(), &seeding, &[("a.txt", "alpha")]).await;

        // Same corpus, reconstructed provider with a different dimension.
        let mismatched =
            Arc::new(EmbeddingProvider::new_hashed(64).expect("hashed provider"));
        let mock = MockChat::new("should never be used");
        let pipeline = pipeline(Some(mock.clone()), mismatched);

        let err = pipeline
            .answer(&corpus, "anything", QueryOptions::default())
            .await
            .expect_err("dimension mismatch must fail");

        assert!(matches!(err, AppError::Embedding(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_chat_client_is_a_generation_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let embeddings = hashed_provider();
        let corpus = seeded_corpus(dir.path(), &embeddings, &[("a.txt", "alpha")]).await;

        let pipeline = pipeline(None, embeddings);
        let err = pipeline
            .answer(&corpus, "anything", QueryOptions::default())
            .await
            .expect_err("must fail");

        assert!(matches!(err, AppError::Generation(_)));
    }

    #[tokio::test]
    async fn test_health_reports_independent_booleans() {
        let dir = tempfile::tempdir().expect("temp dir");
        let embeddings = hashed_provider();
        let empty_corpus = CorpusManager::open(
            dir.path().join(INDEX_FILE),
            dir.path().join(LEDGER_FILE),
        );

        let without_chat = pipeline(None, embeddings.clone());
        let health = without_chat.health(&empty_corpus);
        assert!(!health.generation_ready);
        assert!(!health.corpus_ready);
        assert_eq!(health.fragment_count, 0);

        let seeded_dir = tempfile::tempdir().expect("temp dir");
        let corpus = seeded_corpus(seeded_dir.path(), &embeddings, &[("a.txt", "alpha")]).await;
        let with_chat = pipeline(Some(MockChat::new("ok")), embeddings);
        let health = with_chat.health(&corpus);
        assert!(health.generation_ready);
        assert!(health.corpus_ready);
        assert_eq!(health.fragment_count, 1);
    }
}
