use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    error::RagError,
    models::{AnswerMode, IndexStats, QueryOutcome, RetrievalResult},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct RagQueryPayload {
    question: String,
    #[serde(default)]
    mode: AnswerMode,
    top_k: Option<usize>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Answered,
    Results,
    NoRelevantContent,
}

#[derive(Serialize)]
pub struct SourceInfo {
    document_id: String,
    title: String,
    text: String,
    chunk_index: usize,
    score: f64,
    source: Option<String>,
}

impl From<&RetrievalResult> for SourceInfo {
    fn from(result: &RetrievalResult) -> Self {
        Self {
            document_id: result.chunk.document.id.clone(),
            title: result.title().to_string(),
            text: result.chunk.text.clone(),
            chunk_index: result.chunk.index,
            score: result.score,
            source: result.chunk.document.metadata.get("source").cloned(),
        }
    }
}

#[derive(Serialize)]
pub struct RagQueryResponse {
    query_id: String,
    created_at: DateTime<Utc>,
    status: QueryStatus,
    answer: Option<String>,
    results: Vec<SourceInfo>,
    /// `true` cuando la síntesis falló y se devuelven sólo los resultados.
    degraded: bool,
    error: Option<String>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/rag-query", post(rag_query_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn rag_query_handler(
    State(state): State<AppState>,
    Json(payload): Json<RagQueryPayload>,
) -> Result<Json<RagQueryResponse>, ApiError> {
    let query_id = Uuid::new_v4().to_string();
    info!(%query_id, mode = ?payload.mode, top_k = ?payload.top_k, "Consulta RAG recibida.");

    let mut response = RagQueryResponse {
        query_id,
        created_at: Utc::now(),
        status: QueryStatus::NoRelevantContent,
        answer: None,
        results: Vec::new(),
        degraded: false,
        error: None,
    };

    let outcome = match payload.top_k {
        Some(top_k) => state.rag.answer_top(&payload.question, payload.mode, top_k).await,
        None => state.rag.answer(&payload.question, payload.mode).await,
    };

    match outcome {
        Ok(QueryOutcome::NoRelevantContent) => {}
        Ok(QueryOutcome::Results(results)) => {
            response.status = QueryStatus::Results;
            response.results = results.iter().map(SourceInfo::from).collect();
        }
        Ok(QueryOutcome::Answer { answer, sources }) => {
            response.status = QueryStatus::Answered;
            response.answer = Some(answer);
            response.results = sources.iter().map(SourceInfo::from).collect();
        }
        // Sin respuesta generada se muestran los documentos recuperados.
        Err(RagError::Synthesis { message, sources }) => {
            warn!(query_id = %response.query_id, "Síntesis fallida, se devuelven resultados en bruto: {message}");
            response.status = QueryStatus::Results;
            response.results = sources.iter().map(SourceInfo::from).collect();
            response.degraded = true;
            response.error = Some(message);
        }
        Err(e) => return Err(error_response(e)),
    }

    Ok(Json(response))
}

fn error_response(err: RagError) -> ApiError {
    let status = match &err {
        RagError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        RagError::IndexNotBuilt => StatusCode::SERVICE_UNAVAILABLE,
        RagError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        RagError::Service { .. } | RagError::Synthesis { .. } => StatusCode::BAD_GATEWAY,
        RagError::Load { .. } | RagError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Error al procesar la consulta RAG: {err}");
    }
    (
        status,
        Json(json!({"error": format!("Error al procesar la consulta RAG: {}", err)})),
    )
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Result<Json<IndexStats>, ApiError> {
    state.rag.stats().map(Json).map_err(error_response)
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, LlmProvider, RagSettings};
    use crate::ingest::{CorpusRecord, CorpusSource};
    use crate::llm::{Embedder, Generator, RetryPolicy};
    use crate::rag::RagService;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    struct WordEmbedder;

    #[async_trait]
    impl Embedder for WordEmbedder {
        fn model_name(&self) -> &str {
            "words"
        }

        async fn embed_texts(&self, texts: Vec<String>) -> crate::error::Result<Vec<Vec<f64>>> {
            let vocab = ["return", "shipping", "ship"];
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    vocab.iter().map(|w| lower.matches(w).count() as f64).collect()
                })
                .collect())
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl Generator for DownGenerator {
        fn model_name(&self) -> &str {
            "down"
        }

        async fn answer_with_context(&self, _q: &str, _c: &str) -> crate::error::Result<String> {
            Err(RagError::service("chat", "connection refused"))
        }
    }

    fn test_state() -> AppState {
        let config = AppConfig {
            server_addr: "127.0.0.1:0".into(),
            corpus_path: "kb.csv".into(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "words".into(),
            llm_chat_model: "down".into(),
            retry: RetryPolicy::default(),
            rag: RagSettings::default(),
        };
        let corpus = CorpusSource::Records {
            name: "kb".into(),
            records: vec![
                CorpusRecord::new("Return Policy", "Items may be returned within 30 days"),
                CorpusRecord::new("Shipping", "Orders ship within 2 business days"),
            ],
        };
        let rag = RagService::new(config.rag.clone(), corpus, Arc::new(WordEmbedder), Arc::new(DownGenerator));
        AppState {
            config,
            rag: Arc::new(rag),
            shutdown_sender: Arc::new(Mutex::new(None)),
        }
    }

    async fn post_query(state: AppState, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(
                Request::post("/api/rag-query")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn synthesis_failure_degrades_to_raw_results() {
        let (status, body) = post_query(test_state(), json!({"question": "How do I return an item?"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "results");
        assert_eq!(body["degraded"], true);
        assert!(body["answer"].is_null());
        assert_eq!(body["results"][0]["title"], "Return Policy");
    }

    #[tokio::test]
    async fn raw_mode_and_blank_questions() {
        let state = test_state();
        let (status, body) = post_query(state.clone(), json!({"question": "shipping?", "mode": "raw", "top_k": 1})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["degraded"], false);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["title"], "Shipping");

        let (status, _) = post_query(state, json!({"question": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn omitted_top_k_falls_back_to_the_configured_default() {
        let mut state = test_state();
        let settings = RagSettings { top_k: 1, ..RagSettings::default() };
        let corpus = CorpusSource::Records {
            name: "kb".into(),
            records: vec![
                CorpusRecord::new("Return Policy", "Items may be returned within 30 days"),
                CorpusRecord::new("Shipping", "Orders ship within 2 business days"),
            ],
        };
        state.rag = Arc::new(RagService::new(settings, corpus, Arc::new(WordEmbedder), Arc::new(DownGenerator)));

        let (status, body) = post_query(state.clone(), json!({"question": "return", "mode": "raw"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["title"], "Return Policy");

        let (_, body) = post_query(state, json!({"question": "return", "mode": "raw", "top_k": 2})).await;
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn status_reports_index_not_built_until_first_query() {
        let state = test_state();
        let request = || Request::get("/api/status").body(Body::empty()).unwrap();

        let response = create_router(state.clone()).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.rag.warm_up().await.unwrap();
        let response = create_router(state).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let stats: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stats["documents"], 2);
        assert_eq!(stats["dimensions"], 3);
    }
}
