//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! Las llamadas externas pasan por [`call_with_retry`]: cada intento tiene un
//! timeout, y los errores de cuota (429) se reintentan con backoff exponencial.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use tracing::{debug, warn};

use crate::config::{AppConfig, LlmProvider};
use crate::error::{RagError, Result};

const EMBEDDING_SERVICE: &str = "embeddings";
const CHAT_SERVICE: &str = "chat";

/// Servicio de embeddings: un vector por texto, en el mismo orden de entrada.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;
}

/// Modelo generativo que responde a una pregunta usando sólo el contexto dado.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn answer_with_context(&self, question: &str, context: &str) -> Result<String>;
}

/// Política de reintentos y timeout para las llamadas a servicios externos.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Espera antes del reintento número `attempt` (1, 2, 3...): base, 2·base, 4·base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Ejecuta `call` con timeout por intento y reintentos para los `RateLimit`.
///
/// - Timeout → `Service` (no se reintenta).
/// - `RateLimit` → reintento tras `policy.backoff(n)` hasta `max_attempts`.
/// - Cualquier otro error → se propaga inmediatamente.
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy, service: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RagError::service(
                service,
                format!("sin respuesta tras {:?}", policy.timeout),
            )),
        };

        match outcome {
            Err(err) if err.is_rate_limit() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(service, attempt, ?delay, "Servicio limitado por cuota, reintentando: {err}");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub retry: RetryPolicy,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración ya validada.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            retry: cfg.retry.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::{EmbeddingsClient as _, ProviderClient as _};

        let client = openai::Client::from_env();

        // Modelo de embeddings: config o default
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| RagError::from_provider(EMBEDDING_SERVICE, e))?;

        Ok(embeddings.into_iter().map(|emb| emb.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn answer_with_openai(&self, question: &str, context: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::{CompletionClient as _, ProviderClient as _};

        const SYSTEM_PROMPT: &str = r#"
You are a customer support assistant for a knowledge base.
Answer using ONLY the information in the provided context (knowledge-base articles).
If the context does not contain the answer, say explicitly that you don't know; never make up an answer.
Reply in the same language as the user's question, clearly and concisely.
"#;

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let full_context = format!("Context:\n{}\n\nQuestion:\n{}", context, question);

        let agent = client
            .agent(model_name)
            .preamble(SYSTEM_PROMPT)
            .context(&full_context)
            .temperature(0.0)
            .build();

        agent
            .prompt(question)
            .await
            .map_err(|e| RagError::from_provider(CHAT_SERVICE, e))
    }
}

#[async_trait]
impl Embedder for LlmManager {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    /// Calcula embeddings para un lote de textos en una sola petición.
    ///
    /// Nota: sólo implementado para OpenAI. Para otros proveedores
    /// se podrían añadir ramas adicionales al `match`.
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        let expected = texts.len();
        let vectors = match self.provider {
            LlmProvider::OpenAI => {
                call_with_retry(&self.retry, EMBEDDING_SERVICE, || {
                    self.embed_with_openai(texts.clone())
                })
                .await?
            }
            ref other => {
                return Err(RagError::service(
                    EMBEDDING_SERVICE,
                    format!("proveedor {:?} aún no implementado para embeddings", other),
                ))
            }
        };

        if vectors.len() != expected {
            return Err(RagError::service(
                EMBEDDING_SERVICE,
                format!(
                    "número de embeddings ({}) distinto al número de textos ({})",
                    vectors.len(),
                    expected
                ),
            ));
        }
        debug!(count = expected, model = %self.embedding_model, "Lote de embeddings calculado");
        Ok(vectors)
    }
}

#[async_trait]
impl Generator for LlmManager {
    fn model_name(&self) -> &str {
        &self.chat_model
    }

    /// Genera una respuesta a partir de una pregunta y un contexto
    /// (concatenación de chunks relevantes).
    async fn answer_with_context(&self, question: &str, context: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => {
                call_with_retry(&self.retry, CHAT_SERVICE, || {
                    self.answer_with_openai(question, context)
                })
                .await
            }
            ref other => Err(RagError::service(
                CHAT_SERVICE,
                format!("proveedor {:?} aún no implementado para chat", other),
            )),
        }
    }
}
