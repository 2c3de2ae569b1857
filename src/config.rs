//! Carga y gestión de configuración de la aplicación (corpus, RAG y LLM).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::chunker::IndexTextPolicy;
use crate::llm::RetryPolicy;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Parámetros del pipeline de recuperación y síntesis.
#[derive(Clone, Debug, PartialEq)]
pub struct RagSettings {
    pub chunking: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub index_text: IndexTextPolicy,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub embed_batch_size: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunking: true,
            chunk_size: 300,
            chunk_overlap: 20,
            index_text: IndexTextPolicy::TitleAndContent,
            top_k: 4,
            max_context_chars: 6000,
            embed_batch_size: 256,
        }
    }
}

impl RagSettings {
    /// Comprueba la coherencia de los parámetros antes de construir nada.
    pub fn validate(&self) -> Result<()> {
        if self.chunking {
            if self.chunk_size == 0 {
                return Err(anyhow!("RAG_CHUNK_SIZE debe ser mayor que 0"));
            }
            if self.chunk_overlap >= self.chunk_size {
                return Err(anyhow!(
                    "RAG_CHUNK_OVERLAP ({}) debe ser menor que RAG_CHUNK_SIZE ({})",
                    self.chunk_overlap,
                    self.chunk_size
                ));
            }
        }
        if self.embed_batch_size == 0 {
            return Err(anyhow!("RAG_EMBED_BATCH_SIZE debe ser mayor que 0"));
        }
        if self.max_context_chars == 0 {
            return Err(anyhow!("RAG_MAX_CONTEXT_CHARS debe ser mayor que 0"));
        }
        Ok(())
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub corpus_path: PathBuf,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub retry: RetryPolicy,

    pub rag: RagSettings,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que [`AppConfig::from_env`] pero con una fuente de variables inyectable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let server_addr = var_or("SERVER_ADDR", "127.0.0.1:3322");
        let corpus_path = PathBuf::from(var_or("CORPUS_PATH", "UP_Wiki.csv"));

        let llm_provider = LlmProvider::from_str(&var_or("LLM_PROVIDER", "openai"))?;
        let llm_embedding_model = var_or("LLM_EMBEDDING_MODEL", "text-embedding-3-small");
        let llm_chat_model = var_or("LLM_CHAT_MODEL", "gpt-4o-mini");
        // rig lee la clave del entorno al crear el cliente; aquí sólo se exige.
        if llm_provider == LlmProvider::OpenAI && var_or("OPENAI_API_KEY", "").is_empty() {
            return Err(anyhow!("Falta OPENAI_API_KEY en el entorno"));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_var(&lookup, "LLM_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: Duration::from_millis(parse_var(
                &lookup,
                "LLM_BACKOFF_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: defaults.max_delay,
            timeout: Duration::from_secs(parse_var(
                &lookup,
                "LLM_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
        };
        if retry.max_attempts == 0 {
            return Err(anyhow!("LLM_MAX_ATTEMPTS debe ser al menos 1"));
        }

        let base = RagSettings::default();
        let index_text = match lookup("RAG_INDEX_TEXT") {
            Some(value) if !value.trim().is_empty() => IndexTextPolicy::from_str(value.trim())
                .map_err(|e| anyhow!("RAG_INDEX_TEXT: {e}"))?,
            _ => base.index_text,
        };
        let rag = RagSettings {
            chunking: parse_bool(&lookup, "RAG_CHUNKING", base.chunking)?,
            chunk_size: parse_var(&lookup, "RAG_CHUNK_SIZE", base.chunk_size)?,
            chunk_overlap: parse_var(&lookup, "RAG_CHUNK_OVERLAP", base.chunk_overlap)?,
            index_text,
            top_k: parse_var(&lookup, "RAG_TOP_K", base.top_k)?,
            max_context_chars: parse_var(&lookup, "RAG_MAX_CONTEXT_CHARS", base.max_context_chars)?,
            embed_batch_size: parse_var(&lookup, "RAG_EMBED_BATCH_SIZE", base.embed_batch_size)?,
        };
        rag.validate()?;

        Ok(Self {
            server_addr,
            corpus_path,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            retry,
            rag,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Valor no válido para {key}: '{raw}'")),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow!("Valor booleano no válido para {key}: '{other}'")),
        },
    }
}
