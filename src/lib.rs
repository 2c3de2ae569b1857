//! Bot de soporte RAG: índice vectorial en memoria sobre una base de
//! conocimiento (título + contenido) y respuestas generadas con un LLM.
//!
//! Flujo: corpus → chunks → embeddings → índice (una vez por proceso) →
//! recuperación top-k → respuesta (opcional) basada sólo en lo recuperado.

pub mod api;
pub mod app_state;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod retriever;
pub mod vector_store;

pub use error::{RagError, Result};
pub use ingest::{CorpusRecord, CorpusSource};
pub use models::{AnswerMode, QueryOutcome, RetrievalResult};
pub use rag::RagService;
