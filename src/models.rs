//! Modelos de dominio (artículos de la base de conocimiento, chunks y resultados).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artículo de la base de conocimiento ya normalizado.
/// El contenido nunca está vacío tras recortar espacios.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Metadatos de origen (`source`, `row`).
    pub metadata: BTreeMap<String, String>,
}

/// Trozo de texto indexable derivado de un documento.
/// Comparte el documento padre, no lo posee.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document: Arc<Document>,
    pub index: usize,
    /// Desplazamiento en caracteres dentro del texto indexado del documento.
    pub start: usize,
    /// Solapamiento configurado con el que se generó el chunk.
    pub overlap: usize,
    pub text: String,
}

/// Un chunk recuperado junto con su similitud coseno con la consulta.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f64,
}

impl RetrievalResult {
    pub fn title(&self) -> &str {
        &self.chunk.document.title
    }
}

/// Modo de respuesta de la API: resultados en bruto o respuesta generada por el LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Raw,
    #[default]
    Synthesized,
}

/// Resultado de una consulta. `NoRelevantContent` es una señal explícita,
/// distinta de un fallo de servicio.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    NoRelevantContent,
    Results(Vec<RetrievalResult>),
    Answer {
        answer: String,
        sources: Vec<RetrievalResult>,
    },
}

impl QueryOutcome {
    pub fn sources(&self) -> &[RetrievalResult] {
        match self {
            Self::NoRelevantContent => &[],
            Self::Results(results) => results,
            Self::Answer { sources, .. } => sources,
        }
    }
}

/// Estadísticas del índice construido para el proceso actual.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub corpus_version: String,
    pub documents: usize,
    pub dropped_rows: usize,
    pub chunks: usize,
    pub dimensions: Option<usize>,
    pub embedding_model: String,
    pub built_at: DateTime<Utc>,
}
