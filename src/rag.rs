//! Consulta RAG sobre el índice en memoria.
//!
//! Flujo:
//!   1. El índice se construye una sola vez por proceso (carga → chunks → embeddings).
//!   2. Búsqueda vectorial de los `top_k` chunks más relevantes.
//!   3. En modo `Raw` se devuelven tal cual; en modo `Synthesized` se construye
//!      un contexto acotado y el LLM responde usando sólo ese contexto.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    cache::IndexCache,
    chunker,
    config::RagSettings,
    error::{RagError, Result},
    ingest::{self, CorpusSource},
    llm::{Embedder, Generator},
    models::{AnswerMode, IndexStats, QueryOutcome, RetrievalResult},
    retriever::{CorpusIndex, Retriever},
    vector_store::VectorIndex,
};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Concatena los textos recuperados en orden de relevancia sin superar
/// `max_chars` caracteres. Se corta en el primer resultado que no cabe, así que
/// nunca se conserva uno peor clasificado a costa de otro mejor. Si el primero
/// no cabe entero se trunca para que el contexto no quede vacío.
pub fn build_context(results: &[RetrievalResult], max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for (rank, result) in results.iter().enumerate() {
        let text = result.chunk.text.as_str();
        let len = text.chars().count();
        let separator = if rank == 0 { 0 } else { CONTEXT_SEPARATOR.chars().count() };

        if used + separator + len > max_chars {
            if rank == 0 {
                context.extend(text.chars().take(max_chars));
            }
            break;
        }
        if rank > 0 {
            context.push_str(CONTEXT_SEPARATOR);
        }
        context.push_str(text);
        used += separator + len;
    }
    context
}

/// Pide al modelo generativo una respuesta basada sólo en los resultados.
/// Cualquier fallo se convierte en `Synthesis`, que conserva los resultados.
pub async fn synthesize(
    generator: &dyn Generator,
    question: &str,
    results: Vec<RetrievalResult>,
    max_context_chars: usize,
) -> Result<QueryOutcome> {
    let context = build_context(&results, max_context_chars);

    match generator.answer_with_context(question, &context).await {
        Ok(answer) if !answer.trim().is_empty() => Ok(QueryOutcome::Answer {
            answer: answer.trim().to_string(),
            sources: results,
        }),
        Ok(_) => Err(RagError::Synthesis {
            message: format!("el modelo {} devolvió una respuesta vacía", generator.model_name()),
            sources: results,
        }),
        Err(err) => {
            warn!(model = %generator.model_name(), "Fallo en la síntesis de la respuesta: {err}");
            Err(RagError::Synthesis {
                message: err.to_string(),
                sources: results,
            })
        }
    }
}

/// Servicio RAG completo: dueño de la caché del índice y de los clientes LLM.
pub struct RagService {
    settings: RagSettings,
    corpus: CorpusSource,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    cache: IndexCache<CorpusIndex>,
}

impl RagService {
    pub fn new(
        settings: RagSettings,
        corpus: CorpusSource,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            settings,
            corpus,
            embedder,
            generator,
            cache: IndexCache::new(),
        }
    }

    /// Construye el índice si todavía no existe (se usa al arrancar).
    pub async fn warm_up(&self) -> Result<IndexStats> {
        Ok(self.retriever().await?.stats().clone())
    }

    /// Estadísticas del índice, o `IndexNotBuilt` si aún no se ha construido.
    pub fn stats(&self) -> Result<IndexStats> {
        Ok(self.cache.get()?.stats.clone())
    }

    /// Obtiene el recuperador sobre el índice cacheado, construyéndolo una vez.
    pub async fn retriever(&self) -> Result<Retriever> {
        let version = self.corpus.version();
        let corpus = self
            .cache
            .get_or_build(&version, || self.build_index(version.clone()))
            .await?;
        Ok(Retriever::new(corpus, self.settings.top_k))
    }

    async fn build_index(&self, corpus_version: String) -> Result<CorpusIndex> {
        let corpus = self.corpus.clone();
        let (documents, mut summary) = tokio::task::spawn_blocking(move || ingest::load_corpus(&corpus))
            .await
            .map_err(|e| RagError::load(corpus_version.clone(), e))??;

        let items = chunker::index_items(documents, &self.settings)?;
        summary.chunks_created = items.len();

        let mut index = VectorIndex::new(Arc::clone(&self.embedder), self.settings.embed_batch_size);
        index.build(items).await?;

        info!("Índice listo. {}", summary);
        let stats = IndexStats {
            corpus_version,
            documents: summary.documents_kept,
            dropped_rows: summary.rows_dropped,
            chunks: index.len(),
            dimensions: index.dimensions(),
            embedding_model: index.embedding_model().to_string(),
            built_at: Utc::now(),
        };
        Ok(CorpusIndex { index, stats })
    }

    /// Responde una consulta con el k por defecto del recuperador.
    pub async fn answer(&self, question: &str, mode: AnswerMode) -> Result<QueryOutcome> {
        let question = checked_question(question)?;
        let results = self.retriever().await?.retrieve(question).await?;
        self.respond(question, mode, results).await
    }

    /// Igual que [`RagService::answer`] pero con un `top_k` explícito.
    pub async fn answer_top(&self, question: &str, mode: AnswerMode, top_k: usize) -> Result<QueryOutcome> {
        let question = checked_question(question)?;
        let results = self.retriever().await?.retrieve_top(question, top_k).await?;
        self.respond(question, mode, results).await
    }

    /// - Sin resultados devuelve `NoRelevantContent` (no es un error).
    /// - En modo `Synthesized` llama al LLM con el contexto concatenado.
    async fn respond(&self, question: &str, mode: AnswerMode, results: Vec<RetrievalResult>) -> Result<QueryOutcome> {
        if results.is_empty() {
            info!(?mode, "Sin contenido relevante para la consulta.");
            return Ok(QueryOutcome::NoRelevantContent);
        }

        match mode {
            AnswerMode::Raw => Ok(QueryOutcome::Results(results)),
            AnswerMode::Synthesized => {
                synthesize(
                    self.generator.as_ref(),
                    question,
                    results,
                    self.settings.max_context_chars,
                )
                .await
            }
        }
    }
}

fn checked_question(question: &str) -> Result<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::InvalidQuery("la pregunta está vacía".to_string()));
    }
    Ok(question)
}
