//! Contrato de recuperación sobre el índice: top-k por defecto y resultados
//! ordenados. Tanto la vista de resultados en bruto como la respuesta generada
//! pasan por aquí, así que ven lo mismo para la misma consulta y k.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{Chunk, IndexStats, RetrievalResult};
use crate::vector_store::VectorIndex;

/// Índice del corpus junto con sus estadísticas de construcción.
pub struct CorpusIndex {
    pub index: VectorIndex<Chunk>,
    pub stats: IndexStats,
}

#[derive(Clone)]
pub struct Retriever {
    corpus: Arc<CorpusIndex>,
    default_k: usize,
}

impl Retriever {
    pub fn new(corpus: Arc<CorpusIndex>, default_k: usize) -> Self {
        Self { corpus, default_k }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn stats(&self) -> &IndexStats {
        &self.corpus.stats
    }

    /// Recupera los `default_k` chunks más relevantes.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        self.retrieve_top(query, self.default_k).await
    }

    pub async fn retrieve_top(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let hits = self.corpus.index.query(query, k).await?;
        Ok(hits
            .into_iter()
            .map(|(chunk, score)| RetrievalResult { chunk, score })
            .collect())
    }
}
