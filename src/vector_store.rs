//! Índice vectorial en memoria para los chunks del corpus.
//!
//! API pública:
//!   - `VectorIndex::new(embedder, batch_size)`
//!   - `VectorIndex::build(items)`: construcción en bloque, una sola vez.
//!   - `VectorIndex::query(texto, k)`: k vecinos exactos por similitud coseno.
//!
//! Los vectores se guardan normalizados (L2), así que la similitud coseno se
//! reduce al producto escalar. Los empates conservan el orden de inserción.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RagError, Result};
use crate::llm::Embedder;

struct IndexEntry<P> {
    vector: Vec<f64>,
    payload: P,
}

struct BuiltIndex<P> {
    entries: Vec<IndexEntry<P>>,
    dimensions: Option<usize>,
}

/// Índice k-NN exacto sobre pares (embedding, payload).
pub struct VectorIndex<P> {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    built: Option<BuiltIndex<P>>,
}

impl<P: Clone + Send + Sync> VectorIndex<P> {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            built: None,
        }
    }

    /// Construye el índice con los embeddings de todos los textos, en lotes de
    /// `batch_size` (una llamada al servicio por lote). Si ya estaba construido,
    /// su contenido se sustituye completo.
    pub async fn build(&mut self, items: Vec<(String, P)>) -> Result<()> {
        let total = items.len();
        let mut entries = Vec::with_capacity(total);
        let mut dimensions: Option<usize> = None;

        let mut pending = items.into_iter().peekable();
        let mut batch_no = 0;
        while pending.peek().is_some() {
            let (texts, payloads): (Vec<String>, Vec<P>) =
                pending.by_ref().take(self.batch_size).unzip();
            batch_no += 1;

            let expected = texts.len();
            let vectors = self.embedder.embed_texts(texts).await?;
            if vectors.len() != expected {
                return Err(RagError::service(
                    "embeddings",
                    format!(
                        "el lote {batch_no} devolvió {} embeddings para {expected} textos",
                        vectors.len()
                    ),
                ));
            }

            for (vector, payload) in vectors.into_iter().zip(payloads) {
                match dimensions {
                    None => dimensions = Some(vector.len()),
                    Some(dims) if dims != vector.len() => {
                        return Err(RagError::service(
                            "embeddings",
                            format!(
                                "dimensión inconsistente: se esperaban {dims} y llegaron {}",
                                vector.len()
                            ),
                        ));
                    }
                    Some(_) => {}
                }
                entries.push(IndexEntry {
                    vector: normalize(vector),
                    payload,
                });
            }
            debug!(batch = batch_no, indexed = entries.len(), total, "Lote indexado");
        }

        info!(
            items = entries.len(),
            batches = batch_no,
            dimensions = ?dimensions,
            model = %self.embedder.model_name(),
            "Índice vectorial construido."
        );
        self.built = Some(BuiltIndex { entries, dimensions });
        Ok(())
    }

    /// Devuelve los `k` payloads más similares a `text`, por similitud descendente.
    /// Si `k` supera el tamaño del índice se devuelven todos.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<(P, f64)>> {
        let built = self.built.as_ref().ok_or(RagError::IndexNotBuilt)?;
        if k == 0 || built.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = self.embedder.embed_texts(vec![text.to_string()]).await?;
        let query_vec = match vectors.pop() {
            Some(v) if vectors.is_empty() => normalize(v),
            _ => {
                return Err(RagError::service(
                    "embeddings",
                    "no se pudo generar un único embedding para la consulta",
                ))
            }
        };
        if let Some(dims) = built.dimensions {
            if query_vec.len() != dims {
                return Err(RagError::service(
                    "embeddings",
                    format!(
                        "la consulta tiene dimensión {} y el índice {dims}; ¿cambió el modelo?",
                        query_vec.len()
                    ),
                ));
            }
        }

        let mut scored: Vec<(usize, f64)> = built
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, dot(&entry.vector, &query_vec)))
            .collect();
        // `sort_by` es estable: a igual puntuación manda el orden de inserción.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| (built.entries[i].payload.clone(), score))
            .collect())
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn len(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.built.as_ref().and_then(|b| b.dimensions)
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }
}

fn normalize(mut vector: Vec<f64>) -> Vec<f64> {
    let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > f64::EPSILON && norm.is_finite() {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    } else {
        vector.iter_mut().for_each(|x| *x = 0.0);
    }
    vector
}

/// Producto escalar. NaN y `-0.0` cuentan como `0.0`.
fn dot(a: &[f64], b: &[f64]) -> f64 {
    let score: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    if score.is_nan() || score == 0.0 {
        0.0
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Embedder de pruebas: cada texto se interpreta como una lista de números.
    #[derive(Default)]
    struct LiteralEmbedder {
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for LiteralEmbedder {
        fn model_name(&self) -> &str {
            "literal"
        }

        async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
            self.calls.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| t.split(',').map(|n| n.trim().parse().unwrap_or(0.0)).collect())
                .collect())
        }
    }

    fn items(vectors: &[&str]) -> Vec<(String, usize)> {
        vectors.iter().enumerate().map(|(i, v)| (v.to_string(), i)).collect()
    }

    async fn built_index(vectors: &[&str], batch_size: usize) -> (Arc<LiteralEmbedder>, VectorIndex<usize>) {
        let embedder = Arc::new(LiteralEmbedder::default());
        let mut index = VectorIndex::new(embedder.clone() as Arc<dyn Embedder>, batch_size);
        index.build(items(vectors)).await.unwrap();
        (embedder, index)
    }

    #[tokio::test]
    async fn query_before_build_fails() {
        let index: VectorIndex<usize> = VectorIndex::new(Arc::new(LiteralEmbedder::default()), 8);
        assert!(matches!(index.query("1,0", 1).await, Err(RagError::IndexNotBuilt)));
    }

    #[tokio::test]
    async fn ranks_by_cosine_similarity() {
        let (_, index) = built_index(&["0,1", "1,0", "1,1"], 8).await;
        let results = index.query("2,0", 3).await.unwrap();
        let order: Vec<usize> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!((results[0].1 - 1.0).abs() < 1e-9);
        assert!((results[1].1 - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!(results[2].1.abs() < 1e-9);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let (_, index) = built_index(&["1,0", "0,1", "2,0", "3,0"], 8).await;
        let results = index.query("1,0", 4).await.unwrap();
        let order: Vec<usize> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(order, vec![0, 2, 3, 1]);
    }

    #[tokio::test]
    async fn orthogonal_entries_tie_in_insertion_order() {
        let (_, index) = built_index(&["-1,0", "1,0"], 8).await;
        let results = index.query("0,-1", 2).await.unwrap();
        let order: Vec<usize> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(order, vec![0, 1]);
        assert!(results.iter().all(|(_, score)| score.to_bits() == 0.0f64.to_bits()));
    }

    #[test]
    fn zero_and_non_finite_vectors_normalize_to_zero() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(normalize(vec![f64::NAN, 1.0]), vec![0.0, 0.0]);
        assert_eq!(normalize(vec![f64::INFINITY, 1.0]), vec![0.0, 0.0]);
        let unit = normalize(vec![3.0, 4.0]);
        assert!((unit[0] - 0.6).abs() < 1e-12 && (unit[1] - 0.8).abs() < 1e-12);
        assert_eq!(dot(&[f64::NAN], &[1.0]), 0.0);
        assert_eq!(dot(&[-1.0, 0.0], &[0.0, -1.0]).to_bits(), 0.0f64.to_bits());
    }

    #[tokio::test]
    async fn zero_vector_entries_score_zero_and_keep_their_place() {
        let (_, index) = built_index(&["0,0", "-1,0", "1,0"], 8).await;
        let results = index.query("1,0", 3).await.unwrap();
        let order: Vec<usize> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(order, vec![2, 0, 1]);
        assert_eq!(results[1].1, 0.0);
    }

    #[tokio::test]
    async fn k_zero_and_oversized_k() {
        let (embedder, index) = built_index(&["1,0", "0,1"], 8).await;
        assert!(index.query("1,0", 0).await.unwrap().is_empty());
        assert_eq!(index.query("1,0", 10).await.unwrap().len(), 2);
        // build (1 lote) + una sola consulta con k > 0
        assert_eq!(embedder.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn build_embeds_in_batches() {
        let (embedder, index) = built_index(&["1,0", "0,1", "1,1", "2,1", "1,2"], 2).await;
        assert_eq!(*embedder.calls.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(index.len(), 5);
        assert_eq!(index.dimensions(), Some(2));
    }

    #[tokio::test]
    async fn empty_build_answers_empty_without_embedding() {
        let (embedder, index) = built_index(&[], 8).await;
        assert!(index.is_built());
        assert!(index.is_empty());
        assert!(index.query("1,0", 3).await.unwrap().is_empty());
        assert!(embedder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inconsistent_dimensions_are_rejected() {
        let embedder = Arc::new(LiteralEmbedder::default());
        let mut index: VectorIndex<usize> = VectorIndex::new(embedder, 8);
        let err = index.build(items(&["1,0", "1,0,0"])).await.unwrap_err();
        assert!(matches!(err, RagError::Service { .. }));
        assert!(!index.is_built());

        let (_, index) = built_index(&["1,0"], 8).await;
        assert!(index.query("1,0,0", 1).await.is_err());
    }

    #[tokio::test]
    async fn rebuilding_the_same_corpus_keeps_the_ranking() {
        let corpus = ["3,1", "0,2", "1,1", "5,-1"];
        let (_, first) = built_index(&corpus, 3).await;
        let (_, second) = built_index(&corpus, 3).await;
        for query in ["1,0", "0,1", "1,1", "-1,2"] {
            let a: Vec<usize> = first.query(query, 4).await.unwrap().into_iter().map(|r| r.0).collect();
            let b: Vec<usize> = second.query(query, 4).await.unwrap().into_iter().map(|r| r.0).collect();
            assert_eq!(a, b);
        }
    }

    proptest! {
        #[test]
        fn results_are_sorted_and_bounded(
            vectors in proptest::collection::vec((-5i32..5, -5i32..5, -5i32..5), 0..25),
            query in (-5i32..5, -5i32..5, -5i32..5),
            k in 0usize..30,
        ) {
            let texts: Vec<String> = vectors.iter().map(|(a, b, c)| format!("{a},{b},{c}")).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let query = format!("{},{},{}", query.0, query.1, query.2);

            let results = tokio_test::block_on(async {
                let (_, index) = built_index(&refs, 4).await;
                index.query(&query, k).await.unwrap()
            });

            prop_assert_eq!(results.len(), k.min(texts.len()));
            for pair in results.windows(2) {
                prop_assert!(pair[0].1 >= pair[1].1);
            }
        }
    }
}
