//! Caché del índice para toda la vida del proceso.
//!
//! Garantiza como mucho una construcción: la primera consulta construye el
//! índice y las concurrentes esperan a esa misma construcción. Si falla no se
//! guarda nada, y la siguiente llamada lo vuelve a intentar.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{RagError, Result};

pub struct IndexCache<T> {
    cell: OnceCell<(String, Arc<T>)>,
}

impl<T> Default for IndexCache<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<T> IndexCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devuelve el índice ya construido o lo construye con `build`.
    ///
    /// No hay invalidación: una versión de corpus distinta de la cacheada sólo
    /// genera un aviso (hay que reiniciar el proceso para recoger cambios).
    pub async fn get_or_build<F, Fut>(&self, corpus_version: &str, build: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (cached_version, index) = self
            .cell
            .get_or_try_init(|| async move {
                info!(corpus_version, "Construyendo el índice (primera consulta del proceso)...");
                let index = build().await?;
                Ok::<_, RagError>((corpus_version.to_string(), Arc::new(index)))
            })
            .await?;

        if cached_version != corpus_version {
            warn!(
                cached = %cached_version,
                requested = corpus_version,
                "La versión del corpus ha cambiado; se sigue sirviendo el índice construido al arrancar."
            );
        }
        Ok(Arc::clone(index))
    }

    /// Acceso sin construcción: falla con `IndexNotBuilt` si aún no existe.
    pub fn get(&self) -> Result<Arc<T>> {
        self.cell
            .get()
            .map(|(_, index)| Arc::clone(index))
            .ok_or(RagError::IndexNotBuilt)
    }

    pub fn is_built(&self) -> bool {
        self.cell.initialized()
    }
}
