//! Taxonomía de errores del pipeline RAG (carga, servicios externos, índice y síntesis).

use thiserror::Error;

use crate::models::RetrievalResult;

/// Errores que pueden producirse al construir el índice o al responder una consulta.
#[derive(Debug, Error)]
pub enum RagError {
    /// El corpus no se pudo leer o le faltan columnas obligatorias. Es fatal:
    /// nunca se construye un índice parcial.
    #[error("Error cargando el corpus '{origin}': {message}")]
    Load { origin: String, message: String },

    /// El servicio externo ha limitado la petición (HTTP 429). Se reintenta con
    /// backoff exponencial y, agotados los intentos, se propaga.
    #[error("El servicio de {service} ha limitado la petición: {message}")]
    RateLimit { service: String, message: String },

    /// Fallo no reintentable de un servicio externo (incluye timeouts).
    #[error("Error del servicio de {service}: {message}")]
    Service { service: String, message: String },

    /// Se ha consultado el índice antes de que terminara su construcción.
    #[error("El índice vectorial todavía no está construido")]
    IndexNotBuilt,

    /// La generación de la respuesta ha fallado. Lleva los resultados ya
    /// recuperados para que el llamante pueda mostrarlos sin repetir la búsqueda.
    #[error("No se pudo generar la respuesta: {message}")]
    Synthesis {
        message: String,
        sources: Vec<RetrievalResult>,
    },

    #[error("Consulta no válida: {0}")]
    InvalidQuery(String),

    #[error("Configuración no válida: {0}")]
    Config(String),
}

impl RagError {
    pub fn load(origin: impl Into<String>, message: impl ToString) -> Self {
        Self::Load {
            origin: origin.into(),
            message: message.to_string(),
        }
    }

    pub fn service(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Service {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Clasifica el error de un proveedor según su mensaje: los 429 y los
    /// avisos de cuota se tratan como `RateLimit`, todo lo demás como `Service`.
    pub fn from_provider(service: &str, err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
        {
            Self::RateLimit {
                service: service.to_string(),
                message,
            }
        } else {
            Self::Service {
                service: service.to_string(),
                message,
            }
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit { .. })
    }
}

/// Alias de resultado para las operaciones del pipeline.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_are_classified_by_message() {
        let err = RagError::from_provider("embeddings", "ProviderError: HTTP 429 Too Many Requests");
        assert!(err.is_rate_limit());

        let err = RagError::from_provider("chat", "Rate limit reached for gpt-4o-mini");
        assert!(err.is_rate_limit());

        let err = RagError::from_provider("chat", "invalid api key");
        assert!(matches!(err, RagError::Service { ref service, .. } if service == "chat"));
    }

    #[test]
    fn synthesis_error_display_omits_sources() {
        let err = RagError::Synthesis {
            message: "modelo caído".to_string(),
            sources: Vec::new(),
        };
        assert_eq!(err.to_string(), "No se pudo generar la respuesta: modelo caído");
    }
}
