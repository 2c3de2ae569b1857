//! Carga del corpus tabular (columnas `Title` y `Content`) en documentos
//! normalizados, listos para trocear e indexar.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{RagError, Result};
use crate::models::Document;

const TITLE_COLUMN: &str = "Title";
const CONTENT_COLUMN: &str = "Content";

/// Fila cruda del corpus, tal como llega de la fuente.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusRecord {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl CorpusRecord {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: Some(content.into()),
        }
    }
}

/// Origen del corpus.
#[derive(Debug, Clone)]
pub enum CorpusSource {
    /// Fichero `.csv` (con cabecera) o `.json` (array de objetos).
    Path(PathBuf),
    /// Filas ya cargadas en memoria.
    Records { name: String, records: Vec<CorpusRecord> },
}

impl CorpusSource {
    /// Identificador de la versión del corpus para la caché y las estadísticas.
    pub fn version(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Records { name, records } => format!("{name} ({} filas)", records.len()),
        }
    }

    fn origin(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Records { name, .. } => name.clone(),
        }
    }
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestionSummary {
    pub rows_read: usize,
    pub documents_kept: usize,
    pub rows_dropped: usize,
    pub chunks_created: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} filas leídas, {} documentos indexables, {} filas sin contenido descartadas. {} chunks creados.",
            self.rows_read, self.documents_kept, self.rows_dropped, self.chunks_created
        )
    }
}

/// Lee el corpus completo y devuelve los documentos con contenido.
pub fn load_corpus(source: &CorpusSource) -> Result<(Vec<Document>, IngestionSummary)> {
    let origin = source.origin();
    let records = match source {
        CorpusSource::Path(path) => read_records(path, &origin)?,
        CorpusSource::Records { records, .. } => records.clone(),
    };
    let (documents, summary) = normalize_records(&origin, records);
    info!(
        origin = %origin,
        rows = summary.rows_read,
        documents = summary.documents_kept,
        dropped = summary.rows_dropped,
        "Corpus cargado."
    );
    Ok((documents, summary))
}

fn read_records(path: &Path, origin: &str) -> Result<Vec<CorpusRecord>> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();

    let file = File::open(path).map_err(|e| RagError::load(origin, e))?;
    match extension.as_str() {
        "csv" => read_csv(file, origin),
        "json" => read_json(file, origin),
        other => Err(RagError::load(
            origin,
            format!("formato no soportado ('.{other}'); use .csv o .json"),
        )),
    }
}

fn same_column(header: &str, wanted: &str) -> bool {
    header.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(wanted)
}

/// Lee un CSV con cabecera. Las celdas ausentes se tratan como vacías.
pub fn read_csv<R: Read>(reader: R, origin: &str) -> Result<Vec<CorpusRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| RagError::load(origin, e))?.clone();
    let column = |wanted: &str| {
        headers
            .iter()
            .position(|h| same_column(h, wanted))
            .ok_or_else(|| RagError::load(origin, format!("falta la columna obligatoria '{wanted}'")))
    };
    let title_idx = column(TITLE_COLUMN)?;
    let content_idx = column(CONTENT_COLUMN)?;

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row.map_err(|e| RagError::load(origin, e))?;
        records.push(CorpusRecord {
            title: row.get(title_idx).map(str::to_string),
            content: row.get(content_idx).map(str::to_string),
        });
    }
    Ok(records)
}

/// Lee un array JSON de objetos con (al menos) las claves `Title` y `Content`.
pub fn read_json<R: Read>(reader: R, origin: &str) -> Result<Vec<CorpusRecord>> {
    let value: Value = serde_json::from_reader(reader).map_err(|e| RagError::load(origin, e))?;
    let rows = value
        .as_array()
        .ok_or_else(|| RagError::load(origin, "se esperaba un array de objetos"))?;

    let has_column = |wanted: &str| {
        rows.iter()
            .filter_map(Value::as_object)
            .any(|obj| obj.keys().any(|k| same_column(k, wanted)))
    };
    for wanted in [TITLE_COLUMN, CONTENT_COLUMN] {
        if !rows.is_empty() && !has_column(wanted) {
            return Err(RagError::load(
                origin,
                format!("falta la columna obligatoria '{wanted}'"),
            ));
        }
    }

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let obj = row.as_object().ok_or_else(|| {
                RagError::load(origin, format!("la fila {} no es un objeto", i + 1))
            })?;
            let cell = |wanted: &str| {
                obj.iter()
                    .find(|(k, _)| same_column(k, wanted))
                    .and_then(|(_, v)| cell_text(v))
            };
            Ok(CorpusRecord {
                title: cell(TITLE_COLUMN),
                content: cell(CONTENT_COLUMN),
            })
        })
        .collect()
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Recorta título y contenido y descarta las filas sin contenido.
pub fn normalize_records(origin: &str, records: Vec<CorpusRecord>) -> (Vec<Document>, IngestionSummary) {
    let mut summary = IngestionSummary {
        rows_read: records.len(),
        ..IngestionSummary::default()
    };

    let mut documents = Vec::new();
    for (i, record) in records.into_iter().enumerate() {
        let row = i + 1;
        let title = record.title.as_deref().unwrap_or("").trim().to_string();
        let content = record.content.as_deref().unwrap_or("").trim().to_string();

        if content.is_empty() {
            summary.rows_dropped += 1;
            debug!(origin, row, title = %title, "Fila sin contenido, se descarta.");
            continue;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), origin.to_string());
        metadata.insert("row".to_string(), row.to_string());
        documents.push(Document {
            id: format!("doc-{row}"),
            title,
            content,
            metadata,
        });
    }

    summary.documents_kept = documents.len();
    (documents, summary)
}
