//! División de artículos en trozos de tamaño acotado con solapamiento.
//!
//! El corte se hace por número de caracteres (no por bytes, para no partir
//! nunca un carácter multibyte) y no busca fronteras semánticas: cada chunk
//! empieza `overlap` caracteres antes de donde terminó el anterior.

use std::str::FromStr;
use std::sync::Arc;

use crate::config::RagSettings;
use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Qué texto de cada artículo se indexa. Debe fijarse por despliegue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTextPolicy {
    /// `"{título}\n\n{contenido}"`, o sólo el contenido si no hay título.
    TitleAndContent,
    ContentOnly,
}

impl IndexTextPolicy {
    pub fn text_for(&self, document: &Document) -> String {
        match self {
            Self::TitleAndContent if !document.title.is_empty() => {
                format!("{}\n\n{}", document.title, document.content)
            }
            _ => document.content.clone(),
        }
    }
}

impl FromStr for IndexTextPolicy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "title_and_content" | "title+content" => Ok(Self::TitleAndContent),
            "content" | "content_only" => Ok(Self::ContentOnly),
            other => Err(RagError::Config(format!(
                "política de texto desconocida '{other}' (use 'title_and_content' o 'content')"
            ))),
        }
    }
}

/// Divisor de tamaño fijo con solapamiento.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(max_chars: usize, overlap: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(RagError::Config("el tamaño de chunk debe ser mayor que 0".into()));
        }
        if overlap >= max_chars {
            return Err(RagError::Config(format!(
                "el solapamiento ({overlap}) debe ser menor que el tamaño de chunk ({max_chars})"
            )));
        }
        Ok(Self { max_chars, overlap })
    }

    /// Devuelve un iterador perezoso sobre los chunks del documento.
    pub fn chunks(&self, document: &Arc<Document>, policy: IndexTextPolicy) -> Chunks {
        let chars: Vec<char> = policy.text_for(document).chars().collect();
        Chunks {
            document: Arc::clone(document),
            chars,
            max_chars: self.max_chars,
            overlap: self.overlap,
            next_start: Some(0),
            index: 0,
        }
    }
}

/// Iterador de [`Chunker::chunks`].
pub struct Chunks {
    document: Arc<Document>,
    chars: Vec<char>,
    max_chars: usize,
    overlap: usize,
    next_start: Option<usize>,
    index: usize,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let total = self.chars.len();
        if start >= total {
            self.next_start = None;
            return None;
        }

        let end = (start + self.max_chars).min(total);
        self.next_start = if end == total {
            None
        } else {
            Some(end - self.overlap)
        };

        let index = self.index;
        self.index += 1;
        Some(Chunk {
            id: format!("{}#{index}", self.document.id),
            document: Arc::clone(&self.document),
            index,
            start,
            overlap: self.overlap,
            text: self.chars[start..end].iter().collect(),
        })
    }
}

/// Unidad indexada cuando el chunking está desactivado: el documento entero.
pub fn whole_document(document: &Arc<Document>, policy: IndexTextPolicy) -> Chunk {
    Chunk {
        id: format!("{}#0", document.id),
        document: Arc::clone(document),
        index: 0,
        start: 0,
        overlap: 0,
        text: policy.text_for(document),
    }
}

/// Prepara los pares (texto, chunk) que alimentan la construcción del índice.
pub fn index_items(documents: Vec<Document>, settings: &RagSettings) -> Result<Vec<(String, Chunk)>> {
    let chunker = if settings.chunking {
        Some(Chunker::new(settings.chunk_size, settings.chunk_overlap)?)
    } else {
        None
    };

    let mut items = Vec::new();
    for document in documents.into_iter().map(Arc::new) {
        match &chunker {
            Some(chunker) => items.extend(
                chunker
                    .chunks(&document, settings.index_text)
                    .map(|chunk| (chunk.text.clone(), chunk)),
            ),
            None => {
                let chunk = whole_document(&document, settings.index_text);
                items.push((chunk.text.clone(), chunk));
            }
        }
    }
    Ok(items)
}
