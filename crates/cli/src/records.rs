use annvault_vector_store::{Document, SearchHit};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// One line of an `index --input` file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        let doc = Document::new(record.id, record.vector);
        match record.payload {
            Some(payload) => doc.with_payload(payload.into_bytes()),
            None => doc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentOutput {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl From<Document> for DocumentOutput {
    fn from(doc: Document) -> Self {
        Self {
            payload: payload_text(&doc.payload),
            id: doc.id,
            vector: doc.vector,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HitOutput {
    pub id: String,
    pub distance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl From<SearchHit> for HitOutput {
    fn from(hit: SearchHit) -> Self {
        Self {
            payload: payload_text(&hit.document.payload),
            id: hit.document.id,
            distance: hit.distance,
        }
    }
}

fn payload_text(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(payload).into_owned())
    }
}

/// Parse JSON Lines into documents. Blank lines are skipped.
pub fn read_documents(reader: impl BufRead) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: DocumentRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid document on line {}", idx + 1))?;
        docs.push(record.into());
    }
    Ok(docs)
}

/// Parse a comma separated vector such as `"0.1, 0.2,0.3"`.
pub fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>()
                .with_context(|| format!("Invalid vector component '{part}'"))
        })
        .collect()
}
