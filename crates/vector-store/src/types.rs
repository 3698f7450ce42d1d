use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense integer key used by the vector index.
pub type InternalId = u64;

/// A stored document: string id, raw embedding and an opaque payload.
///
/// The document store always keeps the full-fidelity vector, independent of
/// any projection applied before indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Document {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    /// Smaller is more similar, whatever the metric.
    pub distance: f32,
}

impl SearchHit {
    pub fn id(&self) -> &str {
        &self.document.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Euclidean,
    InnerProduct,
    Cosine,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::InnerProduct => "inner_product",
            Self::Cosine => "cosine",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "inner_product" | "ip" => Ok(Self::InnerProduct),
            "cosine" | "cos" => Ok(Self::Cosine),
            other => Err(format!(
                "unsupported metric '{other}' (expected euclidean, inner_product or cosine)"
            )),
        }
    }
}

/// Lifecycle state of an [`AnnStore`](crate::AnnStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Empty,
    Populated,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub state: StoreState,
    pub live: usize,
    pub tombstoned: usize,
    pub capacity: usize,
    pub index_elements: usize,
    pub last_transaction_id: u64,
}
