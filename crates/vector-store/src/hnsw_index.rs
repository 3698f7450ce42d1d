use crate::config::StoreConfig;
use crate::error::{Result, VectorStoreError};
use crate::types::{InternalId, Metric};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    pub dimension: usize,
    pub metric: Metric,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_connection: usize,
    pub initial_capacity: usize,
}

impl HnswParams {
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            dimension: config.index_dimension(),
            metric: config.metric,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            max_connection: config.max_connection,
            initial_capacity: config.expand_step_size,
        }
    }

    fn metric_kind(&self) -> MetricKind {
        match self.metric {
            Metric::Euclidean => MetricKind::L2sq,
            Metric::InnerProduct => MetricKind::IP,
            Metric::Cosine => MetricKind::Cos,
        }
    }
}

/// HNSW graph over dense integer ids with explicit, grow-only capacity.
///
/// Distances are "smaller is closer" for every metric: squared L2 for
/// euclidean, `1 - dot` for inner product, `1 - cos` for cosine.
/// The graph cannot delete or overwrite entries.
///
/// The engine's search breadth is a shared setting, so searches are
/// serialized on `search_lock` while it is adjusted and used.
pub struct HnswIndex {
    params: HnswParams,
    index: Index,
    capacity: usize,
    search_lock: Mutex<()>,
}

impl HnswIndex {
    pub fn new(params: HnswParams) -> Result<Self> {
        let index = build_index(&params)?;
        let mut this = Self {
            params,
            index,
            capacity: 0,
            search_lock: Mutex::new(()),
        };
        this.resize(params.initial_capacity)?;
        Ok(this)
    }

    /// Add vectors under previously unused ids. Every id must be below capacity.
    pub fn insert(&mut self, vectors: &[Vec<f32>], ids: &[InternalId]) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(VectorStoreError::IndexError(format!(
                "{} vectors supplied for {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        for (vector, &id) in vectors.iter().zip(ids) {
            self.check_dimension(vector)?;
            if id >= self.capacity as u64 {
                return Err(VectorStoreError::CapacityInvariant {
                    id,
                    capacity: self.capacity,
                });
            }
        }

        for (vector, &id) in vectors.iter().zip(ids) {
            self.index
                .add(id, vector.as_slice())
                .map_err(|e| VectorStoreError::IndexError(e.to_string()))?;
        }
        Ok(())
    }

    /// k-NN for each query, sorted by non-decreasing distance.
    pub fn search(&self, queries: &[Vec<f32>], k: usize) -> Result<Vec<Vec<(InternalId, f32)>>> {
        queries.iter().map(|q| self.search_one(q, k)).collect()
    }

    pub fn search_one(&self, query: &[f32], k: usize) -> Result<Vec<(InternalId, f32)>> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let matches = {
            let _guard = self
                .search_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.index
                .change_expansion_search(self.params.ef_search.max(k));
            self.index
                .search(query, k)
                .map_err(|e| VectorStoreError::IndexError(e.to_string()))?
        };

        let mut neighbors: Vec<(InternalId, f32)> = matches
            .keys
            .into_iter()
            .zip(matches.distances)
            .collect();
        neighbors.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        neighbors.truncate(k);
        Ok(neighbors)
    }

    /// Grow pre-allocated capacity. Never shrinks.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity <= self.capacity {
            return Ok(());
        }
        self.index
            .reserve(new_capacity)
            .map_err(|e| VectorStoreError::IndexError(e.to_string()))?;
        log::debug!(
            "HNSW index capacity expanded from {} to {}",
            self.capacity,
            new_capacity
        );
        self.capacity = new_capacity;
        Ok(())
    }

    pub fn delete(&mut self, _ids: &[InternalId]) -> Result<()> {
        Err(VectorStoreError::Unsupported("delete"))
    }

    pub fn update(&mut self, _vectors: &[Vec<f32>], _ids: &[InternalId]) -> Result<()> {
        Err(VectorStoreError::Unsupported("update"))
    }

    /// Drop all data and start over with the same parameters.
    pub fn reset(&mut self) -> Result<()> {
        *self = Self::new(self.params)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.index
            .save(path_str(path)?)
            .map_err(|e| VectorStoreError::IndexError(e.to_string()))
    }

    /// Restore a graph written by [`HnswIndex::save`] and re-reserve `capacity`.
    pub fn load(params: HnswParams, path: &Path, capacity: usize) -> Result<Self> {
        let index = build_index(&params)?;
        index
            .load(path_str(path)?)
            .map_err(|e| VectorStoreError::IndexError(e.to_string()))?;
        if index.dimensions() != params.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: params.dimension,
                actual: index.dimensions(),
            });
        }

        let mut this = Self {
            params,
            index,
            capacity: 0,
            search_lock: Mutex::new(()),
        };
        this.resize(capacity.max(this.len()))?;
        Ok(this)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.params.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.params.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Number of vectors in the graph, tombstoned or not
    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }
}

fn build_index(params: &HnswParams) -> Result<Index> {
    let options = IndexOptions {
        dimensions: params.dimension,
        metric: params.metric_kind(),
        quantization: ScalarKind::F32,
        connectivity: params.max_connection,
        expansion_add: params.ef_construction,
        expansion_search: params.ef_search,
        multi: false,
    };
    Index::new(&options).map_err(|e| VectorStoreError::IndexError(e.to_string()))
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        VectorStoreError::IndexError(format!("index path is not valid UTF-8: {path:?}"))
    })
}
