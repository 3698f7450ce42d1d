use crate::error::{Result, VectorStoreError};
use crate::types::Metric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_EF_SEARCH: usize = 100;
pub const DEFAULT_MAX_CONNECTION: usize = 80;
pub const DEFAULT_MAX_ELEMENTS: usize = 10_000_000;
pub const DEFAULT_EXPAND_STEP_SIZE: usize = 10_240;

/// Configuration for an [`AnnStore`](crate::AnnStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory owning the document store and the index snapshot
    pub data_path: PathBuf,

    /// Raw embedding dimension of stored documents
    pub dimension: usize,

    /// Distance metric used by the vector index
    pub metric: Metric,

    /// Candidate list size while building the graph
    pub ef_construction: usize,

    /// Candidate list size while searching (raised to `limit` when smaller)
    pub ef_search: usize,

    /// Bi-directional links created per inserted element (2..=100 is sensible)
    pub max_connection: usize,

    /// Upper bound on internal ids the index may ever hold
    pub max_elements: usize,

    /// Capacity growth granularity; also the initial capacity
    pub expand_step_size: usize,

    /// Reduced dimension for the linear projection (`None` keeps raw vectors)
    pub n_components: Option<usize>,

    /// Seed for the projection fit
    pub projection_seed: u64,

    /// Maximum number of vectors used to fit the projection
    pub projection_sample_size: usize,

    /// Documents per batch when rebuilding the index from the document store
    pub scan_batch_size: usize,

    /// Key-value engine tuning
    pub doc_store: DocStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data"),
            dimension: 0,
            metric: Metric::Euclidean,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            max_connection: DEFAULT_MAX_CONNECTION,
            max_elements: DEFAULT_MAX_ELEMENTS,
            expand_step_size: DEFAULT_EXPAND_STEP_SIZE,
            n_components: None,
            projection_seed: 42,
            projection_sample_size: 20_000,
            scan_batch_size: 1_024,
            doc_store: DocStoreConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(dimension: usize, data_path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            data_path: data_path.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML file; missing keys take their defaults.
    ///
    /// Not validated here so callers can still override fields;
    /// [`AnnStore::open`](crate::AnnStore::open) validates.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| {
            VectorStoreError::ConfigError(format!("{}: {e}", path.as_ref().display()))
        })
    }

    /// Dimension of vectors entering the vector index
    #[must_use]
    pub fn index_dimension(&self) -> usize {
        self.n_components.unwrap_or(self.dimension)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(VectorStoreError::ConfigError(msg));

        if self.dimension == 0 {
            return fail("dimension must be > 0".to_string());
        }
        if self.expand_step_size == 0 {
            return fail("expand_step_size must be > 0".to_string());
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return fail("ef_construction and ef_search must be > 0".to_string());
        }
        if self.max_connection < 2 {
            return fail(format!(
                "max_connection ({}) must be at least 2",
                self.max_connection
            ));
        }
        if self.max_elements == 0 {
            return fail("max_elements must be > 0".to_string());
        }
        if self.scan_batch_size == 0 {
            return fail("scan_batch_size must be > 0".to_string());
        }
        if let Some(n) = self.n_components {
            if n == 0 || n >= self.dimension {
                return fail(format!(
                    "n_components ({n}) must be in 1..{} (the raw dimension)",
                    self.dimension
                ));
            }
            if self.projection_sample_size == 0 {
                return fail("projection_sample_size must be > 0".to_string());
            }
        }
        Ok(())
    }
}

/// RocksDB options for the document store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocStoreConfig {
    pub create_if_missing: bool,

    /// Memtable size in bytes
    pub write_buffer_size: usize,

    /// Target SST file size in bytes
    pub target_file_size_base: u64,

    /// Block cache (MB) for point-lookup optimisation
    pub point_lookup_block_cache_mb: u64,
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            write_buffer_size: 0x1000_0000,
            target_file_size_base: 0x1000_0000,
            point_lookup_block_cache_mb: 1_024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_need_a_dimension() {
        assert!(StoreConfig::default().validate().is_err());
        assert!(StoreConfig::new(8, "x").validate().is_ok());
    }

    #[test]
    fn n_components_must_reduce() {
        let mut config = StoreConfig::new(8, "x");
        config.n_components = Some(8);
        assert!(config.validate().is_err());
        config.n_components = Some(4);
        assert!(config.validate().is_ok());
        assert_eq!(config.index_dimension(), 4);
    }

    #[test]
    fn loads_partial_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("annvault.toml");
        std::fs::write(
            &path,
            r#"
            data_path = "/tmp/vault"
            dimension = 50
            metric = "cosine"
            n_components = 25

            [doc_store]
            write_buffer_size = 1048576
            "#,
        )
        .unwrap();

        let config = StoreConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.dimension, 50);
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.n_components, Some(25));
        assert_eq!(config.ef_search, DEFAULT_EF_SEARCH);
        assert_eq!(config.doc_store.write_buffer_size, 1_048_576);
        assert!(config.doc_store.create_if_missing);
    }

    #[test]
    fn rejects_invalid_toml_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "dimension = 4\nmax_connection = 1\n").unwrap();
        let config = StoreConfig::from_toml_file(&path).unwrap();
        assert!(matches!(
            config.validate(),
            Err(VectorStoreError::ConfigError(_))
        ));

        std::fs::write(&path, "dimension = \"four\"\n").unwrap();
        assert!(matches!(
            StoreConfig::from_toml_file(&path),
            Err(VectorStoreError::ConfigError(_))
        ));
    }
}
