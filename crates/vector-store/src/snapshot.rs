use crate::config::StoreConfig;
use crate::error::Result;
use crate::hnsw_index::HnswIndex;
use crate::identity::{CapacityState, IdentityMap};
use crate::paths::{snapshot_dir, snapshot_index_path, snapshot_meta_path};
use crate::projection::Projection;
use crate::types::Metric;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Settings that shape the vector index; a snapshot is only reusable when they match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub dimension: usize,
    pub metric: Metric,
    pub n_components: Option<usize>,
    pub ef_construction: usize,
    pub max_connection: usize,
    pub projection_seed: u64,
}

impl IndexSettings {
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            dimension: config.dimension,
            metric: config.metric,
            n_components: config.n_components,
            ef_construction: config.ef_construction,
            max_connection: config.max_connection,
            projection_seed: config.projection_seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub schema_version: u32,
    pub dumped_at_unix_ms: u64,
    pub settings: IndexSettings,
    pub last_transaction_id: u64,
    pub capacity: CapacityState,
    pub identity: IdentityMap,
    #[serde(default)]
    pub projection: Option<Projection>,
}

impl SnapshotMeta {
    #[must_use]
    pub fn new(
        settings: IndexSettings,
        last_transaction_id: u64,
        capacity: CapacityState,
        identity: IdentityMap,
        projection: Option<Projection>,
    ) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            dumped_at_unix_ms: unix_now_ms(),
            settings,
            last_transaction_id,
            capacity,
            identity,
            projection,
        }
    }

    /// The index image can be reused as-is.
    #[must_use]
    pub fn is_current(&self, settings: &IndexSettings, last_transaction_id: u64) -> bool {
        self.settings == *settings && self.last_transaction_id == last_transaction_id
    }

    /// The fitted projection, if it was produced under the same projection settings.
    #[must_use]
    pub fn reusable_projection(&self, settings: &IndexSettings) -> Option<Projection> {
        self.projection
            .clone()
            .filter(|p| p.matches(settings.dimension, settings.n_components, settings.projection_seed))
    }
}

/// Write the index image, then the metadata record that commits it.
pub fn write_snapshot(data_path: &Path, meta: &SnapshotMeta, index: &HnswIndex) -> Result<()> {
    std::fs::create_dir_all(snapshot_dir(data_path))?;

    let index_path = snapshot_index_path(data_path);
    let index_tmp = index_path.with_extension("usearch.tmp");
    index.save(&index_tmp)?;
    std::fs::rename(&index_tmp, &index_path)?;

    let meta_path = snapshot_meta_path(data_path);
    let meta_tmp = meta_path.with_extension("json.tmp");
    std::fs::write(&meta_tmp, serde_json::to_vec_pretty(meta)?)?;
    std::fs::rename(&meta_tmp, &meta_path)?;
    Ok(())
}

/// Read the metadata record. Missing, unreadable or foreign-schema files count as absent.
pub fn read_snapshot_meta(data_path: &Path) -> Option<SnapshotMeta> {
    let path = snapshot_meta_path(data_path);
    if !path.exists() {
        return None;
    }
    let Ok(bytes) = std::fs::read(&path) else {
        return None;
    };
    let meta = match serde_json::from_slice::<SnapshotMeta>(&bytes) {
        Ok(meta) => meta,
        Err(err) => {
            log::warn!("Ignoring unreadable snapshot {:?}: {}", path, err);
            return None;
        }
    };
    if meta.schema_version != SNAPSHOT_SCHEMA_VERSION {
        log::warn!(
            "Ignoring snapshot schema_version {} (expected {SNAPSHOT_SCHEMA_VERSION})",
            meta.schema_version
        );
        return None;
    }
    Some(meta)
}

pub fn remove_snapshot(data_path: &Path) -> Result<()> {
    let dir = snapshot_dir(data_path);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
