//! # annvault vector store
//!
//! Embeddable approximate-nearest-neighbour store for dense `f32` vectors.
//!
//! ## Features
//!
//! - **Durable documents** in RocksDB, one synchronous batch per mutation
//! - **Fast ANN search** via HNSW (usearch), squared L2 / inner product / cosine
//! - **Optional PCA projection** to a smaller index dimension
//! - **Snapshots** of the graph so reopening skips the rebuild
//! - **Tombstone deletes** with over-fetching search and explicit compaction
//!
//! ## Architecture
//!
//! ```text
//! Document[] (id, vector, payload)
//!     │
//!     ├──> DocStore (RocksDB)          source of truth, written first
//!     │
//!     ├──> Projection (identity | PCA)
//!     │      └─> Vector[index_dimension]
//!     │
//!     ├──> IdentityMap + CapacityState
//!     │      └─> dense internal ids, tombstones
//!     │
//!     └──> HnswIndex (usearch)
//!            └─> snapshot/index.usearch + snapshot/meta.json
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use annvault_vector_store::{AnnStore, Document, StoreConfig};
//!
//! fn main() -> annvault_vector_store::Result<()> {
//!     let mut store = AnnStore::open(StoreConfig::new(3, "data"))?;
//!
//!     store.index(&[
//!         Document::new("a", vec![0.0, 0.0, 1.0]),
//!         Document::new("b", vec![1.0, 0.0, 0.0]).with_payload(b"meta".to_vec()),
//!     ])?;
//!
//!     for hit in &store.search(&[vec![0.9, 0.0, 0.1]], 1)?[0] {
//!         println!("{}: {:.3}", hit.id(), hit.distance);
//!     }
//!
//!     store.dump()?;
//!     store.close()
//! }
//! ```

mod config;
mod doc_store;
mod error;
mod hnsw_index;
mod identity;
mod paths;
mod projection;
mod snapshot;
mod store;
mod types;

pub use config::{
    DocStoreConfig, StoreConfig, DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH,
    DEFAULT_EXPAND_STEP_SIZE, DEFAULT_MAX_CONNECTION, DEFAULT_MAX_ELEMENTS,
};
pub use doc_store::{DocBatches, DocStore, DocStoreStat};
pub use error::{Result, VectorStoreError};
pub use hnsw_index::{HnswIndex, HnswParams};
pub use identity::{CapacityState, IdentityMap};
pub use paths::{
    docs_dir, find_data_path_from, snapshot_dir, snapshot_index_path, snapshot_meta_path,
};
pub use projection::{LinearProjection, Projection};
pub use snapshot::{IndexSettings, SnapshotMeta, SNAPSHOT_SCHEMA_VERSION};
pub use store::{AnnStore, LoadOutcome};
pub use types::{Document, InternalId, Metric, SearchHit, StoreState, StoreStats};
