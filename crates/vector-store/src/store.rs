use crate::config::StoreConfig;
use crate::doc_store::DocStore;
use crate::error::{Result, VectorStoreError};
use crate::hnsw_index::{HnswIndex, HnswParams};
use crate::identity::{CapacityState, IdentityMap};
use crate::paths::{docs_dir, snapshot_index_path};
use crate::projection::Projection;
use crate::snapshot::{read_snapshot_meta, remove_snapshot, write_snapshot, IndexSettings, SnapshotMeta};
use crate::types::{Document, InternalId, SearchHit, StoreState, StoreStats};
use std::collections::{HashMap, HashSet};

const TOMBSTONE_WARN_RATIO: f64 = 0.5;

/// How [`AnnStore::load`] brought the vector index up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Restored from the on-disk snapshot without touching the graph
    Snapshot { documents: usize },
    /// Re-inserted every stored document
    Rebuilt { documents: usize },
}

impl LoadOutcome {
    #[must_use]
    pub fn documents(&self) -> usize {
        match *self {
            Self::Snapshot { documents } | Self::Rebuilt { documents } => documents,
        }
    }
}

/// Embeddable vector store: durable documents plus an in-memory HNSW index.
///
/// The document store is the source of truth. Every mutation is persisted
/// before the index sees it, so the index can always be rebuilt by scanning.
/// Mutations take `&mut self`; wrap the store in a `RwLock` to share it.
pub struct AnnStore {
    config: StoreConfig,
    settings: IndexSettings,
    docs: DocStore,
    /// `None` once closed
    vectors: Option<IndexedVectors>,
    state: StoreState,
}

impl AnnStore {
    /// Open (or create) the store under `config.data_path` and load the index.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Opening AnnStore at {:?} (dimension {}, metric {}, index dimension {})",
            config.data_path,
            config.dimension,
            config.metric,
            config.index_dimension()
        );

        let docs = DocStore::open(docs_dir(&config.data_path), config.doc_store.clone())?;
        let vectors = IndexedVectors::new(&config, None)?;
        let mut store = Self {
            settings: IndexSettings::from_config(&config),
            config,
            docs,
            vectors: Some(vectors),
            state: StoreState::Empty,
        };

        let outcome = store.load()?;
        log::info!(
            "AnnStore ready with {} documents ({:?})",
            outcome.documents(),
            outcome
        );
        Ok(store)
    }

    /// Bring the vector index in line with the document store.
    ///
    /// Reuses the snapshot when it was dumped under the same index settings
    /// and the document store has not been written since; otherwise rebuilds.
    pub fn load(&mut self) -> Result<LoadOutcome> {
        self.ensure_open()?;
        let last_transaction_id = self.docs.last_transaction_id()?;
        let snapshot = read_snapshot_meta(&self.config.data_path);

        let mut projection = None;
        if let Some(meta) = snapshot {
            projection = meta.reusable_projection(&self.settings);
            if meta.is_current(&self.settings, last_transaction_id) {
                match self.restore_snapshot(meta) {
                    Ok(documents) => {
                        self.state = populated_if(documents);
                        return Ok(LoadOutcome::Snapshot { documents });
                    }
                    Err(err) => {
                        log::warn!("Snapshot could not be restored, rebuilding instead: {err}");
                    }
                }
            } else {
                log::info!(
                    "Snapshot is stale (snapshot tx {}, store tx {}), rebuilding index",
                    meta.last_transaction_id,
                    last_transaction_id
                );
            }
        }

        let documents = self.rebuild_from_docs(projection)?;
        Ok(LoadOutcome::Rebuilt { documents })
    }

    fn restore_snapshot(&mut self, meta: SnapshotMeta) -> Result<usize> {
        let live = meta.identity.live_count();
        if live != self.docs.len() {
            return Err(VectorStoreError::IndexError(format!(
                "snapshot tracks {live} live documents, document store holds {}",
                self.docs.len()
            )));
        }

        let capacity = CapacityState {
            current_capacity: meta.capacity.current_capacity,
            expand_step_size: self.config.expand_step_size,
            max_elements: self.config.max_elements,
        };
        let index = HnswIndex::load(
            HnswParams::from_config(&self.config),
            &snapshot_index_path(&self.config.data_path),
            capacity.current_capacity,
        )?;
        if index.len() != meta.identity.len() {
            return Err(VectorStoreError::IndexError(format!(
                "snapshot index holds {} vectors, identity map assigned {}",
                index.len(),
                meta.identity.len()
            )));
        }

        let projection = meta
            .reusable_projection(&self.settings)
            .or_else(|| default_projection(&self.config));
        self.vectors = Some(IndexedVectors {
            index,
            identity: meta.identity,
            capacity,
            projection,
            tombstone_warned: false,
        });
        log::info!("Restored index snapshot with {live} live documents");
        Ok(live)
    }

    /// Re-insert every stored document into a fresh index.
    fn rebuild_from_docs(&mut self, projection: Option<Projection>) -> Result<usize> {
        let vectors = self.vectors.as_mut().ok_or(VectorStoreError::Closed)?;
        vectors.reset(&self.config, projection)?;

        if vectors.projection.is_none() && !self.docs.is_empty() {
            let mut samples = Vec::new();
            for batch in self.docs.scan(self.config.scan_batch_size)? {
                let remaining = self.config.projection_sample_size - samples.len();
                for doc in batch?.into_iter().take(remaining) {
                    check_dimension(&self.config, &doc.vector)?;
                    samples.push(doc.vector);
                }
                if samples.len() >= self.config.projection_sample_size {
                    break;
                }
            }
            vectors.projection = Some(fit_projection(&self.config, &samples)?);
        }

        let mut documents = 0;
        for batch in self.docs.scan(self.config.scan_batch_size)? {
            let batch = batch?;
            for doc in &batch {
                check_dimension(&self.config, &doc.vector)?;
            }
            let projected = vectors.project(&batch)?;
            vectors.insert_projected(&batch, projected)?;
            documents += batch.len();
        }

        log::info!("Rebuilt vector index from {documents} stored documents");
        self.state = populated_if(documents);
        Ok(documents)
    }

    /// Persist and index new documents.
    ///
    /// Fails without side effects when a vector has the wrong dimension, an id
    /// repeats within the batch, or a document is already indexed.
    pub fn index(&mut self, docs: &[Document]) -> Result<()> {
        self.ensure_open()?;
        if docs.is_empty() {
            return Ok(());
        }
        self.validate_batch(docs)?;

        let vectors = self.vectors.as_mut().ok_or(VectorStoreError::Closed)?;
        if let Some(doc) = docs.iter().find(|doc| vectors.identity.is_active(&doc.id)) {
            return Err(VectorStoreError::AlreadyIndexed(doc.id.clone()));
        }
        vectors.ensure_room_for(docs.len())?;
        let fitted = match vectors.projection {
            Some(_) => None,
            None => {
                let samples: Vec<Vec<f32>> = docs
                    .iter()
                    .take(self.config.projection_sample_size)
                    .map(|doc| doc.vector.clone())
                    .collect();
                Some(fit_projection(&self.config, &samples)?)
            }
        };
        let projected = match fitted.as_ref() {
            Some(projection) => project_all(projection, docs)?,
            None => vectors.project(docs)?,
        };

        self.docs.put_batch(docs)?;
        if fitted.is_some() {
            vectors.projection = fitted;
        }
        if let Err(err) = vectors.insert_projected(docs, projected) {
            log::error!(
                "{} documents were persisted but not indexed; reload to recover: {err}",
                docs.len()
            );
            return Err(err);
        }

        log::debug!("Indexed {} documents (live: {})", docs.len(), self.docs.len());
        self.state = StoreState::Populated;
        Ok(())
    }

    /// Replace vectors and payloads of already indexed documents.
    ///
    /// The old graph entry is tombstoned and the new vector is inserted under
    /// a fresh internal id.
    pub fn update(&mut self, docs: &[Document]) -> Result<()> {
        self.ensure_open()?;
        if docs.is_empty() {
            return Ok(());
        }
        self.validate_batch(docs)?;

        let vectors = self.vectors.as_mut().ok_or(VectorStoreError::Closed)?;
        if let Some(doc) = docs.iter().find(|doc| !vectors.identity.is_active(&doc.id)) {
            return Err(VectorStoreError::NotFound(doc.id.clone()));
        }
        vectors.ensure_room_for(docs.len())?;
        let projected = vectors.project(docs)?;

        self.docs.update_batch(docs)?;
        for doc in docs {
            vectors.identity.tombstone(&doc.id);
        }
        if let Err(err) = vectors.insert_projected(docs, projected) {
            log::error!(
                "{} documents were updated but not re-indexed; reload to recover: {err}",
                docs.len()
            );
            return Err(err);
        }

        log::debug!("Updated {} documents", docs.len());
        vectors.warn_on_tombstones();
        Ok(())
    }

    /// Remove documents. Unknown or already deleted ids are skipped.
    ///
    /// Returns the number of documents actually removed.
    pub fn delete<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<usize> {
        self.ensure_open()?;
        let vectors = self.vectors.as_mut().ok_or(VectorStoreError::Closed)?;

        let mut seen = HashSet::new();
        let existing: Vec<&str> = ids
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| vectors.identity.is_active(id) && seen.insert(*id))
            .collect();
        if existing.len() < ids.len() {
            log::debug!(
                "Skipping {} ids that are not indexed",
                ids.len() - existing.len()
            );
        }
        if existing.is_empty() {
            return Ok(0);
        }

        self.docs.delete_batch(&existing)?;
        for id in &existing {
            vectors.identity.tombstone(id);
        }

        log::debug!("Deleted {} documents (live: {})", existing.len(), self.docs.len());
        vectors.warn_on_tombstones();
        Ok(existing.len())
    }

    /// Nearest live documents for each query, closest first, at most `limit` each.
    pub fn search(&self, queries: &[Vec<f32>], limit: usize) -> Result<Vec<Vec<SearchHit>>> {
        let vectors = self.vectors.as_ref().ok_or(VectorStoreError::Closed)?;
        queries
            .iter()
            .map(|query| {
                self.check_dimension(query)?;
                let neighbors = vectors.search(query, limit)?;
                self.hydrate(neighbors)
            })
            .collect()
    }

    /// [`AnnStore::search`] using the vectors of the given documents as queries.
    pub fn search_documents(&self, docs: &[Document], limit: usize) -> Result<Vec<Vec<SearchHit>>> {
        let queries: Vec<Vec<f32>> = docs.iter().map(|doc| doc.vector.clone()).collect();
        self.search(&queries, limit)
    }

    /// Stored documents for the given ids, in request order; missing ids are omitted.
    pub fn get<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Document>> {
        self.ensure_open()?;
        self.docs.get(ids)
    }

    /// Flush the document store and write an index snapshot.
    pub fn dump(&self) -> Result<()> {
        let vectors = self.vectors.as_ref().ok_or(VectorStoreError::Closed)?;
        self.docs.flush()?;

        let meta = SnapshotMeta::new(
            self.settings.clone(),
            self.docs.last_transaction_id()?,
            vectors.capacity,
            vectors.identity.clone(),
            vectors.projection.clone(),
        );
        write_snapshot(&self.config.data_path, &meta, &vectors.index)?;
        log::info!(
            "Dumped index snapshot ({} vectors, {} live) to {:?}",
            vectors.index.len(),
            vectors.identity.live_count(),
            self.config.data_path
        );
        Ok(())
    }

    /// Rebuild the index from stored documents, dropping tombstoned entries.
    ///
    /// Internal ids are reassigned densely; the fitted projection is kept.
    pub fn rebuild(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let projection = self.vectors.as_mut().and_then(|v| v.projection.take());
        self.rebuild_from_docs(projection)
    }

    /// Delete every document and the snapshot. Also reopens a closed store.
    pub fn clear(&mut self) -> Result<()> {
        self.docs.clear()?;
        remove_snapshot(&self.config.data_path)?;
        self.vectors = Some(IndexedVectors::new(&self.config, None)?);
        self.state = StoreState::Empty;
        log::info!("Cleared AnnStore at {:?}", self.config.data_path);
        Ok(())
    }

    /// Flush and release resources. Closing twice only warns.
    pub fn close(&mut self) -> Result<()> {
        if self.state == StoreState::Closed {
            log::warn!(
                "AnnStore at {:?} had been closed already, skipping this close",
                self.config.data_path
            );
            return Ok(());
        }
        self.vectors = None;
        self.state = StoreState::Closed;
        self.docs.close()
    }

    pub fn stats(&self) -> StoreStats {
        let (tombstoned, capacity, index_elements) =
            self.vectors.as_ref().map_or((0, 0, 0), |v| {
                (
                    v.identity.tombstone_count(),
                    v.capacity.current_capacity,
                    v.index.len(),
                )
            });
        StoreStats {
            state: self.state,
            live: self.docs.len(),
            tombstoned,
            capacity,
            index_elements,
            last_transaction_id: self.docs.last_transaction_id().unwrap_or(0),
        }
    }

    /// Number of live documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    #[must_use]
    pub fn state(&self) -> StoreState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == StoreState::Closed {
            return Err(VectorStoreError::Closed);
        }
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        check_dimension(&self.config, vector)
    }

    fn validate_batch(&self, docs: &[Document]) -> Result<()> {
        let mut seen = HashSet::with_capacity(docs.len());
        for doc in docs {
            self.check_dimension(&doc.vector)?;
            if !seen.insert(doc.id.as_str()) {
                return Err(VectorStoreError::DuplicateId(doc.id.clone()));
            }
        }
        Ok(())
    }

    fn hydrate(&self, neighbors: Vec<(String, f32)>) -> Result<Vec<SearchHit>> {
        let ids: Vec<&str> = neighbors.iter().map(|(id, _)| id.as_str()).collect();
        let mut found: HashMap<String, Document> = self
            .docs
            .get(&ids)?
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        let mut hits = Vec::with_capacity(neighbors.len());
        for (id, distance) in neighbors {
            match found.remove(&id) {
                Some(document) => hits.push(SearchHit { document, distance }),
                None => log::warn!("Indexed document {id} is missing from the document store"),
            }
        }
        Ok(hits)
    }
}

impl Drop for AnnStore {
    fn drop(&mut self) {
        if self.state != StoreState::Closed {
            if let Err(err) = self.close() {
                log::error!("Failed to close AnnStore on drop: {err}");
            }
        }
    }
}

fn populated_if(documents: usize) -> StoreState {
    if documents == 0 {
        StoreState::Empty
    } else {
        StoreState::Populated
    }
}

fn check_dimension(config: &StoreConfig, vector: &[f32]) -> Result<()> {
    if vector.len() != config.dimension {
        return Err(VectorStoreError::InvalidDimension {
            expected: config.dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn fit_projection(config: &StoreConfig, samples: &[Vec<f32>]) -> Result<Projection> {
    let Some(n_components) = config.n_components else {
        return Ok(Projection::Identity);
    };
    log::info!(
        "Fitting projection {} -> {} on {} samples",
        config.dimension,
        n_components,
        samples.len()
    );
    Projection::fit(
        samples,
        config.dimension,
        n_components,
        config.projection_seed,
    )
}

fn project_all(projection: &Projection, docs: &[Document]) -> Result<Vec<Vec<f32>>> {
    docs.iter().map(|doc| projection.apply(&doc.vector)).collect()
}

/// Projection in effect before any data is seen: identity, or `None` when
/// a reduced projection still has to be fitted.
fn default_projection(config: &StoreConfig) -> Option<Projection> {
    match config.n_components {
        None => Some(Projection::Identity),
        Some(_) => None,
    }
}

/// In-memory side of the store: graph, id mapping and capacity.
struct IndexedVectors {
    index: HnswIndex,
    identity: IdentityMap,
    capacity: CapacityState,
    projection: Option<Projection>,
    tombstone_warned: bool,
}

impl IndexedVectors {
    fn new(config: &StoreConfig, projection: Option<Projection>) -> Result<Self> {
        Ok(Self {
            index: HnswIndex::new(HnswParams::from_config(config))?,
            identity: IdentityMap::new(),
            capacity: CapacityState::new(config.expand_step_size, config.max_elements),
            projection: projection.or_else(|| default_projection(config)),
            tombstone_warned: false,
        })
    }

    fn reset(&mut self, config: &StoreConfig, projection: Option<Projection>) -> Result<()> {
        *self = Self::new(config, projection)?;
        Ok(())
    }

    fn project(&self, docs: &[Document]) -> Result<Vec<Vec<f32>>> {
        let projection = self.projection.as_ref().ok_or_else(|| {
            VectorStoreError::IndexError("projection has not been fitted".to_string())
        })?;
        project_all(projection, docs)
    }

    /// Fail early if `count` more ids would cross `max_elements`.
    fn ensure_room_for(&self, count: usize) -> Result<()> {
        let required = self.identity.len().saturating_add(count);
        if required > self.capacity.max_elements {
            return Err(VectorStoreError::CapacityExceeded {
                required,
                max_elements: self.capacity.max_elements,
            });
        }
        Ok(())
    }

    /// Assign fresh ids, grow capacity if needed, then add the already
    /// projected vectors to the graph. `projected` is parallel to `docs`.
    fn insert_projected(&mut self, docs: &[Document], projected: Vec<Vec<f32>>) -> Result<()> {
        let max_id = self.identity.next_id() + docs.len() as InternalId - 1;
        if let Some(new_capacity) = self.capacity.ensure_capacity(&mut self.index, max_id)? {
            log::info!("Vector index capacity grown to {new_capacity}");
        }

        let ids: Vec<InternalId> = docs
            .iter()
            .map(|doc| self.identity.assign_id(&doc.id))
            .collect::<Result<_>>()?;
        self.index.insert(&projected, &ids)
    }

    /// Live neighbours as `(doc_id, distance)`, widening the graph query
    /// until `limit` live hits are found or the whole graph was searched.
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        let total = self.index.len();
        if limit == 0 || total == 0 {
            return Ok(Vec::new());
        }
        let Some(projection) = self.projection.as_ref() else {
            return Ok(Vec::new());
        };
        let query = projection.apply(query)?;

        let mut ask = limit
            .saturating_add(self.identity.tombstone_count().min(limit))
            .min(total);
        loop {
            let hits: Vec<(String, f32)> = self
                .index
                .search_one(&query, ask)?
                .into_iter()
                .filter_map(|(id, distance)| {
                    self.identity
                        .doc_id(id)
                        .map(|doc_id| (doc_id.to_string(), distance))
                })
                .take(limit)
                .collect();
            if hits.len() >= limit || ask >= total {
                return Ok(hits);
            }
            log::debug!(
                "Only {} live hits among {ask} candidates, widening search",
                hits.len()
            );
            ask = ask.saturating_mul(2).min(total);
        }
    }

    fn warn_on_tombstones(&mut self) {
        let ratio = self.identity.tombstone_ratio();
        if ratio > TOMBSTONE_WARN_RATIO && !self.tombstone_warned {
            log::warn!(
                "{:.0}% of index entries are tombstoned; call rebuild() to compact",
                ratio * 100.0
            );
            self.tombstone_warned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> StoreConfig {
        let mut config = StoreConfig::new(2, tmp.path());
        config.expand_step_size = 8;
        config.ef_construction = 64;
        config.max_connection = 16;
        config
    }

    fn doc(id: &str, x: f32, y: f32) -> Document {
        Document::new(id, vec![x, y])
    }

    fn line(n: usize) -> Vec<Document> {
        (0..n).map(|i| doc(&format!("d{i}"), i as f32, 0.0)).collect()
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(SearchHit::id).collect()
    }

    #[test]
    fn index_then_get_and_search() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        assert_eq!(store.state(), StoreState::Empty);

        store
            .index(&[doc("a", 0.0, 0.0).with_payload(b"first".to_vec()), doc("b", 5.0, 5.0)])
            .unwrap();
        assert_eq!(store.state(), StoreState::Populated);
        assert_eq!(store.len(), 2);

        let got = store.get(&["b", "missing", "a"]).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, "b");
        assert_eq!(got[1].payload, b"first".to_vec());

        let hits = store.search(&[vec![4.0, 4.0]], 1).unwrap();
        assert_eq!(ids(&hits[0]), vec!["b"]);
        assert_eq!(hits[0][0].distance, 2.0);
    }

    #[test]
    fn results_are_sorted_and_limited() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&line(20)).unwrap();

        let hits = store.search(&[vec![10.2, 0.0]], 4).unwrap().remove(0);
        assert_eq!(ids(&hits), vec!["d10", "d11", "d9", "d12"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        assert!(store.search(&[vec![0.0, 0.0]], 0).unwrap()[0].is_empty());
        assert_eq!(store.search(&[vec![0.0, 0.0]], 100).unwrap()[0].len(), 20);
    }

    #[test]
    fn live_count_tracks_index_and_delete() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&line(5)).unwrap();
        assert_eq!(store.len(), 5);

        assert_eq!(store.delete(&["d1", "d3", "nope", "d1"]).unwrap(), 2);
        assert_eq!(store.len(), 3);
        assert_eq!(store.delete(&["d1"]).unwrap(), 0);
        assert_eq!(store.len(), 3);

        let stats = store.stats();
        assert_eq!(stats.live, 3);
        assert_eq!(stats.tombstoned, 2);
        assert_eq!(stats.index_elements, 5);
    }

    #[test]
    fn deleted_documents_never_come_back() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&line(30)).unwrap();

        let near: Vec<String> = (0..10).map(|i| format!("d{i}")).collect();
        store.delete(&near).unwrap();

        let hits = store.search(&[vec![0.0, 0.0]], 5).unwrap().remove(0);
        assert_eq!(ids(&hits), vec!["d10", "d11", "d12", "d13", "d14"]);
        assert!(store.get(&near).unwrap().is_empty());
    }

    #[test]
    fn reindexing_an_active_document_fails_without_side_effects() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&[doc("a", 1.0, 1.0)]).unwrap();

        let err = store.index(&[doc("b", 2.0, 2.0), doc("a", 3.0, 3.0)]).unwrap_err();
        assert!(matches!(err, VectorStoreError::AlreadyIndexed(id) if id == "a"));
        assert_eq!(store.len(), 1);
        assert!(store.get(&["b"]).unwrap().is_empty());

        let err = store.index(&[doc("c", 0.0, 0.0), doc("c", 1.0, 0.0)]).unwrap_err();
        assert!(matches!(err, VectorStoreError::DuplicateId(id) if id == "c"));
    }

    #[test]
    fn deleted_document_can_be_indexed_again() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&[doc("a", 1.0, 1.0)]).unwrap();
        store.delete(&["a"]).unwrap();
        store.index(&[doc("a", 7.0, 7.0)]).unwrap();

        assert_eq!(store.len(), 1);
        let hits = store.search(&[vec![1.0, 1.0]], 5).unwrap().remove(0);
        assert_eq!(ids(&hits), vec!["a"]);
        assert_eq!(hits[0].document.vector, vec![7.0, 7.0]);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();

        let err = store.index(&[Document::new("a", vec![1.0, 2.0, 3.0])]).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 2,
                actual: 3
            }
        ));
        assert!(store.is_empty());
        assert!(store.search(&[vec![1.0]], 1).is_err());
    }

    #[test]
    fn update_moves_the_vector() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&[doc("a", 0.0, 0.0), doc("b", 10.0, 0.0)]).unwrap();

        store
            .update(&[doc("a", 20.0, 0.0).with_payload(b"moved".to_vec())])
            .unwrap();
        assert_eq!(store.len(), 2);

        let hits = store.search(&[vec![0.0, 0.0]], 2).unwrap().remove(0);
        assert_eq!(ids(&hits), vec!["b", "a"]);
        assert_eq!(hits[1].distance, 400.0);
        assert_eq!(hits[1].document.payload, b"moved".to_vec());
        assert_eq!(store.stats().tombstoned, 1);
    }

    #[test]
    fn update_of_unknown_document_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&[doc("a", 0.0, 0.0)]).unwrap();

        let err = store
            .update(&[doc("a", 1.0, 1.0), doc("ghost", 2.0, 2.0)])
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::NotFound(id) if id == "ghost"));
        assert_eq!(store.get(&["a"]).unwrap()[0].vector, vec![0.0, 0.0]);
        assert_eq!(store.stats().tombstoned, 0);
    }

    #[test]
    fn capacity_grows_in_steps() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        assert_eq!(store.stats().capacity, 8);

        store.index(&line(8)).unwrap();
        assert_eq!(store.stats().capacity, 8);
        store.index(&[doc("x", 100.0, 0.0)]).unwrap();
        assert_eq!(store.stats().capacity, 16);
        store
            .index(&(0..10).map(|i| doc(&format!("y{i}"), 0.0, i as f32)).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(store.stats().capacity, 24);
        assert_eq!(store.len(), 19);
    }

    #[test]
    fn max_elements_is_a_hard_ceiling() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.max_elements = 4;
        let mut store = AnnStore::open(cfg).unwrap();
        store.index(&line(3)).unwrap();

        let err = store.index(&[doc("x", 0.0, 1.0), doc("y", 0.0, 2.0)]).unwrap_err();
        assert!(matches!(err, VectorStoreError::CapacityExceeded { .. }));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn rebuild_drops_tombstones() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&line(10)).unwrap();
        store.delete(&["d0", "d1", "d2", "d3", "d4", "d5"]).unwrap();
        store.update(&[doc("d9", 0.0, 0.0)]).unwrap();
        assert_eq!(store.stats().index_elements, 11);

        assert_eq!(store.rebuild().unwrap(), 4);
        let stats = store.stats();
        assert_eq!(stats.index_elements, 4);
        assert_eq!(stats.tombstoned, 0);
        assert_eq!(
            ids(&store.search(&[vec![0.0, 0.0]], 1).unwrap()[0]),
            vec!["d9"]
        );
    }

    #[test]
    fn reopen_uses_snapshot_only_when_current() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = AnnStore::open(config(&tmp)).unwrap();
            store.index(&line(6)).unwrap();
            store.delete(&["d2"]).unwrap();
            store.dump().unwrap();
            store.close().unwrap();
        }

        let mut store = AnnStore::open(config(&tmp)).unwrap();
        assert_eq!(store.load().unwrap(), LoadOutcome::Snapshot { documents: 5 });
        assert_eq!(store.stats().tombstoned, 1);
        assert_eq!(store.state(), StoreState::Populated);

        store.index(&[doc("late", 2.0, 0.0)]).unwrap();
        assert_eq!(store.load().unwrap(), LoadOutcome::Rebuilt { documents: 6 });
        assert_eq!(
            ids(&store.search(&[vec![2.0, 0.0]], 1).unwrap()[0]),
            vec!["late"]
        );
    }

    #[test]
    fn writes_behind_the_snapshot_are_recovered() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        {
            let mut store = AnnStore::open(cfg.clone()).unwrap();
            store.index(&line(3)).unwrap();
            store.dump().unwrap();
        }
        {
            let mut docs = DocStore::open(docs_dir(tmp.path()), cfg.doc_store.clone()).unwrap();
            docs.put_batch(&[doc("orphan", 50.0, 50.0)]).unwrap();
            docs.close().unwrap();
        }

        let store = AnnStore::open(cfg).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(
            ids(&store.search(&[vec![49.0, 49.0]], 1).unwrap()[0]),
            vec!["orphan"]
        );
    }

    #[test]
    fn close_is_idempotent_and_blocks_data_operations() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&line(2)).unwrap();

        store.close().unwrap();
        store.close().unwrap();
        assert_eq!(store.state(), StoreState::Closed);
        assert!(matches!(store.index(&line(1)), Err(VectorStoreError::Closed)));
        assert!(matches!(store.search(&[vec![0.0, 0.0]], 1), Err(VectorStoreError::Closed)));
        assert!(matches!(store.get(&["d0"]), Err(VectorStoreError::Closed)));
        assert!(matches!(store.dump(), Err(VectorStoreError::Closed)));
    }

    #[test]
    fn clear_resets_even_after_close() {
        let tmp = TempDir::new().unwrap();
        let mut store = AnnStore::open(config(&tmp)).unwrap();
        store.index(&line(4)).unwrap();
        store.dump().unwrap();
        store.close().unwrap();

        store.clear().unwrap();
        assert_eq!(store.state(), StoreState::Empty);
        assert!(store.is_empty());
        assert!(store.search(&[vec![0.0, 0.0]], 3).unwrap()[0].is_empty());

        store.index(&line(1)).unwrap();
        assert_eq!(store.len(), 1);
        drop(store);

        let store = AnnStore::open(config(&tmp)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reduced_projection_is_fitted_on_first_batch() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = StoreConfig::new(4, tmp.path());
        cfg.n_components = Some(2);
        cfg.expand_step_size = 16;
        let mut store = AnnStore::open(cfg).unwrap();

        let docs: Vec<Document> = (0..10)
            .map(|i| Document::new(format!("p{i}"), vec![i as f32, 2.0 * i as f32, 0.0, 0.01]))
            .collect();
        store.index(&docs).unwrap();

        let hits = store.search_documents(&docs[3..4], 1).unwrap();
        assert_eq!(ids(&hits[0]), vec!["p3"]);
        assert_eq!(hits[0][0].document.vector.len(), 4);
    }

    #[test]
    fn reopening_with_another_dimension_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let docs: Vec<Document> = (0..8)
            .map(|i| {
                let x = i as f32;
                Document::new(format!("w{i}"), vec![x, -x, 2.0 * x, 0.5, x * x, 1.0])
            })
            .collect();
        {
            let mut cfg = StoreConfig::new(6, tmp.path());
            cfg.n_components = Some(2);
            let mut store = AnnStore::open(cfg).unwrap();
            store.index(&docs).unwrap();
            store.close().unwrap();
        }

        for n_components in [Some(2), None] {
            let mut cfg = StoreConfig::new(4, tmp.path());
            cfg.n_components = n_components;
            assert!(
                matches!(
                    AnnStore::open(cfg),
                    Err(VectorStoreError::InvalidDimension {
                        expected: 4,
                        actual: 6
                    })
                ),
                "n_components {n_components:?}"
            );
        }

        let mut cfg = StoreConfig::new(6, tmp.path());
        cfg.n_components = Some(2);
        let store = AnnStore::open(cfg).unwrap();
        assert_eq!(store.len(), 8);
        assert_eq!(store.get(&["w3"]).unwrap(), vec![docs[3].clone()]);
        let hits = store.search_documents(&docs[5..6], 1).unwrap();
        assert_eq!(ids(&hits[0]), vec!["w5"]);
    }
}
