use crate::error::{Result, VectorStoreError};
use crate::hnsw_index::HnswIndex;
use crate::types::InternalId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Bidirectional `doc_id <-> internal id` mapping with tombstones.
///
/// Every internal id ever handed out stays in `reverse` so graph hits can
/// always be resolved; only non-tombstoned ids resolve to a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "PersistedIdentityMap", into = "PersistedIdentityMap")]
pub struct IdentityMap {
    forward: HashMap<String, InternalId>,
    reverse: Vec<String>,
    tombstoned: BTreeSet<InternalId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedIdentityMap {
    doc_ids: Vec<String>,
    tombstoned: Vec<InternalId>,
}

impl From<PersistedIdentityMap> for IdentityMap {
    fn from(persisted: PersistedIdentityMap) -> Self {
        let mut forward = HashMap::with_capacity(persisted.doc_ids.len());
        for (id, doc_id) in persisted.doc_ids.iter().enumerate() {
            // Later ids win: they are the most recent assignment for the doc.
            forward.insert(doc_id.clone(), id as InternalId);
        }
        Self {
            forward,
            reverse: persisted.doc_ids,
            tombstoned: persisted.tombstoned.into_iter().collect(),
        }
    }
}

impl From<IdentityMap> for PersistedIdentityMap {
    fn from(map: IdentityMap) -> Self {
        Self {
            doc_ids: map.reverse,
            tombstoned: map.tombstoned.into_iter().collect(),
        }
    }
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next internal id for `doc_id`.
    ///
    /// A tombstoned document is re-activated under a fresh id, never its old one.
    pub fn assign_id(&mut self, doc_id: &str) -> Result<InternalId> {
        if self.is_active(doc_id) {
            return Err(VectorStoreError::AlreadyIndexed(doc_id.to_string()));
        }
        let id = self.next_id();
        self.reverse.push(doc_id.to_string());
        self.forward.insert(doc_id.to_string(), id);
        Ok(id)
    }

    /// Mark the current id of `doc_id` inactive. Returns it, or `None` when the
    /// document is unknown or already tombstoned.
    pub fn tombstone(&mut self, doc_id: &str) -> Option<InternalId> {
        let id = self.internal_id(doc_id)?;
        self.tombstoned.insert(id);
        Some(id)
    }

    /// Active internal id for a document
    #[must_use]
    pub fn internal_id(&self, doc_id: &str) -> Option<InternalId> {
        self.forward
            .get(doc_id)
            .copied()
            .filter(|id| !self.tombstoned.contains(id))
    }

    /// Document behind an active internal id
    #[must_use]
    pub fn doc_id(&self, id: InternalId) -> Option<&str> {
        if self.tombstoned.contains(&id) {
            return None;
        }
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.reverse.get(idx))
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_active(&self, doc_id: &str) -> bool {
        self.internal_id(doc_id).is_some()
    }

    #[must_use]
    pub fn is_tombstoned(&self, id: InternalId) -> bool {
        self.tombstoned.contains(&id)
    }

    /// Number of internal ids ever assigned
    #[must_use]
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.reverse.len() - self.tombstoned.len()
    }

    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstoned.len()
    }

    #[must_use]
    pub fn tombstone_ratio(&self) -> f64 {
        if self.reverse.is_empty() {
            0.0
        } else {
            self.tombstoned.len() as f64 / self.reverse.len() as f64
        }
    }

    #[must_use]
    pub fn next_id(&self) -> InternalId {
        self.reverse.len() as InternalId
    }
}

/// Grow-only capacity bookkeeping for the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityState {
    pub current_capacity: usize,
    pub expand_step_size: usize,
    pub max_elements: usize,
}

impl CapacityState {
    #[must_use]
    pub fn new(expand_step_size: usize, max_elements: usize) -> Self {
        Self {
            current_capacity: expand_step_size,
            expand_step_size,
            max_elements,
        }
    }

    /// Capacity needed to hold `max_id`, rounded up to the step size, or
    /// `None` if the current capacity already covers it.
    #[must_use]
    pub fn required_capacity(&self, max_id: InternalId) -> Option<usize> {
        let needed = usize::try_from(max_id).ok()?.saturating_add(1);
        if needed <= self.current_capacity {
            return None;
        }
        Some(needed.div_ceil(self.expand_step_size) * self.expand_step_size)
    }

    /// Resize `index` so that `max_id` can be inserted. Must run before the insert.
    ///
    /// Returns the new capacity when a resize happened.
    pub fn ensure_capacity(
        &mut self,
        index: &mut HnswIndex,
        max_id: InternalId,
    ) -> Result<Option<usize>> {
        let needed = usize::try_from(max_id)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        if needed > self.max_elements {
            return Err(VectorStoreError::CapacityExceeded {
                required: needed,
                max_elements: self.max_elements,
            });
        }

        let Some(new_capacity) = self.required_capacity(max_id) else {
            return Ok(None);
        };
        index.resize(new_capacity)?;
        self.current_capacity = new_capacity;
        Ok(Some(new_capacity))
    }
}
