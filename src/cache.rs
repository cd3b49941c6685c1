use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};
use crate::error::DedupError;
use crate::index::{FlatIndex, Neighbor};
use crate::model::MessageRecord;
use crate::window::Window;

/// The live record set: records in admission order, the id -> position
/// lookup, and the similarity index, kept in lock-step.
///
/// Row `i` of the index is always the vector of `records[i]`, and
/// `positions[records[i].id] == i`. Every mutation either rebuilds all three
/// or touches none of them.
#[derive(Debug)]
pub struct RecordCache {
    records: Vec<Arc<MessageRecord>>,
    positions: HashMap<String, usize>,
    index: FlatIndex,
}

impl RecordCache {
    pub fn new(dim: usize) -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            index: FlatIndex::new(dim),
        }
    }

    /// Rebuilds a cache from restored records, rejecting the whole set on any
    /// dimension mismatch or repeated id.
    pub fn from_records(dim: usize, records: Vec<MessageRecord>) -> Result<Self, DedupError> {
        let mut cache = Self::new(dim);
        for record in records {
            cache.push(record)?;
        }
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn records(&self) -> &[Arc<MessageRecord>] {
        &self.records
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<MessageRecord>> {
        self.positions.get(id).and_then(|&pos| self.records.get(pos))
    }

    pub fn at(&self, position: usize) -> Option<&Arc<MessageRecord>> {
        self.records.get(position)
    }

    /// Appends a record. Validates before mutating, so a failed push leaves
    /// the cache untouched.
    pub fn push(&mut self, record: MessageRecord) -> Result<Arc<MessageRecord>, DedupError> {
        if self.positions.contains_key(&record.id) {
            return Err(DedupError::DuplicateId(record.id));
        }
        if record.vector.len() != self.index.dimension() {
            return Err(DedupError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: record.vector.len(),
            });
        }

        self.index.insert(&record.vector)?;
        let record = Arc::new(record);
        self.positions.insert(record.id.clone(), self.records.len());
        self.records.push(record.clone());
        Ok(record)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, DedupError> {
        if self.index.len() != self.records.len() {
            return Err(DedupError::IndexInconsistency(format!(
                "index holds {} vectors for {} records",
                self.index.len(),
                self.records.len()
            )));
        }
        self.index.search(query, k)
    }

    pub fn live_count(&self, window: &Window, now: u64) -> usize {
        self.records.iter().filter(|r| window.is_live(r.timestamp, now)).count()
    }

    /// Drops every record outside the window and rebuilds the lookup and the
    /// index from the survivors. Returns how many were removed.
    pub fn evict_expired(&mut self, window: &Window, now: u64) -> usize {
        let before = self.records.len();
        if self.records.iter().all(|r| window.is_live(r.timestamp, now)) {
            return 0;
        }

        let survivors: Vec<_> = self
            .records
            .iter()
            .filter(|r| window.is_live(r.timestamp, now))
            .cloned()
            .collect();
        self.rebuild(survivors);
        before - self.records.len()
    }

    /// Forced size eviction: keeps only the `cap` most recently admitted
    /// records, whatever their age.
    pub fn evict_oldest(&mut self, cap: usize) -> usize {
        if self.records.len() <= cap {
            return 0;
        }
        let removed = self.records.len() - cap;
        let survivors = self.records.split_off(removed);
        self.rebuild(survivors);
        removed
    }

    #[cfg(test)]
    pub(crate) fn index_mut(&mut self) -> &mut FlatIndex {
        &mut self.index
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.positions.clear();
        self.index.reset();
    }

    fn rebuild(&mut self, survivors: Vec<Arc<MessageRecord>>) {
        let mut index = FlatIndex::new(self.index.dimension());
        let mut positions = HashMap::with_capacity(survivors.len());

        for (pos, record) in survivors.iter().enumerate() {
            if let Err(e) = index.insert(&record.vector) {
                error!("Index rebuild failed at position {}: {}. Resetting cache.", pos, e);
                self.clear();
                return;
            }
            positions.insert(record.id.clone(), pos);
        }

        debug!("Index rebuilt with {} vectors", survivors.len());
        self.records = survivors;
        self.positions = positions;
        self.index = index;
    }
}
