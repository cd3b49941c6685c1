use std::cmp::Ordering;
use std::collections::BinaryHeap;
use ordered_float::OrderedFloat;
use serde::Serialize;
use crate::error::DedupError;
use crate::vector;

/// One search hit. `position` indexes the live record ordering at the time
/// of the search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub similarity: f32,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    sim: OrderedFloat<f32>,
    position: usize,
}

// "Greater" means worse, so the heap top is the weakest of the kept hits
// and `into_sorted_vec` yields best-first.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.sim.cmp(&self.sim)
            .then_with(|| self.position.cmp(&other.position))
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exact inner-product index over unit-norm vectors, stored row-major in one
/// contiguous buffer. Rows are addressed by insertion position.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn insert(&mut self, v: &[f32]) -> Result<(), DedupError> {
        if v.len() != self.dim {
            return Err(DedupError::DimensionMismatch { expected: self.dim, actual: v.len() });
        }
        self.data.extend_from_slice(v);
        Ok(())
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Top-`k` rows by descending inner product. `k` larger than the
    /// population returns every row; an empty index returns nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, DedupError> {
        if query.len() != self.dim {
            return Err(DedupError::DimensionMismatch { expected: self.dim, actual: query.len() });
        }
        if k == 0 || self.is_empty() {
            return Ok(vec![]);
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);

        for (position, row) in self.data.chunks_exact(self.dim).enumerate() {
            let cand = Candidate { sim: OrderedFloat(vector::dot(query, row)), position };
            if heap.len() < k {
                heap.push(cand);
            } else if let Some(worst) = heap.peek() {
                if cand < *worst {
                    heap.pop();
                    heap.push(cand);
                }
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor { similarity: c.sim.into_inner(), position: c.position })
            .collect())
    }
}
