//! Parallel-array storage shared by the in-process backends.

use serde::{Deserialize, Serialize};

use crate::document::{GetResult, Metadata};
use crate::vectorstore::{matches_filter, Filter};

/// Texts, metadata, IDs, and vectors stored as parallel arrays.
///
/// Vectors are serialized separately from the rest (binary index file vs.
/// JSON metadata file), so they are skipped here and re-attached by the
/// owning backend after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Entries {
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub ids: Vec<String>,
    #[serde(skip)]
    pub vectors: Vec<Vec<f32>>,
}

impl Entries {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn push(&mut self, id: String, text: String, metadata: Metadata, vector: Vec<f32>) {
        self.ids.push(id);
        self.documents.push(text);
        self.metadatas.push(metadata);
        self.vectors.push(vector);
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.metadatas.clear();
        self.ids.clear();
        self.vectors.clear();
    }

    /// Whether the entry at `index` matches the given IDs or filter.
    ///
    /// Matching either criterion is enough; with neither, nothing matches.
    pub fn matches(&self, index: usize, ids: Option<&[String]>, filter: Option<&Filter>) -> bool {
        if let Some(ids) = ids {
            if ids.contains(&self.ids[index]) {
                return true;
            }
        }
        if let Some(filter) = filter {
            if matches_filter(&self.metadatas[index], filter) {
                return true;
            }
        }
        false
    }

    /// Collect entries by ID or filter into a [`GetResult`].
    ///
    /// With neither argument, every entry is returned. Unknown IDs are
    /// skipped.
    pub fn get(&self, ids: Option<&[String]>, filter: Option<&Filter>) -> GetResult {
        let mut result = GetResult::default();
        for i in 0..self.len() {
            let selected = match (ids, filter) {
                (None, None) => true,
                _ => self.matches(i, ids, filter),
            };
            if selected {
                result.ids.push(self.ids[i].clone());
                result.documents.push(self.documents[i].clone());
                result.metadatas.push(self.metadatas[i].clone());
            }
        }
        result
    }

    /// Drop every entry matching the given IDs or filter, returning how
    /// many were removed.
    pub fn remove_matching(&mut self, ids: Option<&[String]>, filter: Option<&Filter>) -> usize {
        if ids.is_none() && filter.is_none() {
            return 0;
        }
        let keep: Vec<usize> =
            (0..self.len()).filter(|&i| !self.matches(i, ids, filter)).collect();
        let removed = self.len() - keep.len();
        if removed > 0 {
            self.keep_indices(&keep);
        }
        removed
    }

    /// Retain only the entries at the given indices, in order.
    pub fn keep_indices(&mut self, indices: &[usize]) {
        self.documents = indices.iter().map(|&i| self.documents[i].clone()).collect();
        self.metadatas = indices.iter().map(|&i| self.metadatas[i].clone()).collect();
        self.ids = indices.iter().map(|&i| self.ids[i].clone()).collect();
        self.vectors = indices.iter().map(|&i| self.vectors[i].clone()).collect();
    }
}
