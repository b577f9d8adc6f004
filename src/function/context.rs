// Copyright 2025 Lodestone Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-query evaluation context
//!
//! Holds the index-wide weights materialized by
//! [`FuncSource::create_weight`](super::FuncSource::create_weight), keyed
//! by node identity. The context lives for exactly one query: weights go
//! in during the sequential preparation phase and are read-only once
//! per-segment evaluation starts.

use rustc_hash::FxHashMap;

use super::FuncSource;
use crate::core::Result;
use crate::index::IndexReader;

/// Weight cache for one query
#[derive(Debug, Default)]
pub struct QueryContext {
    weights: FxHashMap<FuncSource, f64>,
}

impl QueryContext {
    pub fn new() -> Self {
        QueryContext::default()
    }

    /// Store a weight for a node. First write wins; a node's weight is
    /// computed at most once per query.
    pub fn put(&mut self, source: &FuncSource, weight: f64) {
        self.weights.entry(source.clone()).or_insert(weight);
    }

    /// Weight previously stored for a structurally equal node
    pub fn get(&self, source: &FuncSource) -> Option<f64> {
        self.weights.get(source).copied()
    }

    /// Run the preparation phase for an expression tree: walk it and
    /// materialize every index-wide weight it needs.
    pub fn prepare(&mut self, source: &FuncSource, reader: &dyn IndexReader) -> Result<()> {
        source.create_weight(self, reader)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.weights.len()
    }
}
