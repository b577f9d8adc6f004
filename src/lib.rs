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

//! # Lodestone
//!
//! Per-document expression evaluation, faceted aggregation and
//! deterministic hash partitioning over segmented, immutable indexes.
//!
//! ## Architecture
//!
//! - **function**: composable expression nodes ([`FuncSource`]) with
//!   structural identity, bound per segment to typed evaluators
//!   ([`function::values::FuncValues`]); index-wide statistics are
//!   precomputed once per query into a [`function::context::QueryContext`]
//! - **facet**: a JSON facet request evaluated as a pure recursion over
//!   the bucket tree, with slot-indexed accumulators doing the per-bucket
//!   math in a single pass per segment
//! - **partition**: hash-based document partitioning in blocking
//!   (parallel, bitset-producing) and streaming (per-document) modes
//! - **index**: the collaborator traits storage must implement, plus an
//!   in-memory implementation
//!
//! ## Example
//!
//! ```
//! use lodestone::{DocSet, FacetEngine, MemoryIndex, ScalarValue, Similarity};
//! use serde_json::json;
//!
//! let mut index = MemoryIndex::new(Similarity::Tfidf);
//! index.add_segment(&[
//!     vec![("cat", ScalarValue::str("A")), ("price", ScalarValue::Float(4.0))],
//!     vec![("cat", ScalarValue::str("B")), ("price", ScalarValue::Float(2.0))],
//! ]);
//!
//! let engine = FacetEngine::new(&index);
//! let domain = DocSet::match_all(&index);
//! let out = engine.execute(&domain, &json!({"total": "sum(price)"})).unwrap();
//! assert_eq!(out["total"], json!(6.0));
//! ```

pub mod core;
pub mod facet;
pub mod function;
pub mod index;
pub mod partition;
pub mod pool;

pub use crate::core::{DocId, Error, Result, ScalarValue};
pub use facet::{AggKind, AggSpec, FacetEngine, FacetSet};
pub use function::parser::parse_func;
pub use function::FuncSource;
pub use index::{
    DocSet, FieldKind, IndexReader, MemoryIndex, MemorySegment, Query, SegmentReader, Similarity,
};
pub use partition::{
    partition_blocking, HashCollector, PartitionFilter, PartitionSpec, SegmentHashFilter,
};
pub use pool::{Permit, WorkerPool};
