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

//! Faceted aggregation
//!
//! - [`request`] - the JSON facet request model and its strict parser
//! - [`slots`] - slot-indexed accumulators driven by the processors
//! - [`processor`] - the recursive bucket-tree evaluation engine

pub mod processor;
pub mod request;
pub mod slots;

pub use processor::FacetEngine;
pub use request::{Facet, FacetSet, FacetSort, QueryFacet, RangeFacet, TermsFacet};
pub use slots::{AggKind, AggSpec, SlotAcc};
