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

//! Index collaborator interface
//!
//! Lodestone evaluates expressions and facets over segmented, immutable
//! storage it does not own. This module defines the seams to that storage:
//!
//! - [`SegmentReader`] - resolves a field's value or ordinal for one
//!   document of one immutable segment
//! - [`IndexReader`] - the index-wide view: segments, corpus statistics,
//!   field kinds and the active similarity
//! - [`DocSet`] - an index-wide document subset as one bitset per segment
//! - [`Query`] - minimal pre-parsed sub-query forms used by query facets
//!   (query-syntax parsing itself is an external concern)

pub mod memory;

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::core::{DocId, Error, Result};
use crate::function::context::QueryContext;
use crate::function::values::RangeScorer;
use crate::function::FuncSource;

pub use memory::{MemoryIndex, MemorySegment};

/// Kind of a partition/facet field, resolved from the external schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// String field with a sorted per-segment term dictionary
    Str,
    /// Numeric field (integer or double doc values)
    Numeric,
}

/// The scoring model active on the index
///
/// Document-frequency statistics (idf, norms) are only defined under a
/// tf/idf model; requesting them under another similarity is a
/// configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Similarity {
    Tfidf,
    Bm25,
}

/// Read access to one immutable segment
///
/// All accessors take a segment-local document id. `None` means the
/// document has no value for the field (or the segment has no such
/// field/structure at all).
pub trait SegmentReader: Send + Sync {
    /// One past the largest document id in this segment
    fn max_doc(&self) -> DocId;

    /// Kind of the given field as this segment sees it
    fn field_kind(&self, field: &str) -> Option<FieldKind>;

    /// Dense ordinal of the document's term in the segment dictionary
    fn term_ord(&self, field: &str, doc: DocId) -> Option<u32>;

    /// Number of distinct terms in this segment's dictionary for the field
    fn ord_count(&self, field: &str) -> u32;

    /// Term text for a dictionary ordinal
    fn lookup_ord(&self, field: &str, ord: u32) -> Option<&str>;

    /// Integer doc value
    fn numeric(&self, field: &str, doc: DocId) -> Option<i64>;

    /// Double doc value
    fn double(&self, field: &str, doc: DocId) -> Option<f64>;

    /// Encoded index-time norm byte; `None` if the field carries no norms
    fn norm(&self, field: &str, doc: DocId) -> Option<u8>;

    /// String value of the document's term, via the dictionary
    fn str_value(&self, field: &str, doc: DocId) -> Option<&str> {
        self.term_ord(field, doc)
            .and_then(|ord| self.lookup_ord(field, ord))
    }
}

/// Index-wide read access: an ordered list of segments plus corpus-level
/// statistics. Implementations must be shareable across threads; blocking
/// partitioning reads segments from pool workers.
pub trait IndexReader: Send + Sync {
    /// Number of segments; segment ordinals are `0..segment_count()`
    fn segment_count(&self) -> usize;

    /// Segment by ordinal. Panics on out-of-range ordinals.
    fn segment(&self, ord: usize) -> &dyn SegmentReader;

    /// Total number of documents across all segments
    fn num_docs(&self) -> u64;

    /// Number of documents containing the term in the field
    fn doc_freq(&self, field: &str, term: &str) -> u64;

    /// Total occurrences of the term across the index, or -1 if any
    /// segment cannot report the statistic
    fn total_term_freq(&self, field: &str, term: &str) -> i64;

    /// Kind of the field per the external schema
    fn field_kind(&self, field: &str) -> Option<FieldKind>;

    /// The active scoring model
    fn similarity(&self) -> Similarity {
        Similarity::Tfidf
    }
}

/// An index-wide document subset: one roaring bitset per segment, indexed
/// by segment ordinal
#[derive(Debug, Clone, Default)]
pub struct DocSet {
    segments: Vec<RoaringBitmap>,
}

impl DocSet {
    /// Empty set shaped for `segment_count` segments
    pub fn empty(segment_count: usize) -> Self {
        DocSet {
            segments: vec![RoaringBitmap::new(); segment_count],
        }
    }

    /// Every document of every segment
    pub fn match_all(reader: &dyn IndexReader) -> Self {
        let mut set = DocSet::empty(reader.segment_count());
        for ord in 0..reader.segment_count() {
            let max_doc = reader.segment(ord).max_doc();
            if max_doc > 0 {
                set.segments[ord].insert_range(0..max_doc);
            }
        }
        set
    }

    /// Build from per-segment bitsets (ordinal order)
    pub fn from_segments(segments: Vec<RoaringBitmap>) -> Self {
        DocSet { segments }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// The bitset for one segment ordinal
    pub fn segment(&self, ord: usize) -> &RoaringBitmap {
        &self.segments[ord]
    }

    pub fn insert(&mut self, ord: usize, doc: DocId) {
        self.segments[ord].insert(doc);
    }

    pub fn contains(&self, ord: usize, doc: DocId) -> bool {
        self.segments[ord].contains(doc)
    }

    /// Total number of documents in the set
    pub fn len(&self) -> u64 {
        self.segments.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|b| b.is_empty())
    }

    /// Intersection, segment by segment
    pub fn intersect(&self, other: &DocSet) -> DocSet {
        let segments = self
            .segments
            .iter()
            .zip(&other.segments)
            .map(|(a, b)| a & b)
            .collect();
        DocSet { segments }
    }
}

/// A pre-parsed sub-query usable as a facet domain
///
/// Query-syntax parsing is out of scope; these are the resolved forms a
/// caller or a facet request can supply directly.
#[derive(Debug, Clone)]
pub enum Query {
    /// Every document
    MatchAll,

    /// Documents whose field value equals the term. String fields match
    /// by dictionary term, numeric fields by parsed integer value.
    Term { field: String, value: String },

    /// Documents whose expression value falls in the textual range,
    /// evaluated through the function framework's range scorer
    FuncRange {
        source: Arc<FuncSource>,
        lower: Option<String>,
        upper: Option<String>,
        include_lower: bool,
        include_upper: bool,
        match_missing: bool,
    },
}

impl Query {
    /// Resolve this query to an index-wide document subset.
    ///
    /// `ctx` must already hold any index-wide weights the query's
    /// expression nodes need.
    pub fn resolve(&self, reader: &dyn IndexReader, ctx: &QueryContext) -> Result<DocSet> {
        match self {
            Query::MatchAll => Ok(DocSet::match_all(reader)),
            Query::Term { field, value } => {
                let kind = reader
                    .field_kind(field)
                    .ok_or_else(|| Error::FieldNotFound(field.clone()))?;
                let mut set = DocSet::empty(reader.segment_count());
                match kind {
                    FieldKind::Str => {
                        for ord in 0..reader.segment_count() {
                            let seg = reader.segment(ord);
                            for doc in 0..seg.max_doc() {
                                if seg.str_value(field, doc) == Some(value.as_str()) {
                                    set.insert(ord, doc);
                                }
                            }
                        }
                    }
                    FieldKind::Numeric => {
                        let target = value
                            .parse::<f64>()
                            .map_err(|_| Error::parse(format!("bad numeric term '{value}'")))?;
                        for ord in 0..reader.segment_count() {
                            let seg = reader.segment(ord);
                            for doc in 0..seg.max_doc() {
                                let v = seg
                                    .double(field, doc)
                                    .or_else(|| seg.numeric(field, doc).map(|v| v as f64));
                                if v == Some(target) {
                                    set.insert(ord, doc);
                                }
                            }
                        }
                    }
                }
                Ok(set)
            }
            Query::FuncRange {
                source,
                lower,
                upper,
                include_lower,
                include_upper,
                match_missing,
            } => {
                let scorer = RangeScorer::new(
                    lower.as_deref(),
                    upper.as_deref(),
                    *include_lower,
                    *include_upper,
                    *match_missing,
                )?;
                let mut set = DocSet::empty(reader.segment_count());
                for ord in 0..reader.segment_count() {
                    let seg = reader.segment(ord);
                    let vals = source.get_values(ctx, seg)?;
                    for doc in 0..seg.max_doc() {
                        if scorer.matches(vals.as_ref(), doc) {
                            set.insert(ord, doc);
                        }
                    }
                }
                Ok(set)
            }
        }
    }
}
