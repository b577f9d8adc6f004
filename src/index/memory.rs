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

//! In-memory index implementation
//!
//! A small, immutable-after-build implementation of the collaborator
//! traits, used by the test suites and by callers who want to exercise
//! faceting or partitioning without a real storage engine. Documents are
//! added a segment at a time; each segment builds its own sorted term
//! dictionary per string field, mirroring segmented storage semantics.

use rustc_hash::FxHashMap;

use super::{FieldKind, IndexReader, SegmentReader, Similarity};
use crate::core::{DocId, ScalarValue};

/// One string field's per-segment data: sorted dictionary plus one
/// ordinal slot per document
#[derive(Debug, Default)]
struct StrFieldData {
    terms: Vec<String>,
    ords: Vec<Option<u32>>,
}

/// One immutable in-memory segment
#[derive(Debug, Default)]
pub struct MemorySegment {
    max_doc: DocId,
    str_fields: FxHashMap<String, StrFieldData>,
    int_fields: FxHashMap<String, Vec<Option<i64>>>,
    dbl_fields: FxHashMap<String, Vec<Option<f64>>>,
    norms: FxHashMap<String, Vec<u8>>,
    kinds: FxHashMap<String, FieldKind>,
}

impl MemorySegment {
    /// Build a segment from documents, each a list of (field, value)
    /// pairs. `Str` values feed the term dictionary, `Int` the integer
    /// doc values, `Float` the double doc values.
    fn from_docs(docs: &[Vec<(&str, ScalarValue)>]) -> Self {
        let max_doc = docs.len() as DocId;
        let mut seg = MemorySegment {
            max_doc,
            ..Default::default()
        };

        for (doc, fields) in docs.iter().enumerate() {
            for (name, value) in fields {
                match value {
                    ScalarValue::Str(s) => {
                        let data = seg
                            .str_fields
                            .entry((*name).to_string())
                            .or_insert_with(|| StrFieldData {
                                terms: Vec::new(),
                                ords: vec![None; docs.len()],
                            });
                        // Dictionary is rebuilt into sorted order below;
                        // stash the raw term index for now.
                        data.terms.push(s.to_string());
                        data.ords[doc] = Some((data.terms.len() - 1) as u32);
                        seg.kinds.insert((*name).to_string(), FieldKind::Str);
                    }
                    ScalarValue::Int(v) => {
                        seg.int_fields
                            .entry((*name).to_string())
                            .or_insert_with(|| vec![None; docs.len()])[doc] = Some(*v);
                        seg.kinds.insert((*name).to_string(), FieldKind::Numeric);
                    }
                    ScalarValue::Float(v) => {
                        seg.dbl_fields
                            .entry((*name).to_string())
                            .or_insert_with(|| vec![None; docs.len()])[doc] = Some(*v);
                        seg.kinds.insert((*name).to_string(), FieldKind::Numeric);
                    }
                    ScalarValue::Absent => {}
                    other => {
                        seg.dbl_fields
                            .entry((*name).to_string())
                            .or_insert_with(|| vec![None; docs.len()])[doc] = Some(other.as_f64());
                        seg.kinds.insert((*name).to_string(), FieldKind::Numeric);
                    }
                }
            }
        }

        // Rebuild each string field dictionary in sorted, deduplicated
        // order and remap per-document ordinals.
        for data in seg.str_fields.values_mut() {
            let raw = std::mem::take(&mut data.terms);
            let mut sorted: Vec<String> = raw.clone();
            sorted.sort();
            sorted.dedup();
            for slot in data.ords.iter_mut() {
                if let Some(old) = *slot {
                    let term = &raw[old as usize];
                    *slot = sorted.binary_search(term).ok().map(|i| i as u32);
                }
            }
            data.terms = sorted;
        }

        seg
    }

    /// Attach one norm byte per document for a field
    pub fn set_norms(&mut self, field: &str, norms: Vec<u8>) {
        self.norms.insert(field.to_string(), norms);
    }
}

impl SegmentReader for MemorySegment {
    fn max_doc(&self) -> DocId {
        self.max_doc
    }

    fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.kinds.get(field).copied()
    }

    fn term_ord(&self, field: &str, doc: DocId) -> Option<u32> {
        self.str_fields
            .get(field)
            .and_then(|d| d.ords.get(doc as usize).copied().flatten())
    }

    fn ord_count(&self, field: &str) -> u32 {
        self.str_fields
            .get(field)
            .map_or(0, |d| d.terms.len() as u32)
    }

    fn lookup_ord(&self, field: &str, ord: u32) -> Option<&str> {
        self.str_fields
            .get(field)
            .and_then(|d| d.terms.get(ord as usize))
            .map(String::as_str)
    }

    fn numeric(&self, field: &str, doc: DocId) -> Option<i64> {
        self.int_fields
            .get(field)
            .and_then(|v| v.get(doc as usize).copied().flatten())
    }

    fn double(&self, field: &str, doc: DocId) -> Option<f64> {
        self.dbl_fields
            .get(field)
            .and_then(|v| v.get(doc as usize).copied().flatten())
    }

    fn norm(&self, field: &str, doc: DocId) -> Option<u8> {
        self.norms
            .get(field)
            .and_then(|v| v.get(doc as usize).copied())
    }
}

/// In-memory index: an ordered list of [`MemorySegment`]s plus the
/// schema-level field kinds and similarity
#[derive(Debug)]
pub struct MemoryIndex {
    segments: Vec<MemorySegment>,
    kinds: FxHashMap<String, FieldKind>,
    similarity: Similarity,
    ttf_supported: bool,
}

impl MemoryIndex {
    pub fn new(similarity: Similarity) -> Self {
        MemoryIndex {
            segments: Vec::new(),
            kinds: FxHashMap::default(),
            similarity,
            ttf_supported: true,
        }
    }

    /// Seal the given documents into a new immutable segment
    pub fn add_segment(&mut self, docs: &[Vec<(&str, ScalarValue)>]) {
        let seg = MemorySegment::from_docs(docs);
        for (field, kind) in &seg.kinds {
            self.kinds.entry(field.clone()).or_insert(*kind);
        }
        self.segments.push(seg);
    }

    /// Mutable access to a built segment, for attaching norms in tests
    pub fn segment_mut(&mut self, ord: usize) -> &mut MemorySegment {
        &mut self.segments[ord]
    }

    /// Make `total_term_freq` report the statistic as unsupported (-1)
    pub fn disable_total_term_freq(&mut self) {
        self.ttf_supported = false;
    }
}

impl IndexReader for MemoryIndex {
    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment(&self, ord: usize) -> &dyn SegmentReader {
        &self.segments[ord]
    }

    fn num_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.max_doc as u64).sum()
    }

    fn doc_freq(&self, field: &str, term: &str) -> u64 {
        let mut df = 0;
        for seg in &self.segments {
            for doc in 0..seg.max_doc {
                if seg.str_value(field, doc) == Some(term) {
                    df += 1;
                }
            }
        }
        df
    }

    fn total_term_freq(&self, field: &str, term: &str) -> i64 {
        if !self.ttf_supported {
            return -1;
        }
        // Single-valued fields: term frequency is 1 per matching doc.
        self.doc_freq(field, term) as i64
    }

    fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.kinds.get(field).copied()
    }

    fn similarity(&self) -> Similarity {
        self.similarity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryIndex {
        let mut index = MemoryIndex::new(Similarity::Tfidf);
        index.add_segment(&[
            vec![("cat", ScalarValue::str("B")), ("num", ScalarValue::Int(4))],
            vec![("cat", ScalarValue::str("A")), ("num", ScalarValue::Int(2))],
            vec![("num", ScalarValue::Int(7))],
        ]);
        index.add_segment(&[vec![
            ("cat", ScalarValue::str("A")),
            ("d", ScalarValue::Float(1.5)),
        ]]);
        index
    }

    #[test]
    fn test_dictionary_sorted() {
        let index = sample();
        let seg = index.segment(0);
        assert_eq!(seg.ord_count("cat"), 2);
        assert_eq!(seg.lookup_ord("cat", 0), Some("A"));
        assert_eq!(seg.lookup_ord("cat", 1), Some("B"));
        assert_eq!(seg.term_ord("cat", 0), Some(1));
        assert_eq!(seg.term_ord("cat", 1), Some(0));
        assert_eq!(seg.term_ord("cat", 2), None);
        assert_eq!(seg.str_value("cat", 0), Some("B"));
    }

    #[test]
    fn test_numeric_access() {
        let index = sample();
        let seg = index.segment(0);
        assert_eq!(seg.numeric("num", 2), Some(7));
        assert_eq!(seg.numeric("num", 1), Some(2));
        assert_eq!(seg.double("num", 0), None);
        assert_eq!(index.segment(1).double("d", 0), Some(1.5));
    }

    #[test]
    fn test_corpus_stats() {
        let index = sample();
        assert_eq!(index.num_docs(), 4);
        assert_eq!(index.doc_freq("cat", "A"), 2);
        assert_eq!(index.total_term_freq("cat", "A"), 2);
        assert_eq!(index.field_kind("cat"), Some(FieldKind::Str));
        assert_eq!(index.field_kind("num"), Some(FieldKind::Numeric));
        assert_eq!(index.field_kind("nope"), None);
    }

    #[test]
    fn test_ttf_unsupported() {
        let mut index = sample();
        index.disable_total_term_freq();
        assert_eq!(index.total_term_freq("cat", "A"), -1);
    }
}
