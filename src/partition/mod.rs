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

//! Deterministic hash partitioning
//!
//! Splits an index into `workers` disjoint, exhaustive document subsets
//! by hashing up to four key fields per document. A document belongs to
//! worker `(hash & 0x7FFF_FFFF) % workers`; the assignment depends only
//! on the key values, never on segment geometry, so re-partitioning the
//! same data yields the same split.
//!
//! Two modes share the same hashing core:
//!
//! - blocking: [`partition_blocking`] fans one task per segment out over
//!   a [`WorkerPool`] and assembles a [`PartitionFilter`] bitset
//! - streaming: [`HashCollector`] binds per segment and answers
//!   [`SegmentHashFilter::matches`] one document at a time, allocating
//!   no per-segment bitsets

use std::sync::mpsc;

use roaring::RoaringBitmap;
use serde::Deserialize;
use smallvec::SmallVec;

use crate::core::{DocId, Error, Result};
use crate::index::{DocSet, FieldKind, IndexReader, SegmentReader};
use crate::pool::WorkerPool;

/// Most partitions key on one or two fields; four is the hard cap.
const MAX_KEYS: usize = 4;

/// What to partition on and which slice to keep
#[derive(Debug, Clone)]
pub struct PartitionSpec {
    keys: SmallVec<[String; MAX_KEYS]>,
    workers: u32,
    worker: u32,
}

impl PartitionSpec {
    /// Validate and build a partition spec. `worker` selects which of the
    /// `workers` slices this spec matches.
    pub fn new(keys: &[&str], workers: u32, worker: u32) -> Result<Self> {
        if keys.is_empty() || keys.len() > MAX_KEYS {
            return Err(Error::invalid_parameter(format!(
                "partition takes 1 to {MAX_KEYS} keys, got {}",
                keys.len()
            )));
        }
        if workers == 0 {
            return Err(Error::invalid_parameter("'workers' must be at least 1"));
        }
        if worker >= workers {
            return Err(Error::invalid_parameter(format!(
                "'worker' must be below 'workers' ({worker} >= {workers})"
            )));
        }
        Ok(PartitionSpec {
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
            workers,
            worker,
        })
    }

    /// Parse a spec from request JSON: `keys` is a comma-separated field
    /// list, `workers` and `worker` the split geometry.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let params: PartitionParams = serde_json::from_value(value.clone())
            .map_err(|e| Error::invalid_parameter(format!("bad partition params: {e}")))?;
        let keys: Vec<&str> = params
            .keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect();
        PartitionSpec::new(&keys, params.workers, params.worker)
    }

    pub fn workers(&self) -> u32 {
        self.workers
    }

    pub fn worker(&self) -> u32 {
        self.worker
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartitionParams {
    keys: String,
    workers: u32,
    worker: u32,
}

/// Java-compatible polynomial-31 hash over bytes, on wrapping i32
fn bytes_hash31(bytes: &[u8]) -> i32 {
    let mut h: i32 = 0;
    for &b in bytes {
        h = h.wrapping_mul(31).wrapping_add(b as i8 as i32);
    }
    h
}

/// Java-compatible long hash: the value xor-folded to 32 bits
fn long_hash(v: i64) -> i32 {
    let u = v as u64;
    (u ^ (u >> 32)) as u32 as i32
}

/// Worker slice a hash value belongs to; the sign bit is masked off
/// before the modulo so negative hashes land in range
fn worker_of(hash: i32, workers: u32) -> u32 {
    ((hash & 0x7FFF_FFFF) as u32) % workers
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Bytes,
    Numeric,
}

/// Key fields resolved against the schema, before any segment binding
struct HashKeys {
    keys: SmallVec<[(String, KeyKind); MAX_KEYS]>,
}

impl HashKeys {
    fn resolve(spec: &PartitionSpec, reader: &dyn IndexReader) -> Result<HashKeys> {
        let mut keys = SmallVec::new();
        for field in &spec.keys {
            let kind = reader
                .field_kind(field)
                .ok_or_else(|| Error::FieldNotFound(field.clone()))?;
            let kind = match kind {
                FieldKind::Str => KeyKind::Bytes,
                FieldKind::Numeric => KeyKind::Numeric,
            };
            keys.push((field.clone(), kind));
        }
        Ok(HashKeys { keys })
    }

    /// Bind to one segment, verifying the segment agrees with the schema
    /// on every key field's kind. A segment without the field is fine;
    /// its documents hash the key as 0.
    fn bind<'a>(&'a self, seg: &'a dyn SegmentReader) -> Result<BoundKeys<'a>> {
        for (field, kind) in &self.keys {
            if let Some(seg_kind) = seg.field_kind(field) {
                let expected = match kind {
                    KeyKind::Bytes => FieldKind::Str,
                    KeyKind::Numeric => FieldKind::Numeric,
                };
                if seg_kind != expected {
                    return Err(Error::field_kind_mismatch(field.clone()));
                }
            }
        }
        Ok(BoundKeys { keys: self, seg })
    }
}

/// Hash keys bound to one segment
struct BoundKeys<'a> {
    keys: &'a HashKeys,
    seg: &'a dyn SegmentReader,
}

impl BoundKeys<'_> {
    /// Composite hash: the wrapping sum of each key's hash. A missing
    /// value contributes 0, so a document lacking every key hashes to 0.
    fn hash(&self, doc: DocId) -> i32 {
        let mut h: i32 = 0;
        for (field, kind) in &self.keys.keys {
            let key_hash = match kind {
                KeyKind::Bytes => self
                    .seg
                    .str_value(field, doc)
                    .map_or(0, |s| bytes_hash31(s.as_bytes())),
                KeyKind::Numeric => self
                    .seg
                    .numeric(field, doc)
                    .or_else(|| self.seg.double(field, doc).map(|v| v as i64))
                    .map_or(0, long_hash),
            };
            h = h.wrapping_add(key_hash);
        }
        h
    }
}

/// The materialized result of blocking partitioning: one bitset per
/// segment holding this worker's documents
#[derive(Debug, Clone)]
pub struct PartitionFilter {
    segments: Vec<RoaringBitmap>,
}

impl PartitionFilter {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, ord: usize) -> &RoaringBitmap {
        &self.segments[ord]
    }

    pub fn contains(&self, ord: usize, doc: DocId) -> bool {
        self.segments[ord].contains(doc)
    }

    /// Total documents assigned to this worker
    pub fn cardinality(&self) -> u64 {
        self.segments.iter().map(|b| b.len()).sum()
    }

    pub fn to_doc_set(&self) -> DocSet {
        DocSet::from_segments(self.segments.clone())
    }
}

/// Blocking mode: hash every segment in parallel on the pool and return
/// the assembled per-segment bitsets.
///
/// One task per segment; each task takes a pool permit before it is
/// spawned, so at most `permits` segments are in flight. Admission
/// blocks the calling thread, never a pool worker. Results arrive
/// over a bounded channel tagged with the segment ordinal and are
/// assembled in ordinal order. If any task fails, the whole call fails
/// with the first error; no partial filter is surfaced.
pub fn partition_blocking(
    reader: &dyn IndexReader,
    spec: &PartitionSpec,
    pool: &WorkerPool,
) -> Result<PartitionFilter> {
    let keys = HashKeys::resolve(spec, reader)?;
    let n = reader.segment_count();
    let (tx, rx) = mpsc::sync_channel::<(usize, Result<RoaringBitmap>)>(n.max(1));

    let spawn_result = pool.scope(|scope| -> Result<()> {
        for ord in 0..n {
            let permit = pool.acquire()?;
            let tx = tx.clone();
            let keys = &keys;
            scope.spawn(move |_| {
                let _permit = permit;
                let result = hash_segment(reader, ord, keys, spec);
                // The receiver outlives the scope; a send cannot fail
                // while assembly is still pending.
                let _ = tx.send((ord, result));
            });
        }
        Ok(())
    });
    drop(tx);

    let mut segments: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); n];
    let mut first_err: Option<Error> = None;
    for (ord, result) in rx {
        match result {
            Ok(bitmap) => segments[ord] = bitmap,
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    spawn_result?;
    if let Some(e) = first_err {
        return Err(Error::partition_task(&e));
    }
    Ok(PartitionFilter { segments })
}

fn hash_segment(
    reader: &dyn IndexReader,
    ord: usize,
    keys: &HashKeys,
    spec: &PartitionSpec,
) -> Result<RoaringBitmap> {
    let seg = reader.segment(ord);
    let bound = keys.bind(seg)?;
    let mut bitmap = RoaringBitmap::new();
    for doc in 0..seg.max_doc() {
        if worker_of(bound.hash(doc), spec.workers) == spec.worker {
            bitmap.insert(doc);
        }
    }
    Ok(bitmap)
}

/// Streaming mode: the same hashing core without materialized bitsets.
/// Resolve once per query, bind once per segment, test one document at
/// a time.
pub struct HashCollector {
    keys: HashKeys,
    workers: u32,
    worker: u32,
}

impl HashCollector {
    pub fn new(reader: &dyn IndexReader, spec: &PartitionSpec) -> Result<Self> {
        Ok(HashCollector {
            keys: HashKeys::resolve(spec, reader)?,
            workers: spec.workers,
            worker: spec.worker,
        })
    }

    pub fn bind<'a>(&'a self, seg: &'a dyn SegmentReader) -> Result<SegmentHashFilter<'a>> {
        Ok(SegmentHashFilter {
            bound: self.keys.bind(seg)?,
            workers: self.workers,
            worker: self.worker,
        })
    }
}

/// Per-segment membership test for one worker's slice
pub struct SegmentHashFilter<'a> {
    bound: BoundKeys<'a>,
    workers: u32,
    worker: u32,
}

impl SegmentHashFilter<'_> {
    pub fn matches(&self, doc: DocId) -> bool {
        worker_of(self.bound.hash(doc), self.workers) == self.worker
    }
}
