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

//! Facet evaluation engine
//!
//! [`FacetEngine`] turns a parsed facet request plus a document domain
//! into a JSON response. Evaluation is a pure recursion over the facet
//! tree: each bucketing facet restricts the domain and recurses, nothing
//! mutates shared state across branches.
//!
//! Bucket stats run slot-indexed: a terms or range facet allocates one
//! slot per candidate bucket, maps each domain document to its slot and
//! drives every accumulator with `(evaluator, doc, slot)` in a single
//! pass per segment. Index-wide weights are materialized sequentially in
//! a [`QueryContext`] before any per-segment work.

use serde_json::{Map, Value};

use super::request::{stat_entries, Facet, FacetSet, FacetSort, RangeFacet, TermsFacet};
use super::slots::{AggSpec, SlotAcc};
use crate::core::{DocId, Error, Result};
use crate::function::context::QueryContext;
use crate::function::values::FuncValues;
use crate::function::FuncSource;
use crate::index::{DocSet, FieldKind, IndexReader, Query, SegmentReader};

/// Facet evaluator over one index
pub struct FacetEngine<'a> {
    reader: &'a dyn IndexReader,
}

impl<'a> FacetEngine<'a> {
    pub fn new(reader: &'a dyn IndexReader) -> Self {
        FacetEngine { reader }
    }

    /// Parse and evaluate a JSON facet request over the domain
    pub fn execute(&self, domain: &DocSet, request: &Value) -> Result<Value> {
        let set = FacetSet::parse(request)?;
        self.execute_set(domain, &set)
    }

    /// Evaluate a parsed facet set over the domain
    pub fn execute_set(&self, domain: &DocSet, set: &FacetSet) -> Result<Value> {
        let mut ctx = QueryContext::new();
        self.prepare_weights(set, &mut ctx)?;
        let mut out = self.process_set(domain, set, &ctx, "")?;
        out.insert("count".to_string(), Value::from(domain.len()));
        Ok(Value::Object(out))
    }

    /// Sequential preparation phase: every index-wide weight any node of
    /// the request needs is computed before segment evaluation starts.
    fn prepare_weights(&self, set: &FacetSet, ctx: &mut QueryContext) -> Result<()> {
        for (_, facet) in &set.facets {
            match facet {
                Facet::Stat(spec) => {
                    ctx.prepare(&*spec.resolve_source(self.reader)?, self.reader)?
                }
                Facet::Query(qf) => {
                    if let Query::FuncRange { source, .. } = &qf.query {
                        ctx.prepare(source, self.reader)?;
                    }
                    self.prepare_weights(&qf.sub, ctx)?;
                }
                Facet::Terms(tf) => self.prepare_weights(&tf.sub, ctx)?,
                Facet::Range(rf) => self.prepare_weights(&rf.sub, ctx)?,
            }
        }
        Ok(())
    }

    fn process_set(
        &self,
        domain: &DocSet,
        set: &FacetSet,
        ctx: &QueryContext,
        path: &str,
    ) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        for (key, facet) in &set.facets {
            let p = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}/{key}")
            };
            let value = match facet {
                Facet::Stat(spec) => self.eval_stat(domain, spec, ctx)?,
                Facet::Query(qf) => {
                    let sub = qf.query.resolve(self.reader, ctx)?.intersect(domain);
                    let mut m = self.process_set(&sub, &qf.sub, ctx, &p)?;
                    m.insert("count".to_string(), Value::from(sub.len()));
                    Value::Object(m)
                }
                Facet::Terms(tf) => self.process_terms(domain, tf, ctx, &p)?,
                Facet::Range(rf) => self.process_range(domain, rf, ctx, &p)?,
            };
            out.insert(key.clone(), value);
        }
        Ok(out)
    }

    /// One aggregation over the whole domain: a single slot
    fn eval_stat(&self, domain: &DocSet, spec: &AggSpec, ctx: &QueryContext) -> Result<Value> {
        let source = spec.resolve_source(self.reader)?;
        let mut acc = spec.create_slot_acc(1);
        for ord in 0..self.reader.segment_count() {
            let seg = self.reader.segment(ord);
            let vals = source.get_values(ctx, seg)?;
            for doc in domain.segment(ord) {
                acc.collect(vals.as_ref(), doc, 0);
            }
        }
        Ok(acc.value(0).to_json())
    }

    fn process_terms(
        &self,
        domain: &DocSet,
        tf: &TermsFacet,
        ctx: &QueryContext,
        path: &str,
    ) -> Result<Value> {
        let kind = self
            .reader
            .field_kind(&tf.field)
            .ok_or_else(|| Error::FieldNotFound(tf.field.clone()))?;
        if kind != FieldKind::Str {
            return Err(Error::facet_request(
                path,
                format!("terms facet field '{}' is not a string field", tf.field),
            ));
        }

        // Global candidate dictionary: the union of the per-segment
        // dictionaries, in term order. One slot per term.
        let mut dict = std::collections::BTreeSet::new();
        for ord in 0..self.reader.segment_count() {
            let seg = self.reader.segment(ord);
            for term_ord in 0..seg.ord_count(&tf.field) {
                if let Some(term) = seg.lookup_ord(&tf.field, term_ord) {
                    dict.insert(term.to_string());
                }
            }
        }
        let terms: Vec<String> = dict.into_iter().collect();
        let nslots = terms.len();

        let stats = tf.stats();
        let mut counts = vec![0u64; nslots];
        let mut accs: Vec<Box<dyn SlotAcc>> =
            stats.iter().map(|(_, s)| s.create_slot_acc(nslots)).collect();
        let mut all_count = 0u64;
        let mut all_accs: Vec<Box<dyn SlotAcc>> = if tf.all_buckets {
            stats.iter().map(|(_, s)| s.create_slot_acc(1)).collect()
        } else {
            Vec::new()
        };

        for ord in 0..self.reader.segment_count() {
            let seg = self.reader.segment(ord);
            // Segment ordinal -> global slot, resolved once per segment.
            let slot_of: Vec<Option<usize>> = (0..seg.ord_count(&tf.field))
                .map(|o| {
                    seg.lookup_ord(&tf.field, o)
                        .and_then(|t| terms.binary_search_by(|x| x.as_str().cmp(t)).ok())
                })
                .collect();
            let vals = self.bind_stats(&stats, ctx, seg)?;
            for doc in domain.segment(ord) {
                let Some(term_ord) = seg.term_ord(&tf.field, doc) else {
                    continue;
                };
                let Some(slot) = slot_of[term_ord as usize] else {
                    continue;
                };
                counts[slot] += 1;
                collect_all(&mut accs, &vals, doc, slot);
                if tf.all_buckets {
                    all_count += 1;
                    collect_all(&mut all_accs, &vals, doc, 0);
                }
            }
        }

        let order = self.order_slots(&counts, &stats, &accs, &tf.sort, tf.mincount, path)?;
        let limited: &[usize] = if tf.limit >= 0 && (tf.limit as usize) < order.len() {
            &order[..tf.limit as usize]
        } else {
            &order
        };

        let mut buckets = Vec::with_capacity(limited.len());
        for &slot in limited {
            let mut bucket = Map::new();
            bucket.insert("val".to_string(), Value::from(terms[slot].as_str()));
            bucket.insert("count".to_string(), Value::from(counts[slot]));
            for ((key, _), acc) in stats.iter().zip(&accs) {
                bucket.insert((*key).to_string(), acc.value(slot).to_json());
            }
            if has_bucketing(&tf.sub) {
                let restrict = Query::Term {
                    field: tf.field.clone(),
                    value: terms[slot].clone(),
                };
                let sub_domain = restrict.resolve(self.reader, ctx)?.intersect(domain);
                self.process_bucketing(&sub_domain, &tf.sub, ctx, path, &mut bucket)?;
            }
            buckets.push(Value::Object(bucket));
        }

        let mut out = Map::new();
        out.insert("buckets".to_string(), Value::Array(buckets));
        if tf.all_buckets {
            let mut all = Map::new();
            all.insert("count".to_string(), Value::from(all_count));
            for ((key, _), acc) in stats.iter().zip(&all_accs) {
                all.insert((*key).to_string(), acc.value(0).to_json());
            }
            out.insert("allBuckets".to_string(), Value::Object(all));
        }
        Ok(Value::Object(out))
    }

    fn process_range(
        &self,
        domain: &DocSet,
        rf: &RangeFacet,
        ctx: &QueryContext,
        path: &str,
    ) -> Result<Value> {
        let kind = self
            .reader
            .field_kind(&rf.field)
            .ok_or_else(|| Error::FieldNotFound(rf.field.clone()))?;
        if kind != FieldKind::Numeric {
            return Err(Error::facet_request(
                path,
                format!("range facet field '{}' is not a numeric field", rf.field),
            ));
        }

        // Bucket k covers [start + k*gap, start + (k+1)*gap); buckets
        // exist for every k with start + k*gap < end, matched or not.
        let mut nslots = 0usize;
        while rf.start + nslots as f64 * rf.gap < rf.end {
            nslots += 1;
        }

        let stats = stat_entries(&rf.sub);
        let mut counts = vec![0u64; nslots];
        let mut accs: Vec<Box<dyn SlotAcc>> =
            stats.iter().map(|(_, s)| s.create_slot_acc(nslots)).collect();

        let source = FuncSource::DoubleField(rf.field.clone());
        for ord in 0..self.reader.segment_count() {
            let seg = self.reader.segment(ord);
            let field_vals = source.get_values(ctx, seg)?;
            let vals = self.bind_stats(&stats, ctx, seg)?;
            for doc in domain.segment(ord) {
                if !field_vals.exists(doc) {
                    continue;
                }
                let v = field_vals.double_val(doc);
                if v < rf.start || v >= rf.end {
                    continue;
                }
                let slot = range_slot(v, rf.start, rf.gap, nslots);
                counts[slot] += 1;
                collect_all(&mut accs, &vals, doc, slot);
            }
        }

        let mut buckets = Vec::with_capacity(nslots);
        for slot in 0..nslots {
            let lo = rf.start + slot as f64 * rf.gap;
            let mut bucket = Map::new();
            bucket.insert("val".to_string(), Value::from(lo));
            bucket.insert("count".to_string(), Value::from(counts[slot]));
            for ((key, _), acc) in stats.iter().zip(&accs) {
                bucket.insert((*key).to_string(), acc.value(slot).to_json());
            }
            if has_bucketing(&rf.sub) {
                let hi = (lo + rf.gap).min(rf.end);
                let restrict = Query::FuncRange {
                    source: std::sync::Arc::new(source.clone()),
                    lower: Some(lo.to_string()),
                    upper: Some(hi.to_string()),
                    include_lower: true,
                    include_upper: false,
                    match_missing: false,
                };
                let sub_domain = restrict.resolve(self.reader, ctx)?.intersect(domain);
                self.process_bucketing(&sub_domain, &rf.sub, ctx, path, &mut bucket)?;
            }
            buckets.push(Value::Object(bucket));
        }

        let mut out = Map::new();
        out.insert("buckets".to_string(), Value::Array(buckets));
        Ok(Value::Object(out))
    }

    /// Evaluate only the nested bucketing facets of a sub-set into an
    /// existing bucket object (its stats were already slot-computed)
    fn process_bucketing(
        &self,
        domain: &DocSet,
        set: &FacetSet,
        ctx: &QueryContext,
        path: &str,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        for (key, facet) in &set.facets {
            if matches!(facet, Facet::Stat(_)) {
                continue;
            }
            let p = format!("{path}/{key}");
            let value = match facet {
                Facet::Query(qf) => {
                    let sub = qf.query.resolve(self.reader, ctx)?.intersect(domain);
                    let mut m = self.process_set(&sub, &qf.sub, ctx, &p)?;
                    m.insert("count".to_string(), Value::from(sub.len()));
                    Value::Object(m)
                }
                Facet::Terms(tf) => self.process_terms(domain, tf, ctx, &p)?,
                Facet::Range(rf) => self.process_range(domain, rf, ctx, &p)?,
                Facet::Stat(_) => continue,
            };
            out.insert(key.clone(), value);
        }
        Ok(())
    }

    fn bind_stats<'s>(
        &self,
        stats: &[(&str, &AggSpec)],
        ctx: &QueryContext,
        seg: &'s dyn SegmentReader,
    ) -> Result<Vec<Box<dyn FuncValues + 's>>> {
        stats
            .iter()
            .map(|(_, spec)| spec.resolve_source(self.reader)?.get_values(ctx, seg))
            .collect()
    }

    /// Slots surviving mincount, ordered by the sort spec. The candidate
    /// list is term-ascending, so a stable sort breaks ties by value.
    fn order_slots(
        &self,
        counts: &[u64],
        stats: &[(&str, &AggSpec)],
        accs: &[Box<dyn SlotAcc>],
        sort: &FacetSort,
        mincount: u64,
        path: &str,
    ) -> Result<Vec<usize>> {
        let mut order: Vec<usize> = (0..counts.len())
            .filter(|&s| counts[s] >= mincount)
            .collect();
        match sort {
            FacetSort::CountDesc => order.sort_by(|&a, &b| counts[b].cmp(&counts[a])),
            FacetSort::CountAsc => order.sort_by(|&a, &b| counts[a].cmp(&counts[b])),
            FacetSort::StatDesc(key) | FacetSort::StatAsc(key) => {
                let idx = stats
                    .iter()
                    .position(|(k, _)| *k == key.as_str())
                    .ok_or_else(|| {
                        Error::facet_request(path, format!("sort references unknown stat '{key}'"))
                    })?;
                let by: Vec<f64> = (0..counts.len())
                    .map(|s| accs[idx].value(s).as_f64())
                    .collect();
                if matches!(sort, FacetSort::StatDesc(_)) {
                    order.sort_by(|&a, &b| by[b].total_cmp(&by[a]));
                } else {
                    order.sort_by(|&a, &b| by[a].total_cmp(&by[b]));
                }
            }
        }
        Ok(order)
    }
}

/// Slot of a value already known to lie in `[start, end)`. Nominally
/// `floor((v - start) / gap)`, then settled against the half-open bucket
/// bounds: the division can land on the wrong side of a bucket edge, and
/// attribution must agree with the `start + k*gap` bounds the buckets
/// report and nested facets filter by.
fn range_slot(v: f64, start: f64, gap: f64, nslots: usize) -> usize {
    let mut slot = (((v - start) / gap) as usize).min(nslots - 1);
    if slot > 0 && v < start + slot as f64 * gap {
        slot -= 1;
    } else if slot + 1 < nslots && v >= start + (slot + 1) as f64 * gap {
        slot += 1;
    }
    slot
}

fn collect_all(
    accs: &mut [Box<dyn SlotAcc>],
    vals: &[Box<dyn FuncValues + '_>],
    doc: DocId,
    slot: usize,
) {
    for (acc, v) in accs.iter_mut().zip(vals) {
        acc.collect(v.as_ref(), doc, slot);
    }
}

fn has_bucketing(set: &FacetSet) -> bool {
    set.facets
        .iter()
        .any(|(_, f)| !matches!(f, Facet::Stat(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScalarValue;
    use crate::index::{MemoryIndex, Similarity};
    use serde_json::json;

    fn sample() -> MemoryIndex {
        let mut index = MemoryIndex::new(Similarity::Tfidf);
        index.add_segment(&[
            vec![("cat", ScalarValue::str("A")), ("price", ScalarValue::Float(4.0))],
            vec![("cat", ScalarValue::str("B")), ("price", ScalarValue::Float(-9.0))],
            vec![("cat", ScalarValue::str("A"))],
        ]);
        index.add_segment(&[
            vec![("cat", ScalarValue::str("A")), ("price", ScalarValue::Float(2.0))],
            vec![("cat", ScalarValue::str("B")), ("price", ScalarValue::Float(11.0))],
            vec![("price", ScalarValue::Float(-5.0))],
        ]);
        index
    }

    #[test]
    fn test_top_level_stats() {
        let index = sample();
        let engine = FacetEngine::new(&index);
        let domain = DocSet::match_all(&index);
        let out = engine
            .execute(
                &domain,
                &json!({
                    "s": "sum(price)",
                    "ss": "sumsq(price)",
                    "a": "avg(price)",
                    "lo": "min(price)",
                    "hi": "max(price)"
                }),
            )
            .unwrap();
        assert_eq!(out["count"], json!(6));
        assert_eq!(out["s"], json!(3.0));
        assert_eq!(out["ss"], json!(247.0));
        assert_eq!(out["a"], json!(0.5));
        assert_eq!(out["lo"], json!(-9.0));
        assert_eq!(out["hi"], json!(11.0));
    }

    #[test]
    fn test_empty_domain_stats() {
        let index = sample();
        let engine = FacetEngine::new(&index);
        let domain = DocSet::empty(index.segment_count());
        let out = engine
            .execute(
                &domain,
                &json!({"s": "sum(price)", "lo": "min(price)", "u": "unique(cat)"}),
            )
            .unwrap();
        assert_eq!(out["count"], json!(0));
        assert_eq!(out["s"], json!(0.0));
        assert_eq!(out["lo"], Value::Null);
        assert_eq!(out["u"], json!(0));
    }

    #[test]
    fn test_terms_counts() {
        let index = sample();
        let engine = FacetEngine::new(&index);
        let domain = DocSet::match_all(&index);
        let out = engine
            .execute(&domain, &json!({"cats": {"terms": {"field": "cat"}}}))
            .unwrap();
        let buckets = out["cats"]["buckets"].as_array().unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0]["val"], json!("A"));
        assert_eq!(buckets[0]["count"], json!(3));
        assert_eq!(buckets[1]["val"], json!("B"));
        assert_eq!(buckets[1]["count"], json!(2));
    }

    #[test]
    fn test_terms_on_numeric_rejected() {
        let index = sample();
        let engine = FacetEngine::new(&index);
        let domain = DocSet::match_all(&index);
        let err = engine
            .execute(&domain, &json!({"p": {"terms": {"field": "price"}}}))
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_query_facet_restricts_domain() {
        let index = sample();
        let engine = FacetEngine::new(&index);
        let domain = DocSet::match_all(&index);
        let out = engine
            .execute(
                &domain,
                &json!({"a_docs": {"query": {"q": "cat:A", "facet": {"s": "sum(price)"}}}}),
            )
            .unwrap();
        assert_eq!(out["a_docs"]["count"], json!(3));
        assert_eq!(out["a_docs"]["s"], json!(6.0));
    }

    #[test]
    fn test_unique_over_numeric_field_counts_values() {
        let index = sample();
        let engine = FacetEngine::new(&index);
        let domain = DocSet::match_all(&index);
        let out = engine
            .execute(&domain, &json!({"u": "unique(price)", "c": "unique(cat)"}))
            .unwrap();
        // Five distinct prices, two distinct categories.
        assert_eq!(out["u"], json!(5));
        assert_eq!(out["c"], json!(2));
    }

    #[test]
    fn test_range_slot_agrees_with_bucket_bounds() {
        // Fractional gaps round unevenly; whatever slot the division
        // picks, the value must satisfy the slot's half-open bounds.
        for (start, gap) in [(0.0, 0.1), (0.0, 0.7), (0.1, 0.3), (-5.0, 0.7)] {
            let nslots = 7;
            for k in 0..nslots {
                let lo = start + k as f64 * gap;
                for v in [lo, lo + gap * 0.5, start + (k + 1) as f64 * gap - gap * 1e-15] {
                    let slot = range_slot(v, start, gap, nslots);
                    assert!(
                        v >= start + slot as f64 * gap,
                        "v={v} below slot {slot} for start={start} gap={gap}"
                    );
                    assert!(
                        slot + 1 == nslots || v < start + (slot + 1) as f64 * gap,
                        "v={v} beyond slot {slot} for start={start} gap={gap}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_range_keeps_empty_buckets() {
        let index = sample();
        let engine = FacetEngine::new(&index);
        let domain = DocSet::match_all(&index);
        let out = engine
            .execute(
                &domain,
                &json!({"p": {"range": {"field": "price", "start": -10.0, "end": 15.0, "gap": 5.0}}}),
            )
            .unwrap();
        let buckets = out["p"]["buckets"].as_array().unwrap();
        // Bucket starts: -10, -5, 0, 5, 10.
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets[0]["val"], json!(-10.0));
        assert_eq!(buckets[0]["count"], json!(1)); // -9
        assert_eq!(buckets[1]["count"], json!(1)); // -5
        assert_eq!(buckets[2]["count"], json!(2)); // 2, 4
        assert_eq!(buckets[3]["count"], json!(0));
        assert_eq!(buckets[4]["count"], json!(1)); // 11
    }
}
