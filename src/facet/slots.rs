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

//! Slot-indexed accumulators
//!
//! A facet processor owns one slot per bucket and drives every
//! accumulator with `(evaluator, doc, slot)` triples as it scans the
//! domain. Accumulators never resolve bucket identity themselves; the
//! processor maps each document to a slot and the accumulator folds the
//! document's value into that slot's running state.
//!
//! Missing values fold as 0 into sum/sumsq/avg; min/max and unique only
//! consider documents where the evaluator reports a value. Avg divides by
//! the number of collected documents, not the number of present values.

use std::sync::Arc;

use ahash::AHashSet;

use crate::core::{DocId, Error, Result, ScalarValue};
use crate::function::parser::parse_func;
use crate::function::values::FuncValues;
use crate::function::FuncSource;
use crate::index::{FieldKind, IndexReader};

/// The aggregation functions a stat expression can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Sum,
    SumSq,
    Avg,
    Min,
    Max,
    Unique,
}

impl AggKind {
    fn from_name(name: &str) -> Option<AggKind> {
        match name {
            "sum" => Some(AggKind::Sum),
            "sumsq" => Some(AggKind::SumSq),
            "avg" => Some(AggKind::Avg),
            "min" => Some(AggKind::Min),
            "max" => Some(AggKind::Max),
            "unique" => Some(AggKind::Unique),
            _ => None,
        }
    }
}

/// A parsed stat expression: aggregation kind plus its value expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggSpec {
    pub kind: AggKind,
    pub source: Arc<FuncSource>,
}

impl AggSpec {
    /// Parse a stat expression of the form `agg(expr)`. An unrecognized
    /// aggregation name is an error, never a silent zero.
    pub fn parse(expr: &str) -> Result<AggSpec> {
        let trimmed = expr.trim();
        let open = trimmed
            .find('(')
            .ok_or_else(|| Error::parse(format!("stat expression '{trimmed}' is not a call")))?;
        if !trimmed.ends_with(')') {
            return Err(Error::parse(format!(
                "stat expression '{trimmed}' is not a call"
            )));
        }
        let name = &trimmed[..open];
        let kind = AggKind::from_name(name)
            .ok_or_else(|| Error::UnknownAggregation(name.to_string()))?;
        let inner = &trimmed[open + 1..trimmed.len() - 1];
        Ok(AggSpec {
            kind,
            source: Arc::new(parse_func(inner)?),
        })
    }

    /// The value expression to bind, resolved against the schema. A bare
    /// field argument to `unique()` means the string field when the
    /// schema says the field is one; a numeric field keeps its numeric
    /// reading and counts distinct formatted values. An unknown field is
    /// an error, never a silent zero.
    pub fn resolve_source(&self, reader: &dyn IndexReader) -> Result<Arc<FuncSource>> {
        if self.kind == AggKind::Unique {
            if let FuncSource::DoubleField(field) = self.source.as_ref() {
                return match reader.field_kind(field) {
                    Some(FieldKind::Str) => Ok(Arc::new(FuncSource::StrField(field.clone()))),
                    Some(FieldKind::Numeric) => Ok(Arc::clone(&self.source)),
                    None => Err(Error::FieldNotFound(field.clone())),
                };
            }
        }
        Ok(Arc::clone(&self.source))
    }

    /// Create an accumulator for this spec with `slots` buckets
    pub fn create_slot_acc(&self, slots: usize) -> Box<dyn SlotAcc> {
        match self.kind {
            AggKind::Sum => Box::new(SumSlotAcc::new(slots, false)),
            AggKind::SumSq => Box::new(SumSlotAcc::new(slots, true)),
            AggKind::Avg => Box::new(AvgSlotAcc::new(slots)),
            AggKind::Min => Box::new(MinMaxSlotAcc::new(slots, true)),
            AggKind::Max => Box::new(MinMaxSlotAcc::new(slots, false)),
            AggKind::Unique => Box::new(UniqueSlotAcc::new(slots)),
        }
    }
}

/// One running aggregation over a fixed number of bucket slots
pub trait SlotAcc {
    /// Fold one document's value into a slot
    fn collect(&mut self, vals: &dyn FuncValues, doc: DocId, slot: usize);

    /// Final value of a slot
    fn value(&self, slot: usize) -> ScalarValue;
}

/// Sum and sum-of-squares share a slot layout; missing values fold as 0
struct SumSlotAcc {
    sums: Vec<f64>,
    squared: bool,
}

impl SumSlotAcc {
    fn new(slots: usize, squared: bool) -> Self {
        SumSlotAcc {
            sums: vec![0.0; slots],
            squared,
        }
    }
}

impl SlotAcc for SumSlotAcc {
    fn collect(&mut self, vals: &dyn FuncValues, doc: DocId, slot: usize) {
        let v = vals.double_val(doc);
        self.sums[slot] += if self.squared { v * v } else { v };
    }

    fn value(&self, slot: usize) -> ScalarValue {
        ScalarValue::Float(self.sums[slot])
    }
}

/// Mean over all collected documents of the slot. Documents without a
/// value still count in the denominator (their value folds as 0).
struct AvgSlotAcc {
    sums: Vec<f64>,
    counts: Vec<u64>,
}

impl AvgSlotAcc {
    fn new(slots: usize) -> Self {
        AvgSlotAcc {
            sums: vec![0.0; slots],
            counts: vec![0; slots],
        }
    }
}

impl SlotAcc for AvgSlotAcc {
    fn collect(&mut self, vals: &dyn FuncValues, doc: DocId, slot: usize) {
        self.sums[slot] += vals.double_val(doc);
        self.counts[slot] += 1;
    }

    fn value(&self, slot: usize) -> ScalarValue {
        if self.counts[slot] == 0 {
            ScalarValue::Float(0.0)
        } else {
            ScalarValue::Float(self.sums[slot] / self.counts[slot] as f64)
        }
    }
}

/// Min/max over present values only; an untouched slot stays NaN, which
/// serializes as null
struct MinMaxSlotAcc {
    values: Vec<f64>,
    min: bool,
}

impl MinMaxSlotAcc {
    fn new(slots: usize, min: bool) -> Self {
        MinMaxSlotAcc {
            values: vec![f64::NAN; slots],
            min,
        }
    }
}

impl SlotAcc for MinMaxSlotAcc {
    fn collect(&mut self, vals: &dyn FuncValues, doc: DocId, slot: usize) {
        if !vals.exists(doc) {
            return;
        }
        let v = vals.double_val(doc);
        let cur = self.values[slot];
        let better = cur.is_nan() || if self.min { v < cur } else { v > cur };
        if better {
            self.values[slot] = v;
        }
    }

    fn value(&self, slot: usize) -> ScalarValue {
        ScalarValue::Float(self.values[slot])
    }
}

/// Count of distinct string values among present values of the slot
struct UniqueSlotAcc {
    sets: Vec<AHashSet<String>>,
}

impl UniqueSlotAcc {
    fn new(slots: usize) -> Self {
        UniqueSlotAcc {
            sets: vec![AHashSet::new(); slots],
        }
    }
}

impl SlotAcc for UniqueSlotAcc {
    fn collect(&mut self, vals: &dyn FuncValues, doc: DocId, slot: usize) {
        if !vals.exists(doc) {
            return;
        }
        if let Some(s) = vals.str_val(doc) {
            self.sets[slot].insert(s);
        }
    }

    fn value(&self, slot: usize) -> ScalarValue {
        ScalarValue::Int(self.sets[slot].len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::values::FilledValue;

    struct SeqValues(Vec<Option<f64>>);

    impl FuncValues for SeqValues {
        fn double_val(&self, doc: DocId) -> f64 {
            self.0[doc as usize].unwrap_or(0.0)
        }
        fn exists(&self, doc: DocId) -> bool {
            self.0[doc as usize].is_some()
        }
        fn str_val(&self, doc: DocId) -> Option<String> {
            self.0[doc as usize].map(|v| v.to_string())
        }
    }

    fn rollup_values() -> SeqValues {
        SeqValues(vec![
            Some(4.0),
            Some(-9.0),
            None,
            Some(2.0),
            Some(11.0),
            Some(-5.0),
        ])
    }

    fn run(acc: &mut dyn SlotAcc, vals: &dyn FuncValues, docs: usize) {
        for doc in 0..docs {
            acc.collect(vals, doc as DocId, 0);
        }
    }

    #[test]
    fn test_rollup_with_missing() {
        let vals = rollup_values();

        let spec = AggSpec::parse("sum(x)").unwrap();
        let mut acc = spec.create_slot_acc(1);
        run(acc.as_mut(), &vals, 6);
        assert_eq!(acc.value(0), ScalarValue::Float(3.0));

        let spec = AggSpec::parse("sumsq(x)").unwrap();
        let mut acc = spec.create_slot_acc(1);
        run(acc.as_mut(), &vals, 6);
        assert_eq!(acc.value(0), ScalarValue::Float(247.0));

        let spec = AggSpec::parse("avg(x)").unwrap();
        let mut acc = spec.create_slot_acc(1);
        run(acc.as_mut(), &vals, 6);
        assert_eq!(acc.value(0), ScalarValue::Float(0.5));

        let spec = AggSpec::parse("min(x)").unwrap();
        let mut acc = spec.create_slot_acc(1);
        run(acc.as_mut(), &vals, 6);
        assert_eq!(acc.value(0), ScalarValue::Float(-9.0));

        let spec = AggSpec::parse("max(x)").unwrap();
        let mut acc = spec.create_slot_acc(1);
        run(acc.as_mut(), &vals, 6);
        assert_eq!(acc.value(0), ScalarValue::Float(11.0));
    }

    #[test]
    fn test_empty_slots() {
        let spec = AggSpec::parse("min(x)").unwrap();
        let acc = spec.create_slot_acc(1);
        match acc.value(0) {
            ScalarValue::Float(v) => assert!(v.is_nan()),
            other => panic!("expected float, got {other:?}"),
        }
        assert_eq!(acc.value(0).to_json(), serde_json::Value::Null);

        let spec = AggSpec::parse("sum(x)").unwrap();
        assert_eq!(spec.create_slot_acc(1).value(0), ScalarValue::Float(0.0));
        let spec = AggSpec::parse("avg(x)").unwrap();
        assert_eq!(spec.create_slot_acc(1).value(0), ScalarValue::Float(0.0));
        let spec = AggSpec::parse("unique(x)").unwrap();
        assert_eq!(spec.create_slot_acc(1).value(0), ScalarValue::Int(0));
    }

    #[test]
    fn test_unique_counts_distinct() {
        let vals = SeqValues(vec![Some(1.0), Some(2.0), Some(1.0), None]);
        let spec = AggSpec::parse("unique(x)").unwrap();
        let mut acc = spec.create_slot_acc(1);
        run(acc.as_mut(), &vals, 4);
        assert_eq!(acc.value(0), ScalarValue::Int(2));
    }

    #[test]
    fn test_slots_are_independent() {
        let vals = SeqValues(vec![Some(1.0), Some(10.0)]);
        let spec = AggSpec::parse("sum(x)").unwrap();
        let mut acc = spec.create_slot_acc(2);
        acc.collect(&vals, 0, 0);
        acc.collect(&vals, 1, 1);
        assert_eq!(acc.value(0), ScalarValue::Float(1.0));
        assert_eq!(acc.value(1), ScalarValue::Float(10.0));
    }

    #[test]
    fn test_unique_source_resolves_by_field_kind() {
        use crate::index::{MemoryIndex, Similarity};

        let mut index = MemoryIndex::new(Similarity::Tfidf);
        index.add_segment(&[vec![
            ("cat", ScalarValue::str("a")),
            ("price", ScalarValue::Float(1.0)),
        ]]);

        // A bare string field reads through the dictionary.
        let spec = AggSpec::parse("unique(cat)").unwrap();
        let source = spec.resolve_source(&index).unwrap();
        assert_eq!(*source, FuncSource::StrField("cat".to_string()));

        // A bare numeric field keeps its numeric reading.
        let spec = AggSpec::parse("unique(price)").unwrap();
        let source = spec.resolve_source(&index).unwrap();
        assert_eq!(*source, FuncSource::DoubleField("price".to_string()));

        // An explicit expression is kept as written.
        let spec = AggSpec::parse("unique(str(cat))").unwrap();
        let source = spec.resolve_source(&index).unwrap();
        assert_eq!(*source, FuncSource::StrField("cat".to_string()));

        // Other aggregations never resolve, and unknown fields fail.
        let spec = AggSpec::parse("sum(ghost)").unwrap();
        assert!(spec.resolve_source(&index).is_ok());
        let spec = AggSpec::parse("unique(ghost)").unwrap();
        assert!(spec.resolve_source(&index).unwrap_err().is_not_found());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            AggSpec::parse("median(x)").unwrap_err(),
            Error::UnknownAggregation(name) if name == "median"
        ));
        assert!(AggSpec::parse("sum").is_err());
        assert!(AggSpec::parse("sum(").is_err());
    }

    #[test]
    fn test_fill_value_cell() {
        let vals = rollup_values();
        let mut cell = FilledValue::default();
        vals.fill_value(2, &mut cell);
        assert!(!cell.exists);
        vals.fill_value(0, &mut cell);
        assert!(cell.exists);
    }
}
