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

//! Per-segment evaluators
//!
//! A [`FuncValues`] is the ephemeral, per-segment form of an expression
//! node: it produces typed values for the documents of exactly one
//! immutable segment. The trait carries the fixed default-conversion
//! matrix every evaluator inherits unless it overrides an accessor:
//!
//! - natural type is `double_val`
//! - `float_val` / `int_val` / `long_val` truncate
//! - `bool_val` is "nonzero"
//! - `str_val` is canonical float formatting
//! - `exists` defaults to true; downstream consumers treat it as the
//!   null/missing signal
//!
//! Bulk extraction goes through [`FilledValue`] (one reusable cell per
//! scan instead of one allocation per document), and textual range
//! predicates through [`RangeScorer`].

use std::sync::Arc;

use crate::core::{format_double, DocId, Error, Result, ScalarValue};
use crate::index::SegmentReader;

use super::{BoolOp, NumericOp};

/// Typed per-document accessors for one segment
pub trait FuncValues {
    /// Natural double value for the document
    fn double_val(&self, doc: DocId) -> f64;

    /// Single-precision value, truncated from the double
    fn float_val(&self, doc: DocId) -> f32 {
        self.double_val(doc) as f32
    }

    /// 32-bit integer value, truncated from the double
    fn int_val(&self, doc: DocId) -> i32 {
        self.double_val(doc) as i32
    }

    /// 64-bit integer value, truncated from the double
    fn long_val(&self, doc: DocId) -> i64 {
        self.double_val(doc) as i64
    }

    /// Boolean value: nonzero
    fn bool_val(&self, doc: DocId) -> bool {
        self.double_val(doc) != 0.0
    }

    /// String value: canonical numeric formatting
    fn str_val(&self, doc: DocId) -> Option<String> {
        Some(format_double(self.double_val(doc)))
    }

    /// Raw bytes value
    fn bytes_val(&self, doc: DocId) -> Option<Vec<u8>> {
        self.str_val(doc).map(String::into_bytes)
    }

    /// Whether the document has a value. Defaults to true; the missing
    /// signal for consumers that care.
    fn exists(&self, _doc: DocId) -> bool {
        true
    }

    /// Generic tagged value; `Absent` when the document has none
    fn object_val(&self, doc: DocId) -> ScalarValue {
        if self.exists(doc) {
            ScalarValue::Float(self.double_val(doc))
        } else {
            ScalarValue::Absent
        }
    }

    /// Update the reusable cell in place for the document
    fn fill_value(&self, doc: DocId, cell: &mut FilledValue) {
        cell.value = self.object_val(doc);
        cell.exists = self.exists(doc);
    }
}

/// Reusable mutable value cell for bulk extraction
#[derive(Debug, Clone, Default)]
pub struct FilledValue {
    pub value: ScalarValue,
    pub exists: bool,
}

/// Per-document range-membership predicate over textual bounds
///
/// Bounds are parsed once at construction; `None` means unbounded on
/// that side. Documents without a value match iff `match_missing`.
#[derive(Debug, Clone)]
pub struct RangeScorer {
    lower: f64,
    upper: f64,
    include_lower: bool,
    include_upper: bool,
    match_missing: bool,
}

impl RangeScorer {
    pub fn new(
        lower: Option<&str>,
        upper: Option<&str>,
        include_lower: bool,
        include_upper: bool,
        match_missing: bool,
    ) -> Result<Self> {
        let parse = |bound: &str| {
            bound
                .parse::<f64>()
                .map_err(|_| Error::parse(format!("bad range bound '{bound}'")))
        };
        Ok(RangeScorer {
            lower: lower.map(parse).transpose()?.unwrap_or(f64::NEG_INFINITY),
            upper: upper.map(parse).transpose()?.unwrap_or(f64::INFINITY),
            include_lower,
            include_upper,
            match_missing,
        })
    }

    /// Whether the document's value falls inside the range
    pub fn matches(&self, vals: &dyn FuncValues, doc: DocId) -> bool {
        if !vals.exists(doc) {
            return self.match_missing;
        }
        let v = vals.double_val(doc);
        let above = if self.include_lower {
            v >= self.lower
        } else {
            v > self.lower
        };
        let below = if self.include_upper {
            v <= self.upper
        } else {
            v < self.upper
        };
        above && below
    }
}

// =============================================================================
// Concrete evaluators
// =============================================================================

/// Constant double
pub(crate) struct ConstValues(pub f64);

impl FuncValues for ConstValues {
    fn double_val(&self, _doc: DocId) -> f64 {
        self.0
    }
}

/// Constant string
pub(crate) struct ConstStrValues(pub Arc<str>);

impl FuncValues for ConstStrValues {
    fn double_val(&self, _doc: DocId) -> f64 {
        self.0.parse::<f64>().unwrap_or(0.0)
    }

    fn bool_val(&self, _doc: DocId) -> bool {
        true
    }

    fn str_val(&self, _doc: DocId) -> Option<String> {
        Some(self.0.to_string())
    }

    fn object_val(&self, _doc: DocId) -> ScalarValue {
        ScalarValue::Str(self.0.clone())
    }
}

/// Numeric field leaf: reads double doc values, falling back to the
/// integer doc values of the same field
pub(crate) struct DoubleFieldValues<'a> {
    pub seg: &'a dyn SegmentReader,
    pub field: String,
}

impl DoubleFieldValues<'_> {
    fn get(&self, doc: DocId) -> Option<f64> {
        self.seg
            .double(&self.field, doc)
            .or_else(|| self.seg.numeric(&self.field, doc).map(|v| v as f64))
    }
}

impl FuncValues for DoubleFieldValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        self.get(doc).unwrap_or(0.0)
    }

    fn exists(&self, doc: DocId) -> bool {
        self.get(doc).is_some()
    }
}

/// String field leaf: reads the document's term via the dictionary
pub(crate) struct StrFieldValues<'a> {
    pub seg: &'a dyn SegmentReader,
    pub field: String,
}

impl FuncValues for StrFieldValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        self.seg
            .str_value(&self.field, doc)
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    fn bool_val(&self, doc: DocId) -> bool {
        self.exists(doc)
    }

    fn str_val(&self, doc: DocId) -> Option<String> {
        self.seg.str_value(&self.field, doc).map(str::to_string)
    }

    fn exists(&self, doc: DocId) -> bool {
        self.seg.str_value(&self.field, doc).is_some()
    }

    fn object_val(&self, doc: DocId) -> ScalarValue {
        match self.seg.str_value(&self.field, doc) {
            Some(s) => ScalarValue::str(s),
            None => ScalarValue::Absent,
        }
    }
}

/// Ordinal leaf: dense rank of the document's term, -1 when missing
pub(crate) struct OrdValues<'a> {
    pub seg: &'a dyn SegmentReader,
    pub field: String,
}

impl FuncValues for OrdValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        self.long_val(doc) as f64
    }

    fn long_val(&self, doc: DocId) -> i64 {
        match self.seg.term_ord(&self.field, doc) {
            Some(ord) => ord as i64,
            None => -1,
        }
    }

    fn int_val(&self, doc: DocId) -> i32 {
        self.long_val(doc) as i32
    }

    fn exists(&self, doc: DocId) -> bool {
        self.seg.term_ord(&self.field, doc).is_some()
    }
}

/// Decoded index-time norm leaf. Fields without norms evaluate as a
/// constant 0.0 with `exists` remaining true.
pub(crate) struct NormValues<'a> {
    pub seg: &'a dyn SegmentReader,
    pub field: String,
}

impl FuncValues for NormValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        match self.seg.norm(&self.field, doc) {
            Some(b) => byte315_to_float(b) as f64,
            None => 0.0,
        }
    }
}

/// Index-wide statistic materialized by `create_weight`, constant for
/// every document of the query
pub(crate) struct WeightedValues(pub f64);

impl FuncValues for WeightedValues {
    fn double_val(&self, _doc: DocId) -> f64 {
        self.0
    }
}

/// Conditional: forwards every accessor to the branch the guard selects
/// per document. `exists` is unconditionally true regardless of the
/// selected branch's own existence - a preserved gap of the original
/// behavior, kept so cached results stay comparable.
pub(crate) struct IfValues<'a> {
    pub guard: Box<dyn FuncValues + 'a>,
    pub then: Box<dyn FuncValues + 'a>,
    pub orelse: Box<dyn FuncValues + 'a>,
}

impl<'a> IfValues<'a> {
    fn pick(&self, doc: DocId) -> &(dyn FuncValues + 'a) {
        if self.guard.bool_val(doc) {
            self.then.as_ref()
        } else {
            self.orelse.as_ref()
        }
    }
}

impl FuncValues for IfValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        self.pick(doc).double_val(doc)
    }

    fn float_val(&self, doc: DocId) -> f32 {
        self.pick(doc).float_val(doc)
    }

    fn int_val(&self, doc: DocId) -> i32 {
        self.pick(doc).int_val(doc)
    }

    fn long_val(&self, doc: DocId) -> i64 {
        self.pick(doc).long_val(doc)
    }

    fn bool_val(&self, doc: DocId) -> bool {
        self.pick(doc).bool_val(doc)
    }

    fn str_val(&self, doc: DocId) -> Option<String> {
        self.pick(doc).str_val(doc)
    }

    fn bytes_val(&self, doc: DocId) -> Option<Vec<u8>> {
        self.pick(doc).bytes_val(doc)
    }

    fn object_val(&self, doc: DocId) -> ScalarValue {
        self.pick(doc).object_val(doc)
    }

    fn exists(&self, _doc: DocId) -> bool {
        true
    }
}

/// Unary numeric negation
pub(crate) struct NegValues<'a> {
    pub child: Box<dyn FuncValues + 'a>,
}

impl FuncValues for NegValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        -self.child.double_val(doc)
    }

    fn exists(&self, doc: DocId) -> bool {
        self.child.exists(doc)
    }
}

/// Binary power wrapper
pub(crate) struct PowValues<'a> {
    pub base: Box<dyn FuncValues + 'a>,
    pub exponent: Box<dyn FuncValues + 'a>,
}

impl FuncValues for PowValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        self.base.double_val(doc).powf(self.exponent.double_val(doc))
    }

    fn exists(&self, doc: DocId) -> bool {
        self.base.exists(doc) && self.exponent.exists(doc)
    }
}

/// N-ary numeric wrapper: evaluates every child then folds
pub(crate) struct MultiNumericValues<'a> {
    pub op: NumericOp,
    pub children: Vec<Box<dyn FuncValues + 'a>>,
}

impl FuncValues for MultiNumericValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        let mut iter = self.children.iter().map(|c| c.double_val(doc));
        let first = iter.next().unwrap_or(0.0);
        match self.op {
            NumericOp::Add => iter.fold(first, |a, v| a + v),
            NumericOp::Mul => iter.fold(first, |a, v| a * v),
            NumericOp::Min => iter.fold(first, f64::min),
            NumericOp::Max => iter.fold(first, f64::max),
        }
    }

    fn exists(&self, doc: DocId) -> bool {
        self.children.iter().all(|c| c.exists(doc))
    }
}

/// N-ary string concatenation; composite `exists` is the logical AND of
/// all children's `exists`
pub(crate) struct ConcatValues<'a> {
    pub children: Vec<Box<dyn FuncValues + 'a>>,
}

impl FuncValues for ConcatValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        self.str_val(doc)
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    fn bool_val(&self, doc: DocId) -> bool {
        self.exists(doc)
    }

    fn str_val(&self, doc: DocId) -> Option<String> {
        if !self.exists(doc) {
            return None;
        }
        let mut out = String::new();
        for child in &self.children {
            out.push_str(&child.str_val(doc).unwrap_or_default());
        }
        Some(out)
    }

    fn exists(&self, doc: DocId) -> bool {
        self.children.iter().all(|c| c.exists(doc))
    }

    fn object_val(&self, doc: DocId) -> ScalarValue {
        match self.str_val(doc) {
            Some(s) => ScalarValue::str(s),
            None => ScalarValue::Absent,
        }
    }
}

/// Unary boolean negation
pub(crate) struct NotValues<'a> {
    pub child: Box<dyn FuncValues + 'a>,
}

impl FuncValues for NotValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        if self.bool_val(doc) {
            1.0
        } else {
            0.0
        }
    }

    fn bool_val(&self, doc: DocId) -> bool {
        !self.child.bool_val(doc)
    }

    fn str_val(&self, doc: DocId) -> Option<String> {
        Some(self.bool_val(doc).to_string())
    }

    fn object_val(&self, doc: DocId) -> ScalarValue {
        ScalarValue::Bool(self.bool_val(doc))
    }
}

/// N-ary boolean wrapper
pub(crate) struct MultiBoolValues<'a> {
    pub op: BoolOp,
    pub children: Vec<Box<dyn FuncValues + 'a>>,
}

impl FuncValues for MultiBoolValues<'_> {
    fn double_val(&self, doc: DocId) -> f64 {
        if self.bool_val(doc) {
            1.0
        } else {
            0.0
        }
    }

    fn bool_val(&self, doc: DocId) -> bool {
        match self.op {
            BoolOp::And => self.children.iter().all(|c| c.bool_val(doc)),
            BoolOp::Or => self.children.iter().any(|c| c.bool_val(doc)),
        }
    }

    fn str_val(&self, doc: DocId) -> Option<String> {
        Some(self.bool_val(doc).to_string())
    }

    fn object_val(&self, doc: DocId) -> ScalarValue {
        ScalarValue::Bool(self.bool_val(doc))
    }
}

/// byte315 small-float decoding for index-time norms: 3-bit mantissa,
/// 5-bit exponent, zero point 15
pub(crate) fn byte315_to_float(b: u8) -> f32 {
    if b == 0 {
        return 0.0;
    }
    let mut bits = (b as u32) << 21;
    bits += 48 << 24;
    f32::from_bits(bits)
}
