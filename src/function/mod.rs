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

//! Expression nodes
//!
//! A [`FuncSource`] is an immutable, composable description of a scalar,
//! boolean or string function over zero or more child nodes. Identity is
//! structural: two nodes are equal iff they have the same variant and
//! equal children, and the hash is a deterministic combinator over the
//! variant discriminant, the payload and the ordered child hashes. That
//! identity keys the per-query weight cache in [`context::QueryContext`].
//!
//! Nodes are bound to a segment through [`FuncSource::get_values`], which
//! produces the ephemeral per-segment evaluator; index-wide statistics
//! (document frequency and friends) are computed once per query in
//! [`FuncSource::create_weight`] before any per-segment work starts.

pub mod context;
pub mod parser;
pub mod values;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::core::{format_double, Error, Result};
use crate::index::{IndexReader, SegmentReader, Similarity};

use context::QueryContext;
use values::{
    ConcatValues, ConstStrValues, ConstValues, DoubleFieldValues, FuncValues, IfValues,
    MultiBoolValues, MultiNumericValues, NegValues, NormValues, NotValues, OrdValues,
    PowValues, StrFieldValues, WeightedValues,
};

/// Fold operation of an n-ary numeric wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericOp {
    Add,
    Mul,
    Min,
    Max,
}

impl NumericOp {
    pub fn name(&self) -> &'static str {
        match self {
            NumericOp::Add => "add",
            NumericOp::Mul => "mul",
            NumericOp::Min => "min",
            NumericOp::Max => "max",
        }
    }
}

/// Fold operation of an n-ary boolean wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn name(&self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }
}

/// An immutable expression node
#[derive(Debug, Clone)]
pub enum FuncSource {
    /// Constant double
    Const(f64),

    /// Constant string
    ConstStr(Arc<str>),

    /// Numeric field leaf
    DoubleField(String),

    /// String field leaf (term via the segment dictionary)
    StrField(String),

    /// Dense term ordinal leaf
    Ord(String),

    /// Decoded index-time norm leaf; needs a tf/idf similarity
    Norm(String),

    /// Number of documents containing the term (index-wide weight)
    DocFreq { field: String, term: String },

    /// Classic inverse document frequency (index-wide weight)
    Idf { field: String, term: String },

    /// Total occurrences of the term across the index (index-wide weight)
    TotalTermFreq { field: String, term: String },

    /// Unary numeric negation
    Neg(Arc<FuncSource>),

    /// Binary power wrapper
    Pow(Arc<FuncSource>, Arc<FuncSource>),

    /// N-ary numeric wrapper
    MultiNumeric {
        op: NumericOp,
        sources: Vec<Arc<FuncSource>>,
    },

    /// N-ary string concatenation
    Concat(Vec<Arc<FuncSource>>),

    /// Unary boolean negation
    Not(Arc<FuncSource>),

    /// N-ary boolean wrapper
    MultiBool {
        op: BoolOp,
        sources: Vec<Arc<FuncSource>>,
    },

    /// Ternary conditional: predicate plus two branches
    If {
        guard: Arc<FuncSource>,
        then: Arc<FuncSource>,
        orelse: Arc<FuncSource>,
    },
}

const HASH_SEED: u64 = 0xcbf2_9ce4_8422_2325;

fn mix(h: u64, v: u64) -> u64 {
    (h ^ v).wrapping_mul(0x0000_0100_0000_01b3)
}

fn mix_str(h: u64, s: &str) -> u64 {
    s.bytes().fold(mix(h, s.len() as u64), |h, b| mix(h, b as u64))
}

impl FuncSource {
    /// Stable variant discriminant for the structural hash
    fn tag(&self) -> u64 {
        match self {
            FuncSource::Const(_) => 1,
            FuncSource::ConstStr(_) => 2,
            FuncSource::DoubleField(_) => 3,
            FuncSource::StrField(_) => 4,
            FuncSource::Ord(_) => 5,
            FuncSource::Norm(_) => 6,
            FuncSource::DocFreq { .. } => 7,
            FuncSource::Idf { .. } => 8,
            FuncSource::TotalTermFreq { .. } => 9,
            FuncSource::Neg(_) => 10,
            FuncSource::Pow(_, _) => 11,
            FuncSource::MultiNumeric { .. } => 12,
            FuncSource::Concat(_) => 13,
            FuncSource::Not(_) => 14,
            FuncSource::MultiBool { .. } => 15,
            FuncSource::If { .. } => 16,
        }
    }

    /// Deterministic structural hash: variant discriminant, payload, then
    /// the ordered child hashes
    pub fn structural_hash(&self) -> u64 {
        let mut h = mix(HASH_SEED, self.tag());
        match self {
            FuncSource::Const(v) => h = mix(h, v.to_bits()),
            FuncSource::ConstStr(s) => h = mix_str(h, s),
            FuncSource::DoubleField(f)
            | FuncSource::StrField(f)
            | FuncSource::Ord(f)
            | FuncSource::Norm(f) => h = mix_str(h, f),
            FuncSource::DocFreq { field, term }
            | FuncSource::Idf { field, term }
            | FuncSource::TotalTermFreq { field, term } => {
                h = mix_str(mix_str(h, field), term);
            }
            FuncSource::MultiNumeric { op, sources } => {
                h = mix(h, *op as u64);
                for s in sources {
                    h = mix(h, s.structural_hash());
                }
            }
            FuncSource::MultiBool { op, sources } => {
                h = mix(h, *op as u64);
                for s in sources {
                    h = mix(h, s.structural_hash());
                }
            }
            _ => {
                for child in self.children() {
                    h = mix(h, child.structural_hash());
                }
            }
        }
        h
    }

    /// Ordered child nodes; empty for leaves
    pub fn children(&self) -> Vec<&Arc<FuncSource>> {
        match self {
            FuncSource::Neg(c) | FuncSource::Not(c) => vec![c],
            FuncSource::Pow(a, b) => vec![a, b],
            FuncSource::MultiNumeric { sources, .. }
            | FuncSource::MultiBool { sources, .. }
            | FuncSource::Concat(sources) => sources.iter().collect(),
            FuncSource::If {
                guard,
                then,
                orelse,
            } => vec![guard, then, orelse],
            _ => Vec::new(),
        }
    }

    /// Self-describing canonical text, matching the stat-expression syntax
    pub fn description(&self) -> String {
        let join = |sources: &[Arc<FuncSource>]| {
            sources
                .iter()
                .map(|s| s.description())
                .collect::<Vec<_>>()
                .join(",")
        };
        match self {
            FuncSource::Const(v) => format!("const({})", format_double(*v)),
            FuncSource::ConstStr(s) => format!("'{s}'"),
            FuncSource::DoubleField(f) => f.clone(),
            FuncSource::StrField(f) => format!("str({f})"),
            FuncSource::Ord(f) => format!("ord({f})"),
            FuncSource::Norm(f) => format!("norm({f})"),
            FuncSource::DocFreq { field, term } => format!("docfreq({field},{term})"),
            FuncSource::Idf { field, term } => format!("idf({field},{term})"),
            FuncSource::TotalTermFreq { field, term } => format!("ttf({field},{term})"),
            FuncSource::Neg(c) => format!("neg({})", c.description()),
            FuncSource::Pow(a, b) => format!("pow({},{})", a.description(), b.description()),
            FuncSource::MultiNumeric { op, sources } => {
                format!("{}({})", op.name(), join(sources))
            }
            FuncSource::Concat(sources) => format!("concat({})", join(sources)),
            FuncSource::Not(c) => format!("not({})", c.description()),
            FuncSource::MultiBool { op, sources } => format!("{}({})", op.name(), join(sources)),
            FuncSource::If {
                guard,
                then,
                orelse,
            } => format!(
                "if({},{},{})",
                guard.description(),
                then.description(),
                orelse.description()
            ),
        }
    }

    /// One-time, index-wide precomputation for statistics too expensive to
    /// compute per-segment. Runs sequentially before any per-segment work;
    /// results land in the query context keyed by node identity, at most
    /// once per node per query.
    pub fn create_weight(&self, ctx: &mut QueryContext, reader: &dyn IndexReader) -> Result<()> {
        match self {
            FuncSource::DocFreq { field, term } => {
                if ctx.get(self).is_none() {
                    let df = reader.doc_freq(field, term) as f64;
                    ctx.put(self, df);
                }
                Ok(())
            }
            FuncSource::Idf { field, term } => {
                if reader.similarity() != Similarity::Tfidf {
                    return Err(Error::similarity_unsupported("idf", field));
                }
                if ctx.get(self).is_none() {
                    let df = reader.doc_freq(field, term) as f64;
                    let idf = 1.0 + (reader.num_docs() as f64 / (df + 1.0)).ln();
                    ctx.put(self, idf);
                }
                Ok(())
            }
            FuncSource::TotalTermFreq { field, term } => {
                if ctx.get(self).is_none() {
                    let ttf = reader.total_term_freq(field, term) as f64;
                    ctx.put(self, ttf);
                }
                Ok(())
            }
            FuncSource::Norm(field) => {
                if reader.similarity() != Similarity::Tfidf {
                    return Err(Error::similarity_unsupported("norm", field));
                }
                Ok(())
            }
            _ => {
                for child in self.children() {
                    child.create_weight(ctx, reader)?;
                }
                Ok(())
            }
        }
    }

    /// Bind this node to one segment, producing its per-segment evaluator
    pub fn get_values<'a>(
        &self,
        ctx: &QueryContext,
        seg: &'a dyn SegmentReader,
    ) -> Result<Box<dyn FuncValues + 'a>> {
        let bind_all = |sources: &[Arc<FuncSource>]| -> Result<Vec<Box<dyn FuncValues + 'a>>> {
            sources.iter().map(|s| s.get_values(ctx, seg)).collect()
        };
        Ok(match self {
            FuncSource::Const(v) => Box::new(ConstValues(*v)),
            FuncSource::ConstStr(s) => Box::new(ConstStrValues(s.clone())),
            FuncSource::DoubleField(f) => Box::new(DoubleFieldValues {
                seg,
                field: f.clone(),
            }),
            FuncSource::StrField(f) => Box::new(StrFieldValues {
                seg,
                field: f.clone(),
            }),
            FuncSource::Ord(f) => Box::new(OrdValues {
                seg,
                field: f.clone(),
            }),
            FuncSource::Norm(f) => Box::new(NormValues {
                seg,
                field: f.clone(),
            }),
            FuncSource::DocFreq { .. }
            | FuncSource::Idf { .. }
            | FuncSource::TotalTermFreq { .. } => {
                let weight = ctx
                    .get(self)
                    .ok_or_else(|| Error::WeightMissing(self.description()))?;
                Box::new(WeightedValues(weight))
            }
            FuncSource::Neg(c) => Box::new(NegValues {
                child: c.get_values(ctx, seg)?,
            }),
            FuncSource::Pow(a, b) => Box::new(PowValues {
                base: a.get_values(ctx, seg)?,
                exponent: b.get_values(ctx, seg)?,
            }),
            FuncSource::MultiNumeric { op, sources } => Box::new(MultiNumericValues {
                op: *op,
                children: bind_all(sources)?,
            }),
            FuncSource::Concat(sources) => Box::new(ConcatValues {
                children: bind_all(sources)?,
            }),
            FuncSource::Not(c) => Box::new(NotValues {
                child: c.get_values(ctx, seg)?,
            }),
            FuncSource::MultiBool { op, sources } => Box::new(MultiBoolValues {
                op: *op,
                children: bind_all(sources)?,
            }),
            FuncSource::If {
                guard,
                then,
                orelse,
            } => Box::new(IfValues {
                guard: guard.get_values(ctx, seg)?,
                then: then.get_values(ctx, seg)?,
                orelse: orelse.get_values(ctx, seg)?,
            }),
        })
    }
}

impl PartialEq for FuncSource {
    fn eq(&self, other: &Self) -> bool {
        use FuncSource::*;
        match (self, other) {
            // Constants compare by bit pattern so equality stays
            // consistent with the structural hash.
            (Const(a), Const(b)) => a.to_bits() == b.to_bits(),
            (ConstStr(a), ConstStr(b)) => a == b,
            (DoubleField(a), DoubleField(b))
            | (StrField(a), StrField(b))
            | (Ord(a), Ord(b))
            | (Norm(a), Norm(b)) => a == b,
            (
                DocFreq { field: fa, term: ta },
                DocFreq { field: fb, term: tb },
            )
            | (Idf { field: fa, term: ta }, Idf { field: fb, term: tb })
            | (
                TotalTermFreq { field: fa, term: ta },
                TotalTermFreq { field: fb, term: tb },
            ) => fa == fb && ta == tb,
            (Neg(a), Neg(b)) | (Not(a), Not(b)) => a == b,
            (Pow(a1, b1), Pow(a2, b2)) => a1 == a2 && b1 == b2,
            (
                MultiNumeric { op: o1, sources: s1 },
                MultiNumeric { op: o2, sources: s2 },
            ) => o1 == o2 && s1 == s2,
            (Concat(s1), Concat(s2)) => s1 == s2,
            (
                MultiBool { op: o1, sources: s1 },
                MultiBool { op: o2, sources: s2 },
            ) => o1 == o2 && s1 == s2,
            (
                If { guard: g1, then: t1, orelse: e1 },
                If { guard: g2, then: t2, orelse: e2 },
            ) => g1 == g2 && t1 == t2 && e1 == e2,
            _ => false,
        }
    }
}

impl Eq for FuncSource {}

impl Hash for FuncSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Arc<FuncSource> {
        Arc::new(FuncSource::DoubleField(name.to_string()))
    }

    #[test]
    fn test_structural_equality() {
        let a = FuncSource::Pow(field("x"), field("y"));
        let b = FuncSource::Pow(field("x"), field("y"));
        let c = FuncSource::Pow(field("y"), field("x"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.structural_hash(), b.structural_hash());
        assert_ne!(a.structural_hash(), c.structural_hash());
    }

    #[test]
    fn test_variant_disambiguation() {
        // Same payload, different variant: never equal, different hash.
        let ord = FuncSource::Ord("f".to_string());
        let norm = FuncSource::Norm("f".to_string());
        assert_ne!(ord, norm);
        assert_ne!(ord.structural_hash(), norm.structural_hash());

        let add = FuncSource::MultiNumeric {
            op: NumericOp::Add,
            sources: vec![field("x")],
        };
        let mul = FuncSource::MultiNumeric {
            op: NumericOp::Mul,
            sources: vec![field("x")],
        };
        assert_ne!(add.structural_hash(), mul.structural_hash());
    }

    #[test]
    fn test_const_bit_equality() {
        assert_eq!(FuncSource::Const(1.5), FuncSource::Const(1.5));
        assert_ne!(FuncSource::Const(1.5), FuncSource::Const(2.5));
        // NaN constants are equal to themselves under bit comparison.
        assert_eq!(
            FuncSource::Const(f64::NAN),
            FuncSource::Const(f64::NAN)
        );
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(FuncSource::Const(3.0).description(), "const(3.0)");
        assert_eq!(
            FuncSource::Pow(field("a"), field("b")).description(),
            "pow(a,b)"
        );
        assert_eq!(
            FuncSource::If {
                guard: Arc::new(FuncSource::StrField("c".to_string())),
                then: Arc::new(FuncSource::Const(1.0)),
                orelse: Arc::new(FuncSource::Const(0.0)),
            }
            .description(),
            "if(str(c),const(1.0),const(0.0))"
        );
        assert_eq!(
            FuncSource::Idf {
                field: "body".to_string(),
                term: "rust".to_string()
            }
            .description(),
            "idf(body,rust)"
        );
    }

    #[test]
    fn test_children() {
        let node = FuncSource::If {
            guard: field("a"),
            then: field("b"),
            orelse: field("c"),
        };
        assert_eq!(node.children().len(), 3);
        assert!(FuncSource::Const(1.0).children().is_empty());
    }
}
