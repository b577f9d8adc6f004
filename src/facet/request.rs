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

//! Facet request model
//!
//! A facet request is a JSON object mapping output keys to facet
//! definitions. Each definition is either a stat expression string or an
//! object introducing a bucketing facet (`query`, `terms`, `range`, or
//! the `field` terms shorthand), which may itself carry a nested
//! `facet` object. Parsing is strict:
//! unknown keys, wrong value types and malformed expressions are
//! rejected with the offending facet path in the error.

use serde_json::Value;

use super::slots::AggSpec;
use crate::core::{Error, Result};
use crate::index::Query;

/// Ordered set of facets keyed by output name
#[derive(Debug, Clone, Default)]
pub struct FacetSet {
    pub facets: Vec<(String, Facet)>,
}

/// One facet definition
#[derive(Debug, Clone)]
pub enum Facet {
    /// A single aggregation over the whole domain
    Stat(AggSpec),

    /// Counts and sub-facets over the domain restricted by a query
    Query(QueryFacet),

    /// One bucket per distinct value of a string field
    Terms(TermsFacet),

    /// Fixed-width numeric buckets
    Range(RangeFacet),
}

#[derive(Debug, Clone)]
pub struct QueryFacet {
    pub query: Query,
    pub sub: FacetSet,
}

/// What a terms facet sorts its buckets by; ties always break by bucket
/// value ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacetSort {
    CountDesc,
    CountAsc,
    StatDesc(String),
    StatAsc(String),
}

#[derive(Debug, Clone)]
pub struct TermsFacet {
    pub field: String,
    pub mincount: u64,
    /// Maximum buckets returned; negative means no limit
    pub limit: i64,
    pub sort: FacetSort,
    pub all_buckets: bool,
    pub sub: FacetSet,
}

#[derive(Debug, Clone)]
pub struct RangeFacet {
    pub field: String,
    pub start: f64,
    pub end: f64,
    pub gap: f64,
    pub sub: FacetSet,
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}

fn as_str<'a>(v: &'a Value, path: &str, key: &str) -> Result<&'a str> {
    v.as_str()
        .ok_or_else(|| Error::facet_request(path, format!("'{key}' must be a string")))
}

fn as_f64(v: &Value, path: &str, key: &str) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| Error::facet_request(path, format!("'{key}' must be a number")))
}

impl FacetSet {
    /// Parse a top-level facet request object
    pub fn parse(request: &Value) -> Result<FacetSet> {
        FacetSet::parse_at(request, "")
    }

    fn parse_at(request: &Value, path: &str) -> Result<FacetSet> {
        let map = request
            .as_object()
            .ok_or_else(|| Error::facet_request(path, "facet request must be an object"))?;
        let mut facets = Vec::with_capacity(map.len());
        for (key, def) in map {
            let path = child_path(path, key);
            facets.push((key.clone(), Facet::parse_at(def, &path)?));
        }
        Ok(FacetSet { facets })
    }
}

impl Facet {
    fn parse_at(def: &Value, path: &str) -> Result<Facet> {
        match def {
            // A bare string is a stat expression.
            Value::String(expr) => {
                let spec = AggSpec::parse(expr)
                    .map_err(|e| Error::facet_request(path, e.to_string()))?;
                Ok(Facet::Stat(spec))
            }
            Value::Object(map) => {
                if let Some(inner) = map.get("query") {
                    if map.len() > 1 {
                        return Err(Error::facet_request(
                            path,
                            "'query' does not take sibling keys",
                        ));
                    }
                    return Ok(Facet::Query(QueryFacet::parse_at(inner, path)?));
                }
                if let Some(inner) = map.get("terms") {
                    if map.len() > 1 {
                        return Err(Error::facet_request(
                            path,
                            "'terms' does not take sibling keys",
                        ));
                    }
                    return Ok(Facet::Terms(TermsFacet::parse_at(inner, path)?));
                }
                if let Some(inner) = map.get("range") {
                    if map.len() > 1 {
                        return Err(Error::facet_request(
                            path,
                            "'range' does not take sibling keys",
                        ));
                    }
                    return Ok(Facet::Range(RangeFacet::parse_at(inner, path)?));
                }
                // Shorthand: {"field": name, ...} is a terms facet.
                if map.contains_key("field") {
                    return Ok(Facet::Terms(TermsFacet::parse_at(def, path)?));
                }
                Err(Error::facet_request(
                    path,
                    "expected one of 'query', 'terms', 'range', 'field'",
                ))
            }
            _ => Err(Error::facet_request(
                path,
                "facet definition must be a string or an object",
            )),
        }
    }
}

fn parse_subfacets(map: &serde_json::Map<String, Value>, path: &str) -> Result<FacetSet> {
    match map.get("facet") {
        Some(sub) => FacetSet::parse_at(sub, path),
        None => Ok(FacetSet::default()),
    }
}

/// Parse the minimal textual query forms: `*:*` or `field:value`
fn parse_query_string(q: &str, path: &str) -> Result<Query> {
    if q == "*:*" {
        return Ok(Query::MatchAll);
    }
    match q.split_once(':') {
        Some((field, value)) if !field.is_empty() && !value.is_empty() => Ok(Query::Term {
            field: field.to_string(),
            value: value.to_string(),
        }),
        _ => Err(Error::facet_request(
            path,
            format!("cannot parse query '{q}'"),
        )),
    }
}

impl QueryFacet {
    fn parse_at(inner: &Value, path: &str) -> Result<QueryFacet> {
        match inner {
            // Shorthand: {"query": "field:value"}
            Value::String(q) => Ok(QueryFacet {
                query: parse_query_string(q, path)?,
                sub: FacetSet::default(),
            }),
            Value::Object(map) => {
                let q = map
                    .get("q")
                    .ok_or_else(|| Error::facet_request(path, "query facet needs 'q'"))?;
                let query = parse_query_string(as_str(q, path, "q")?, path)?;
                for key in map.keys() {
                    if key != "q" && key != "facet" {
                        return Err(Error::facet_request(
                            path,
                            format!("unknown query facet key '{key}'"),
                        ));
                    }
                }
                Ok(QueryFacet {
                    query,
                    sub: parse_subfacets(map, path)?,
                })
            }
            _ => Err(Error::facet_request(
                path,
                "query facet must be a string or an object",
            )),
        }
    }
}

impl FacetSort {
    fn parse(text: &str, path: &str) -> Result<FacetSort> {
        let mut parts = text.split_whitespace();
        let by = parts
            .next()
            .ok_or_else(|| Error::facet_request(path, "empty 'sort'"))?;
        let desc = match parts.next() {
            None | Some("desc") => true,
            Some("asc") => false,
            Some(other) => {
                return Err(Error::facet_request(
                    path,
                    format!("bad sort direction '{other}'"),
                ))
            }
        };
        if parts.next().is_some() {
            return Err(Error::facet_request(path, format!("bad sort '{text}'")));
        }
        Ok(match (by, desc) {
            ("count", true) => FacetSort::CountDesc,
            ("count", false) => FacetSort::CountAsc,
            (stat, true) => FacetSort::StatDesc(stat.to_string()),
            (stat, false) => FacetSort::StatAsc(stat.to_string()),
        })
    }
}

impl TermsFacet {
    fn parse_at(inner: &Value, path: &str) -> Result<TermsFacet> {
        let map = inner
            .as_object()
            .ok_or_else(|| Error::facet_request(path, "terms facet must be an object"))?;
        let field = map
            .get("field")
            .ok_or_else(|| Error::facet_request(path, "terms facet needs 'field'"))?;
        let field = as_str(field, path, "field")?.to_string();

        let mut facet = TermsFacet {
            field,
            mincount: 1,
            limit: 10,
            sort: FacetSort::CountDesc,
            all_buckets: false,
            sub: parse_subfacets(map, path)?,
        };
        for (key, value) in map {
            match key.as_str() {
                "field" | "facet" => {}
                "mincount" => {
                    facet.mincount = value.as_u64().ok_or_else(|| {
                        Error::facet_request(path, "'mincount' must be a non-negative integer")
                    })?;
                }
                "limit" => {
                    facet.limit = value.as_i64().ok_or_else(|| {
                        Error::facet_request(path, "'limit' must be an integer")
                    })?;
                }
                "sort" => {
                    facet.sort = FacetSort::parse(as_str(value, path, "sort")?, path)?;
                }
                "allBuckets" => {
                    facet.all_buckets = value.as_bool().ok_or_else(|| {
                        Error::facet_request(path, "'allBuckets' must be a boolean")
                    })?;
                }
                other => {
                    return Err(Error::facet_request(
                        path,
                        format!("unknown terms facet key '{other}'"),
                    ))
                }
            }
        }
        Ok(facet)
    }

    /// Stat expressions this facet's buckets compute, in request order
    pub fn stats(&self) -> Vec<(&str, &AggSpec)> {
        stat_entries(&self.sub)
    }
}

impl RangeFacet {
    fn parse_at(inner: &Value, path: &str) -> Result<RangeFacet> {
        let map = inner
            .as_object()
            .ok_or_else(|| Error::facet_request(path, "range facet must be an object"))?;
        let get = |key: &str| {
            map.get(key)
                .ok_or_else(|| Error::facet_request(path, format!("range facet needs '{key}'")))
        };
        let facet = RangeFacet {
            field: as_str(get("field")?, path, "field")?.to_string(),
            start: as_f64(get("start")?, path, "start")?,
            end: as_f64(get("end")?, path, "end")?,
            gap: as_f64(get("gap")?, path, "gap")?,
            sub: parse_subfacets(map, path)?,
        };
        for key in map.keys() {
            if !matches!(key.as_str(), "field" | "start" | "end" | "gap" | "facet") {
                return Err(Error::facet_request(
                    path,
                    format!("unknown range facet key '{key}'"),
                ));
            }
        }
        if facet.gap <= 0.0 {
            return Err(Error::facet_request(path, "'gap' must be positive"));
        }
        Ok(facet)
    }
}

/// The stat-expression entries of a facet set, in request order
pub(crate) fn stat_entries(set: &FacetSet) -> Vec<(&str, &AggSpec)> {
    set.facets
        .iter()
        .filter_map(|(key, facet)| match facet {
            Facet::Stat(spec) => Some((key.as_str(), spec)),
            _ => None,
        })
        .collect()
}
