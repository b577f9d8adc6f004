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

//! Bucket-tree tests: terms and range faceting, sorting, mincount,
//! limits, allBuckets and nested facets.

use lodestone::{DocSet, FacetEngine, MemoryIndex, ScalarValue, Similarity};
use serde_json::{json, Value};

/// Nine documents over two segments:
///   cat A: prices 10, 20, 30     (3 docs)
///   cat B: prices 5, 5           (2 docs)
///   cat C: prices 100, 1         (2 docs)
///   cat D: price 50              (1 doc)
///   no cat: price 7              (1 doc)
fn store() -> MemoryIndex {
    let mut index = MemoryIndex::new(Similarity::Tfidf);
    index.add_segment(&[
        vec![("cat", ScalarValue::str("A")), ("price", ScalarValue::Float(10.0))],
        vec![("cat", ScalarValue::str("B")), ("price", ScalarValue::Float(5.0))],
        vec![("cat", ScalarValue::str("C")), ("price", ScalarValue::Float(100.0))],
        vec![("cat", ScalarValue::str("A")), ("price", ScalarValue::Float(20.0))],
    ]);
    index.add_segment(&[
        vec![("cat", ScalarValue::str("A")), ("price", ScalarValue::Float(30.0))],
        vec![("cat", ScalarValue::str("B")), ("price", ScalarValue::Float(5.0))],
        vec![("cat", ScalarValue::str("C")), ("price", ScalarValue::Float(1.0))],
        vec![("cat", ScalarValue::str("D")), ("price", ScalarValue::Float(50.0))],
        vec![("price", ScalarValue::Float(7.0))],
    ]);
    index
}

fn run(request: Value) -> Value {
    let index = store();
    let engine = FacetEngine::new(&index);
    engine.execute(&DocSet::match_all(&index), &request).unwrap()
}

fn bucket_vals(out: &Value, key: &str) -> Vec<String> {
    out[key]["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["val"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn terms_sorted_by_count_with_value_tiebreak() {
    let out = run(json!({"cats": {"terms": {"field": "cat"}}}));
    // A has 3 docs; B and C tie at 2 and order by value; D has 1.
    assert_eq!(bucket_vals(&out, "cats"), ["A", "B", "C", "D"]);
    let buckets = out["cats"]["buckets"].as_array().unwrap();
    assert_eq!(buckets[0]["count"], json!(3));
    assert_eq!(buckets[1]["count"], json!(2));
    assert_eq!(buckets[2]["count"], json!(2));
    assert_eq!(buckets[3]["count"], json!(1));
}

#[test]
fn terms_bucket_stats() {
    let out = run(json!({
        "cats": {"terms": {"field": "cat", "facet": {"total": "sum(price)", "top": "max(price)"}}}
    }));
    let buckets = out["cats"]["buckets"].as_array().unwrap();
    assert_eq!(buckets[0]["val"], json!("A"));
    assert_eq!(buckets[0]["total"], json!(60.0));
    assert_eq!(buckets[0]["top"], json!(30.0));
    assert_eq!(buckets[1]["val"], json!("B"));
    assert_eq!(buckets[1]["total"], json!(10.0));
}

#[test]
fn terms_sorted_by_stat() {
    let out = run(json!({
        "cats": {"terms": {"field": "cat", "sort": "total desc", "facet": {"total": "sum(price)"}}}
    }));
    // Sums: C=101, A=60, D=50, B=10.
    assert_eq!(bucket_vals(&out, "cats"), ["C", "A", "D", "B"]);

    let out = run(json!({
        "cats": {"terms": {"field": "cat", "sort": "total asc", "facet": {"total": "sum(price)"}}}
    }));
    assert_eq!(bucket_vals(&out, "cats"), ["B", "D", "A", "C"]);
}

#[test]
fn mincount_only_removes_buckets() {
    let base = run(json!({
        "cats": {"terms": {"field": "cat", "facet": {"total": "sum(price)"}}}
    }));
    let filtered = run(json!({
        "cats": {"terms": {"field": "cat", "mincount": 2, "facet": {"total": "sum(price)"}}}
    }));
    let base_buckets = base["cats"]["buckets"].as_array().unwrap();
    let kept = filtered["cats"]["buckets"].as_array().unwrap();
    assert_eq!(kept.len(), 3);
    // Every surviving bucket is byte-identical to its unfiltered twin.
    for bucket in kept {
        assert!(base_buckets.contains(bucket));
    }
}

#[test]
fn limit_truncates_after_sorting() {
    let out = run(json!({"cats": {"terms": {"field": "cat", "limit": 2}}}));
    assert_eq!(bucket_vals(&out, "cats"), ["A", "B"]);

    let unlimited = run(json!({"cats": {"terms": {"field": "cat", "limit": -1}}}));
    assert_eq!(unlimited["cats"]["buckets"].as_array().unwrap().len(), 4);
}

#[test]
fn all_buckets_aggregates_every_valued_doc() {
    let out = run(json!({
        "cats": {"terms": {
            "field": "cat",
            "limit": 1,
            "allBuckets": true,
            "facet": {"total": "sum(price)"}
        }}
    }));
    let all = &out["cats"]["allBuckets"];
    // 8 documents carry a cat value; the uncategorized doc is excluded.
    assert_eq!(all["count"], json!(8));
    assert_eq!(all["total"], json!(221.0));
    // The limit does not shrink allBuckets.
    assert_eq!(out["cats"]["buckets"].as_array().unwrap().len(), 1);
}

#[test]
fn all_buckets_count_equals_sum_of_bucket_counts() {
    let out = run(json!({
        "cats": {"terms": {"field": "cat", "mincount": 0, "limit": -1, "allBuckets": true}}
    }));
    let total: u64 = out["cats"]["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["count"].as_u64().unwrap())
        .sum();
    assert_eq!(out["cats"]["allBuckets"]["count"].as_u64().unwrap(), total);
}

#[test]
fn range_buckets_cover_exactly_the_gap_grid() {
    let out = run(json!({
        "prices": {"range": {"field": "price", "start": 0.0, "end": 110.0, "gap": 25.0}}
    }));
    let buckets = out["prices"]["buckets"].as_array().unwrap();
    // Starts: 0, 25, 50, 75, 100 - every k with start + k*gap < end.
    let starts: Vec<f64> = buckets.iter().map(|b| b["val"].as_f64().unwrap()).collect();
    assert_eq!(starts, [0.0, 25.0, 50.0, 75.0, 100.0]);
    let counts: Vec<u64> = buckets.iter().map(|b| b["count"].as_u64().unwrap()).collect();
    // [0,25): 1,5,5,7,10,20; [25,50): 30; [50,75): 50; [75,100): none; [100,125): 100.
    assert_eq!(counts, [6, 1, 1, 0, 1]);
}

#[test]
fn range_with_stats() {
    let out = run(json!({
        "prices": {"range": {
            "field": "price", "start": 0.0, "end": 110.0, "gap": 55.0,
            "facet": {"hi": "max(price)"}
        }}
    }));
    let buckets = out["prices"]["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0]["hi"], json!(50.0));
    assert_eq!(buckets[1]["hi"], json!(100.0));
}

#[test]
fn query_facet_with_nested_terms() {
    let out = run(json!({
        "cheap": {"query": {
            "q": "*:*",
            "facet": {"cats": {"terms": {"field": "cat", "limit": 1}}}
        }}
    }));
    assert_eq!(out["cheap"]["count"], json!(9));
    assert_eq!(out["cheap"]["cats"]["buckets"][0]["val"], json!("A"));
}

#[test]
fn terms_with_nested_range() {
    let out = run(json!({
        "cats": {"terms": {
            "field": "cat",
            "limit": 1,
            "facet": {
                "prices": {"range": {"field": "price", "start": 0.0, "end": 40.0, "gap": 20.0}}
            }
        }}
    }));
    let bucket = &out["cats"]["buckets"][0];
    assert_eq!(bucket["val"], json!("A"));
    let nested = bucket["prices"]["buckets"].as_array().unwrap();
    // A's prices 10, 20, 30 split as [0,20): 1 and [20,40): 2.
    assert_eq!(nested[0]["count"], json!(1));
    assert_eq!(nested[1]["count"], json!(2));
}

#[test]
fn nested_query_facet_intersects_the_bucket_domain() {
    let out = run(json!({
        "cats": {"terms": {
            "field": "cat",
            "limit": 1,
            "facet": {"fives": {"query": "price:5"}}
        }}
    }));
    // No A document has price 5.
    assert_eq!(out["cats"]["buckets"][0]["fives"]["count"], json!(0));
}

#[test]
fn malformed_requests_report_the_facet_path() {
    let index = store();
    let engine = FacetEngine::new(&index);
    let domain = DocSet::match_all(&index);

    let err = engine
        .execute(
            &domain,
            &json!({"outer": {"terms": {"field": "cat", "facet": {"inner": "nope(x)"}}}}),
        )
        .unwrap_err();
    assert!(err.to_string().contains("outer/inner"));

    let err = engine
        .execute(&domain, &json!({"bad": {"terms": {"field": "missing_field"}}}))
        .unwrap_err();
    assert!(err.is_not_found());

    let err = engine
        .execute(
            &domain,
            &json!({"cats": {"terms": {"field": "cat", "sort": "ghost desc"}}}),
        )
        .unwrap_err();
    assert!(err.to_string().contains("ghost"));
}
