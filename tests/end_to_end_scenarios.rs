// Integration tests for the literal end-to-end scenarios an engine must
// satisfy: aliasless projection naming, UNWIND fan-out and aggregation,
// nested UNWIND cross-product, pattern traversal over a small virtual
// graph, string predicates, and OPTIONAL MATCH null-padding.

use flowquery::config::EngineConfig;
use flowquery::http::UnconfiguredFetcher;
use flowquery::value::Value;
use flowquery::Engine;

fn new_engine() -> Engine {
    Engine::new(EngineConfig::default())
}

#[tokio::test]
async fn aliasless_projection_uses_expr_index() {
    let engine = new_engine();
    let rows = engine
        .run("WITH 1 AS x RETURN x + 1", &UnconfiguredFetcher)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("expr0"), Some(&Value::Integer(2)));
}

#[tokio::test]
async fn unwind_feeds_an_aggregate() {
    let engine = new_engine();
    let rows = engine
        .run("UNWIND [1,2,3] AS n RETURN sum(n) AS total", &UnconfiguredFetcher)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("total"), Some(&Value::Integer(6)));
}

#[tokio::test]
async fn nested_unwind_cross_product_groups_by_outer_variable() {
    let engine = new_engine();
    let rows = engine
        .run(
            "UNWIND range(1,3) AS i UNWIND range(1,3) AS j RETURN i, sum(j) AS s",
            &UnconfiguredFetcher,
        )
        .await
        .unwrap();
    let mut seen: Vec<(i64, i64)> = rows
        .iter()
        .map(|r| match (r.get("i"), r.get("s")) {
            (Some(Value::Integer(i)), Some(Value::Integer(s))) => (*i, *s),
            other => panic!("unexpected row shape: {:?}", other),
        })
        .collect();
    seen.sort();
    assert_eq!(seen, vec![(1, 6), (2, 6), (3, 6)]);
}

#[tokio::test]
async fn string_predicates_evaluate_together() {
    let engine = new_engine();
    let rows = engine
        .run(
            "WITH 'pineapple' AS s RETURN s STARTS WITH 'pine' AS p, s ENDS WITH 'ple' AS e, s CONTAINS 'app' AS c",
            &UnconfiguredFetcher,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("p"), Some(&Value::Integer(1)));
    assert_eq!(rows[0].get("e"), Some(&Value::Integer(1)));
    assert_eq!(rows[0].get("c"), Some(&Value::Integer(1)));
}

#[tokio::test]
async fn optional_match_on_unregistered_label_binds_null() {
    let engine = new_engine();
    let rows = engine
        .run("WITH 1 AS x OPTIONAL MATCH (n:Absent) RETURN x, n", &UnconfiguredFetcher)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("x"), Some(&Value::Integer(1)));
    assert_eq!(rows[0].get("n"), Some(&Value::Null));
}

#[tokio::test]
async fn match_on_unregistered_label_is_a_runtime_error() {
    let engine = new_engine();
    let err = engine
        .run("MATCH (n:Absent) RETURN n", &UnconfiguredFetcher)
        .await
        .unwrap_err();
    assert!(matches!(err, flowquery::EngineError::Runtime(_)));
}

#[tokio::test]
async fn variable_length_pattern_traversal_over_a_small_virtual_graph() {
    let engine = new_engine();
    engine
        .run(
            "CREATE VIRTUAL (:Person) AS { UNWIND [{id:1,name:'A'},{id:2,name:'B'},{id:3,name:'C'}] AS row RETURN row.id AS id, row.name AS name }",
            &UnconfiguredFetcher,
        )
        .await
        .unwrap();
    engine
        .run(
            "CREATE VIRTUAL (:Person)-[:KNOWS]->(:Person) AS { UNWIND [{left_id:1,right_id:2},{left_id:2,right_id:3}] AS row RETURN row.left_id AS left_id, row.right_id AS right_id }",
            &UnconfiguredFetcher,
        )
        .await
        .unwrap();

    let rows = engine
        .run(
            "MATCH (a:Person)-[:KNOWS*1..2]->(b:Person) RETURN a.name AS a, b.name AS b",
            &UnconfiguredFetcher,
        )
        .await
        .unwrap();

    let mut pairs: Vec<(String, String)> = rows
        .iter()
        .map(|r| match (r.get("a"), r.get("b")) {
            (Some(Value::String(a)), Some(Value::String(b))) => (a.clone(), b.clone()),
            other => panic!("unexpected row shape: {:?}", other),
        })
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("A".to_string(), "B".to_string()),
            ("A".to_string(), "C".to_string()),
            ("B".to_string(), "C".to_string()),
        ]
    );
}
