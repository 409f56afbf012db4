use kmap_core::{
    compile_condition, compile_key_condition, compile_strategy, compile_update, ConditionCompiler, EntitySchema,
    KeySpec, Placeholders, Prop, SchemaRegistry, StrategyKind, UpdateCompiler, Value,
};
use kmap_test_utils::{assert_number_eq, assert_string_eq, document_schema};
use proptest::prelude::*;
use serde_json::{json, Map, Value as Json};

fn filter(json: Json) -> Map<String, Json> {
    json.as_object().cloned().unwrap()
}

/// Omitted sort key mirrors the partition key (name and prefix)
#[test]
fn test_omitted_sort_key_mirrors_partition_key() {
    let schema = EntitySchema::build(
        "Repo",
        "repos",
        vec![Prop::string("repoId"), Prop::string("name")],
        &[KeySpec::new("REPO#repoId")],
    )
    .unwrap();

    let primary = schema.primary();
    assert_eq!(primary.pk.name(), "repoId");
    assert_eq!(primary.sk.name(), "repoId");
    assert_eq!(primary.pk.prefix, primary.sk.prefix);
    assert_eq!(primary.pk.alias, "pk");
    assert_eq!(primary.sk.alias, "sk");
    assert!(primary.sort_key_mirrors_partition_key());

    let strategy = schema.strategy(&filter(json!({"repoId": "r1"})));
    assert_eq!(strategy.kind, StrategyKind::DirectGet);
    let key = strategy.key().unwrap();
    assert_string_eq(&key["pk"], "REPO#r1");
    assert_string_eq(&key["sk"], "REPO#r1");
}

/// First index offering a direct get wins
#[test]
fn test_direct_get_short_circuits() {
    let schema = EntitySchema::build(
        "Document",
        "docs",
        vec![Prop::string("repoId"), Prop::string("docId"), Prop::number("created")],
        &[
            KeySpec::with_sk("repoId", "created"),
            KeySpec::with_sk("repoId", "docId"),
            KeySpec::with_sk("docId", "repoId"),
        ],
    )
    .unwrap();

    let strategy = schema.strategy(&filter(json!({"repoId": "r1", "docId": "d1"})));
    assert_eq!(strategy.kind, StrategyKind::DirectGet);
    assert_eq!(strategy.index, Some(1));
    assert_eq!(strategy.index_name.as_deref(), Some("docs-gsi-1"));
}

#[test]
fn test_range_query_beats_partition_query() {
    let schema = document_schema();

    let strategy = schema.strategy(&filter(json!({"repoId": "r1", "created": {"$gte": 5}})));
    assert_eq!(strategy.kind, StrategyKind::RangeQuery);
    assert_eq!(strategy.index, Some(1));

    let strategy = schema.strategy(&filter(json!({"repoId": "r1"})));
    assert_eq!(strategy.kind, StrategyKind::PartitionQuery);
    assert_eq!(strategy.index, Some(0));
    assert_eq!(strategy.index_name, None);
}

#[test]
fn test_static_sort_key_selects_secondary_index() {
    let schema = EntitySchema::build(
        "Document",
        "docs",
        vec![Prop::string("repoId"), Prop::string("docId")],
        &[KeySpec::with_sk("repoId", "docId"), KeySpec::with_sk("docId", "REPO#")],
    )
    .unwrap();

    let strategy = schema.strategy(&filter(json!({"docId": "d1"})));
    assert_eq!(strategy.kind, StrategyKind::DirectGet);
    assert_eq!(strategy.index, Some(1));
    assert_eq!(strategy.index_name.as_deref(), Some("docs-gsi-1"));
}

#[test]
fn test_sibling_conditions() {
    let props = vec![Prop::number("a"), Prop::number("b")];
    let filter = json!({"a": {"$gt": 1}, "b": 2});

    let first = compile_condition(&props, &filter).unwrap();
    assert_eq!(first.text, "(#a > :v1 AND #b = :v2)");
    assert_eq!(first.names.len(), 2);
    assert_eq!(first.values.len(), 2);

    let second = compile_condition(&props, &filter).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_contains_ignores_prefix() {
    let schema = document_schema();
    let expr = compile_condition(&schema.props, &json!({"repoId": {"$contains": "abc"}})).unwrap();
    assert_eq!(expr.text, "contains(#pk, :v1)");
    assert_eq!(expr.values[":v1"], Value::string("abc"));
}

#[test]
fn test_increment_total() {
    let props = vec![Prop::number("total")];
    let expr = compile_update(&props, &json!({"$increment": {"total": 10}})).unwrap();
    assert_eq!(expr.text, "SET #total = #total + :v1");
    assert_eq!(expr.names.len(), 1);
    assert_eq!(expr.names["#total"], "total");
    assert_eq!(expr.values.len(), 1);
    assert_number_eq(&expr.values[":v1"], "10");
}

/// Key condition, post-filter and update of one request share placeholders
#[test]
fn test_conditional_update_request() {
    let schema = document_schema();
    let strategy = schema.strategy(&filter(json!({"repoId": "r1", "docId": "d1"})));
    let key = strategy.key().unwrap();
    assert_string_eq(&key["pk"], "REPO#r1");
    assert_string_eq(&key["sk"], "DOC#d1");

    let mut placeholders = Placeholders::new();
    let update = UpdateCompiler::new(&schema.props, &mut placeholders)
        .compile(&json!({"$increment": {"views": 1}, "$add": {"tags": ["draft"]}}))
        .unwrap();
    let condition = ConditionCompiler::new(&schema.props, &mut placeholders)
        .compile(&json!({"views": {"$lt": 1000}}))
        .unwrap();

    assert_eq!(update, "SET #views = #views + :v2 ADD #tags :v1");
    assert_eq!(condition, "#views < :v3");

    let compiled = placeholders.finish(update);
    assert_eq!(compiled.names.len(), 2);
    assert_eq!(compiled.values.len(), 3);
    assert_eq!(compiled.values[":v1"], Value::SS(vec!["draft".into()]));
}

#[test]
fn test_range_query_expressions() {
    let schema = document_schema();
    let strategy = schema.strategy(&filter(json!({
        "repoId": "r1",
        "created": {"$between": [10, 20]},
        "title": {"$beginsWith": "intro"}
    })));

    let exprs = compile_strategy(&strategy, &schema.props).unwrap();
    assert_eq!(
        exprs.key_condition.as_deref(),
        Some("#pk1 = :v1 AND #sk1 BETWEEN :v2 AND :v3")
    );
    assert_eq!(exprs.filter.as_deref(), Some("begins_with(#title, :v4)"));
    assert_string_eq(&exprs.values[":v1"], "REPO#r1");

    let mut placeholders = Placeholders::new();
    let key_condition = compile_key_condition(&strategy, &mut placeholders).unwrap();
    assert_eq!(Some(key_condition), exprs.key_condition);
}

#[test]
fn test_registry_shares_built_schemas() {
    let registry = SchemaRegistry::new();
    registry.register(document_schema()).unwrap();

    let schema = registry.get("Document").unwrap();
    let handle = std::thread::spawn(move || schema.strategy(&filter(json!({"repoId": "r1"}))).kind);
    assert_eq!(handle.join().unwrap(), StrategyKind::PartitionQuery);

    let err = registry.register(document_schema()).unwrap_err();
    assert_eq!(err.code(), "ALREADY_EXISTS");
}

#[test]
fn test_schema_errors_name_the_entity() {
    let err = EntitySchema::build(
        "Document",
        "docs",
        vec![Prop::string("title")],
        &[KeySpec::new("title").capacity(5, 5), KeySpec::new("missing")],
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Invalid key schema: Document key[1] missing is not a prop");
}

fn field_value() -> impl Strategy<Value = Option<Json>> {
    prop_oneof![
        Just(None),
        "[a-z]{1,4}".prop_map(|s| Some(json!(s))),
        (0i64..100).prop_map(|n| Some(json!({"$gt": n}))),
        (0i64..100).prop_map(|n| Some(json!({"$eq": n}))),
    ]
}

proptest! {
    /// Direct get is chosen exactly when some index has both keys bound
    #[test]
    fn prop_direct_get_iff_some_index_fully_bound(
        repo in field_value(),
        doc in field_value(),
        created in field_value(),
    ) {
        let schema = document_schema();
        let mut f = Map::new();
        for (name, value) in [("repoId", repo), ("docId", doc), ("created", created)] {
            if let Some(value) = value {
                f.insert(name.to_string(), value);
            }
        }

        let bound = |name: &str| match f.get(name) {
            Some(Json::String(_)) => true,
            Some(Json::Object(ops)) => ops.contains_key("$eq"),
            _ => false,
        };
        let expect_direct = bound("repoId") && (bound("docId") || bound("created"));

        let strategy = schema.strategy(&f);
        prop_assert_eq!(strategy.kind == StrategyKind::DirectGet, expect_direct);
        if !bound("repoId") {
            prop_assert_eq!(strategy.kind, StrategyKind::Scan);
        }

        let mut names: Vec<_> = strategy.query.keys().chain(strategy.filter.keys()).cloned().collect();
        names.sort();
        let mut expected: Vec<_> = f.keys().cloned().collect();
        expected.sort();
        prop_assert_eq!(names, expected);
    }
}
