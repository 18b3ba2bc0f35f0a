//! `$join` correlates property criteria on one property row; `$or` and plain
//! conjunctions do not.

mod common;

use std::sync::Arc;

use aql::backend::StaticPermissions;
use aql::query::Value;
use aql::{explain, AqlConfig, AqlService};

use common::{catalog, paths, set};

fn rows(service: &AqlService, text: &str) -> std::collections::BTreeSet<String> {
    let rows = service
        .execute_eager(text, &StaticPermissions::allow_all())
        .expect("query");
    paths(&rows)
}

fn property_joins(sql: &str) -> usize {
    sql.matches("LEFT JOIN node_props").count()
}

const JOINED: &str = r#"artifacts.find({"$join":[{"_artifact_repo":"jcentral"},{"type":1}]})"#;
const ORED: &str = r#"artifacts.find({"$or":[{"_artifact_repo":"jcentral"},{"type":1}]})"#;

#[test]
fn join_and_or_compile_differently() {
    let config = AqlConfig::unoptimized();
    let joined = explain(JOINED, &config).expect("join");
    let ored = explain(ORED, &config).expect("or");

    assert_ne!(joined.sql, ored.sql);
    assert!(joined.sql.contains(") AND n.node_type = ?)"), "{}", joined.sql);
    assert!(ored.sql.contains(") OR n.node_type = ?)"), "{}", ored.sql);
    assert_eq!(property_joins(&joined.sql), 1);
    assert_eq!(property_joins(&ored.sql), 1);
    let expected = vec![Value::from("jcentral"), Value::Int(1)];
    assert_eq!(joined.params, expected);
    assert_eq!(ored.params, expected);
}

#[test]
fn join_and_or_match_different_rows() {
    let fixture = catalog();
    let service = AqlService::new(fixture.provider.clone(), AqlConfig::default());

    assert_eq!(
        rows(&service, JOINED),
        set(&["libs-release/com/beta/beta.zip"])
    );
    assert_eq!(
        rows(&service, ORED),
        set(&[
            "jcentral/org/acme/acme-1.0.jar",
            "jcentral/org/acme/acme-1.1.jar",
            "libs-release/com/beta",
            "libs-release/com/beta/beta.zip",
            "libs-release/./readme_.txt",
            "libs-release/./readme1.txt",
        ])
    );
}

#[test]
fn key_value_join_requires_one_property_row() {
    let fixture = catalog();
    let service = AqlService::new(fixture.provider.clone(), AqlConfig::unoptimized());
    let joined = r#"items.find({"$join":[{"key":"build.number"},{"value":"42"}]})"#;
    let loose = r#"items.find({"key":"build.number","value":"42"})"#;

    assert_eq!(property_joins(&service.explain(joined).expect("join").sql), 1);
    assert_eq!(property_joins(&service.explain(loose).expect("loose").sql), 2);

    assert_eq!(rows(&service, joined), set(&["jcentral/org/acme/acme-1.0.jar"]));
    // acme-1.1 carries build.number=43 and qa=42 on different rows
    assert_eq!(
        rows(&service, loose),
        set(&[
            "jcentral/org/acme/acme-1.0.jar",
            "jcentral/org/acme/acme-1.1.jar",
        ])
    );
}

#[test]
fn joins_nested_in_or_keep_their_own_rows() {
    let fixture = catalog();
    let service = AqlService::new(fixture.provider.clone(), AqlConfig::unoptimized());
    let text = r#"items.find({"$or":[
        {"$join":[{"key":"license"},{"value":"MIT"}]},
        {"$join":[{"key":"license"},{"value":"BSD"}]}
    ]})"#;

    let compiled = service.explain(text).expect("explain");
    assert_eq!(property_joins(&compiled.sql), 2);
    assert_eq!(
        rows(&service, text),
        set(&[
            "jcentral/org/acme/acme-1.0.jar",
            "libs-release/com/beta/beta.zip",
        ])
    );
}

#[test]
fn comparators_on_one_property_share_its_row() {
    let fixture = catalog();
    let service = AqlService::new(fixture.provider.clone(), AqlConfig::default());
    let text = r#"items.find({"license":{"$match":"*","$ne":"GPL"}})"#;

    assert_eq!(property_joins(&service.explain(text).expect("explain").sql), 1);
    assert_eq!(
        rows(&service, text),
        set(&[
            "jcentral/org/acme/acme-1.0.jar",
            "libs-release/com/beta/beta.zip",
        ])
    );
}

#[test]
fn lazy_and_eager_agree() {
    let fixture = catalog();
    let service = AqlService::new(fixture.provider.clone(), AqlConfig::default());
    let eager = rows(&service, ORED);
    let lazy = service
        .execute_lazy(ORED, Arc::new(StaticPermissions::allow_all()))
        .expect("lazy")
        .collect::<aql::Result<Vec<_>>>()
        .expect("rows");
    assert_eq!(paths(&lazy), eager);
    assert_eq!(fixture.provider.checked_out(), 0);
}
