//! Full pipeline against a seeded SQLite database.

mod common;

use std::sync::Arc;

use aql::backend::StaticPermissions;
use aql::query::{Dialect, Field, ItemType, Value};
use aql::{AqlConfig, AqlError, AqlService};
use time::macros::datetime;

use common::{catalog, paths, set};

fn service(fixture: &common::Fixture) -> AqlService {
    AqlService::new(fixture.provider.clone(), AqlConfig::default())
}

fn eager(service: &AqlService, text: &str) -> Vec<aql::query::ResultRow> {
    service
        .execute_eager(text, &StaticPermissions::allow_all())
        .expect("query")
}

#[test]
fn empty_find_returns_every_item() {
    let fixture = catalog();
    let rows = eager(&service(&fixture), "items.find()");
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0].columns()[..3], Field::IDENTITY);
}

#[test]
fn sort_limit_and_offset() {
    let fixture = catalog();
    let service = service(&fixture);

    let rows = eager(
        &service,
        r#"items.find({"type":"file"}).include("size").sort({"$desc":["size"]})"#,
    );
    let sizes: Vec<_> = rows
        .iter()
        .map(|row| row.get(Field::Size).and_then(Value::as_i64))
        .collect();
    assert_eq!(sizes, [200, 100, 50, 11, 10].map(Some));

    let rows = eager(
        &service,
        r#"items.find({"type":"file"}).sort({"$asc":["name"]}).limit(2).offset(1)"#,
    );
    let names: Vec<_> = rows
        .iter()
        .map(|row| row.get(Field::Name).and_then(Value::as_str).map(str::to_owned))
        .collect();
    assert_eq!(
        names,
        [Some("acme-1.1.jar".to_owned()), Some("beta.zip".to_owned())]
    );
}

#[test]
fn include_limits_projection() {
    let fixture = catalog();
    let rows = eager(
        &service(&fixture),
        r#"items.find({"name":"beta.zip"}).include("created_by","depth")"#,
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].columns(),
        [Field::Repo, Field::Path, Field::Name, Field::CreatedBy, Field::Depth]
    );
    assert_eq!(rows[0].get(Field::Depth), Some(&Value::Int(3)));
    assert_eq!(rows[0].get(Field::Size), None);
}

#[test]
fn glob_wildcards_and_literal_underscores() {
    let fixture = catalog();
    let service = service(&fixture);
    assert_eq!(
        paths(&eager(&service, r#"items.find({"name":{"$match":"readme_*"}})"#)),
        set(&["libs-release/./readme_.txt"])
    );
    assert_eq!(
        paths(&eager(&service, r#"items.find({"name":{"$match":"readme?.txt"}})"#)),
        set(&["libs-release/./readme_.txt", "libs-release/./readme1.txt"])
    );
    assert_eq!(
        paths(&eager(&service, r#"items.find({"name":{"$nmatch":"*.jar"},"repo":"jcentral"})"#)),
        set(&["jcentral/org/acme"])
    );
}

#[test]
fn not_equals_keeps_null_columns() {
    let fixture = catalog();
    let rows = eager(
        &service(&fixture),
        r#"items.find({"type":"file","created_by":{"$ne":"alice"}})"#,
    );
    assert_eq!(
        paths(&rows),
        set(&[
            "jcentral/org/acme/acme-1.1.jar",
            "libs-release/./readme_.txt",
            "libs-release/./readme1.txt",
        ])
    );
}

#[test]
fn binary_and_date_columns() {
    let fixture = catalog();
    let service = service(&fixture);
    assert_eq!(
        paths(&eager(&service, r#"items.find({"sha256":"bbb256"})"#)),
        set(&["jcentral/org/acme/acme-1.1.jar"])
    );
    assert_eq!(
        paths(&eager(
            &service,
            r#"items.find({"created":{"$gte":"1970-01-01T00:00:03Z"}})"#
        )),
        set(&[
            "libs-release/com/beta/beta.zip",
            "libs-release/./readme_.txt",
            "libs-release/./readme1.txt",
        ])
    );
    assert_eq!(
        paths(&eager(&service, r#"items.find({"size":{"$gt":60,"$lte":100}})"#)),
        set(&["jcentral/org/acme/acme-1.0.jar"])
    );
}

#[test]
fn chained_finds_are_conjunctive() {
    let fixture = catalog();
    let rows = eager(
        &service(&fixture),
        r#"items.find({"repo":"jcentral"}).find({"build.number":43})"#,
    );
    assert_eq!(paths(&rows), set(&["jcentral/org/acme/acme-1.1.jar"]));
}

#[test]
fn restricted_edition_is_gated_before_execution() {
    let fixture = catalog();
    let service = service(&fixture);
    let restricted = StaticPermissions::restricted_edition();

    let sorted = r#"items.find({"repo":"jcentral"}).sort({"$asc":["name"]})"#;
    match service.execute_eager(sorted, &restricted) {
        Err(AqlError::Capability { capability, .. }) => assert_eq!(capability, "sorting"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(eager(&service, sorted).len(), 3);

    let raw_value = r#"items.find({"value":"MIT"})"#;
    match service.execute_eager(raw_value, &restricted) {
        Err(AqlError::Capability { capability, .. }) => {
            assert_eq!(capability, "property_value_filter")
        }
        other => panic!("unexpected {other:?}"),
    }

    let named = service
        .execute_eager(r#"items.find({"license":"MIT"})"#, &restricted)
        .expect("named property filters stay available");
    assert_eq!(paths(&named), set(&["jcentral/org/acme/acme-1.0.jar"]));
}

#[test]
fn lazy_rows_are_filtered_by_permissions() {
    let fixture = catalog();
    let service = service(&fixture);
    let permissions = Arc::new(StaticPermissions::allow_all().with_readable_repos(["jcentral"]));
    let mut stream = service
        .execute_lazy("items.find()", permissions)
        .expect("stream");
    let rows = stream.by_ref().collect::<aql::Result<Vec<_>>>().expect("rows");
    assert_eq!(
        paths(&rows),
        set(&[
            "jcentral/org/acme",
            "jcentral/org/acme/acme-1.0.jar",
            "jcentral/org/acme/acme-1.1.jar",
        ])
    );
    assert_eq!(stream.hidden_rows(), 4);
    assert!(stream.is_closed());
}

#[test]
fn artifacts_are_built_from_rows() {
    let fixture = catalog();
    let artifacts = service(&fixture)
        .find_artifacts(
            r#"artifacts.find({"name":"acme-1.0.jar"})"#,
            Arc::new(StaticPermissions::allow_all()),
        )
        .expect("artifacts");
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert_eq!(artifact.full_path(), "jcentral/org/acme/acme-1.0.jar");
    assert_eq!(artifact.item_type, Some(ItemType::File));
    assert_eq!(artifact.size, Some(100));
    assert_eq!(artifact.depth, Some(3));
    assert_eq!(artifact.created, Some(datetime!(1970-01-01 00:00:01 UTC)));
    assert_eq!(artifact.created_by.as_deref(), Some("alice"));
    assert_eq!(artifact.checksums.sha256.as_deref(), Some("aaa256"));
    assert_eq!(artifact.checksums.actual_md5.as_deref(), Some("aaa5"));
    assert_eq!(fixture.provider.checked_out(), 0);
}

#[test]
fn default_limit_caps_unbounded_queries() {
    let fixture = catalog();
    let config = AqlConfig {
        default_limit: Some(2),
        ..AqlConfig::default()
    };
    let service = AqlService::new(fixture.provider.clone(), config);
    assert_eq!(eager(&service, "items.find()").len(), 2);
    assert_eq!(eager(&service, "items.find().limit(5)").len(), 5);
}

#[test]
fn backend_dialect_wins_over_config() {
    let fixture = catalog();
    let service = AqlService::new(
        fixture.provider.clone(),
        AqlConfig::for_dialect(Dialect::SqlServer),
    );
    assert_eq!(service.config().dialect, Dialect::Sqlite);
    assert_eq!(eager(&service, "items.find().limit(1)").len(), 1);
}

#[test]
fn reads_inside_an_outer_transaction() {
    let fixture = catalog();
    fixture.provider.set_in_transaction(true);
    let rows = eager(&service(&fixture), r#"items.find({"repo":"libs-release"})"#);
    assert_eq!(rows.len(), 4);
}

#[test]
fn syntax_errors_surface_unchanged() {
    let fixture = catalog();
    let err = service(&fixture)
        .execute_eager("artifacts().find()", &StaticPermissions::allow_all())
        .expect_err("missing domain argument");
    assert_eq!(err.code(), "SyntaxError");
    assert_eq!(fixture.provider.checked_out(), 0);
}
