//! Shared SQLite fixtures for the integration suites.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use aql::backend::sqlite::{NewItem, SqliteProvider};
use aql::query::{Field, ResultRow};
use tempfile::TempDir;

pub struct Fixture {
    // keeps the database file alive
    _dir: TempDir,
    pub provider: Arc<SqliteProvider>,
}

/// Empty database with the item schema.
pub fn empty() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let provider = SqliteProvider::open(dir.path().join("items.db")).expect("open");
    provider.create_schema().expect("schema");
    Fixture {
        _dir: dir,
        provider: Arc::new(provider),
    }
}

/// Database seeded with [`seed_catalog`].
pub fn catalog() -> Fixture {
    let fixture = empty();
    seed_catalog(&fixture.provider);
    fixture
}

fn insert(provider: &SqliteProvider, item: NewItem, props: &[(&str, &str)]) {
    let id = provider.insert_item(&item).expect("insert");
    for (key, value) in props {
        provider.set_property(id, key, value).expect("property");
    }
}

/// Two repositories with files, folders and properties chosen so that
/// `$join` and plain conjunctions disagree.
pub fn seed_catalog(provider: &SqliteProvider) {
    insert(provider, NewItem::folder("jcentral", "org", "acme").at(500), &[]);
    insert(
        provider,
        NewItem::file("jcentral", "org/acme", "acme-1.0.jar")
            .with_size(100)
            .at(1_000)
            .by("alice")
            .with_checksums("aaa1", "aaa5", "aaa256"),
        &[
            ("build.name", "acme"),
            ("build.number", "42"),
            ("license", "MIT"),
        ],
    );
    insert(
        provider,
        NewItem::file("jcentral", "org/acme", "acme-1.1.jar")
            .with_size(200)
            .at(2_000)
            .by("bob")
            .with_checksums("bbb1", "bbb5", "bbb256"),
        &[
            ("build.name", "acme"),
            ("build.number", "43"),
            ("license", "GPL"),
            ("qa", "42"),
        ],
    );
    insert(
        provider,
        NewItem::folder("libs-release", "com", "beta").at(500),
        &[("_artifact_repo", "jcentral")],
    );
    insert(
        provider,
        NewItem::file("libs-release", "com/beta", "beta.zip")
            .with_size(50)
            .at(3_000)
            .by("alice"),
        &[("_artifact_repo", "jcentral"), ("license", "BSD")],
    );
    insert(
        provider,
        NewItem::file("libs-release", ".", "readme_.txt").with_size(10).at(4_000),
        &[],
    );
    insert(
        provider,
        NewItem::file("libs-release", ".", "readme1.txt").with_size(11).at(4_000),
        &[],
    );
}

/// `repo/path/name` of every row.
pub fn paths(rows: &[ResultRow]) -> BTreeSet<String> {
    rows.iter()
        .map(|row| {
            let text = |field| {
                row.get(field)
                    .and_then(|v| v.as_str())
                    .expect("identity column")
                    .to_owned()
            };
            format!("{}/{}/{}", text(Field::Repo), text(Field::Path), text(Field::Name))
        })
        .collect()
}

pub fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}
