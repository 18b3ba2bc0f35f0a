//! Every optimizer strategy keeps the matching row set; only the SQL shape
//! changes.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use aql::backend::sqlite::SqliteProvider;
use aql::query::compiler::compile;
use aql::query::optimizer::{FlattenGroups, OrToJoin, TypeNarrowing};
use aql::query::{parse, AqlExecutor, OptimizationStrategy, Optimizer};

use common::{catalog, paths, set};

struct Case {
    text: &'static str,
    expected: &'static [&'static str],
}

const CASES: &[Case] = &[
    Case {
        text: r#"items.find({"$or":[{"license":"MIT"},{"license":"BSD"}]})"#,
        expected: &["jcentral/org/acme/acme-1.0.jar", "libs-release/com/beta/beta.zip"],
    },
    Case {
        text: r#"items.find({"$or":[{"build.name":"acme"},{"_artifact_repo":"jcentral"}]})"#,
        expected: &[
            "jcentral/org/acme/acme-1.0.jar",
            "jcentral/org/acme/acme-1.1.jar",
            "libs-release/com/beta",
            "libs-release/com/beta/beta.zip",
        ],
    },
    Case {
        text: r#"items.find({"type":"file","$or":[{"type":"folder","repo":"jcentral"},{"name":{"$match":"*.jar"}}]})"#,
        expected: &["jcentral/org/acme/acme-1.0.jar", "jcentral/org/acme/acme-1.1.jar"],
    },
    Case {
        text: r#"items.find({"type":"folder","$or":[{"type":"file"},{"repo":"libs-release"}]})"#,
        expected: &["libs-release/com/beta"],
    },
    Case {
        text: r#"items.find({"$and":[{"repo":"jcentral"},{"$and":[{"type":"file"}]}]})"#,
        expected: &["jcentral/org/acme/acme-1.0.jar", "jcentral/org/acme/acme-1.1.jar"],
    },
    Case {
        text: r#"items.find({"$or":[{"license":"GPL"}]})"#,
        expected: &["jcentral/org/acme/acme-1.1.jar"],
    },
    Case {
        text: r#"items.find({"license":{"$ne":"MIT"},"$or":[{"license":"BSD"},{"qa":"42"}]})"#,
        expected: &["jcentral/org/acme/acme-1.1.jar", "libs-release/com/beta/beta.zip"],
    },
    Case {
        text: r#"items.find({"$or":[{"type":"folder"},{"$join":[{"key":"license"},{"value":"GPL"}]}]})"#,
        expected: &[
            "jcentral/org/acme",
            "jcentral/org/acme/acme-1.1.jar",
            "libs-release/com/beta",
        ],
    },
];

fn run(provider: &Arc<SqliteProvider>, query: aql::query::Query) -> BTreeSet<String> {
    let compiled = compile(&query).expect("compile");
    let executor = AqlExecutor::new(provider.clone());
    paths(&executor.execute_eager(&compiled).expect("rows"))
}

fn strategies() -> Vec<Box<dyn OptimizationStrategy>> {
    vec![Box::new(FlattenGroups), Box::new(TypeNarrowing), Box::new(OrToJoin)]
}

#[test]
fn unoptimized_fixtures_match_expectations() {
    let fixture = catalog();
    for case in CASES {
        let query = parse(case.text).expect("parse");
        assert_eq!(run(&fixture.provider, query), set(case.expected), "{}", case.text);
    }
}

#[test]
fn each_strategy_alone_preserves_rows() {
    let fixture = catalog();
    for strategy in strategies() {
        for case in CASES {
            let query = strategy.optimize(parse(case.text).expect("parse"));
            assert_eq!(
                run(&fixture.provider, query),
                set(case.expected),
                "{} on {}",
                strategy.name(),
                case.text
            );
        }
    }
}

#[test]
fn full_pipeline_preserves_rows() {
    let fixture = catalog();
    let optimizer = Optimizer::default();
    for case in CASES {
        let query = optimizer.optimize(parse(case.text).expect("parse"));
        assert_eq!(run(&fixture.provider, query), set(case.expected), "{}", case.text);
    }
}

#[test]
fn or_to_join_drops_property_joins() {
    let text = CASES[0].text;
    let before = compile(&parse(text).expect("parse")).expect("compile");
    let after = compile(&OrToJoin.optimize(parse(text).expect("parse"))).expect("compile");
    assert_eq!(before.sql.matches("LEFT JOIN node_props").count(), 2);
    assert_eq!(after.sql.matches("LEFT JOIN node_props").count(), 1);
    assert_eq!(before.params, after.params);
}

#[test]
fn type_narrowing_prunes_contradicting_branches() {
    let text = CASES[2].text;
    let before = compile(&parse(text).expect("parse")).expect("compile");
    let after = compile(&TypeNarrowing.optimize(parse(text).expect("parse"))).expect("compile");
    assert_eq!(before.params.len(), 4);
    assert_eq!(after.params.len(), 2);
    assert!(!after.sql.contains("n.repo = ?"));
}
