//! Parser determinism, rejection of malformed text, and literal/parameter
//! alignment.

use proptest::prelude::*;

use aql::query::compiler::{compile, glob_to_like};
use aql::query::{parse, Value};

const KEYS: &[&str] = &["repo", "name", "path", "created_by", "license", "build.number", "qa"];
const COMPARATORS: &[&str] = &["$eq", "$ne", "$match", "$nmatch"];

fn build_text(terms: &[(usize, usize, String)], op: &str) -> String {
    let objects: Vec<String> = terms
        .iter()
        .map(|(key, cmp, value)| {
            format!(
                r#"{{"{}":{{"{}":"{}"}}}}"#,
                KEYS[*key], COMPARATORS[*cmp], value
            )
        })
        .collect();
    format!(r#"items.find({{"{op}":[{}]}})"#, objects.join(","))
}

fn terms() -> impl Strategy<Value = Vec<(usize, usize, String)>> {
    proptest::collection::vec(
        (0..KEYS.len(), 0..COMPARATORS.len(), "[a-z0-9]{1,8}"),
        1..6,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn parsing_is_deterministic(terms in terms(), or in any::<bool>()) {
        let text = build_text(&terms, if or { "$or" } else { "$and" });
        let first = parse(&text).expect("parse");
        let second = parse(&text).expect("parse");
        prop_assert_eq!(first, second);
    }

    #[test]
    fn params_follow_literal_order(terms in terms(), or in any::<bool>()) {
        let text = build_text(&terms, if or { "$or" } else { "$and" });
        let compiled = compile(&parse(&text).expect("parse")).expect("compile");
        let expected: Vec<Value> = terms.iter().map(|(_, _, v)| Value::from(v.as_str())).collect();
        prop_assert!(!compiled.sql.is_empty());
        prop_assert_eq!(compiled.sql.matches('?').count(), terms.len());
        prop_assert_eq!(compiled.params, expected);
    }

    #[test]
    fn glob_translation_escapes_like_metacharacters(pattern in r"[a-c%_*?\\]{0,16}") {
        let like = glob_to_like(&pattern);
        let mut chars = like.chars();
        let mut literal = String::new();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    let escaped = chars.next().expect("escape is followed by a character");
                    prop_assert!(matches!(escaped, '%' | '_' | '\\'));
                    literal.push(escaped);
                }
                '%' => literal.push('*'),
                '_' => literal.push('?'),
                '*' | '?' => prop_assert!(false, "unconverted glob in {}", like),
                other => literal.push(other),
            }
        }
        prop_assert_eq!(literal, pattern);
    }
}

#[test]
fn documented_examples_round_trip() {
    let examples = [
        (r#"artifacts.find({"license":{"$equals":"GPL"}})"#, 1),
        (
            r#"artifacts.find({"$or":[{"repo":"a"},{"repo":"b"}]}).sort({"$asc":["name"]}).limit(10)"#,
            2,
        ),
        (r#"artifacts.find({"$join":[{"key":"build.number"},{"value":"42"}]})"#, 2),
        (r#"items.find({"size":{"$greater":10,"$less":20}}).find({"type":"file"})"#, 3),
        ("items.find()", 0),
    ];
    for (text, literals) in examples {
        let query = parse(text).expect(text);
        let compiled = compile(&query).expect(text);
        assert!(compiled.sql.starts_with("SELECT DISTINCT "), "{text}");
        assert_eq!(compiled.params.len(), literals, "{text}");
        assert_eq!(query.literal_count(), literals, "{text}");
    }
}

#[test]
fn malformed_text_is_rejected() {
    let cases = [
        r#"artifacts({"$names" : [}).find(...)"#,
        r#"artifacts({"$names").find(...)"#,
        "artifacts().find(...)",
        r#"artifacts.find({"ver*" : "$equals"})"#,
        r#"items.find({"repo":"a"}"#,
        r#"items.find({"repo":{"$like":"a"}})"#,
        r#"folders.find()"#,
        r#"items.find({"repo":"a"]})"#,
    ];
    for text in cases {
        let err = parse(text).expect_err(text);
        assert!(
            matches!(err.code(), "SyntaxError" | "IllegalQueryError"),
            "{text}: {err}"
        );
    }
}

#[test]
fn syntax_errors_point_at_the_offending_token() {
    match parse("artifacts().find()") {
        Err(aql::AqlError::Syntax { position, .. }) => assert_eq!(position, 9),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn two_properties_bind_in_predicate_order() {
    let compiled = compile(&parse(r#"artifacts.find({"a":"1","b":"2"})"#).expect("parse"))
        .expect("compile");
    assert_eq!(compiled.params, vec![Value::from("1"), Value::from("2")]);
    let where_clause = &compiled.sql[compiled.sql.find(" WHERE ").expect("where")..];
    let a = where_clause.find("'a'").expect("a");
    let b = where_clause.find("'b'").expect("b");
    assert!(a < b);
}
