use bson::Bson;
use bson::oid::ObjectId;
use docbridge_core::criteria::{Criteria, LogicalOp};
use docbridge_core::error::RecordError;
use docbridge_core::filter::{FilterCompiler, FilterInput, ParamMap, PolicyFilter};
use serde_json::json;

fn text(expr: &str) -> Criteria {
    FilterCompiler::compile_text(expr, &ParamMap::new()).unwrap()
}

fn text_err(expr: &str) -> RecordError {
    FilterCompiler::compile_text(expr, &ParamMap::new()).unwrap_err()
}

fn structured(value: serde_json::Value) -> Criteria {
    FilterCompiler::compile_structured(&value).unwrap()
}

#[test]
fn test_symbol_and_word_operators_agree() {
    assert_eq!(text("age >= 21"), text("age gte 21"));
    assert_eq!(text("age <= 21"), text("age lte 21"));
    assert_eq!(text("age > 21"), text("age gt 21"));
    assert_eq!(text("age < 21"), text("age lt 21"));
    assert_eq!(text("age = 21"), text("age eq 21"));
    assert_eq!(text("age != 21"), text("age ne 21"));

    assert_eq!(text("age >= 21"), Criteria::gte("age", 21i64));
    assert_eq!(text("age != 21"), Criteria::ne("age", 21i64));
}

#[test]
fn test_word_operators_form_range_conjunctions() {
    let criteria = text("age gte 5 and age lte 10");
    let expected = Criteria::gte("age", 5i64).and(Criteria::lte("age", 10i64));
    assert_eq!(criteria, expected);
}

#[test]
fn test_or_binds_loosest() {
    let criteria = text("a = 1 or b = 2 and c = 3");
    let expected =
        Criteria::eq("a", 1i64).or(Criteria::eq("b", 2i64).and(Criteria::eq("c", 3i64)));
    assert_eq!(criteria, expected);
}

#[test]
fn test_nor_binds_between_or_and_and() {
    let criteria = text("a = 1 nor b = 2 and c = 3");
    let expected = Criteria::Logical {
        op: LogicalOp::Nor,
        children: vec![
            Criteria::eq("a", 1i64),
            Criteria::eq("b", 2i64).and(Criteria::eq("c", 3i64)),
        ],
    };
    assert_eq!(criteria, expected);

    let criteria = text("a = 1 or b = 2 nor c = 3");
    let expected = Criteria::eq("a", 1i64).or(Criteria::Logical {
        op: LogicalOp::Nor,
        children: vec![Criteria::eq("b", 2i64), Criteria::eq("c", 3i64)],
    });
    assert_eq!(criteria, expected);
}

#[test]
fn test_parentheses_override_precedence() {
    let criteria = text("(a = 1 or b = 2) and c = 3");
    let expected = Criteria::eq("a", 1i64)
        .or(Criteria::eq("b", 2i64))
        .and(Criteria::eq("c", 3i64));
    assert_eq!(criteria, expected);
}

#[test]
fn test_not_negates_the_next_unit() {
    assert_eq!(
        text("not status = active"),
        Criteria::eq("status", "active").not()
    );
    assert_eq!(
        text("not (a = 1 and b = 2)"),
        Criteria::eq("a", 1i64).and(Criteria::eq("b", 2i64)).not()
    );
}

#[test]
fn test_unquoted_values_may_span_words() {
    let criteria = text("name = John Smith and age > 5");
    let expected = Criteria::eq("name", "John Smith").and(Criteria::gt("age", 5i64));
    assert_eq!(criteria, expected);
}

#[test]
fn test_literals_are_typed_by_shape() {
    assert_eq!(text("n = 42"), Criteria::eq("n", 42i64));
    assert_eq!(text("n = -7"), Criteria::eq("n", -7i64));
    assert_eq!(text("n = 3.5"), Criteria::eq("n", 3.5f64));
    assert_eq!(text("b = true"), Criteria::eq("b", true));
    assert_eq!(text("b = FALSE"), Criteria::eq("b", false));
    assert_eq!(text("v = null"), Criteria::eq("v", Bson::Null));

    // Digits that round-trip through i64 become integers; digits that do
    // not (leading zero) fall to the double path instead.
    assert_eq!(text("n = 05"), Criteria::eq("n", 5.0f64));

    // Quoting and number-like words stay strings.
    assert_eq!(text("n = '42'"), Criteria::eq("n", "42"));
    assert_eq!(text("n = inf"), Criteria::eq("n", "inf"));
}

#[test]
fn test_like_lowers_onto_string_operators() {
    assert_eq!(text("name like 'Jo%'"), Criteria::starts_with("name", "Jo"));
    assert_eq!(text("name like '%hn'"), Criteria::ends_with("name", "hn"));
    assert_eq!(text("name like '%oh%'"), Criteria::contains("name", "oh"));
    assert_eq!(text("name like 'John'"), Criteria::eq("name", "John"));
    assert_eq!(text("name like Jo%"), Criteria::starts_with("name", "Jo"));
}

#[test]
fn test_value_lists_parse_each_item() {
    assert_eq!(
        text("status in (active, pending)"),
        Criteria::is_in(
            "status",
            [Bson::from("active"), Bson::from("pending")]
        )
    );
    assert_eq!(
        text("n nin (1, 2)"),
        Criteria::not_in("n", [Bson::Int64(1), Bson::Int64(2)])
    );
    assert_eq!(
        text("tags all ('a', 'b')"),
        Criteria::has_all("tags", [Bson::from("a"), Bson::from("b")])
    );
    assert_eq!(
        text("status in ()"),
        Criteria::is_in("status", Vec::<Bson>::new())
    );
}

#[test]
fn test_identifier_literals_normalize() {
    let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
    assert_eq!(
        text("_id = 507f1f77bcf86cd799439011"),
        Criteria::eq("_id", oid)
    );
    assert_eq!(
        text("_id = '507f1f77bcf86cd799439011'"),
        Criteria::eq("_id", oid)
    );
    assert_eq!(text("_id = user-1"), Criteria::eq("_id", "user-1"));
    assert_eq!(
        text("_id in (507f1f77bcf86cd799439011, user-1)"),
        Criteria::is_in("_id", [Bson::ObjectId(oid), Bson::from("user-1")])
    );
}

#[test]
fn test_parameters_substitute_by_name() {
    let mut params = ParamMap::new();
    params.insert(":min".to_string(), json!(30));
    params.insert(":key".to_string(), json!("507f1f77bcf86cd799439011"));
    params.insert(":pattern".to_string(), json!("Jo%"));

    assert_eq!(
        FilterCompiler::compile_text("age > :min", &params).unwrap(),
        Criteria::gt("age", 30i64)
    );
    let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
    assert_eq!(
        FilterCompiler::compile_text("_id = :key", &params).unwrap(),
        Criteria::eq("_id", oid)
    );
    assert_eq!(
        FilterCompiler::compile_text("name like :pattern", &params).unwrap(),
        Criteria::starts_with("name", "Jo")
    );

    let err = FilterCompiler::compile_text("age > :max", &params).unwrap_err();
    assert!(err.to_string().contains("unbound filter parameter ':max'"));
}

#[test]
fn test_malformed_text_is_rejected() {
    assert!(matches!(text_err(""), RecordError::Validation(_)));
    assert!(text_err("name = 'Jo").to_string().contains("unterminated"));
    assert!(text_err("a ! b").to_string().contains("stray '!'"));
    assert!(text_err("a =").to_string().contains("missing value"));
    assert!(text_err("a").to_string().contains("missing operator"));
    assert!(text_err("a ~ 1").to_string().contains("unsupported filter operator"));
    assert!(
        text_err("a = 'x' b")
            .to_string()
            .contains("unexpected trailing")
    );
    assert!(text_err("(a = 1").to_string().contains("expected ')'"));
}

#[test]
fn test_structured_logical_forms() {
    let criteria = structured(json!({"$or": [{"a": 1}, {"b": {"$gt": 2}}]}));
    let expected = Criteria::eq("a", 1i64).or(Criteria::gt("b", 2i64));
    assert_eq!(criteria, expected);

    let criteria = structured(json!({"$nor": [{"a": 1}, {"b": 2}]}));
    let expected = Criteria::Logical {
        op: LogicalOp::Nor,
        children: vec![Criteria::eq("a", 1i64), Criteria::eq("b", 2i64)],
    };
    assert_eq!(criteria, expected);

    let criteria = structured(json!({"$not": {"a": 1}}));
    assert_eq!(criteria, Criteria::eq("a", 1i64).not());

    // Sibling keys AND together, in payload order.
    let criteria = structured(json!({"a": 1, "b": 2}));
    let expected = Criteria::Logical {
        op: LogicalOp::And,
        children: vec![Criteria::eq("a", 1i64), Criteria::eq("b", 2i64)],
    };
    assert_eq!(criteria, expected);
}

#[test]
fn test_structured_operator_objects() {
    let criteria = structured(json!({"age": {"$gte": 21, "$lt": 65}}));
    let expected = Criteria::gte("age", 21i64).and(Criteria::lt("age", 65i64));
    assert_eq!(criteria, expected);

    let criteria = structured(json!({"tags": {"$in": [1, "x"]}}));
    assert_eq!(
        criteria,
        Criteria::is_in("tags", [Bson::Int64(1), Bson::from("x")])
    );

    // An object without operators is a document equality match.
    let criteria = structured(json!({"point": {"x": 1, "y": 2}}));
    assert_eq!(
        criteria,
        Criteria::eq("point", bson::doc! { "x": 1i64, "y": 2i64 })
    );
}

#[test]
fn test_structured_identifier_values_normalize() {
    let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
    assert_eq!(
        structured(json!({"_id": "507f1f77bcf86cd799439011"})),
        Criteria::eq("_id", oid)
    );
    assert_eq!(
        structured(json!({"_id": {"$in": ["507f1f77bcf86cd799439011", "user-1"]}})),
        Criteria::is_in("_id", [Bson::ObjectId(oid), Bson::from("user-1")])
    );
}

#[test]
fn test_structured_errors() {
    let err = FilterCompiler::compile_structured(&json!({"age": {"$exists": true}})).unwrap_err();
    assert!(err.to_string().contains("'$exists'"));

    let err = FilterCompiler::compile_structured(&json!({"$fancy": 1})).unwrap_err();
    assert!(err.to_string().contains("'$fancy'"));

    let err = FilterCompiler::compile_structured(&json!({"$or": []})).unwrap_err();
    assert!(err.to_string().contains("must not be empty"));

    let err = FilterCompiler::compile_structured(&json!({"$or": "nope"})).unwrap_err();
    assert!(err.to_string().contains("must hold a JSON array"));

    let err = FilterCompiler::compile_structured(&json!([1, 2])).unwrap_err();
    assert!(err.to_string().contains("must be a JSON object"));

    let err = FilterCompiler::compile_structured(&json!({})).unwrap_err();
    assert!(err.to_string().contains("empty structured filter"));
}

#[test]
fn test_both_filter_forms_compile_alike() {
    let from_text = FilterCompiler::compile(
        &FilterInput::Text("age >= 21 and status = active".to_string()),
        &ParamMap::new(),
    )
    .unwrap();
    let from_json = FilterCompiler::compile(
        &FilterInput::Structured(json!({"age": {"$gte": 21}, "status": "active"})),
        &ParamMap::new(),
    )
    .unwrap();
    assert_eq!(from_text, from_json);
}

#[test]
fn test_compile_request_attaches_policy() {
    let params = ParamMap::new();
    let policy = PolicyFilter::all_of(vec!["t = x".to_string(), "u = y".to_string()]);
    let user = FilterInput::Text("a = 1".to_string());

    let criteria = FilterCompiler::compile_request(Some(&user), &params, Some(&policy))
        .unwrap()
        .unwrap();
    let expected = Criteria::Logical {
        op: LogicalOp::And,
        children: vec![
            Criteria::eq("a", 1i64),
            Criteria::eq("t", "x").and(Criteria::eq("u", "y")),
        ],
    };
    assert_eq!(criteria, expected);

    // Policy alone still compiles; nothing at all compiles to nothing.
    let criteria = FilterCompiler::compile_request(None, &params, Some(&policy))
        .unwrap()
        .unwrap();
    assert_eq!(criteria, Criteria::eq("t", "x").and(Criteria::eq("u", "y")));
    assert_eq!(
        FilterCompiler::compile_request(None, &params, None).unwrap(),
        None
    );

    // Blank inputs contribute nothing.
    let blank = FilterInput::Text("   ".to_string());
    assert_eq!(
        FilterCompiler::compile_request(Some(&blank), &params, None).unwrap(),
        None
    );
    let empty_policy = PolicyFilter::all_of(vec!["".to_string()]);
    assert_eq!(
        FilterCompiler::compile_request(None, &params, Some(&empty_policy)).unwrap(),
        None
    );
}

#[test]
fn test_policy_fragments_join_under_their_combiner() {
    let params = ParamMap::new();
    let policy = PolicyFilter {
        fragments: vec!["region = eu".to_string(), "region = us".to_string()],
        combiner: LogicalOp::Or,
    };

    let criteria = FilterCompiler::compile_request(None, &params, Some(&policy))
        .unwrap()
        .unwrap();
    assert_eq!(
        criteria,
        Criteria::eq("region", "eu").or(Criteria::eq("region", "us"))
    );

    // The client filter still ANDs onto the joined policy, so an `or`
    // combiner never widens what the client may see.
    let user = FilterInput::Text("a = 1".to_string());
    let criteria = FilterCompiler::compile_request(Some(&user), &params, Some(&policy))
        .unwrap()
        .unwrap();
    let expected = Criteria::Logical {
        op: LogicalOp::And,
        children: vec![
            Criteria::eq("a", 1i64),
            Criteria::eq("region", "eu").or(Criteria::eq("region", "us")),
        ],
    };
    assert_eq!(criteria, expected);
}
