use bson::oid::ObjectId;
use bson::{Bson, doc};
use docbridge_core::error::RecordError;
use docbridge_core::value::ValueCodec;
use serde_json::json;

#[test]
fn test_scalars_convert_to_native_forms() {
    assert_eq!(ValueCodec::to_native(&json!(null), "").unwrap(), Bson::Null);
    assert_eq!(
        ValueCodec::to_native(&json!(true), "").unwrap(),
        Bson::Boolean(true)
    );
    assert_eq!(
        ValueCodec::to_native(&json!(42), "").unwrap(),
        Bson::Int64(42)
    );
    assert_eq!(
        ValueCodec::to_native(&json!(3.5), "").unwrap(),
        Bson::Double(3.5)
    );
    assert_eq!(
        ValueCodec::to_native(&json!(u64::MAX), "").unwrap(),
        Bson::Double(u64::MAX as f64)
    );
    assert_eq!(
        ValueCodec::to_native(&json!("hi"), "").unwrap(),
        Bson::String("hi".to_string())
    );
}

#[test]
fn test_date_tags_accept_every_layout() {
    let utc = ValueCodec::to_native(&json!({"$date": "2024-03-09T10:30:00Z"}), "when").unwrap();
    let offset =
        ValueCodec::to_native(&json!({"$date": "2024-03-09T12:30:00+02:00"}), "when").unwrap();
    let spaced = ValueCodec::to_native(&json!({"$date": "2024-03-09 10:30:00"}), "when").unwrap();
    assert_eq!(utc, offset);
    assert_eq!(utc, spaced);

    let day = ValueCodec::to_native(&json!({"$date": "2024-03-09"}), "when").unwrap();
    assert_eq!(
        ValueCodec::from_native(&day),
        json!("2024-03-09T00:00:00.000Z")
    );

    let epoch = ValueCodec::to_native(&json!({"$date": 86400000i64}), "when").unwrap();
    assert_eq!(epoch, Bson::DateTime(bson::DateTime::from_millis(86_400_000)));

    // Null and the empty string mean "now".
    assert!(matches!(
        ValueCodec::to_native(&json!({"$date": null}), "when").unwrap(),
        Bson::DateTime(_)
    ));
    assert!(matches!(
        ValueCodec::to_native(&json!({"$date": ""}), "when").unwrap(),
        Bson::DateTime(_)
    ));
}

#[test]
fn test_invalid_date_tags_are_validation_errors() {
    let err = ValueCodec::to_native(&json!({"$date": "yesterday"}), "when").unwrap_err();
    assert!(matches!(err, RecordError::Validation(_)));
    assert!(err.to_string().contains("'when'"));

    let err = ValueCodec::to_native(&json!({"$date": true}), "when").unwrap_err();
    assert!(matches!(err, RecordError::Validation(_)));

    let err = ValueCodec::to_native(&json!({"$date": "bad"}), "").unwrap_err();
    assert!(err.to_string().contains("(root)"));
}

#[test]
fn test_id_tags_promote_canonical_hex() {
    let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
    assert_eq!(
        ValueCodec::to_native(&json!({"$id": "507f1f77bcf86cd799439011"}), "ref").unwrap(),
        Bson::ObjectId(oid)
    );
    assert_eq!(
        ValueCodec::to_native(&json!({"$id": "user-42"}), "ref").unwrap(),
        Bson::String("user-42".to_string())
    );

    let err = ValueCodec::to_native(&json!({"$id": 7}), "ref").unwrap_err();
    assert!(matches!(err, RecordError::Validation(_)));
}

#[test]
fn test_tags_only_apply_to_single_key_objects() {
    let native = ValueCodec::to_native(&json!({"$date": "2024-03-09", "note": "kept"}), "")
        .unwrap();
    let Bson::Document(doc) = native else {
        panic!("expected a document");
    };
    assert_eq!(doc.get_str("$date").unwrap(), "2024-03-09");
    assert_eq!(doc.get_str("note").unwrap(), "kept");
}

#[test]
fn test_nested_errors_name_the_dotted_path() {
    let record = json!({
        "items": [
            {"when": {"$date": "2024-03-09"}},
            {"when": {"$date": "2024-03-10"}},
            {"when": {"$date": "never"}},
        ]
    });
    let err = ValueCodec::record_to_native(&record).unwrap_err();
    assert!(err.to_string().contains("'items.2.when'"));
}

#[test]
fn test_record_conversion_requires_an_object() {
    let err = ValueCodec::record_to_native(&json!([1, 2])).unwrap_err();
    assert!(matches!(err, RecordError::Validation(_)));
    assert!(err.to_string().contains("must be a JSON object"));
}

#[test]
fn test_native_values_render_to_wire_forms() {
    assert_eq!(ValueCodec::from_native(&Bson::Int32(7)), json!(7));
    assert_eq!(ValueCodec::from_native(&Bson::Int64(7)), json!(7));
    assert_eq!(ValueCodec::from_native(&Bson::Double(2.5)), json!(2.5));
    assert_eq!(ValueCodec::from_native(&Bson::Double(f64::NAN)), json!(null));

    let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
    assert_eq!(
        ValueCodec::from_native(&Bson::ObjectId(oid)),
        json!("507f1f77bcf86cd799439011")
    );

    let dt = Bson::DateTime(bson::DateTime::from_millis(86_400_000));
    assert_eq!(ValueCodec::from_native(&dt), json!("1970-01-02T00:00:00.000Z"));

    let bin = Bson::Binary(bson::Binary {
        subtype: bson::spec::BinarySubtype::Generic,
        bytes: vec![1, 2, 3],
    });
    assert_eq!(ValueCodec::from_native(&bin), json!("AQID"));
}

#[test]
fn test_records_round_trip_and_keep_field_order() {
    let record = json!({
        "zulu": 1,
        "alpha": {"nested": [true, null, "x"]},
        "mike": 2.5,
    });
    let native = ValueCodec::record_to_native(&record).unwrap();
    assert_eq!(ValueCodec::record_from_native(&native), record);

    let rendered = serde_json::to_string(&ValueCodec::record_from_native(&native)).unwrap();
    let zulu = rendered.find("zulu").unwrap();
    let alpha = rendered.find("alpha").unwrap();
    let mike = rendered.find("mike").unwrap();
    assert!(zulu < alpha && alpha < mike);
}

#[test]
fn test_documents_render_recursively() {
    let doc = doc! {
        "who": ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap(),
        "tags": ["a", "b"],
        "inner": { "n": 1i64 },
    };
    assert_eq!(
        ValueCodec::record_from_native(&doc),
        json!({
            "who": "507f1f77bcf86cd799439011",
            "tags": ["a", "b"],
            "inner": {"n": 1},
        })
    );
}
