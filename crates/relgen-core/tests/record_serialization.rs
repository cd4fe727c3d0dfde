use relgen_core::{FieldPath, Record, Value};

#[test]
fn serializes_record_in_insertion_order() {
    let mut vehicle = Record::new();
    vehicle.insert("plate", Value::from("M123AB"));
    vehicle.insert("seats", Value::Int(5));

    let mut record = Record::new();
    record.insert("zeta", Value::Bool(true));
    record.insert("alpha", Value::Timestamp(1_700_000_000_000));
    record.insert("vehicle", Value::Object(vehicle));
    record.insert("tags", Value::List(vec![Value::from("a"), Value::Null]));

    let json = serde_json::to_string_pretty(&record).expect("serialize record");
    let expected = r#"{
  "zeta": true,
  "alpha": 1700000000000,
  "vehicle": {
    "plate": "M123AB",
    "seats": 5
  },
  "tags": [
    "a",
    null
  ]
}"#;
    assert_eq!(json, expected);
}

#[test]
fn json_conversion_round_trips_nested_records() {
    let json = serde_json::json!({
        "id": "C-1",
        "address": {"city": "Lisbon", "geo": {"lat": 38.72, "lon": -9.14}},
        "active": false
    });
    let record = match Value::from_json(&json) {
        Value::Object(record) => record,
        other => panic!("expected object, got {other:?}"),
    };
    let path = FieldPath::parse("address.geo.lat").expect("path");
    assert_eq!(record.get_path(&path), Some(&Value::Float(38.72)));
    assert_eq!(record.to_json(), json);
}

#[test]
fn set_path_builds_intermediate_objects() {
    let mut record = Record::new();
    let path = FieldPath::parse("full.Vehicle.cLicenseNrCleaned").expect("path");
    record
        .set_path(&path, Value::from("XY42ZZ"))
        .expect("set nested path");
    assert_eq!(record.get_path(&path), Some(&Value::from("XY42ZZ")));
    assert_eq!(record.len(), 1);
}
