use std::path::PathBuf;

use relgen_config::validate_config;
use relgen_core::{FieldPath, Value};
use relgen_generate::{FakeRsFaker, GenerationError, MasterDataGenerator, MemorySink};
use serde_json::json;

fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("relgen_{label}_{}", uuid::Uuid::new_v4()))
}

fn appointments_document(export: &str) -> serde_json::Value {
    json!({
        "seed": 42,
        "master_data": {
            "appointments": {
                "count": 1000,
                "kafka_topic": "appointments",
                "key_field": "id",
                "csv_export": {"file": export, "delimiter": ";"},
                "schema": {
                    "id": {"type": "format", "pattern": "APT-{seq:06d}"},
                    "full": {
                        "Vehicle": {
                            "cLicenseNrCleaned": {
                                "type": "template",
                                "pattern": "{prefix}{digits}{suffix}",
                                "fields": {
                                    "prefix": {"type": "choice", "choices": ["M", "B"]},
                                    "digits": {"type": "format", "pattern": "{random_digits:3}"},
                                    "suffix": {"type": "choice", "choices": ["AB", "CD"]}
                                }
                            },
                            "axles": {"type": "int_range", "min": 2, "max": 6}
                        },
                        "Customer": {
                            "name": {"type": "faker", "method": "name"},
                            "postcode": {"type": "format", "pattern": "0{random_digits:4}"}
                        }
                    },
                    "price": {"type": "float_range", "min": 10.0, "max": 500.0, "decimals": 2},
                    "weight": {"type": "float_range", "min": 0.5, "max": 3.5},
                    "express": {"type": "random_boolean", "probability": 0.3},
                    "scheduled_at": {"type": "timestamp_millis"},
                    "status": {"type": "weighted_choice", "choices": ["open", "done"], "weights": [3, 1]}
                }
            },
            "appointments_from_csv": {
                "source": "csv",
                "file": export,
                "delimiter": ";",
                "bulk_load": false,
                "schema_from": "appointments"
            }
        }
    })
}

#[test]
fn exported_appointments_reimport_identically() {
    let dir = temp_dir("round_trip");
    let export = dir.join("appointments.csv").to_string_lossy().to_string();
    let compiled = validate_config(&appointments_document(&export)).expect("config");
    let faker = FakeRsFaker::default();

    let mut master = MasterDataGenerator::new(&compiled.config, &faker, 42);
    master.load_all().expect("load");
    let pool = master.pool();

    assert_eq!(pool.get_type_count("appointments"), 1000);
    assert_eq!(pool.get_type_count("appointments_from_csv"), 1000);
    assert_eq!(
        master.csv_exports().get("appointments"),
        Some(&PathBuf::from(&export))
    );

    for id in pool.ids("appointments") {
        let original = pool
            .get_cached_record("appointments", id)
            .expect("original");
        let imported = pool
            .get_cached_record("appointments_from_csv", id)
            .expect("imported");
        for (column, value) in original.flatten() {
            let path = FieldPath::parse(&column).expect("path");
            assert_eq!(imported.get_path(&path), Some(&value), "{id} {column}");
        }
        assert_eq!(original, imported);
    }

    let sample = master.get_sample("appointments_from_csv", 1);
    let postcode = FieldPath::parse("full.Customer.postcode").expect("path");
    assert!(matches!(
        sample[0].get_path(&postcode),
        Some(Value::String(code)) if code.starts_with('0') && code.len() == 5
    ));

    let mut sink = MemorySink::new();
    let produced = master.produce_all(&mut sink).expect("produce");
    assert_eq!(produced.get("appointments"), Some(&1000));
    assert!(sink.topic("appointments_from_csv").is_empty());
    assert_eq!(sink.len(), 1000);
}

fn tickets_document(flat: &str, nested: &str) -> serde_json::Value {
    let schema = json!({
        "id": {"type": "format", "pattern": "T-{seq:04d}"},
        "note": {"type": "choice", "choices": ["", "fragile"]},
        "code": {"type": "format", "pattern": "9{random_digits:2}"},
        "code_copy": {"type": "reference", "source": "self.code"},
        "agent": {"type": "faker", "method": "name"},
        "flag": {"type": "faker", "method": "boolean"},
        "vip": {
            "type": "conditional",
            "condition_field": "flag",
            "condition_value": true,
            "when_true": {"type": "choice", "choices": ["gold"]}
        },
        "meta": {
            "created": {"type": "timestamp_millis"},
            "score": {"type": "float_range", "min": 0.0, "max": 5.0, "decimals": 1},
            "label": {"type": "choice", "choices": ["", "7"]}
        }
    });
    json!({
        "seed": 9,
        "master_data": {
            "tickets": {
                "count": 300,
                "csv_export": {"file": flat},
                "schema": schema.clone()
            },
            "archived_tickets": {
                "count": 300,
                "csv_export": {"file": nested, "flatten_objects": false},
                "schema": schema
            },
            "tickets_from_csv": {
                "source": "csv",
                "file": flat,
                "schema_from": "tickets"
            },
            "archived_tickets_from_csv": {
                "source": "csv",
                "file": nested,
                "schema_from": "archived_tickets"
            }
        }
    })
}

#[test]
fn reimport_keeps_empty_strings_nulls_and_copied_kinds() {
    let dir = temp_dir("tickets");
    let flat = dir.join("tickets.csv").to_string_lossy().to_string();
    let nested = dir.join("archived_tickets.csv").to_string_lossy().to_string();
    let compiled = validate_config(&tickets_document(&flat, &nested)).expect("config");
    let faker = FakeRsFaker::default();
    let mut master = MasterDataGenerator::new(&compiled.config, &faker, 9);
    master.load_all().expect("load");
    let pool = master.pool();

    let mut empty_notes = 0;
    let mut null_vips = 0;
    for (source, copy) in [
        ("tickets", "tickets_from_csv"),
        ("archived_tickets", "archived_tickets_from_csv"),
    ] {
        assert_eq!(pool.get_type_count(copy), 300);
        for id in pool.ids(source) {
            let original = pool.get_cached_record(source, id).expect("original");
            let imported = pool.get_cached_record(copy, id).expect("imported");
            assert_eq!(original, imported, "{copy} {id}");
            if imported.get("note") == Some(&Value::from("")) {
                empty_notes += 1;
            }
            if imported.get("vip") == Some(&Value::Null) {
                null_vips += 1;
            }
            assert!(matches!(imported.get("code_copy"), Some(Value::String(_))));
            let created = FieldPath::parse("meta.created").expect("path");
            assert!(matches!(imported.get_path(&created), Some(Value::Timestamp(_))));
        }
    }
    assert!(empty_notes > 0);
    assert!(null_vips > 0);
}

#[test]
fn corrupt_csv_is_a_load_error() {
    let dir = temp_dir("corrupt");
    std::fs::create_dir_all(&dir).expect("dir");
    let file = dir.join("customers.csv");
    std::fs::write(&file, "id,age\nC1,31\nC2,thirty\n").expect("write");
    let document = json!({
        "master_data": {
            "customers": {
                "source": "csv",
                "file": file.to_string_lossy(),
                "schema": {
                    "id": {"type": "uuid"},
                    "age": {"type": "int_range", "min": 18, "max": 90}
                }
            }
        }
    });
    let compiled = validate_config(&document).expect("config");
    let faker = FakeRsFaker::default();
    let mut master = MasterDataGenerator::new(&compiled.config, &faker, 1);
    match master.load_all() {
        Err(GenerationError::Load { entity, message }) => {
            assert_eq!(entity, "customers");
            assert!(message.contains("thirty"), "{message}");
        }
        other => panic!("expected load error, got {other:?}"),
    }
}
