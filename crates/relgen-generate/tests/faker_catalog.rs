use relgen_config::{ValidationOptions, validate_config_with};
use relgen_core::{ScalarKind, Value};
use relgen_generate::{FakeRsFaker, MasterDataGenerator};
use serde_json::json;

fn people(method: &str, params: serde_json::Value) -> serde_json::Value {
    json!({
        "locale": "pt_BR",
        "master_data": {
            "people": {
                "count": 25,
                "schema": {
                    "id": {"type": "uuid"},
                    "name": {"type": "faker", "method": method, "params": params},
                    "active": {"type": "faker", "method": "boolean", "params": {"ratio": 100}}
                }
            }
        }
    })
}

fn options(faker: &FakeRsFaker) -> ValidationOptions<'_> {
    ValidationOptions {
        base_dir: None,
        faker: Some(faker),
    }
}

#[test]
fn unknown_methods_and_bad_params_fail_validation() {
    let faker = FakeRsFaker::default();

    let report = validate_config_with(&people("horoscope", json!({})), options(&faker))
        .expect_err("unknown method");
    assert!(report.has_error_at("people.schema.name.method"), "{report}");
    assert_eq!(report.errors[0].code, "unknown_faker_method");

    let report = validate_config_with(
        &people("sentence", json!({"min_words": 9, "max_words": 2})),
        options(&faker),
    )
    .expect_err("inverted bounds");
    assert!(report.has_error_at("people.schema.name.params"), "{report}");
}

#[test]
fn localized_faker_fills_master_records() {
    let faker = FakeRsFaker::new(Some("pt_BR")).expect("locale");
    assert!(FakeRsFaker::new(Some("xx_YY")).is_err());

    let compiled =
        validate_config_with(&people("name", json!({})), options(&faker)).expect("config");
    let mut master = MasterDataGenerator::new(&compiled.config, &faker, 5);
    master.load_all().expect("load");

    let records = master.get_sample("people", 25);
    assert_eq!(records.len(), 25);
    for record in records {
        let name = record.get("name").expect("name");
        assert_eq!(name.scalar_kind(), Some(ScalarKind::String));
        assert!(!name.to_text().is_empty());
        assert_eq!(record.get("active"), Some(&Value::Bool(true)));
    }
}
