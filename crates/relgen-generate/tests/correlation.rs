use std::sync::Arc;

use regex::Regex;
use relgen_config::{ValidatedConfig, validate_config};
use relgen_core::{FieldPath, Value};
use relgen_generate::{CorrelatedDataGenerator, FakeRsFaker, MasterDataGenerator, ReferencePool};
use serde_json::json;

fn carinlane(percentage: f64, max_messages: u64) -> ValidatedConfig {
    let document = json!({
        "seed": 42,
        "master_data": {
            "appointments": {
                "count": 200,
                "kafka_topic": "appointments",
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
                            }
                        }
                    }
                }
            }
        },
        "transactional_data": {
            "carinlane_events": {
                "max_messages": max_messages,
                "relationships": {
                    "appointment_plate": {
                        "source": "appointments.full.Vehicle.cLicenseNrCleaned",
                        "percentage": percentage
                    }
                },
                "schema": {"event_id": {"type": "uuid"}},
                "derived_fields": {
                    "sensor_id": {
                        "type": "conditional",
                        "condition_field": "appointment_plate",
                        "when_true": {"type": "reference", "source": "appointments.id"},
                        "when_false": {"type": "format", "pattern": "S-{random_digits:4}"}
                    }
                }
            }
        }
    });
    validate_config(&document).expect("config").config
}

fn load_pool(config: &ValidatedConfig, faker: &FakeRsFaker) -> Arc<ReferencePool> {
    let mut master = MasterDataGenerator::new(config, faker, 42);
    master.load_all().expect("master load");
    Arc::new(master.into_pool())
}

fn correlated_fraction(config: &ValidatedConfig, pool: &Arc<ReferencePool>, seed: u64) -> f64 {
    let faker = FakeRsFaker::default();
    let entity = config
        .transactional_entity("carinlane_events")
        .expect("events");
    let mut generator = CorrelatedDataGenerator::new(entity, Arc::clone(pool), &faker, seed);
    let mut total = 0_u64;
    let mut correlated = 0_u64;
    for record in generator.generate() {
        let record = record.expect("record");
        total += 1;
        if !record
            .get("appointment_plate")
            .is_none_or(Value::is_null)
        {
            correlated += 1;
        }
    }
    let stats = generator.correlation_stats();
    assert_eq!(stats.relationships[0].correlated, correlated);
    assert_eq!(stats.relationships[0].total(), total);
    correlated as f64 / total as f64
}

#[test]
fn large_runs_converge_to_the_configured_percentage() {
    let config = carinlane(25.0, 10_000);
    let faker = FakeRsFaker::default();
    let pool = load_pool(&config, &faker);
    let fraction = correlated_fraction(&config, &pool, 7);
    assert!((0.20..=0.30).contains(&fraction), "fraction {fraction}");
}

#[test]
fn small_runs_stay_near_the_configured_percentage() {
    let config = carinlane(25.0, 50);
    let faker = FakeRsFaker::default();
    let pool = load_pool(&config, &faker);
    let fractions: Vec<f64> = (0..20)
        .map(|seed| correlated_fraction(&config, &pool, seed))
        .collect();
    let within = fractions
        .iter()
        .filter(|fraction| (0.15..=0.35).contains(*fraction))
        .count();
    let mean = fractions.iter().sum::<f64>() / fractions.len() as f64;
    assert!((0.15..=0.35).contains(&mean), "mean {mean}");
    assert!(within >= 14, "fractions {fractions:?}");
}

#[test]
fn uncorrelated_events_take_the_false_branch() {
    let config = carinlane(25.0, 500);
    let faker = FakeRsFaker::default();
    let pool = load_pool(&config, &faker);
    let entity = config
        .transactional_entity("carinlane_events")
        .expect("events");
    let sensor = Regex::new(r"^S-\d{4}$").expect("regex");
    let appointment = Regex::new(r"^APT-\d{6}$").expect("regex");
    let mut generator = CorrelatedDataGenerator::new(entity, Arc::clone(&pool), &faker, 3);
    for record in generator.generate() {
        let record = record.expect("record");
        let sensor_id = record.get("sensor_id").expect("sensor_id").to_text();
        match record.get("appointment_plate") {
            Some(Value::Null) => assert!(sensor.is_match(&sensor_id), "{sensor_id}"),
            Some(plate) => {
                assert!(appointment.is_match(&sensor_id), "{sensor_id}");
                let cached = pool
                    .get_cached_record("appointments", &Value::from(sensor_id.as_str()))
                    .expect("appointment is cached");
                let path = FieldPath::parse("full.Vehicle.cLicenseNrCleaned").expect("path");
                assert_eq!(cached.get_path(&path), Some(plate));
            }
            None => panic!("relationship field must always be present"),
        }
    }
}

#[test]
fn templated_plates_match_their_shape() {
    let config = carinlane(100.0, 1);
    let faker = FakeRsFaker::default();
    let pool = load_pool(&config, &faker);
    let shape = Regex::new(r"^[MB]\d{3}(AB|CD)$").expect("regex");
    let path = FieldPath::parse("full.Vehicle.cLicenseNrCleaned").expect("path");
    for id in pool.ids("appointments") {
        let record = pool
            .get_cached_record("appointments", id)
            .expect("cached record");
        let plate = record.get_path(&path).expect("plate").to_text();
        assert!(shape.is_match(&plate), "{plate}");
    }
    assert_eq!(pool.get_type_count("appointments"), 200);
}
