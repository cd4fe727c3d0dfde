//! Interpreter for declarative field specs.

use std::collections::HashMap;
use std::sync::Arc;

use rand_chacha::ChaCha8Rng;
use relgen_config::{ObjectSpec, ReferenceSpec, ValueSpec};
use relgen_core::{FieldPath, Record, Value};

use crate::errors::GenerationError;
use crate::faker_rs::Faker;

pub mod derive;
pub mod primitives;

/// State visible to a spec while one record is being built.
pub struct GenerationContext<'a> {
    faker: &'a dyn Faker,
    rng: &'a mut ChaCha8Rng,
    /// 1-based position of the record within its entity.
    sequence: u64,
    now_millis: i64,
    record: Record,
    relationships: HashMap<String, Option<Arc<Record>>>,
}

impl<'a> GenerationContext<'a> {
    pub fn new(
        faker: &'a dyn Faker,
        rng: &'a mut ChaCha8Rng,
        sequence: u64,
        now_millis: i64,
    ) -> Self {
        Self {
            faker,
            rng,
            sequence,
            now_millis,
            record: Record::new(),
            relationships: HashMap::new(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn now_millis(&self) -> i64 {
        self.now_millis
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut *self.rng
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Register the record a relationship resolved to; `None` when uncorrelated.
    pub fn set_relationship(&mut self, entity: &str, record: Option<Arc<Record>>) {
        self.relationships.insert(entity.to_string(), record);
    }

    pub fn relationship(&self, entity: &str) -> Option<&Record> {
        self.relationships
            .get(entity)
            .and_then(|record| record.as_deref())
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    /// Resolve a `self.*` or `entity.*` source; anything unresolved is null.
    pub fn resolve_reference(&self, reference: &ReferenceSpec) -> Value {
        let found = match reference {
            ReferenceSpec::SelfField(path) => self.record.lookup(path),
            ReferenceSpec::Entity { entity, path } => self
                .relationship(entity)
                .and_then(|record| record.lookup(path)),
        };
        found.cloned().unwrap_or_default()
    }
}

/// Evaluate one spec to a value.
pub fn evaluate(
    spec: &ValueSpec,
    ctx: &mut GenerationContext<'_>,
) -> Result<Value, GenerationError> {
    let value = match spec {
        ValueSpec::Format(format) => {
            let sequence = ctx.sequence;
            Value::String(primitives::format(format, sequence, &mut *ctx.rng))
        }
        ValueSpec::Faker(call) => ctx.faker.call(&call.method, &call.params, &mut *ctx.rng)?,
        ValueSpec::Uuid => Value::String(primitives::uuid(&mut *ctx.rng)),
        ValueSpec::IntRange { min, max } => {
            Value::Int(primitives::int_range(*min, *max, &mut *ctx.rng))
        }
        ValueSpec::FloatRange { min, max, decimals } => {
            Value::Float(primitives::float_range(*min, *max, *decimals, &mut *ctx.rng))
        }
        ValueSpec::Choice(choices) => primitives::choice(choices, &mut *ctx.rng),
        ValueSpec::WeightedChoice { choices, weights } => {
            primitives::weighted_choice(choices, weights, &mut *ctx.rng)
        }
        ValueSpec::TimestampMillis(timestamp) => {
            let anchor = timestamp
                .relative_to
                .as_ref()
                .map(|reference| ctx.resolve_reference(reference));
            let now = ctx.now_millis;
            primitives::timestamp(timestamp, anchor.as_ref(), now, &mut *ctx.rng)
        }
        ValueSpec::RandomBoolean { probability } => {
            Value::Bool(primitives::random_boolean(*probability, &mut *ctx.rng))
        }
        ValueSpec::Conditional(conditional) => derive::conditional(conditional, ctx)?,
        ValueSpec::Template(template) => Value::String(derive::template(template, ctx)?),
        ValueSpec::Reference(reference) => ctx.resolve_reference(reference),
        ValueSpec::Object(object) => Value::Object(evaluate_detached(object, ctx)?),
    };
    Ok(value)
}

/// Evaluate an object spec into a standalone record.
///
/// Used for objects nested in templates and conditional branches, whose
/// fields are not part of the record under construction.
pub fn evaluate_detached(
    object: &ObjectSpec,
    ctx: &mut GenerationContext<'_>,
) -> Result<Record, GenerationError> {
    let mut record = Record::with_capacity(object.fields.len());
    for (name, spec) in &object.fields {
        let value = evaluate(spec, ctx)?;
        record.insert(name.clone(), value);
    }
    Ok(record)
}

/// Evaluate a schema field by field into the record under construction.
///
/// Each value is placed before the next field is evaluated, so later fields
/// see earlier siblings through `self.*` references, at any depth.
pub fn populate(
    object: &ObjectSpec,
    ctx: &mut GenerationContext<'_>,
    prefix: Option<&FieldPath>,
) -> Result<(), GenerationError> {
    for (name, spec) in &object.fields {
        let path = match prefix {
            Some(prefix) => prefix.child(name),
            None => FieldPath::field(name),
        };
        match spec {
            ValueSpec::Object(child) => {
                ctx.record.set_path(&path, Value::Object(Record::new()))?;
                populate(child, ctx, Some(&path))?;
            }
            other => {
                let value = evaluate(other, ctx)?;
                ctx.record.set_path(&path, value)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use relgen_config::{ConditionalSpec, FormatPart, FormatSpec, TemplatePart, TemplateSpec};

    use super::*;
    use crate::faker_rs::FakeRsFaker;

    fn parse(raw: &str) -> FieldPath {
        FieldPath::parse(raw).expect("path")
    }

    #[test]
    fn populate_exposes_earlier_siblings_to_references() {
        let faker = FakeRsFaker::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = GenerationContext::new(&faker, &mut rng, 7, 0);
        let schema = ObjectSpec {
            fields: vec![
                (
                    "id".to_string(),
                    ValueSpec::Format(FormatSpec {
                        pattern: "C-{seq:03d}".to_string(),
                        parts: vec![
                            FormatPart::Literal("C-".to_string()),
                            FormatPart::Seq { width: Some(3) },
                        ],
                    }),
                ),
                (
                    "meta".to_string(),
                    ValueSpec::Object(ObjectSpec {
                        fields: vec![(
                            "copy".to_string(),
                            ValueSpec::Reference(ReferenceSpec::SelfField(parse("id"))),
                        )],
                    }),
                ),
            ],
        };
        populate(&schema, &mut ctx, None).expect("populate");
        let record = ctx.into_record();
        assert_eq!(record.get("id"), Some(&Value::from("C-007")));
        assert_eq!(record.get_path(&parse("meta.copy")), Some(&Value::from("C-007")));
    }

    #[test]
    fn null_relationship_takes_the_false_branch() {
        let faker = FakeRsFaker::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ctx = GenerationContext::new(&faker, &mut rng, 1, 0);
        ctx.record_mut().insert("appointment_plate", Value::Null);
        ctx.set_relationship("appointments", None);
        let spec = ValueSpec::Conditional(Box::new(ConditionalSpec {
            field: parse("appointment_plate"),
            value: None,
            when_true: Some(ValueSpec::Reference(ReferenceSpec::Entity {
                entity: "appointments".to_string(),
                path: parse("id"),
            })),
            when_false: Some(ValueSpec::Choice(vec![Value::from("UNMATCHED")])),
        }));
        assert_eq!(evaluate(&spec, &mut ctx).expect("eval"), Value::from("UNMATCHED"));

        let mut appointment = Record::new();
        appointment.insert("id", Value::from("APT-1"));
        ctx.set_relationship("appointments", Some(Arc::new(appointment)));
        ctx.record_mut().insert("appointment_plate", Value::from("M123AB"));
        assert_eq!(evaluate(&spec, &mut ctx).expect("eval"), Value::from("APT-1"));
    }

    #[test]
    fn template_substitutes_independent_fields() {
        let faker = FakeRsFaker::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut ctx = GenerationContext::new(&faker, &mut rng, 1, 0);
        let spec = ValueSpec::Template(TemplateSpec {
            pattern: "{a}-{b}".to_string(),
            parts: vec![
                TemplatePart::Field("a".to_string()),
                TemplatePart::Literal("-".to_string()),
                TemplatePart::Field("b".to_string()),
            ],
            fields: vec![
                ("a".to_string(), ValueSpec::Choice(vec![Value::from("X")])),
                ("b".to_string(), ValueSpec::IntRange { min: 4, max: 4 }),
            ],
        });
        assert_eq!(evaluate(&spec, &mut ctx).expect("eval"), Value::from("X-4"));
    }

    #[test]
    fn missing_entity_reference_is_null() {
        let faker = FakeRsFaker::default();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let ctx = GenerationContext::new(&faker, &mut rng, 1, 0);
        let reference = ReferenceSpec::Entity {
            entity: "customers".to_string(),
            path: parse("address.city"),
        };
        assert_eq!(ctx.resolve_reference(&reference), Value::Null);
    }
}
