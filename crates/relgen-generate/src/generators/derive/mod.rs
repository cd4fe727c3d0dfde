use relgen_config::{ConditionalSpec, TemplatePart, TemplateSpec};
use relgen_core::Value;

use crate::errors::GenerationError;
use crate::generators::{GenerationContext, evaluate};

/// Pick a branch from the record built so far; a missing branch yields null.
pub fn conditional(
    spec: &ConditionalSpec,
    ctx: &mut GenerationContext<'_>,
) -> Result<Value, GenerationError> {
    let current = ctx.record().lookup(&spec.field);
    let holds = match (&spec.value, current) {
        (None | Some(Value::Null), Some(found)) => !found.is_null(),
        (None | Some(Value::Null), None) => false,
        (Some(expected), Some(found)) => loosely_equal(expected, found),
        (Some(_), None) => false,
    };
    let branch = if holds {
        &spec.when_true
    } else {
        &spec.when_false
    };
    match branch {
        Some(branch) => evaluate(branch, ctx),
        None => Ok(Value::Null),
    }
}

/// Numbers compare by value across int and float; everything else structurally.
fn loosely_equal(expected: &Value, found: &Value) -> bool {
    match (expected, found) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            expected.as_f64() == found.as_f64()
        }
        _ => expected == found,
    }
}

/// Evaluate every named sub-spec, then substitute them into the pattern.
pub fn template(
    spec: &TemplateSpec,
    ctx: &mut GenerationContext<'_>,
) -> Result<String, GenerationError> {
    let mut rendered: Vec<(&str, String)> = Vec::with_capacity(spec.fields.len());
    for (name, field) in &spec.fields {
        let value = evaluate(field, ctx)?;
        rendered.push((name.as_str(), value.to_text()));
    }

    let mut out = String::with_capacity(spec.pattern.len());
    for part in &spec.parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(text),
            TemplatePart::Field(name) => {
                if let Some((_, text)) = rendered.iter().find(|(field, _)| field == name) {
                    out.push_str(text);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use relgen_core::FieldPath;

    use super::*;
    use crate::faker_rs::FakeRsFaker;

    #[test]
    fn concrete_condition_compares_numbers_loosely() {
        let faker = FakeRsFaker::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = GenerationContext::new(&faker, &mut rng, 1, 0);
        ctx.record_mut().insert("status", Value::Float(2.0));
        let spec = ConditionalSpec {
            field: FieldPath::field("status"),
            value: Some(Value::Int(2)),
            when_true: Some(relgen_config::ValueSpec::Choice(vec![Value::from("two")])),
            when_false: None,
        };
        assert_eq!(conditional(&spec, &mut ctx).expect("eval"), Value::from("two"));

        ctx.record_mut().insert("status", Value::Int(3));
        assert_eq!(conditional(&spec, &mut ctx).expect("eval"), Value::Null);
    }

    #[test]
    fn missing_condition_field_is_false() {
        let faker = FakeRsFaker::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ctx = GenerationContext::new(&faker, &mut rng, 1, 0);
        let spec = ConditionalSpec {
            field: FieldPath::field("absent"),
            value: None,
            when_true: Some(relgen_config::ValueSpec::Choice(vec![Value::from("yes")])),
            when_false: Some(relgen_config::ValueSpec::Choice(vec![Value::from("no")])),
        };
        assert_eq!(conditional(&spec, &mut ctx).expect("eval"), Value::from("no"));
    }
}
