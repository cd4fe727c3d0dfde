use chrono::DateTime;
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::seq::IndexedRandom;
use relgen_config::{FormatPart, FormatSpec, TimestampFallback, TimestampSpec};
use relgen_core::Value;

const MILLIS_PER_MINUTE: i64 = 60_000;
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Render a parsed format pattern for the `sequence`-th record.
pub fn format(spec: &FormatSpec, sequence: u64, rng: &mut impl Rng) -> String {
    let mut out = String::with_capacity(spec.pattern.len());
    for part in &spec.parts {
        match part {
            FormatPart::Literal(text) => out.push_str(text),
            FormatPart::Seq { width: Some(width) } => {
                out.push_str(&format!("{sequence:0width$}"));
            }
            FormatPart::Seq { width: None } => out.push_str(&sequence.to_string()),
            FormatPart::RandomDigits(count) => {
                for _ in 0..*count {
                    let digit = rng.random_range(0..10_u8);
                    out.push(char::from(b'0' + digit));
                }
            }
            FormatPart::RandomLetters(count) => {
                for _ in 0..*count {
                    let idx = rng.random_range(0..LETTERS.len());
                    out.push(char::from(LETTERS[idx]));
                }
            }
        }
    }
    out
}

/// Random v4 UUID drawn from the seeded generator.
pub fn uuid(rng: &mut impl Rng) -> String {
    let mut bytes = [0_u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

pub fn int_range(min: i64, max: i64, rng: &mut impl Rng) -> i64 {
    if min >= max {
        return min;
    }
    rng.random_range(min..=max)
}

/// Uniform float in `min..=max`, rounded to `decimals` when given.
///
/// Interpolates instead of sampling the span so bounds whose difference
/// overflows `f64` stay usable.
pub fn float_range(min: f64, max: f64, decimals: Option<u32>, rng: &mut impl Rng) -> f64 {
    let value = if min >= max {
        min
    } else {
        let unit: f64 = rng.random();
        (min * (1.0 - unit) + max * unit).clamp(min, max)
    };
    match decimals {
        Some(decimals) => {
            let factor = 10_f64.powi(decimals as i32);
            let scaled = value * factor;
            if !scaled.is_finite() {
                return value;
            }
            (scaled.round() / factor).clamp(min, max)
        }
        None => value,
    }
}

pub fn choice(choices: &[Value], rng: &mut impl Rng) -> Value {
    choices.choose(rng).cloned().unwrap_or_default()
}

/// Sample proportionally to `weights`; invalid weights degrade to a uniform pick.
pub fn weighted_choice(choices: &[Value], weights: &[f64], rng: &mut impl Rng) -> Value {
    match WeightedIndex::new(weights) {
        Ok(index) => choices
            .get(index.sample(rng))
            .cloned()
            .unwrap_or_default(),
        Err(_) => choice(choices, rng),
    }
}

/// Epoch-millis timestamp, anchored to `anchor` when it resolves to an instant.
pub fn timestamp(spec: &TimestampSpec, anchor: Option<&Value>, now: i64, rng: &mut impl Rng) -> Value {
    let Some(anchor) = anchor else {
        return Value::Timestamp(now);
    };
    match anchor_millis(anchor) {
        Some(base) => {
            let (min, max) = spec.offset_minutes;
            let offset = int_range(min, max, rng);
            Value::Timestamp(base.saturating_add(offset.saturating_mul(MILLIS_PER_MINUTE)))
        }
        None => match spec.fallback {
            TimestampFallback::Now => Value::Timestamp(now),
            TimestampFallback::Null => Value::Null,
        },
    }
}

fn anchor_millis(anchor: &Value) -> Option<i64> {
    match anchor {
        Value::Int(millis) | Value::Timestamp(millis) => Some(*millis),
        Value::Float(millis) if millis.is_finite() => Some(*millis as i64),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(text.trim())
                    .ok()
                    .map(|parsed| parsed.timestamp_millis())
            }),
        _ => None,
    }
}

pub fn random_boolean(probability: f64, rng: &mut impl Rng) -> bool {
    rng.random_bool(probability.clamp(0.0, 1.0))
}
