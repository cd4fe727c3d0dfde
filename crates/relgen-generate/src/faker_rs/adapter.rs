use fake::Fake;
use rand::RngCore;
use relgen_config::FakerCatalog;
use relgen_core::{ScalarKind, Value};
use serde_json::{Map, Value as Json};

use crate::errors::GenerationError;
use crate::faker_rs::Faker;
use crate::faker_rs::locales::{DEFAULT_LOCALE, LocaleKey};
use crate::faker_rs::params::{ParamKind, ParamMap, ParamSpec, validate_params};

const PASSWORD_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("min_len", ParamKind::Int, false),
    ParamSpec::new("max_len", ParamKind::Int, false),
];

const WORDS_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("count", ParamKind::Int, false),
    ParamSpec::new("separator", ParamKind::String, false),
];

const SENTENCE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("min_words", ParamKind::Int, false),
    ParamSpec::new("max_words", ParamKind::Int, false),
];

const BOOLEAN_PARAMS: &[ParamSpec] = &[ParamSpec::new("ratio", ParamKind::Int, false)];

struct MethodEntry {
    id: &'static str,
    kind: ScalarKind,
    params: &'static [ParamSpec],
}

const fn text(id: &'static str) -> MethodEntry {
    MethodEntry {
        id,
        kind: ScalarKind::String,
        params: &[],
    }
}

const METHODS: &[MethodEntry] = &[
    text("name.full"),
    text("name.first_name"),
    text("name.last_name"),
    text("name.with_title"),
    text("internet.safe_email"),
    text("internet.free_email"),
    text("internet.username"),
    text("internet.ipv4"),
    MethodEntry {
        id: "internet.password",
        kind: ScalarKind::String,
        params: PASSWORD_PARAMS,
    },
    text("address.city"),
    text("address.street"),
    text("address.state"),
    text("address.country"),
    text("address.zip"),
    text("address.building_number"),
    text("phone.number"),
    text("phone.cell"),
    text("company.name"),
    text("company.industry"),
    text("company.buzzword"),
    text("lorem.word"),
    MethodEntry {
        id: "lorem.words",
        kind: ScalarKind::String,
        params: WORDS_PARAMS,
    },
    MethodEntry {
        id: "lorem.sentence",
        kind: ScalarKind::String,
        params: SENTENCE_PARAMS,
    },
    text("number.digit"),
    MethodEntry {
        id: "boolean",
        kind: ScalarKind::Bool,
        params: BOOLEAN_PARAMS,
    },
];

/// Short names accepted in configs, mapped to catalog ids.
const ALIASES: &[(&str, &str)] = &[
    ("name", "name.full"),
    ("first_name", "name.first_name"),
    ("last_name", "name.last_name"),
    ("email", "internet.safe_email"),
    ("free_email", "internet.free_email"),
    ("user_name", "internet.username"),
    ("ipv4", "internet.ipv4"),
    ("password", "internet.password"),
    ("city", "address.city"),
    ("street_name", "address.street"),
    ("state", "address.state"),
    ("country", "address.country"),
    ("zipcode", "address.zip"),
    ("postcode", "address.zip"),
    ("building_number", "address.building_number"),
    ("phone_number", "phone.number"),
    ("cell_number", "phone.cell"),
    ("company", "company.name"),
    ("word", "lorem.word"),
    ("words", "lorem.words"),
    ("sentence", "lorem.sentence"),
    ("digit", "number.digit"),
];

/// Expands to one `fake_with_rng` call in the requested locale.
macro_rules! localized {
    ($locale:expr, $rng:expr, $module:ident :: $faker:ident ( $($arg:expr),* ) as $out:ty) => {
        match $locale {
            LocaleKey::EnUs => fake::faker::$module::en::$faker($($arg),*).fake_with_rng::<$out, _>($rng),
            LocaleKey::PtBr => fake::faker::$module::pt_br::$faker($($arg),*).fake_with_rng::<$out, _>($rng),
        }
    };
    ($locale:expr, $rng:expr, $module:ident :: $faker:ident ( $($arg:expr),* )) => {
        match $locale {
            LocaleKey::EnUs => fake::faker::$module::en::$faker($($arg),*).fake_with_rng::<String, _>($rng),
            LocaleKey::PtBr => fake::faker::$module::pt_br::$faker($($arg),*).fake_with_rng::<String, _>($rng),
        }
    };
}

/// [`Faker`] backed by the `fake` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeRsFaker {
    locale: LocaleKey,
}

impl FakeRsFaker {
    pub fn new(locale: Option<&str>) -> Result<Self, GenerationError> {
        let locale_str = locale.unwrap_or_else(|| DEFAULT_LOCALE.as_str());
        let locale = LocaleKey::parse(locale_str).ok_or_else(|| {
            GenerationError::Faker(format!("unsupported faker locale '{locale_str}'"))
        })?;
        Ok(Self { locale })
    }

    pub fn locale(&self) -> LocaleKey {
        self.locale
    }

    pub fn list_ids() -> impl Iterator<Item = &'static str> {
        METHODS.iter().map(|entry| entry.id)
    }

    fn resolve(method: &str) -> Option<&'static MethodEntry> {
        let id = ALIASES
            .iter()
            .find(|(alias, _)| *alias == method)
            .map(|(_, target)| *target)
            .unwrap_or(method);
        METHODS.iter().find(|entry| entry.id == id)
    }

    fn generate(
        &self,
        entry: &MethodEntry,
        params: &ParamMap<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, String> {
        let locale = self.locale;
        let text = match entry.id {
            "name.full" => localized!(locale, rng, name::Name()),
            "name.first_name" => localized!(locale, rng, name::FirstName()),
            "name.last_name" => localized!(locale, rng, name::LastName()),
            "name.with_title" => localized!(locale, rng, name::NameWithTitle()),
            "internet.safe_email" => localized!(locale, rng, internet::SafeEmail()),
            "internet.free_email" => localized!(locale, rng, internet::FreeEmail()),
            "internet.username" => localized!(locale, rng, internet::Username()),
            "internet.ipv4" => localized!(locale, rng, internet::IPv4()),
            "internet.password" => {
                let (min, max) = bounds(params, "min_len", "max_len", (8, 16))?;
                localized!(locale, rng, internet::Password(min..max + 1))
            }
            "address.city" => localized!(locale, rng, address::CityName()),
            "address.street" => localized!(locale, rng, address::StreetName()),
            "address.state" => localized!(locale, rng, address::StateName()),
            "address.country" => localized!(locale, rng, address::CountryName()),
            "address.zip" => localized!(locale, rng, address::ZipCode()),
            "address.building_number" => localized!(locale, rng, address::BuildingNumber()),
            "phone.number" => localized!(locale, rng, phone_number::PhoneNumber()),
            "phone.cell" => localized!(locale, rng, phone_number::CellNumber()),
            "company.name" => localized!(locale, rng, company::CompanyName()),
            "company.industry" => localized!(locale, rng, company::Industry()),
            "company.buzzword" => localized!(locale, rng, company::Buzzword()),
            "lorem.word" => localized!(locale, rng, lorem::Word()),
            "lorem.words" => {
                let count = params.get_usize_or("count", 3)?;
                let separator = params.get_str("separator").unwrap_or(" ");
                localized!(locale, rng, lorem::Words(count..count + 1) as Vec<String>)
                    .join(separator)
            }
            "lorem.sentence" => {
                let (min, max) = bounds(params, "min_words", "max_words", (4, 10))?;
                localized!(locale, rng, lorem::Sentence(min..max + 1))
            }
            "number.digit" => fake::faker::number::en::Digit().fake_with_rng(rng),
            "boolean" => {
                let ratio = boolean_ratio(params)?;
                let value: bool = fake::faker::boolean::en::Boolean(ratio).fake_with_rng(rng);
                return Ok(Value::Bool(value));
            }
            other => return Err(format!("faker method '{other}' has no generator")),
        };
        Ok(Value::String(text))
    }
}

fn bounds(
    params: &ParamMap<'_>,
    min_key: &str,
    max_key: &str,
    defaults: (usize, usize),
) -> Result<(usize, usize), String> {
    let min = params.get_usize_or(min_key, defaults.0)?;
    let max = params.get_usize_or(max_key, defaults.1.max(min))?;
    if min > max {
        return Err(format!("{min_key} {min} is greater than {max_key} {max}"));
    }
    Ok((min, max))
}

fn boolean_ratio(params: &ParamMap<'_>) -> Result<u8, String> {
    let ratio = params.get_usize_or("ratio", 50)?;
    u8::try_from(ratio)
        .ok()
        .filter(|ratio| *ratio <= 100)
        .ok_or_else(|| format!("ratio {ratio} must be within [0, 100]"))
}

/// Validate params and their cross-field constraints in one go.
fn checked_params<'a>(
    entry: &MethodEntry,
    params: &'a Map<String, Json>,
) -> Result<ParamMap<'a>, String> {
    let parsed = validate_params(params, entry.params, entry.id)?;
    match entry.id {
        "internet.password" => {
            bounds(&parsed, "min_len", "max_len", (8, 16))?;
        }
        "lorem.sentence" => {
            bounds(&parsed, "min_words", "max_words", (4, 10))?;
        }
        "lorem.words" => {
            parsed.get_usize_or("count", 3)?;
        }
        "boolean" => {
            boolean_ratio(&parsed)?;
        }
        _ => {}
    }
    Ok(parsed)
}

impl FakerCatalog for FakeRsFaker {
    fn supports(&self, method: &str) -> bool {
        Self::resolve(method).is_some()
    }

    fn check_params(&self, method: &str, params: &Map<String, Json>) -> Result<(), String> {
        let entry =
            Self::resolve(method).ok_or_else(|| format!("unsupported faker method '{method}'"))?;
        checked_params(entry, params).map(|_| ())
    }

    fn output_kind(&self, method: &str) -> Option<ScalarKind> {
        Self::resolve(method).map(|entry| entry.kind)
    }

    fn supports_locale(&self, locale: &str) -> bool {
        LocaleKey::parse(locale).is_some()
    }
}

impl Faker for FakeRsFaker {
    fn call(
        &self,
        method: &str,
        params: &Map<String, Json>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError> {
        let entry = Self::resolve(method)
            .ok_or_else(|| GenerationError::Faker(format!("unsupported faker method '{method}'")))?;
        let params = checked_params(entry, params).map_err(GenerationError::Faker)?;
        self.generate(entry, &params, rng)
            .map_err(GenerationError::Faker)
    }
}
