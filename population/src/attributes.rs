//! Deterministic per-segment attribute generation.
//!
//! Attributes are a pure function of the segment id: the id is hashed with
//! SHA-256 and the first eight bytes seed a generator that lives only for the
//! duration of one call. No generator state is shared between segments, so
//! generation order and parallelism never change the result.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Named attribute values for one segment, sorted by field name.
pub type Attributes = BTreeMap<String, AttributeValue>;

const SEXES: &[&str] = &["female", "male"];

const RACES: &[&str] = &[
    "White",
    "Black",
    "Hispanic",
    "Asian",
    "Multiracial",
    "Native American",
];

const INCOME_BANDS: &[&str] = &["low", "lower_middle", "middle", "upper_middle", "high"];

const CONNECTEDNESS: &[&str] = &["limited", "average", "connected", "active"];

/// A scalar or boolean attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{:.2}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// A category-specific override applied after generic sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AttributeRule {
    /// Set a field to a fixed value
    Fixed { field: String, value: AttributeValue },
    /// Resample an integer field uniformly in `min..=max`
    IntRange { field: String, min: i64, max: i64 },
    /// Resample a boolean field that is true with the given probability
    Chance { field: String, probability: f64 },
    /// Resample a text field from a list of options
    OneOf { field: String, options: Vec<String> },
}

impl AttributeRule {
    /// Field this rule writes.
    pub fn field(&self) -> &str {
        match self {
            Self::Fixed { field, .. }
            | Self::IntRange { field, .. }
            | Self::Chance { field, .. }
            | Self::OneOf { field, .. } => field,
        }
    }

    /// Reason this rule cannot be applied, if any.
    pub fn problem(&self) -> Option<String> {
        match self {
            Self::IntRange { min, max, .. } if min > max => {
                Some(format!("empty range {}..={}", min, max))
            }
            Self::Chance { probability, .. } if !(0.0..=1.0).contains(probability) => {
                Some(format!("probability {} outside 0.0..=1.0", probability))
            }
            Self::OneOf { options, .. } if options.is_empty() => {
                Some("no options to choose from".to_string())
            }
            _ => None,
        }
    }

    fn apply(&self, attributes: &mut Attributes, rng: &mut StdRng) {
        if self.problem().is_some() {
            return;
        }
        let value = match self {
            Self::Fixed { value, .. } => value.clone(),
            Self::IntRange { min, max, .. } => AttributeValue::Int(rng.gen_range(*min..=*max)),
            Self::Chance { probability, .. } => AttributeValue::Bool(rng.gen_bool(*probability)),
            Self::OneOf { options, .. } => {
                AttributeValue::Text(options[rng.gen_range(0..options.len())].clone())
            }
        };
        attributes.insert(self.field().to_string(), value);
    }
}

/// Seed derived from the SHA-256 of `id` (first 8 bytes, big-endian).
pub fn seed_for(id: &str) -> u64 {
    let digest = Sha256::digest(id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Attributes for a segment id, with category overrides applied in order.
pub fn attributes_for(id: &str, overrides: &[AttributeRule]) -> Attributes {
    let mut rng = StdRng::seed_from_u64(seed_for(id));
    let mut attributes = Attributes::new();

    let mut put = |name: &str, value: AttributeValue| {
        attributes.insert(name.to_string(), value);
    };

    put("age", AttributeValue::Int(rng.gen_range(18..=90)));
    put("sex", AttributeValue::Text(pick(&mut rng, SEXES)));
    put("race", AttributeValue::Text(pick(&mut rng, RACES)));
    put("household_size", AttributeValue::Int(rng.gen_range(1..=6)));
    put("has_vehicle", AttributeValue::Bool(rng.gen_bool(0.8)));
    put("has_pets", AttributeValue::Bool(rng.gen_bool(0.45)));
    put("mobility_limited", AttributeValue::Bool(rng.gen_bool(0.12)));
    put("income_band", AttributeValue::Text(pick(&mut rng, INCOME_BANDS)));
    let risk = (rng.gen_range(0.0..=1.0_f64) * 100.0).round() / 100.0;
    put("risk_tolerance", AttributeValue::Float(risk));
    put(
        "social_connectedness",
        AttributeValue::Text(pick(&mut rng, CONNECTEDNESS)),
    );

    for rule in overrides {
        rule.apply(&mut attributes, &mut rng);
    }

    attributes
}

fn pick(rng: &mut StdRng, options: &[&str]) -> String {
    options[rng.gen_range(0..options.len())].to_string()
}
