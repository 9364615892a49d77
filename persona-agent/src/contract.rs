//! Output contracts: the typed shape a reasoning call must return.
//!
//! A contract renders to a JSON schema for the backend and is enforced on
//! whatever object comes back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON type of a contract field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl FieldKind {
    fn schema_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// Ways a returned object can break its contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// The value is not a JSON object
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(String),

    /// A required field is absent or null
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has the wrong JSON type
    #[error("Field {field} should be {expected:?}")]
    WrongType { field: String, expected: FieldKind },
}

/// One field of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Expected shape of a structured reasoning result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    /// Contract name (used as the schema title)
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<ContractField>,
}

impl OutputContract {
    /// Create an empty contract.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a required field.
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(ContractField {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Add an optional field.
    pub fn with_optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(ContractField {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Per-segment, per-phase persona decision record.
    pub fn persona_reaction() -> Self {
        Self::new("PersonaReaction")
            .with_field("race", FieldKind::String)
            .with_field("age", FieldKind::Integer)
            .with_field("sex", FieldKind::String)
            .with_field("response", FieldKind::String)
            .with_optional("current_location", FieldKind::String)
            .with_optional("resources_remaining", FieldKind::String)
            .with_optional("archetype_influence", FieldKind::String)
    }

    /// Single free-text summary, as produced by the narrative reducer.
    pub fn narrative_summary() -> Self {
        Self::new("NarrativeSummary").with_field("output", FieldKind::String)
    }

    /// JSON schema for this contract.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), json!({ "type": field.kind.schema_type() }));
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check a returned value. Extra keys are tolerated.
    pub fn validate(&self, value: &Value) -> Result<(), ContractViolation> {
        let object = value
            .as_object()
            .ok_or_else(|| ContractViolation::NotAnObject(kind_of(value).to_string()))?;

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(ContractViolation::MissingField(field.name.clone()));
                }
                None | Some(Value::Null) => {}
                Some(v) if !field.kind.accepts(v) => {
                    return Err(ContractViolation::WrongType {
                        field: field.name.clone(),
                        expected: field.kind,
                    });
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
