//! Archetype catalog: the population strata, their descriptions, target
//! proportions and attribute overrides.

use serde::{Deserialize, Serialize};

use crate::allocator::Category;
use crate::attributes::{AttributeRule, AttributeValue};
use crate::roster::RosterError;

/// One population stratum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archetype {
    /// Category name (also the segment id prefix)
    pub name: String,
    /// Short description substituted into instructions
    pub description: String,
    /// Target share of the population
    pub proportion: f64,
    /// Overrides applied after generic attribute sampling
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<AttributeRule>,
}

impl Archetype {
    /// Create an archetype without overrides.
    pub fn new(name: impl Into<String>, description: impl Into<String>, proportion: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            proportion,
            overrides: Vec::new(),
        }
    }

    /// Add an override rule.
    pub fn with_rule(mut self, rule: AttributeRule) -> Self {
        self.overrides.push(rule);
        self
    }
}

/// Ordered set of archetypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchetypeCatalog {
    archetypes: Vec<Archetype>,
}

impl ArchetypeCatalog {
    /// Create a catalog, rejecting override rules that cannot be applied.
    pub fn new(archetypes: Vec<Archetype>) -> Result<Self, RosterError> {
        let catalog = Self { archetypes };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The six hurricane archetypes with equal shares.
    pub fn hurricane_defaults() -> Self {
        let share = 1.0 / 6.0;
        let fixed = |field: &str, value: &str| AttributeRule::Fixed {
            field: field.to_string(),
            value: AttributeValue::Text(value.to_string()),
        };
        let age = |min, max| AttributeRule::IntRange {
            field: "age".to_string(),
            min,
            max,
        };

        Self {
            archetypes: vec![
                Archetype::new(
                    "lowincome",
                    "low-income, high risk, socially connected",
                    share,
                )
                .with_rule(fixed("income_band", "low"))
                .with_rule(fixed("social_connectedness", "connected"))
                .with_rule(AttributeRule::Chance {
                    field: "has_vehicle".to_string(),
                    probability: 0.55,
                }),
                Archetype::new(
                    "middleclass",
                    "middle-class, low risk, socially average",
                    share,
                )
                .with_rule(fixed("income_band", "middle"))
                .with_rule(fixed("social_connectedness", "average")),
                Archetype::new("retired", "retired, high risk, socially limited", share)
                    .with_rule(age(65, 90))
                    .with_rule(fixed("employment", "retired"))
                    .with_rule(fixed("social_connectedness", "limited"))
                    .with_rule(AttributeRule::Chance {
                        field: "mobility_limited".to_string(),
                        probability: 0.35,
                    }),
                Archetype::new(
                    "underemployed",
                    "under-employed, medium risk, socially connected",
                    share,
                )
                .with_rule(fixed("employment", "part_time"))
                .with_rule(fixed("income_band", "lower_middle"))
                .with_rule(fixed("social_connectedness", "connected")),
                Archetype::new(
                    "highincome",
                    "high-income, medium risk, socially active",
                    share,
                )
                .with_rule(fixed("income_band", "high"))
                .with_rule(fixed("social_connectedness", "active"))
                .with_rule(AttributeRule::Fixed {
                    field: "has_vehicle".to_string(),
                    value: AttributeValue::Bool(true),
                }),
                Archetype::new("student", "student, low risk, socially connected", share)
                    .with_rule(age(18, 26))
                    .with_rule(fixed("employment", "student"))
                    .with_rule(fixed("social_connectedness", "connected"))
                    .with_rule(AttributeRule::IntRange {
                        field: "household_size".to_string(),
                        min: 1,
                        max: 4,
                    }),
            ],
        }
    }

    /// Parse a catalog from a YAML list of archetypes.
    pub fn from_yaml(yaml: &str) -> Result<Self, RosterError> {
        let archetypes: Vec<Archetype> =
            serde_yaml::from_str(yaml).map_err(|e| RosterError::Parse(e.to_string()))?;
        Self::new(archetypes)
    }

    /// Look up an archetype by name.
    pub fn get(&self, name: &str) -> Option<&Archetype> {
        self.archetypes.iter().find(|a| a.name == name)
    }

    /// Description for an archetype.
    pub fn description(&self, name: &str) -> Option<&str> {
        self.get(name).map(|a| a.description.as_str())
    }

    /// Allocation table in catalog order.
    pub fn categories(&self) -> Vec<Category> {
        self.archetypes
            .iter()
            .map(|a| Category::new(a.name.clone(), a.proportion))
            .collect()
    }

    /// All archetypes in order.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Number of archetypes.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Check every override rule.
    pub fn validate(&self) -> Result<(), RosterError> {
        for archetype in &self.archetypes {
            for rule in &archetype.overrides {
                if let Some(reason) = rule.problem() {
                    return Err(RosterError::InvalidRule {
                        archetype: archetype.name.clone(),
                        field: rule.field().to_string(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for ArchetypeCatalog {
    fn default() -> Self {
        Self::hurricane_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::allocate;

    #[test]
    fn test_defaults_allocate_fifty() {
        let catalog = ArchetypeCatalog::hurricane_defaults();
        assert_eq!(catalog.len(), 6);
        assert!(catalog.validate().is_ok());

        let plan = allocate(&catalog.categories(), 50).unwrap();
        assert_eq!(plan.total(), 50);
        // 50 / 6 = 8.33 each, two leftover units go to the first two listed
        assert_eq!(plan.get("lowincome"), Some(9));
        assert_eq!(plan.get("middleclass"), Some(9));
        assert_eq!(plan.get("student"), Some(8));
    }

    #[test]
    fn test_descriptions() {
        let catalog = ArchetypeCatalog::default();
        assert_eq!(
            catalog.description("retired"),
            Some("retired, high risk, socially limited")
        );
        assert!(catalog.description("astronaut").is_none());
    }

    #[test]
    fn test_yaml_catalog() {
        let yaml = r#"
- name: fisher
  description: "coastal fisher, high exposure"
  proportion: 0.4
  overrides:
    - rule: fixed
      field: employment
      value: fishing
- name: nurse
  description: "hospital nurse, essential worker"
  proportion: 0.6
"#;
        let catalog = ArchetypeCatalog::from_yaml(yaml).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("fisher").unwrap().overrides.len(), 1);
        assert!(catalog.get("nurse").unwrap().overrides.is_empty());
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let archetype = Archetype::new("odd", "odd one", 1.0).with_rule(AttributeRule::Chance {
            field: "has_pets".to_string(),
            probability: 1.5,
        });
        let err = ArchetypeCatalog::new(vec![archetype]).unwrap_err();
        assert!(matches!(err, RosterError::InvalidRule { .. }));
    }
}
