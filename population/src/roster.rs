//! Roster synthesis: expands an allocation plan into segment descriptors.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::allocator::AllocationPlan;
use crate::archetype::ArchetypeCatalog;
use crate::attributes::{attributes_for, Attributes};

/// Errors raised while building a roster.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RosterError {
    /// The plan names a category missing from the catalog
    #[error("Unknown category in allocation plan: {0}")]
    UnknownCategory(String),

    /// An override rule cannot be applied
    #[error("Invalid override for {archetype}.{field}: {reason}")]
    InvalidRule {
        archetype: String,
        field: String,
        reason: String,
    },

    /// Catalog document could not be parsed
    #[error("Catalog parse error: {0}")]
    Parse(String),
}

/// Stable id for the `index`-th (1-based) segment of a category.
pub fn segment_id(category: &str, index: usize) -> String {
    format!("{}_{}", category, index)
}

/// One synthetic member of the simulated population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// Stable id, `{category}_{index}`
    pub id: String,
    /// Category (archetype) name
    pub category: String,
    /// 1-based position within the category
    pub index: usize,
    /// Deterministic attributes derived from `id`
    pub attributes: Attributes,
}

impl SegmentDescriptor {
    /// Build a descriptor, deriving its attributes from the catalog rules.
    pub fn generate(category: &str, index: usize, catalog: &ArchetypeCatalog) -> Result<Self, RosterError> {
        let archetype = catalog
            .get(category)
            .ok_or_else(|| RosterError::UnknownCategory(category.to_string()))?;
        let id = segment_id(category, index);
        let attributes = attributes_for(&id, &archetype.overrides);

        Ok(Self {
            id,
            category: category.to_string(),
            index,
            attributes,
        })
    }

    /// One-line `field: value` rendering of the attributes.
    pub fn profile(&self) -> String {
        self.attributes
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The ordered list of segments for one simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    segments: Vec<SegmentDescriptor>,
}

impl Roster {
    /// Expand `plan` into descriptors: category order, then index `1..=count`.
    pub fn build(plan: &AllocationPlan, catalog: &ArchetypeCatalog) -> Result<Self, RosterError> {
        let mut segments = Vec::with_capacity(plan.total());

        for (category, count) in plan.iter() {
            for index in 1..=count {
                segments.push(SegmentDescriptor::generate(category, index, catalog)?);
            }
            debug!(category, count, "Generated category segments");
        }

        info!(segments = segments.len(), "Roster built");
        Ok(Self { segments })
    }

    /// Wrap already generated segments.
    pub fn from_segments(segments: Vec<SegmentDescriptor>) -> Self {
        Self { segments }
    }

    /// Segments in roster order.
    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    /// Consume the roster.
    pub fn into_segments(self) -> Vec<SegmentDescriptor> {
        self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment count per category.
    pub fn category_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for segment in &self.segments {
            *counts.entry(segment.category.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Hex SHA-256 over ids and attributes, in roster order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for segment in &self.segments {
            field(&mut hasher, segment.id.as_bytes());
            hasher.update((segment.attributes.len() as u64).to_be_bytes());
            for (name, value) in &segment.attributes {
                field(&mut hasher, name.as_bytes());
                field(&mut hasher, value.to_string().as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Length-prefixed field, so adjacent fields cannot run together.
fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
