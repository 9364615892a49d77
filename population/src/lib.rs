//! Population synthesis for emergency-reaction simulations.
//!
//! Turns a table of archetype proportions into a concrete, reproducible
//! roster of population segments:
//!
//! - **Allocation**: largest-remainder apportionment of a total across
//!   categories, with input-order tie-breaking
//! - **Archetypes**: the strata, their descriptions and attribute overrides
//! - **Roster**: `{category}_{index}` segments with attributes derived from a
//!   SHA-256 seed of the id
//! - **Templates**: `{NAME}` placeholder rendering for per-segment instructions
//!
//! # Example
//!
//! ```ignore
//! use population::{allocate, ArchetypeCatalog, Roster};
//!
//! let catalog = ArchetypeCatalog::hurricane_defaults();
//! let plan = allocate(&catalog.categories(), 50)?;
//! let roster = Roster::build(&plan, &catalog)?;
//! assert_eq!(roster.len(), 50);
//! ```

pub mod allocator;
pub mod archetype;
pub mod attributes;
pub mod roster;
pub mod template;

// Re-export main types
pub use allocator::{allocate, AllocationError, AllocationPlan, Category};
pub use archetype::{Archetype, ArchetypeCatalog};
pub use attributes::{attributes_for, seed_for, AttributeRule, AttributeValue, Attributes};
pub use roster::{segment_id, Roster, RosterError, SegmentDescriptor};
pub use template::{InstructionTemplate, TemplateError};
