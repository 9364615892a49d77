//! Largest-remainder apportionment of a total across weighted categories.
//!
//! Every allocation satisfies `sum(counts) == total` exactly. Ties on the
//! fractional remainder are broken by input order: the category listed
//! first receives the extra unit.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Errors raised for malformed allocation input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    /// A category has an empty name
    #[error("Category at position {0} has an empty name")]
    EmptyName(usize),

    /// The same category appears twice
    #[error("Duplicate category: {0}")]
    DuplicateCategory(String),

    /// Proportion is negative
    #[error("Negative proportion {value} for category {name}")]
    NegativeProportion { name: String, value: f64 },

    /// Proportion is NaN or infinite
    #[error("Non-finite proportion for category {0}")]
    NonFiniteProportion(String),

    /// A positive total with nothing to allocate it to
    #[error("Cannot allocate {0} units across zero categories")]
    NoCategories(usize),
}

/// A population stratum and its target share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Category name
    pub name: String,
    /// Target share of the total (0.0 - 1.0)
    pub proportion: f64,
}

impl Category {
    /// Create a new category.
    pub fn new(name: impl Into<String>, proportion: f64) -> Self {
        Self {
            name: name.into(),
            proportion,
        }
    }
}

/// Exact integer counts per category, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    counts: Vec<(String, usize)>,
}

impl AllocationPlan {
    /// Build a plan directly from counts (no apportionment).
    pub fn from_counts(counts: impl IntoIterator<Item = (String, usize)>) -> Self {
        Self {
            counts: counts.into_iter().collect(),
        }
    }

    /// Count for a category, if it is part of the plan.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| *c)
    }

    /// Sum of all counts.
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, c)| c).sum()
    }

    /// Iterate `(category, count)` pairs in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(n, c)| (n.as_str(), *c))
    }

    /// Number of categories in the plan.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the plan has no categories.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Apportion `total` units across `categories` with the largest-remainder method.
pub fn allocate(categories: &[Category], total: usize) -> Result<AllocationPlan, AllocationError> {
    validate(categories, total)?;

    let exact: Vec<f64> = categories
        .iter()
        .map(|c| total as f64 * c.proportion)
        .collect();
    let mut counts: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let remainders: Vec<f64> = exact
        .iter()
        .zip(&counts)
        .map(|(e, f)| e - *f as f64)
        .collect();

    // Stable sort keeps input order among equal remainders.
    let mut ranked: Vec<usize> = (0..categories.len()).collect();
    ranked.sort_by(|&a, &b| remainders[b].total_cmp(&remainders[a]));

    let allocated: usize = counts.iter().sum();

    if allocated > total {
        // Proportions summing past 1.0; smallest remainders give back first.
        let mut excess = allocated - total;
        for &idx in ranked.iter().rev().cycle() {
            if excess == 0 {
                break;
            }
            if counts[idx] > 0 {
                counts[idx] -= 1;
                excess -= 1;
            }
        }
    } else if !categories.is_empty() {
        let remaining = total - allocated;
        for &idx in ranked.iter().cycle().take(remaining) {
            counts[idx] += 1;
        }
    }

    debug!(
        total,
        categories = categories.len(),
        floored = allocated,
        "Allocated population across categories"
    );

    Ok(AllocationPlan {
        counts: categories
            .iter()
            .map(|c| c.name.clone())
            .zip(counts)
            .collect(),
    })
}

fn validate(categories: &[Category], total: usize) -> Result<(), AllocationError> {
    if categories.is_empty() && total > 0 {
        return Err(AllocationError::NoCategories(total));
    }

    let mut seen = HashSet::new();
    for (i, category) in categories.iter().enumerate() {
        if category.name.trim().is_empty() {
            return Err(AllocationError::EmptyName(i));
        }
        if !seen.insert(category.name.as_str()) {
            return Err(AllocationError::DuplicateCategory(category.name.clone()));
        }
        if !category.proportion.is_finite() {
            return Err(AllocationError::NonFiniteProportion(category.name.clone()));
        }
        if category.proportion < 0.0 {
            return Err(AllocationError::NegativeProportion {
                name: category.name.clone(),
                value: category.proportion,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, f64)]) -> Vec<Category> {
        entries.iter().map(|(n, p)| Category::new(*n, *p)).collect()
    }

    #[test]
    fn test_largest_remainder_example() {
        let categories = table(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        let plan = allocate(&categories, 7).unwrap();

        assert_eq!(plan.get("a"), Some(4));
        assert_eq!(plan.get("b"), Some(2));
        assert_eq!(plan.get("c"), Some(1));
        assert_eq!(plan.total(), 7);
    }

    #[test]
    fn test_ties_go_to_first_listed() {
        // Equal shares leave equal remainders; the single leftover unit goes
        // to whichever category is listed first.
        let categories = table(&[("x", 1.0 / 3.0), ("y", 1.0 / 3.0), ("z", 1.0 / 3.0)]);
        let plan = allocate(&categories, 4).unwrap();
        assert_eq!(plan.get("x"), Some(2));
        assert_eq!(plan.get("y"), Some(1));
        assert_eq!(plan.get("z"), Some(1));

        let reordered = table(&[("z", 1.0 / 3.0), ("x", 1.0 / 3.0), ("y", 1.0 / 3.0)]);
        let plan = allocate(&reordered, 4).unwrap();
        assert_eq!(plan.get("z"), Some(2));
        assert_eq!(plan.get("x"), Some(1));
    }

    #[test]
    fn test_fifty_across_equal_pair() {
        let categories = table(&[("A", 0.3), ("B", 0.3), ("C", 0.25), ("D", 0.15)]);
        let plan = allocate(&categories, 50).unwrap();
        // floors 15, 15, 12, 7 = 49; C and D tie at 0.5 and C is listed first
        assert_eq!(plan.get("A"), Some(15));
        assert_eq!(plan.get("B"), Some(15));
        assert_eq!(plan.get("C"), Some(13));
        assert_eq!(plan.get("D"), Some(7));
    }

    #[test]
    fn test_sum_invariant_over_many_totals() {
        let tables = [
            table(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]),
            table(&[("a", 0.1), ("b", 0.1), ("c", 0.1)]),
            table(&[("a", 0.0), ("b", 0.0)]),
            table(&[("a", 1.0 / 6.0); 1]),
            table(&[
                ("lowincome", 0.17),
                ("middleclass", 0.33),
                ("retired", 0.2),
                ("underemployed", 0.1),
                ("highincome", 0.1),
                ("student", 0.1),
            ]),
        ];

        for categories in &tables {
            for total in 0..200 {
                let plan = allocate(categories, total).unwrap();
                assert_eq!(plan.total(), total, "table {:?}, total {}", categories, total);
                assert_eq!(plan.len(), categories.len());
            }
        }
    }

    #[test]
    fn test_zero_total() {
        let plan = allocate(&table(&[("a", 0.6), ("b", 0.4)]), 0).unwrap();
        assert_eq!(plan.get("a"), Some(0));
        assert_eq!(plan.get("b"), Some(0));
    }

    #[test]
    fn test_zero_proportion_can_receive_remainder() {
        // Remainders are all zero, so the remainder pass walks input order.
        let plan = allocate(&table(&[("a", 0.0), ("b", 0.0)]), 3).unwrap();
        assert_eq!(plan.get("a"), Some(2));
        assert_eq!(plan.get("b"), Some(1));
    }

    #[test]
    fn test_oversubscribed_table_still_sums_to_total() {
        // Floors 4 + 4 overshoot by 3; equal remainders give back from the
        // last-listed category first.
        let plan = allocate(&table(&[("a", 0.8), ("b", 0.8)]), 5).unwrap();
        assert_eq!(plan.total(), 5);
        assert_eq!(plan.get("a"), Some(3));
        assert_eq!(plan.get("b"), Some(2));

        let heavy = table(&[("a", 0.9), ("b", 0.7), ("c", 1.3)]);
        for total in 0..100 {
            assert_eq!(allocate(&heavy, total).unwrap().total(), total);
        }
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            allocate(&table(&[("a", -0.1)]), 5),
            Err(AllocationError::NegativeProportion { .. })
        ));
        assert!(matches!(
            allocate(&table(&[("a", f64::NAN)]), 5),
            Err(AllocationError::NonFiniteProportion(_))
        ));
        assert!(matches!(
            allocate(&table(&[("a", 0.5), ("a", 0.5)]), 5),
            Err(AllocationError::DuplicateCategory(_))
        ));
        assert_eq!(allocate(&[], 5), Err(AllocationError::NoCategories(5)));
        assert!(allocate(&[], 0).unwrap().is_empty());
    }
}
