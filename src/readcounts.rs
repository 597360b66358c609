use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

/// Unit key under which unassigned queries are counted, when requested.
pub const UNASSIGNED: &str = "Unassigned";

/// Separator between stratum and unit in stratified keys.
pub const STRATUM_SEP: char = '|';

pub type UnitCounts = BTreeMap<String, f64>;

/// rank → sample → unit → accumulated weight
pub type NestedProfile = BTreeMap<String, BTreeMap<String, UnitCounts>>;

/// Accumulated weights keyed by (rank, sample) and then by unit.
///
/// Cells only grow. Merging sums matching keys and never overwrites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    cells: BTreeMap<(String, String), UnitCounts>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_weight(&mut self, rank: &str, sample: &str, unit: &str, weight: f64) {
        let cell = self
            .cells
            .entry((rank.to_string(), sample.to_string()))
            .or_default();
        match cell.get_mut(unit) {
            Some(total) => *total += weight,
            None => {
                cell.insert(unit.to_string(), weight);
            }
        }
    }

    pub fn cell(&self, rank: &str, sample: &str) -> Option<&UnitCounts> {
        self.cells.get(&(rank.to_string(), sample.to_string()))
    }

    pub fn get(&self, rank: &str, sample: &str, unit: &str) -> f64 {
        self.cell(rank, sample)
            .and_then(|c| c.get(unit))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sum of all weights in all cells.
    pub fn total(&self) -> f64 {
        self.cells.values().flat_map(|c| c.values()).sum()
    }

    pub fn merge(&mut self, other: &Profile) {
        for ((rank, sample), counts) in &other.cells {
            for (unit, weight) in counts {
                self.add_weight(rank, sample, unit, *weight);
            }
        }
    }

    /// Reshapes into rank → sample → unit. Every listed rank is present, even if empty.
    pub fn into_nested(self, ranks: &[String]) -> NestedProfile {
        let mut nested: NestedProfile = ranks
            .iter()
            .map(|rank| (rank.clone(), BTreeMap::new()))
            .collect();
        for ((rank, sample), counts) in self.cells {
            nested.entry(rank).or_default().insert(sample, counts);
        }
        nested
    }
}

/// Key of a unit within a stratum, e.g. `GenomeA|K00001`.
pub fn stratified_key(stratum: &str, unit: &str) -> String {
    format!("{stratum}{STRATUM_SEP}{unit}")
}

impl AddAssign<&Profile> for Profile {
    fn add_assign(&mut self, other: &Profile) {
        self.merge(other);
    }
}

impl Add for Profile {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += &other;
        self
    }
}
