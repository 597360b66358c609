use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::config::{RankPolicy, RunConfig};
use crate::errors::Result;
use crate::kv_store::RankCaches;
use crate::taxonomy::Hierarchy;
use crate::utilities::SubjectSet;

/// Outcome of resolving one query at one rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Assignment {
    Unassigned,
    Unit(String),
    /// Non-unique assignment; each unit is credited 1/k of the query.
    Split(Vec<String>),
}

impl Assignment {
    /// Units with the weight each receives from a single query.
    pub fn weighted_units(&self) -> Vec<(&str, f64)> {
        match self {
            Assignment::Unassigned => Vec::new(),
            Assignment::Unit(unit) => vec![(unit.as_str(), 1.0)],
            Assignment::Split(units) => {
                let share = 1.0 / units.len() as f64;
                units.iter().map(|u| (u.as_str(), share)).collect()
            }
        }
    }

    fn from_units(mut units: Vec<String>) -> Self {
        match units.len() {
            0 => Assignment::Unassigned,
            1 => Assignment::Unit(units.remove(0)),
            _ => Assignment::Split(units),
        }
    }
}

/// Resolution capability keyed by rank policy.
///
/// Implementations must be pure for a fixed hierarchy: the same subjects, policy and
/// configuration always give the same assignment. Caching relies on it.
pub trait Resolve: Send + Sync {
    fn resolve(
        &self,
        subjects: &SubjectSet,
        policy: &RankPolicy,
        config: &RunConfig,
    ) -> Result<Assignment>;
}

/// Resolves subjects by walking a [`Hierarchy`].
pub struct HierarchyResolver<'a> {
    tree: &'a Hierarchy,
}

impl<'a> HierarchyResolver<'a> {
    pub fn new(tree: &'a Hierarchy) -> Self {
        Self { tree }
    }
}

impl Resolve for HierarchyResolver<'_> {
    fn resolve(
        &self,
        subjects: &SubjectSet,
        policy: &RankPolicy,
        config: &RunConfig,
    ) -> Result<Assignment> {
        if subjects.is_empty() {
            return Ok(Assignment::Unassigned);
        }
        match policy {
            RankPolicy::None => Ok(assign_none(subjects, config.uniq)),
            RankPolicy::Free => assign_free(subjects, self.tree, config.subok),
            RankPolicy::Fixed(rank) => assign_rank(subjects, rank, self.tree, config),
        }
    }
}

/// Reports the subjects themselves.
pub fn assign_none(subjects: &SubjectSet, uniq: bool) -> Assignment {
    if subjects.len() == 1 {
        Assignment::Unit(subjects[0].clone())
    } else if uniq {
        Assignment::Unassigned
    } else {
        Assignment::from_units(subjects.to_vec())
    }
}

/// Lowest common ancestor of all subjects, regardless of rank.
///
/// A lone subject resolves to itself when `subok` is set and to its parent otherwise.
/// Landing on the root means nothing informative was found.
pub fn assign_free(subjects: &SubjectSet, tree: &Hierarchy, subok: bool) -> Result<Assignment> {
    let unit = if subjects.len() == 1 {
        let subject = subjects[0].as_str();
        let parent = tree.parent(subject)?;
        if subok {
            return Ok(Assignment::Unit(subject.to_string()));
        }
        parent
    } else {
        tree.lowest_common_ancestor(subjects.iter())?
    };

    if unit == tree.root() {
        Ok(Assignment::Unassigned)
    } else {
        Ok(Assignment::Unit(unit.to_string()))
    }
}

/// Resolves subjects to units at a fixed rank.
///
/// With `above`, a subject lacking an ancestor at `rank` contributes its nearest higher-ranked
/// unit instead (see [`Hierarchy::find_rank_or_above`]).
///
/// Order of rules: majority vote when `major` is set; a unanimous unit; the LCA of the
/// candidates when `above` is set; a split over the candidates unless `uniq`; otherwise
/// unassigned.
pub fn assign_rank(
    subjects: &SubjectSet,
    rank: &str,
    tree: &Hierarchy,
    config: &RunConfig,
) -> Result<Assignment> {
    let mut candidates: Vec<(Option<&str>, f64)> = Vec::with_capacity(subjects.len());
    for subject in subjects.iter() {
        let weight = config.sizes.get(subject).copied().unwrap_or(1.0);
        let unit = if config.above {
            tree.find_rank_or_above(subject, rank)?
        } else {
            tree.find_rank(subject, rank)?
        };
        candidates.push((unit, weight));
    }

    if let Some(threshold) = config.major_fraction() {
        return Ok(majority(&candidates, threshold));
    }

    let distinct: BTreeSet<Option<&str>> = candidates.iter().map(|(unit, _)| *unit).collect();
    if distinct.len() == 1 {
        return Ok(match distinct.into_iter().next().flatten() {
            Some(unit) => Assignment::Unit(unit.to_string()),
            None => Assignment::Unassigned,
        });
    }

    if config.above {
        if distinct.contains(&None) {
            return Ok(Assignment::Unassigned);
        }
        let lca = tree.lowest_common_ancestor(distinct.iter().flatten())?;
        return Ok(if lca == tree.root() {
            Assignment::Unassigned
        } else {
            Assignment::Unit(lca.to_string())
        });
    }

    if !config.uniq {
        let units = distinct.into_iter().flatten().map(str::to_string).collect();
        return Ok(Assignment::from_units(units));
    }

    Ok(Assignment::Unassigned)
}

/// Unit holding at least `threshold` of the total subject weight, if any.
fn majority(candidates: &[(Option<&str>, f64)], threshold: f64) -> Assignment {
    let mut totals: BTreeMap<Option<&str>, f64> = BTreeMap::new();
    let mut total = 0.0;
    for (unit, weight) in candidates {
        *totals.entry(*unit).or_insert(0.0) += weight;
        total += weight;
    }

    let mut best: Option<(Option<&str>, f64)> = None;
    for (unit, weight) in totals {
        if best.map_or(true, |(_, w)| weight > w) {
            best = Some((unit, weight));
        }
    }

    match best {
        Some((Some(unit), weight)) if total > 0.0 && weight / total >= threshold => {
            Assignment::Unit(unit.to_string())
        }
        _ => Assignment::Unassigned,
    }
}

/// Wraps a [`Resolve`] capability with one bounded cache per rank policy.
///
/// Owned by a single worker; the configuration is fixed for the cache's lifetime so a hit
/// always equals a fresh resolution. Policy `none` bypasses the cache.
pub struct CachedResolver<'a> {
    resolver: &'a dyn Resolve,
    config: &'a RunConfig,
    caches: RankCaches,
}

impl<'a> CachedResolver<'a> {
    pub fn new(resolver: &'a dyn Resolve, config: &'a RunConfig) -> Self {
        Self {
            resolver,
            config,
            caches: RankCaches::new(config.cache),
        }
    }

    pub fn resolve(&mut self, subjects: &SubjectSet, policy: &RankPolicy) -> Result<Assignment> {
        if subjects.is_empty() {
            return Ok(Assignment::Unassigned);
        }
        if *policy == RankPolicy::None {
            return self.resolver.resolve(subjects, policy, self.config);
        }

        let cache = self.caches.for_rank(policy);
        if let Some(hit) = cache.get(subjects) {
            return Ok(hit);
        }
        let assignment = self.resolver.resolve(subjects, policy, self.config)?;
        cache.put(subjects.clone(), assignment.clone());
        Ok(assignment)
    }

    #[cfg(test)]
    pub(crate) fn caches(&self) -> &RankCaches {
        &self.caches
    }

    pub fn log_stats(&self) {
        for (policy, cache) in self.caches.iter() {
            debug!(
                "cache at rank {}: {} hits, {} misses, {}/{} entries",
                policy,
                cache.hits(),
                cache.misses(),
                cache.len(),
                cache.capacity()
            );
        }
    }
}
