use std::collections::{HashMap, HashSet};

use crate::errors::{ClassifyError, Result};

/// Identifier given to a synthetic root when the input tree has several tops.
pub const DEFAULT_ROOT: &str = "1";

/// Read-only classification hierarchy shared by every worker.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    parent_map: HashMap<String, String>,
    rank_map: HashMap<String, String>,
    name_map: HashMap<String, String>,
    root: String,
    /// rank → ranks seen above it on some lineage
    ranks_above: HashMap<String, HashSet<String>>,
}

impl Hierarchy {
    /// Creates a hierarchy from child → parent, unit → rank and unit → name tables.
    ///
    /// # Arguments
    ///
    /// * `parent_map` - Parent of every unit; the root is its own parent.
    /// * `rank_map` - Rank label of each unit (units may lack one).
    /// * `name_map` - Display name of each unit (units may lack one).
    /// * `root` - Root identifier. When absent, the single self-parented top is used, or a
    ///   synthetic [`DEFAULT_ROOT`] is attached above all tops.
    pub fn new(
        mut parent_map: HashMap<String, String>,
        rank_map: HashMap<String, String>,
        name_map: HashMap<String, String>,
        root: Option<&str>,
    ) -> Self {
        let root = match root {
            Some(root) => {
                parent_map.insert(root.to_string(), root.to_string());
                root.to_string()
            }
            None => Self::fill_root(&mut parent_map),
        };

        let mut tree = Hierarchy {
            parent_map,
            rank_map,
            name_map,
            root,
            ranks_above: HashMap::new(),
        };
        tree.ranks_above = tree.rank_ancestry();
        tree
    }

    fn rank_ancestry(&self) -> HashMap<String, HashSet<String>> {
        let mut above: HashMap<String, HashSet<String>> = HashMap::new();
        for (unit, rank) in &self.rank_map {
            let Ok(lineage) = self.lineage(unit) else {
                continue;
            };
            for ancestor in lineage.into_iter().skip(1) {
                if let Some(higher) = self.rank(ancestor).filter(|r| *r != rank.as_str()) {
                    above
                        .entry(rank.clone())
                        .or_default()
                        .insert(higher.to_string());
                }
            }
        }
        above
    }

    /// Convenience constructor from `(unit, parent, rank)` rows.
    pub fn from_rows<'a, I>(rows: I, root: Option<&str>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, Option<&'a str>)>,
    {
        let mut parent_map = HashMap::new();
        let mut rank_map = HashMap::new();
        for (unit, parent, rank) in rows {
            parent_map.insert(unit.to_string(), parent.to_string());
            if let Some(rank) = rank {
                rank_map.insert(unit.to_string(), rank.to_string());
            }
        }
        Self::new(parent_map, rank_map, HashMap::new(), root)
    }

    pub fn with_names(mut self, name_map: HashMap<String, String>) -> Self {
        self.name_map = name_map;
        self
    }

    fn fill_root(parent_map: &mut HashMap<String, String>) -> String {
        let mut tops: Vec<String> = parent_map
            .iter()
            .filter(|(unit, parent)| unit == parent || !parent_map.contains_key(*parent))
            .map(|(unit, parent)| if unit == parent { unit.clone() } else { parent.clone() })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tops.sort();

        if tops.len() == 1 {
            let root = tops.remove(0);
            parent_map.insert(root.clone(), root.clone());
            return root;
        }

        for top in tops {
            parent_map.insert(top, DEFAULT_ROOT.to_string());
        }
        parent_map.insert(DEFAULT_ROOT.to_string(), DEFAULT_ROOT.to_string());
        DEFAULT_ROOT.to_string()
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn parent(&self, id: &str) -> Result<&str> {
        self.parent_map
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| ClassifyError::missing(id))
    }

    pub fn rank(&self, id: &str) -> Option<&str> {
        self.rank_map.get(id).map(String::as_str)
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.name_map.get(id).map(String::as_str)
    }

    /// Path from a unit up to the root, both inclusive.
    ///
    /// Walks are bounded by the number of units, so a cyclic table terminates.
    pub fn lineage(&self, id: &str) -> Result<Vec<&str>> {
        let mut current = self
            .parent_map
            .get_key_value(id)
            .map(|(k, _)| k.as_str())
            .ok_or_else(|| ClassifyError::missing(id))?;
        let mut path = vec![current];
        for _ in 0..self.parent_map.len() {
            if current == self.root {
                break;
            }
            let parent = self.parent(current)?;
            if parent == current {
                break;
            }
            path.push(parent);
            current = parent;
        }
        Ok(path)
    }

    /// First unit at `rank` on the path from `id` to the root, if any.
    pub fn find_rank(&self, id: &str, rank: &str) -> Result<Option<&str>> {
        Ok(self
            .lineage(id)?
            .into_iter()
            .find(|unit| self.rank(unit) == Some(rank)))
    }

    /// Like [`find_rank`](Self::find_rank), but a lineage without `rank` falls back to its
    /// nearest unit whose rank lies above `rank` elsewhere in the hierarchy, and failing that
    /// to its top-level unit. Only the root itself yields `None`.
    pub fn find_rank_or_above(&self, id: &str, rank: &str) -> Result<Option<&str>> {
        let lineage = self.lineage(id)?;
        if let Some(unit) = lineage.iter().copied().find(|u| self.rank(u) == Some(rank)) {
            return Ok(Some(unit));
        }

        let below_root = || lineage.iter().copied().take_while(|u| *u != self.root);
        let higher = self.ranks_above.get(rank).and_then(|above| {
            below_root().find(|u| self.rank(u).is_some_and(|r| above.contains(r)))
        });
        Ok(higher.or_else(|| below_root().last()))
    }

    /// Finds the lowest common ancestor of all given units.
    ///
    /// The first unit's lineage is intersected with every other lineage; the most specific
    /// survivor is returned. An empty input yields the root.
    pub fn lowest_common_ancestor<I, S>(&self, ids: I) -> Result<&str>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids = ids.into_iter();
        let first = match ids.next() {
            Some(first) => first,
            None => return Ok(self.root.as_str()),
        };
        let mut common = self.lineage(first.as_ref())?;
        for id in ids {
            let other: HashSet<&str> = self.lineage(id.as_ref())?.into_iter().collect();
            common.retain(|unit| other.contains(unit));
            if common.len() <= 1 {
                break;
            }
        }
        Ok(common.first().copied().unwrap_or(self.root.as_str()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// life ─┬─ Phylum_1 ─┬─ Genus_1 ─┬─ Species_A
    ///       │            │           └─ Species_B
    ///       │            └─ Genus_2 ─── Species_C
    ///       └─ Phylum_2 ─── Genus_3 ─── Species_D
    pub(crate) fn sample_hierarchy() -> Hierarchy {
        let rows = [
            ("life", "life", None),
            ("Phylum_1", "life", Some("phylum")),
            ("Phylum_2", "life", Some("phylum")),
            ("Genus_1", "Phylum_1", Some("genus")),
            ("Genus_2", "Phylum_1", Some("genus")),
            ("Genus_3", "Phylum_2", Some("genus")),
            ("Species_A", "Genus_1", Some("species")),
            ("Species_B", "Genus_1", Some("species")),
            ("Species_C", "Genus_2", Some("species")),
            ("Species_D", "Genus_3", Some("species")),
        ];
        let names = [("Genus_1", "Escherichia"), ("Species_A", "Escherichia coli")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Hierarchy::from_rows(rows, Some("life")).with_names(names)
    }

    #[test]
    fn test_lineage() {
        let tree = sample_hierarchy();
        assert_eq!(
            tree.lineage("Species_A").unwrap(),
            vec!["Species_A", "Genus_1", "Phylum_1", "life"]
        );
        assert_eq!(tree.lineage("life").unwrap(), vec!["life"]);
        assert!(tree.lineage("Species_Z").unwrap_err().is_lookup());
    }

    #[test]
    fn test_find_rank() {
        let tree = sample_hierarchy();
        assert_eq!(tree.find_rank("Species_C", "genus").unwrap(), Some("Genus_2"));
        assert_eq!(tree.find_rank("Species_C", "phylum").unwrap(), Some("Phylum_1"));
        assert_eq!(tree.find_rank("Phylum_2", "genus").unwrap(), None);
    }

    #[test]
    fn test_lowest_common_ancestor() {
        let tree = sample_hierarchy();
        assert_eq!(
            tree.lowest_common_ancestor(["Species_A", "Species_B"]).unwrap(),
            "Genus_1"
        );
        assert_eq!(
            tree.lowest_common_ancestor(["Species_A", "Species_C"]).unwrap(),
            "Phylum_1"
        );
        assert_eq!(
            tree.lowest_common_ancestor(["Species_A", "Species_D"]).unwrap(),
            "life"
        );
        assert_eq!(tree.lowest_common_ancestor(["Species_B"]).unwrap(), "Species_B");
        assert_eq!(tree.lowest_common_ancestor(Vec::<&str>::new()).unwrap(), "life");
    }

    #[test]
    fn test_find_rank_or_above() {
        let tree = sample_hierarchy();
        assert_eq!(
            tree.find_rank_or_above("Species_A", "genus").unwrap(),
            Some("Genus_1")
        );
        assert_eq!(
            tree.find_rank_or_above("Phylum_2", "genus").unwrap(),
            Some("Phylum_2")
        );
        assert_eq!(tree.find_rank_or_above("life", "genus").unwrap(), None);

        let rows = [
            ("root", "root", None),
            ("Order_1", "root", Some("order")),
            ("Family_1", "Order_1", Some("family")),
            ("Clade_X", "root", None),
            ("Family_2", "Clade_X", Some("family")),
            ("Leaf", "Family_2", Some("species")),
        ];
        let tree = Hierarchy::from_rows(rows, Some("root"));
        assert_eq!(
            tree.find_rank_or_above("Order_1", "family").unwrap(),
            Some("Order_1")
        );
        assert_eq!(
            tree.find_rank_or_above("Leaf", "order").unwrap(),
            Some("Clade_X")
        );
        assert!(tree.find_rank_or_above("Missing", "order").is_err());
    }

    #[test]
    fn test_fill_root_single_top() {
        let tree = Hierarchy::from_rows([("a", "r", None), ("b", "a", None), ("r", "r", None)], None);
        assert_eq!(tree.root(), "r");
    }

    #[test]
    fn test_fill_root_multiple_tops() {
        let tree = Hierarchy::from_rows([("a", "x", None), ("b", "y", None)], None);
        assert_eq!(tree.root(), DEFAULT_ROOT);
        assert_eq!(tree.lowest_common_ancestor(["a", "b"]).unwrap(), DEFAULT_ROOT);
        assert_eq!(tree.lineage("a").unwrap(), vec!["a", "x", DEFAULT_ROOT]);
    }

    #[test]
    fn test_names() {
        let tree = sample_hierarchy();
        assert_eq!(tree.name("Genus_1"), Some("Escherichia"));
        assert_eq!(tree.name("Genus_2"), None);
    }
}
