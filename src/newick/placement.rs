//! Fully-resolved phylogenetic placement.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::tree::NewickTree;
use super::{NewickError, MAX_NODES};

/// Likelihood-weight ratios closer than this are treated as equal.
const LWR_EPSILON: f64 = 1e-9;

/// One fragment placed on one edge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Placement {
    /// Name of the placed fragment; becomes the new tip's label
    pub fragment_id: String,
    /// Edge the fragment is placed on
    pub edge_id: i64,
    /// Confidence of the placement; only used to pick among duplicates
    pub like_weight_ratio: f64,
    /// Distance from the distal (child) end of the edge to the split point
    pub distal_length: f64,
    /// Branch length of the new tip
    pub pendant_length: f64,
}

/// Keep one placement per fragment: the highest `like_weight_ratio`, ties
/// broken by the smallest `pendant_length`. First-seen order is preserved.
fn deduplicate(placements: &[Placement]) -> Vec<&Placement> {
    let mut slot_of: HashMap<&str, usize> = HashMap::new();
    let mut best: Vec<&Placement> = Vec::new();
    for p in placements {
        match slot_of.get(p.fragment_id.as_str()) {
            None => {
                slot_of.insert(&p.fragment_id, best.len());
                best.push(p);
            }
            Some(&slot) => {
                let current = best[slot];
                let diff = p.like_weight_ratio - current.like_weight_ratio;
                if diff > LWR_EPSILON
                    || (diff.abs() <= LWR_EPSILON && p.pendant_length < current.pendant_length)
                {
                    best[slot] = p;
                }
            }
        }
    }
    best
}

impl NewickTree {
    fn validate_placement(
        &self,
        p: &Placement,
        edges: &HashMap<i64, usize>,
    ) -> Result<(), NewickError> {
        let &node = edges.get(&p.edge_id).ok_or_else(|| NewickError::UnknownEdge {
            edge_id: p.edge_id,
            fragment_id: p.fragment_id.clone(),
        })?;
        let edge_length = self.nodes[node].branch_length;
        let beyond_edge = !edge_length.is_nan() && p.distal_length > edge_length;
        if p.distal_length.is_nan() || p.distal_length < 0.0 || beyond_edge {
            return Err(NewickError::DistalOutOfRange {
                fragment_id: p.fragment_id.clone(),
                distal_length: p.distal_length,
                edge_length,
            });
        }
        if p.pendant_length < 0.0 {
            return Err(NewickError::InvalidPlacement {
                fragment_id: p.fragment_id.clone(),
                reason: format!("negative pendant_length {}", p.pendant_length),
            });
        }
        Ok(())
    }

    /// Graft every placement onto its edge.
    ///
    /// For an edge from parent `P` to child `C` of length `L`, each distinct
    /// positive `distal_length` `d` becomes an unnamed split node at
    /// distance `d` above `C`, chained `P -> S_k -> ... -> S_1 -> C` with
    /// segment lengths that sum to `L`. Each fragment becomes a tip under
    /// the split node of its `d`, or directly under `C` when `d` is zero.
    /// Placing on the root's own edge puts the new split nodes above the
    /// old root.
    ///
    /// All placements are validated before the tree is touched; on error
    /// the tree is unchanged.
    pub fn insert_fully_resolved(&mut self, placements: &[Placement]) -> Result<(), NewickError> {
        if placements.is_empty() {
            return Ok(());
        }
        let edges = self.build_edge_index();
        for p in placements {
            self.validate_placement(p, &edges)?;
        }

        let chosen = deduplicate(placements);
        let mut by_edge: BTreeMap<i64, Vec<&Placement>> = BTreeMap::new();
        for p in chosen {
            by_edge.entry(p.edge_id).or_default().push(p);
        }

        let mut new_nodes = 0;
        for group in by_edge.values_mut() {
            group.sort_by(|a, b| b.distal_length.total_cmp(&a.distal_length));
            let mut distinct: Vec<f64> = group.iter().map(|p| p.distal_length).collect();
            distinct.dedup();
            new_nodes += distinct.iter().filter(|&&d| d > 0.0).count() + group.len();
        }
        if self.nodes.len() + new_nodes > MAX_NODES {
            return Err(NewickError::TooLarge(self.nodes.len() + new_nodes));
        }
        self.nodes.reserve(new_nodes);

        for (edge_id, group) in by_edge {
            let child = edges[&edge_id];
            self.graft_edge(child, &group)?;
        }
        Ok(())
    }

    /// `group` is sorted by descending `distal_length`.
    fn graft_edge(&mut self, child: usize, group: &[&Placement]) -> Result<(), NewickError> {
        let edge_length = self.nodes[child].branch_length;
        let mut remaining = edge_length;
        // Node that the next split hangs from; `None` until the first split
        // has taken the child's place.
        let mut above: Option<usize> = None;
        let mut i = 0;
        while i < group.len() {
            let d = group[i].distal_length;
            let attach_to = if d > 0.0 {
                let length = if remaining.is_nan() { f64::NAN } else { remaining - d };
                let split = self.add_node(String::new(), length, None)?;
                match above {
                    None => self.replace_in_parent(child, split),
                    Some(parent) => self.adopt_first(split, parent),
                }
                above = Some(split);
                remaining = d;
                split
            } else {
                child
            };
            while i < group.len() && group[i].distal_length == d {
                let p = group[i];
                let tip = self.add_node(p.fragment_id.clone(), p.pendant_length, None)?;
                self.set_parent(tip, attach_to)?;
                i += 1;
            }
        }
        if let Some(lowest) = above {
            self.nodes[child].branch_length = remaining;
            self.adopt_first(child, lowest);
        }
        Ok(())
    }

    /// Make detached `child` the first child of `parent`.
    fn adopt_first(&mut self, child: usize, parent: usize) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.insert(0, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    fn placement(fragment: &str, edge: i64, lwr: f64, distal: f64, pendant: f64) -> Placement {
        Placement {
            fragment_id: fragment.to_string(),
            edge_id: edge,
            like_weight_ratio: lwr,
            distal_length: distal,
            pendant_length: pendant,
        }
    }

    fn base_tree() -> NewickTree {
        NewickTree::parse("((A:1{0},B:1{1}):2{2},C:3{3});").unwrap()
    }

    fn assert_links(tree: &NewickTree) {
        for (i, node) in tree.nodes().iter().enumerate() {
            for &c in node.children() {
                assert_eq!(tree.node(c).unwrap().parent(), Some(i));
            }
            if let Some(p) = node.parent() {
                assert!(tree.node(p).unwrap().children().contains(&i));
            }
            assert!(node.branch_length.is_nan() || node.branch_length >= 0.0);
        }
    }

    #[test]
    fn test_single_placement_splits_edge() {
        let mut tree = base_tree();
        tree.insert_fully_resolved(&[placement("frag1", 2, 1.0, 0.5, 0.1)])
            .unwrap();
        assert_eq!(
            tree.to_newick(),
            "(((A:1{0},B:1{1}):0.5{2},frag1:0.1):1.5,C:3{3});"
        );
        assert_links(&tree);
        let ab = tree.find_by_edge_id(2).unwrap();
        let split = tree.node(ab).unwrap().parent().unwrap();
        let total = tree.node(ab).unwrap().branch_length + tree.node(split).unwrap().branch_length;
        assert!((total - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_shared_split_and_chain() {
        let mut tree = base_tree();
        tree.insert_fully_resolved(&[
            placement("f1", 3, 1.0, 1.0, 0.2),
            placement("f2", 3, 1.0, 2.5, 0.3),
            placement("f3", 3, 1.0, 1.0, 0.4),
        ])
        .unwrap();
        // C:3 becomes root -> S(0.5) -> S(1.5) -> C(1.0).
        assert_eq!(
            tree.to_newick(),
            "((A:1{0},B:1{1}):2{2},((C:1{3},f1:0.2,f3:0.4):1.5,f2:0.3):0.5);"
        );
        assert_links(&tree);
        assert_eq!(tree.num_nodes(), 5 + 2 + 3);
    }

    #[test]
    fn test_zero_distal_attaches_to_child() {
        let mut tree = base_tree();
        tree.insert_fully_resolved(&[placement("f", 0, 1.0, 0.0, 0.7)])
            .unwrap();
        assert_eq!(tree.to_newick(), "(((f:0.7)A:1{0},B:1{1}):2{2},C:3{3});");
        assert_links(&tree);
    }

    #[test]
    fn test_root_edge_gets_new_root() {
        let mut tree = NewickTree::parse("(A:1,B:1):4{7};").unwrap();
        tree.insert_fully_resolved(&[placement("f", 7, 1.0, 1.0, 0.1)])
            .unwrap();
        assert_eq!(tree.to_newick(), "((A:1,B:1):1{7},f:0.1):3;");
        assert_eq!(tree.node(tree.root()).unwrap().parent(), None);
        assert_links(&tree);
    }

    #[test]
    fn test_duplicates_keep_best() {
        let mut tree = base_tree();
        tree.insert_fully_resolved(&[
            placement("f", 0, 0.2, 0.5, 0.1),
            placement("f", 1, 0.9, 0.5, 0.3),
            placement("f", 3, 0.9 + 1e-12, 0.5, 0.2),
        ])
        .unwrap();
        let tip = tree.find_by_name("f").unwrap();
        let split = tree.node(tip).unwrap().parent().unwrap();
        let placed_on = tree.node(split).unwrap().children()[0];
        assert_eq!(tree.node(placed_on).unwrap().name, "C");
        assert_eq!(tree.tip_names().iter().filter(|n| **n == "f").count(), 1);
    }

    #[test]
    fn test_validation_errors_leave_tree_unchanged() {
        let original = base_tree();
        let cases = [
            (placement("f", 99, 1.0, 0.1, 0.1), ErrorKind::UnknownEdge),
            (placement("f", 0, 1.0, 1.5, 0.1), ErrorKind::DistalOutOfRange),
            (placement("f", 0, 1.0, -0.1, 0.1), ErrorKind::DistalOutOfRange),
            (placement("f", 0, 1.0, 0.1, -1.0), ErrorKind::ParameterError),
        ];
        for (p, kind) in cases {
            let mut tree = original.clone();
            let err = tree
                .insert_fully_resolved(&[placement("ok", 1, 1.0, 0.1, 0.1), p])
                .unwrap_err();
            assert_eq!(err.kind(), kind, "{err}");
            assert_eq!(tree, original);
        }
    }

    #[test]
    fn test_unknown_length_edge() {
        let mut tree = NewickTree::parse("(A{0},B:1{1});").unwrap();
        tree.insert_fully_resolved(&[placement("f", 0, 1.0, 5.0, 0.1)])
            .unwrap();
        assert_eq!(tree.to_newick(), "((A:5{0},f:0.1),B:1{1});");
    }

    proptest! {
        #[test]
        fn prop_chain_preserves_edge_length(
            distals in prop::collection::vec(0u32..=20, 1..8),
            edge in 0i64..4,
        ) {
            let mut tree = base_tree();
            let edge_node = tree.find_by_edge_id(edge).unwrap();
            let length = tree.node(edge_node).unwrap().branch_length;
            let parent = tree.node(edge_node).unwrap().parent().unwrap();
            let placements: Vec<Placement> = distals
                .iter()
                .enumerate()
                .map(|(i, &d)| placement(&format!("frag{i}"), edge, 1.0, length * f64::from(d) / 20.0, 0.05))
                .collect();
            tree.insert_fully_resolved(&placements).unwrap();
            assert_links(&tree);

            let mut sum = 0.0;
            let mut current = tree.find_by_edge_id(edge).unwrap();
            while current != parent {
                sum += tree.node(current).unwrap().branch_length;
                current = tree.node(current).unwrap().parent().unwrap();
            }
            prop_assert!((sum - length).abs() < 1e-9);
            for p in &placements {
                let tip = tree.find_by_name(&p.fragment_id).unwrap();
                prop_assert!(tree.is_tip(tip));
                prop_assert_eq!(tree.node(tip).unwrap().branch_length, p.pendant_length);
            }
        }
    }
}
