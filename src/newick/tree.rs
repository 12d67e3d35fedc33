use std::collections::{HashMap, HashSet};

use super::{NewickError, MAX_NODES};

/// One node of a tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Label, empty for unnamed nodes
    pub name: String,
    /// Length of the edge above this node; NaN when unspecified
    pub branch_length: f64,
    /// jplace edge identifier of the edge above this node
    pub edge_id: Option<i64>,
    pub(super) parent: Option<usize>,
    pub(super) children: Vec<usize>,
}

impl Node {
    pub(super) fn new(name: String, branch_length: f64, edge_id: Option<i64>) -> Self {
        Self {
            name,
            branch_length,
            edge_id,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Parent index, `None` for the root and detached nodes.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Child indices in order.
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// True when the node has no children.
    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

// Two unspecified lengths compare equal.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        let lengths_match = (self.branch_length.is_nan() && other.branch_length.is_nan())
            || self.branch_length == other.branch_length;
        self.name == other.name
            && lengths_match
            && self.edge_id == other.edge_id
            && self.parent == other.parent
            && self.children == other.children
    }
}

/// Input row for [`NewickTree::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    /// Caller-chosen id, unique among the rows
    pub node_id: i64,
    /// Id of the parent row, `None` for the root
    pub parent_id: Option<i64>,
    /// Label
    pub name: String,
    /// Branch length; NaN when unspecified
    pub branch_length: f64,
    /// Edge identifier
    pub edge_id: Option<i64>,
}

/// Output row of [`NewickTree::to_rows`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    /// Index of the node in the arena
    pub node_index: i64,
    /// Label
    pub name: String,
    /// Branch length, `None` when unspecified
    pub branch_length: Option<f64>,
    /// Edge identifier
    pub edge_id: Option<i64>,
    /// Parent index, `None` for the root
    pub parent_index: Option<i64>,
    /// Whether the node is a tip
    pub is_tip: bool,
}

/// Rooted tree stored as a node arena.
#[derive(Debug, Clone, PartialEq)]
pub struct NewickTree {
    pub(super) nodes: Vec<Node>,
    pub(super) root: usize,
}

impl NewickTree {
    /// Tree holding a single unnamed root.
    pub fn single_root() -> Self {
        Self {
            nodes: vec![Node::new(String::new(), f64::NAN, None)],
            root: 0,
        }
    }

    /// Index of the root.
    pub fn root(&self) -> usize {
        self.root
    }

    /// All nodes in index order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node at `index`, if any.
    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of tips.
    pub fn num_tips(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_tip()).count()
    }

    /// Whether `index` is a tip; false for indices outside the tree.
    pub fn is_tip(&self, index: usize) -> bool {
        self.nodes.get(index).is_some_and(Node::is_tip)
    }

    /// Indices of every tip, ascending.
    pub fn tips(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].is_tip()).collect()
    }

    /// Labels of every tip, in index order.
    pub fn tip_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.is_tip())
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Parents before children, siblings in order.
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.nodes[node].children.iter().rev());
        }
        order
    }

    /// Children before parents, siblings in order.
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.nodes[node].children.iter());
        }
        order.reverse();
        order
    }

    /// First node whose label equals `name`.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// First node carrying `edge_id`.
    pub fn find_by_edge_id(&self, edge_id: i64) -> Option<usize> {
        self.nodes.iter().position(|n| n.edge_id == Some(edge_id))
    }

    /// Map of edge id to node index.
    pub fn build_edge_index(&self) -> HashMap<i64, usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.edge_id.map(|e| (e, i)))
            .collect()
    }

    fn check(&self, index: usize) -> Result<(), NewickError> {
        if index < self.nodes.len() {
            Ok(())
        } else {
            Err(NewickError::InvalidNode {
                index,
                reason: "index outside the tree",
            })
        }
    }

    fn known_length(&self, index: usize) -> f64 {
        let bl = self.nodes[index].branch_length;
        if bl.is_nan() {
            0.0
        } else {
            bl
        }
    }

    /// Sum of branch lengths from `index` up to the root. Unspecified
    /// lengths count as zero.
    pub fn distance_to_root(&self, index: usize) -> Result<f64, NewickError> {
        self.check(index)?;
        let mut dist = 0.0;
        let mut current = index;
        while current != self.root {
            dist += self.known_length(current);
            match self.nodes[current].parent {
                Some(p) => current = p,
                None => break,
            }
        }
        Ok(dist)
    }

    /// Lowest common ancestor of `a` and `b`.
    pub fn find_lca(&self, a: usize, b: usize) -> Result<usize, NewickError> {
        self.check(a)?;
        self.check(b)?;
        let mut ancestors = HashSet::new();
        let mut current = Some(a);
        while let Some(node) = current {
            ancestors.insert(node);
            current = self.nodes[node].parent;
        }
        let mut current = Some(b);
        while let Some(node) = current {
            if ancestors.contains(&node) {
                return Ok(node);
            }
            current = self.nodes[node].parent;
        }
        Err(NewickError::InvalidNode {
            index: b,
            reason: "no common ancestor",
        })
    }

    /// Path length between `a` and `b` through their common ancestor.
    pub fn pairwise_distance(&self, a: usize, b: usize) -> Result<f64, NewickError> {
        if a == b {
            self.check(a)?;
            return Ok(0.0);
        }
        let lca = self.find_lca(a, b)?;
        let mut dist = 0.0;
        for start in [a, b] {
            let mut current = start;
            while current != lca {
                dist += self.known_length(current);
                match self.nodes[current].parent {
                    Some(p) => current = p,
                    None => break,
                }
            }
        }
        Ok(dist)
    }

    /// Append a detached node and return its index.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        branch_length: f64,
        edge_id: Option<i64>,
    ) -> Result<usize, NewickError> {
        if self.nodes.len() >= MAX_NODES {
            return Err(NewickError::TooLarge(self.nodes.len() + 1));
        }
        self.nodes.push(Node::new(name.into(), branch_length, edge_id));
        Ok(self.nodes.len() - 1)
    }

    /// Make `parent` the parent of `child`, detaching it from any previous
    /// parent. The child is appended after existing siblings.
    pub fn set_parent(&mut self, child: usize, parent: usize) -> Result<(), NewickError> {
        self.check(child)?;
        self.check(parent)?;
        if child == parent {
            return Err(NewickError::InvalidNode {
                index: child,
                reason: "a node cannot be its own parent",
            });
        }
        if let Some(old) = self.nodes[child].parent {
            self.remove_child(old, child)?;
        }
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        Ok(())
    }

    /// Drop `child` from the child list of `parent`. The child keeps no
    /// parent afterwards.
    pub fn remove_child(&mut self, parent: usize, child: usize) -> Result<(), NewickError> {
        self.check(parent)?;
        self.check(child)?;
        let children = &mut self.nodes[parent].children;
        if let Some(pos) = children.iter().position(|&c| c == child) {
            children.remove(pos);
            if self.nodes[child].parent == Some(parent) {
                self.nodes[child].parent = None;
            }
        }
        Ok(())
    }

    /// Put `new` where `old` sits among its parent's children; `old` is
    /// left detached.
    pub(super) fn replace_in_parent(&mut self, old: usize, new: usize) {
        match self.nodes[old].parent.take() {
            Some(parent) => {
                if let Some(slot) = self.nodes[parent].children.iter_mut().find(|c| **c == old) {
                    *slot = new;
                }
                self.nodes[new].parent = Some(parent);
            }
            None => {
                if self.root == old {
                    self.root = new;
                }
            }
        }
    }

    /// Set the branch length of `index`; NaN clears it.
    pub fn set_branch_length(&mut self, index: usize, length: f64) -> Result<(), NewickError> {
        self.check(index)?;
        if length < 0.0 {
            return Err(NewickError::InvalidNode {
                index,
                reason: "branch length cannot be negative",
            });
        }
        self.nodes[index].branch_length = length;
        Ok(())
    }

    /// Set or clear the edge id of `index`.
    pub fn set_edge_id(&mut self, index: usize, edge_id: Option<i64>) -> Result<(), NewickError> {
        self.check(index)?;
        if let Some(id) = edge_id {
            if self.find_by_edge_id(id).is_some_and(|other| other != index) {
                return Err(NewickError::InvalidNode {
                    index,
                    reason: "edge id already used by another node",
                });
            }
        }
        self.nodes[index].edge_id = edge_id;
        Ok(())
    }

    /// Clear every edge id.
    pub fn clear_edge_ids(&mut self) {
        for node in &mut self.nodes {
            node.edge_id = None;
        }
    }

    /// Whether any node carries an edge id.
    pub fn has_edge_ids(&self) -> bool {
        self.nodes.iter().any(|n| n.edge_id.is_some())
    }

    /// Set the label of `index`.
    pub fn set_name(&mut self, index: usize, name: impl Into<String>) -> Result<(), NewickError> {
        self.check(index)?;
        self.nodes[index].name = name.into();
        Ok(())
    }

    /// One row per node, in index order.
    pub fn to_rows(&self) -> Vec<NodeRow> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| NodeRow {
                node_index: i as i64,
                name: n.name.clone(),
                branch_length: (!n.branch_length.is_nan()).then_some(n.branch_length),
                edge_id: n.edge_id,
                parent_index: n.parent.map(|p| p as i64),
                is_tip: n.is_tip(),
            })
            .collect()
    }

    /// Assemble a tree from rows linked by `parent_id`.
    ///
    /// Node indices follow row order. Fails on duplicate ids, unknown
    /// parents, anything but exactly one root, cycles, nodes unreachable
    /// from the root, duplicate edge ids and negative branch lengths.
    pub fn build(rows: &[NodeInput]) -> Result<Self, NewickError> {
        if rows.is_empty() {
            return Err(NewickError::Build("no nodes given".to_string()));
        }
        if rows.len() > MAX_NODES {
            return Err(NewickError::TooLarge(rows.len()));
        }

        let mut index_of = HashMap::with_capacity(rows.len());
        let mut edge_ids = HashSet::new();
        for (i, row) in rows.iter().enumerate() {
            if index_of.insert(row.node_id, i).is_some() {
                return Err(NewickError::Build(format!("duplicate node_id {}", row.node_id)));
            }
            if row.branch_length < 0.0 {
                return Err(NewickError::Build(format!(
                    "negative branch_length {} for node_id {}",
                    row.branch_length, row.node_id
                )));
            }
            if let Some(edge) = row.edge_id {
                if !edge_ids.insert(edge) {
                    return Err(NewickError::Build(format!("duplicate edge_id {edge}")));
                }
            }
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
        let mut roots = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            match row.parent_id {
                None => roots.push(i),
                Some(pid) => {
                    let &p = index_of.get(&pid).ok_or_else(|| {
                        NewickError::Build(format!(
                            "node {} references non-existent parent {pid}",
                            row.node_id
                        ))
                    })?;
                    if p == i {
                        return Err(NewickError::Build(format!(
                            "cycle detected involving node {}",
                            row.node_id
                        )));
                    }
                    children[p].push(i);
                }
            }
        }
        let root = match roots.as_slice() {
            [] => return Err(NewickError::Build("no root (no node without parent)".to_string())),
            [root] => *root,
            many => {
                return Err(NewickError::Build(format!(
                    "multiple roots ({} nodes without parent)",
                    many.len()
                )))
            }
        };

        // Each node has at most one parent, so any node not reached from
        // the root sits on a cycle or hangs below one.
        let mut visited = vec![false; rows.len()];
        let mut stack = vec![root];
        visited[root] = true;
        while let Some(node) = stack.pop() {
            for &child in &children[node] {
                if !visited[child] {
                    visited[child] = true;
                    stack.push(child);
                }
            }
        }
        if let Some(i) = visited.iter().position(|v| !v) {
            return Err(NewickError::Build(format!(
                "node {} is not reachable from the root (cycle or disconnected subtree)",
                rows[i].node_id
            )));
        }

        let nodes = rows
            .iter()
            .enumerate()
            .map(|(i, row)| Node {
                name: row.name.clone(),
                branch_length: row.branch_length,
                edge_id: row.edge_id,
                parent: row.parent_id.and_then(|pid| index_of.get(&pid).copied()),
                children: std::mem::take(&mut children[i]),
            })
            .collect();
        Ok(Self { nodes, root })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn row(id: i64, parent: Option<i64>, name: &str, bl: f64, edge: Option<i64>) -> NodeInput {
        NodeInput {
            node_id: id,
            parent_id: parent,
            name: name.to_string(),
            branch_length: bl,
            edge_id: edge,
        }
    }

    fn sample() -> NewickTree {
        // ((A:1,B:2)AB:3,C:4)root;
        NewickTree::build(&[
            row(10, None, "root", f64::NAN, None),
            row(11, Some(10), "AB", 3.0, Some(2)),
            row(12, Some(11), "A", 1.0, Some(0)),
            row(13, Some(11), "B", 2.0, Some(1)),
            row(14, Some(10), "C", 4.0, Some(3)),
        ])
        .unwrap()
    }

    #[test]
    fn test_build_and_queries() {
        let tree = sample();
        assert_eq!(tree.root(), 0);
        assert_eq!(tree.num_nodes(), 5);
        assert_eq!(tree.num_tips(), 3);
        assert_eq!(tree.tip_names(), vec!["A", "B", "C"]);
        assert_eq!(tree.preorder(), vec![0, 1, 2, 3, 4]);
        assert_eq!(tree.postorder(), vec![2, 3, 1, 4, 0]);
        assert_eq!(tree.find_by_name("B"), Some(3));
        assert_eq!(tree.find_by_edge_id(3), Some(4));
        assert_eq!(tree.find_by_edge_id(99), None);
        assert_eq!(tree.build_edge_index().len(), 4);
    }

    #[test]
    fn test_distances() {
        let tree = sample();
        assert_eq!(tree.distance_to_root(2).unwrap(), 4.0);
        assert_eq!(tree.distance_to_root(0).unwrap(), 0.0);
        assert_eq!(tree.find_lca(2, 3).unwrap(), 1);
        assert_eq!(tree.find_lca(2, 4).unwrap(), 0);
        assert_eq!(tree.pairwise_distance(2, 3).unwrap(), 3.0);
        assert_eq!(tree.pairwise_distance(2, 4).unwrap(), 8.0);
        assert_eq!(tree.pairwise_distance(4, 4).unwrap(), 0.0);
        assert_eq!(
            tree.distance_to_root(42).unwrap_err().kind(),
            ErrorKind::ParameterError
        );
    }

    #[test]
    fn test_build_failures() {
        let cases: Vec<(Vec<NodeInput>, &str)> = vec![
            (vec![], "no nodes"),
            (
                vec![row(1, None, "", 1.0, None), row(1, Some(1), "", 1.0, None)],
                "duplicate node_id",
            ),
            (
                vec![row(1, None, "", 1.0, None), row(2, Some(7), "", 1.0, None)],
                "non-existent parent",
            ),
            (
                vec![row(1, None, "", 1.0, None), row(2, None, "", 1.0, None)],
                "multiple roots",
            ),
            (
                vec![row(1, Some(2), "", 1.0, None), row(2, Some(1), "", 1.0, None)],
                "no root",
            ),
            (
                vec![
                    row(1, None, "", 1.0, None),
                    row(2, Some(3), "", 1.0, None),
                    row(3, Some(2), "", 1.0, None),
                ],
                "not reachable",
            ),
            (
                vec![row(1, None, "", 1.0, Some(5)), row(2, Some(1), "", 1.0, Some(5))],
                "duplicate edge_id",
            ),
            (vec![row(1, None, "", -1.0, None)], "negative branch_length"),
        ];
        for (rows, expected) in cases {
            let err = NewickTree::build(&rows).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedInput);
            assert!(err.to_string().contains(expected), "{err} !~ {expected}");
        }
    }

    #[test]
    fn test_mutators_keep_links_bidirectional() {
        let mut tree = sample();
        let d = tree.add_node("D", 0.5, None).unwrap();
        tree.set_parent(d, 1).unwrap();
        assert_eq!(tree.node(1).unwrap().children(), &[2, 3, d]);
        tree.set_parent(d, 0).unwrap();
        assert_eq!(tree.node(1).unwrap().children(), &[2, 3]);
        assert_eq!(tree.node(d).unwrap().parent(), Some(0));

        tree.remove_child(0, d).unwrap();
        assert_eq!(tree.node(d).unwrap().parent(), None);
        assert!(tree.set_parent(d, d).is_err());

        tree.set_name(d, "renamed").unwrap();
        tree.set_branch_length(d, f64::NAN).unwrap();
        assert!(tree.set_branch_length(d, -0.1).is_err());
        assert!(tree.set_edge_id(d, Some(0)).is_err());
        tree.set_edge_id(d, Some(42)).unwrap();
        assert_eq!(tree.find_by_edge_id(42), Some(d));
    }

    #[test]
    fn test_rows() {
        let rows = sample().to_rows();
        assert_eq!(rows[0].parent_index, None);
        assert_eq!(rows[0].branch_length, None);
        assert!(!rows[0].is_tip);
        assert_eq!(rows[2].parent_index, Some(1));
        assert_eq!(rows[2].edge_id, Some(0));
        assert!(rows[2].is_tip);
    }
}
