use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EnsembleError, Result};
use crate::tailfree::keys::{TEMPERATURE_PREFIX, WEIGHT_PREFIX};

pub const ROOT_NAME: &str = "root";

/// Index of a node in a [`FamilyTree`]; nodes are numbered in preorder
/// so the root is always `0`
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Root,
    Internal,
    Leaf,
}

#[derive(Debug, Clone)]
struct Node {
    name: Box<str>,
    role: NodeRole,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Rooted tree over base models; leaves are base-model names.
///
/// Built from a mapping of parent name to its ordered child names. The
/// order of children is kept: it fixes the column order of conditional
/// weights and the order of leaves.
#[derive(Debug, Clone)]
pub struct FamilyTree {
    nodes: Vec<Node>,
    index: BTreeMap<Box<str>, NodeId>,
}

impl FamilyTree {
    pub fn new(parents: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        if !parents.contains_key(ROOT_NAME) {
            return Err(EnsembleError::config(format!(
                "family tree has no \"{}\" entry",
                ROOT_NAME
            )));
        }

        let mut seen_child = BTreeSet::new();
        for (parent, children) in parents.iter() {
            check_name(parent)?;
            if children.is_empty() {
                return Err(EnsembleError::config(format!(
                    "node \"{}\" has an empty list of children",
                    parent
                )));
            }
            for child in children.iter() {
                check_name(child)?;
                if child == ROOT_NAME {
                    return Err(EnsembleError::config("\"root\" appears as a child"));
                }
                if !seen_child.insert(child.as_str()) {
                    return Err(EnsembleError::config(format!(
                        "node \"{}\" is listed as a child more than once",
                        child
                    )));
                }
            }
        }

        let mut tree = FamilyTree {
            nodes: vec![],
            index: BTreeMap::new(),
        };
        tree.push_subtree(ROOT_NAME, None, parents);

        for parent in parents.keys() {
            if !tree.index.contains_key(parent.as_str()) {
                return Err(EnsembleError::config(format!(
                    "node \"{}\" is not reachable from the root",
                    parent
                )));
            }
        }

        Ok(tree)
    }

    /// Every name a direct child of the root
    pub fn flat<T: AsRef<str>>(names: &[T]) -> Result<Self> {
        let children = names.iter().map(|x| x.as_ref().to_string()).collect();
        Self::new(&BTreeMap::from([(ROOT_NAME.to_string(), children)]))
    }

    /// Parse a JSON object of `{"parent": ["child", ...]}`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let parents: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
        Self::new(&parents)
    }

    pub fn from_json_file(file: &str) -> Result<Self> {
        let reader = std::io::BufReader::new(std::fs::File::open(file)?);
        let parents: BTreeMap<String, Vec<String>> = serde_json::from_reader(reader)?;
        Self::new(&parents)
    }

    /// The mapping this tree was built from
    pub fn to_parent_map(&self) -> BTreeMap<String, Vec<String>> {
        self.parent_node_ids()
            .into_iter()
            .map(|p| {
                let children = self.children(p).iter().map(|&c| self.name(c).to_string());
                (self.name(p).to_string(), children.collect())
            })
            .collect()
    }

    // Children are visited in their listed order; `seen_child` in `new`
    // guarantees each node is pushed once, so the recursion terminates.
    fn push_subtree(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
        parents: &BTreeMap<String, Vec<String>>,
    ) -> NodeId {
        let id = self.nodes.len();
        let role = match (parent, parents.contains_key(name)) {
            (None, _) => NodeRole::Root,
            (Some(_), true) => NodeRole::Internal,
            (Some(_), false) => NodeRole::Leaf,
        };
        self.nodes.push(Node {
            name: name.into(),
            role,
            parent,
            children: vec![],
        });
        self.index.insert(name.into(), id);

        if let Some(children) = parents.get(name) {
            for child in children.iter() {
                let child_id = self.push_subtree(child, Some(id), parents);
                self.nodes[id].children.push(child_id);
            }
        }
        id
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn role(&self, id: NodeId) -> NodeRole {
        self.nodes[id].role
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Root and internal nodes in preorder
    pub fn parent_node_ids(&self) -> Vec<NodeId> {
        self.filter_ids(|r| r != NodeRole::Leaf)
    }

    pub fn parent_node_names(&self) -> Vec<&str> {
        self.names_of(&self.parent_node_ids())
    }

    /// Every node except the root, in preorder
    pub fn nonroot_node_ids(&self) -> Vec<NodeId> {
        self.filter_ids(|r| r != NodeRole::Root)
    }

    pub fn nonroot_node_names(&self) -> Vec<&str> {
        self.names_of(&self.nonroot_node_ids())
    }

    /// Leaves in depth-first order
    pub fn leaf_ids(&self) -> Vec<NodeId> {
        self.filter_ids(|r| r == NodeRole::Leaf)
    }

    pub fn leaf_names(&self) -> Vec<&str> {
        self.names_of(&self.leaf_ids())
    }

    /// Leaves must be exactly the given base-model names
    pub fn validate_leaves<T: AsRef<str>>(&self, model_names: &[T]) -> Result<()> {
        let leaves: BTreeSet<&str> = self.leaf_names().into_iter().collect();
        let models: BTreeSet<&str> = model_names.iter().map(|x| x.as_ref()).collect();

        let missing: Vec<&str> = models.difference(&leaves).copied().collect();
        let extra: Vec<&str> = leaves.difference(&models).copied().collect();

        if missing.is_empty() && extra.is_empty() {
            Ok(())
        } else {
            Err(EnsembleError::config(format!(
                "tree leaves do not match base models; models without a leaf: {:?}, leaves without a model: {:?}",
                missing, extra
            )))
        }
    }

    fn filter_ids(&self, keep: impl Fn(NodeRole) -> bool) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&i| keep(self.nodes[i].role))
            .collect()
    }

    fn names_of(&self, ids: &[NodeId]) -> Vec<&str> {
        ids.iter().map(|&i| self.name(i)).collect()
    }
}

/// Names end up in file headers and latent labels
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(EnsembleError::config(format!(
            "invalid node name \"{}\": names must be non-empty without whitespace",
            name
        )));
    }
    if name.starts_with(WEIGHT_PREFIX) || name.starts_with(TEMPERATURE_PREFIX) {
        return Err(EnsembleError::config(format!(
            "node name \"{}\" starts with a reserved prefix",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level() -> Result<FamilyTree> {
        FamilyTree::from_json_str(
            r#"{"root": ["g1", "m3"], "g1": ["m1", "m2"]}"#,
        )
    }

    #[test]
    fn preorder_accessors() -> Result<()> {
        let tree = two_level()?;
        assert_eq!(tree.num_nodes(), 5);
        assert_eq!(tree.parent_node_names(), vec!["root", "g1"]);
        assert_eq!(tree.nonroot_node_names(), vec!["g1", "m1", "m2", "m3"]);
        assert_eq!(tree.leaf_names(), vec!["m1", "m2", "m3"]);

        let g1 = tree.id("g1").unwrap();
        assert_eq!(tree.role(g1), NodeRole::Internal);
        assert_eq!(tree.parent(g1), Some(tree.root()));
        assert_eq!(tree.to_parent_map()["g1"], vec!["m1", "m2"]);
        Ok(())
    }

    #[test]
    fn flat_tree_has_only_the_root_as_parent() -> Result<()> {
        let tree = FamilyTree::flat(&["a", "b", "c"])?;
        assert_eq!(tree.parent_node_ids(), vec![0]);
        assert_eq!(tree.leaf_names(), vec!["a", "b", "c"]);
        tree.validate_leaves(&["c", "b", "a"])?;
        assert!(tree.validate_leaves(&["a", "b"]).is_err());
        Ok(())
    }

    #[test]
    fn malformed_trees_are_rejected() {
        let bad = [
            r#"{"top": ["a", "b"]}"#,
            r#"{"root": ["a", "b"], "g": ["a"]}"#,
            r#"{"root": ["a", "root"]}"#,
            r#"{"root": ["a"], "orphan": ["b"]}"#,
            r#"{"root": []}"#,
            r#"{"root": ["a", "x y"]}"#,
            r#"{"root": ["a", "temp_a"]}"#,
            r#"{"root": ["a", "g"], "g": ["h"], "h": ["g"]}"#,
        ];
        for json in bad {
            assert!(
                matches!(FamilyTree::from_json_str(json), Err(EnsembleError::Config(_))),
                "accepted {}",
                json
            );
        }
    }
}
