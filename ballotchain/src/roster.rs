use crate::*;
use std::collections::HashSet;

/// A participating node, addressed through the messaging substrate
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerIdentity {
    pub address: String,
}

impl ServerIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        ServerIdentity {
            address: address.into(),
        }
    }
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// The ordered set of nodes taking part in an election.
///
/// A node's position in `list` is its index in the secret-sharing scheme.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub list: Vec<ServerIdentity>,
}

impl Roster {
    pub fn new(list: Vec<ServerIdentity>) -> Result<Self, Error> {
        if list.is_empty() {
            return Err(Error::InvalidRoster("roster is empty".into()));
        }
        let mut seen = HashSet::with_capacity(list.len());
        for identity in &list {
            if !seen.insert(identity) {
                return Err(Error::InvalidRoster(format!(
                    "{} is listed twice",
                    identity
                )));
            }
        }
        Ok(Roster { list })
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn index_of(&self, identity: &ServerIdentity) -> Option<u32> {
        self.list
            .iter()
            .position(|candidate| candidate == identity)
            .map(|position| position as u32)
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub identity: ServerIdentity,

    /// Roster index, which is also the node's share index
    pub index: u32,

    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl TreeNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Rooted n-ary spanning tree over a roster, rebuilt for every protocol run.
///
/// Nodes are addressed by their position in the tree; the root is always position 0.
#[derive(Debug, Clone)]
pub struct ProtocolTree {
    nodes: Vec<TreeNode>,
}

impl ProtocolTree {
    /// Build a tree of fan-out `branching` rooted at `root`.
    ///
    /// The remaining nodes keep their roster order and fill the tree breadth-first.
    pub fn nary(roster: &Roster, branching: usize, root: &ServerIdentity) -> Result<Self, Error> {
        if branching == 0 {
            return Err(Error::Config("tree branching must be at least 1".into()));
        }
        let root_index = roster
            .index_of(root)
            .ok_or_else(|| Error::NodeNotFound(root.to_string()))?;

        let mut order = vec![(root_index, root.clone())];
        order.extend(
            roster
                .list
                .iter()
                .enumerate()
                .filter(|(index, _)| *index as u32 != root_index)
                .map(|(index, identity)| (index as u32, identity.clone())),
        );

        let mut nodes: Vec<TreeNode> = order
            .into_iter()
            .enumerate()
            .map(|(position, (index, identity))| TreeNode {
                identity,
                index,
                parent: if position == 0 {
                    None
                } else {
                    Some((position - 1) / branching)
                },
                children: vec![],
            })
            .collect();

        for position in 1..nodes.len() {
            let parent = (position - 1) / branching;
            nodes[parent].children.push(position);
        }

        Ok(ProtocolTree { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    pub fn node(&self, position: usize) -> &TreeNode {
        &self.nodes[position]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn position_of(&self, identity: &ServerIdentity) -> Option<usize> {
        self.nodes.iter().position(|node| node.identity == *identity)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn roster(n: usize) -> Roster {
        Roster::new(
            (0..n)
                .map(|i| ServerIdentity::new(format!("local://{}", i)))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn binary_tree_shape() {
        let roster = roster(6);
        let tree = ProtocolTree::nary(&roster, 2, &roster.list[0]).unwrap();

        assert_eq!(tree.len(), 6);
        assert!(tree.root().is_root());
        assert_eq!(tree.root().children, vec![1, 2]);
        assert_eq!(tree.node(1).children, vec![3, 4]);
        assert_eq!(tree.node(2).children, vec![5]);
        assert_eq!(tree.node(5).parent, Some(2));
        assert!(tree.node(4).is_leaf());
    }

    #[test]
    fn root_keeps_roster_index() {
        let roster = roster(4);
        let root = roster.list[2].clone();
        let tree = ProtocolTree::nary(&roster, 3, &root).unwrap();

        assert_eq!(tree.root().identity, root);
        assert_eq!(tree.root().index, 2);
        let indices: Vec<u32> = tree.nodes().iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![2, 0, 1, 3]);
        assert_eq!(tree.root().children, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_foreign_root_and_duplicates() {
        let roster = roster(3);
        let stranger = ServerIdentity::new("local://99");
        assert!(matches!(
            ProtocolTree::nary(&roster, 2, &stranger),
            Err(Error::NodeNotFound(_))
        ));

        let doubled = vec![roster.list[0].clone(), roster.list[0].clone()];
        assert!(matches!(
            Roster::new(doubled),
            Err(Error::InvalidRoster(_))
        ));
    }
}
