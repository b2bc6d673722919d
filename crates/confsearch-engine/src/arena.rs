//! Search tree node arena.
//!
//! Nodes live in a flat arena addressed by integer index; the parent link is
//! a weak index, never an owning pointer, and paths are rebuilt by walking
//! indices back to the root.

use smallvec::SmallVec;

/// Index of a node in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node of the search tree: an opaque partial-configuration payload plus
/// bookkeeping for best-first search.
#[derive(Debug, Clone)]
pub struct SearchNode<N, A> {
    payload: N,
    /// Weak back-reference for path reconstruction only.
    parent: Option<NodeId>,
    /// Label of the refinement step that produced this node (root: `None`).
    action: Option<A>,
    /// Write-once f-value memo. Once set it is never recomputed.
    f: Option<f64>,
    is_goal: bool,
    depth: usize,
}

impl<N, A> SearchNode<N, A> {
    pub fn payload(&self) -> &N {
        &self.payload
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn action(&self) -> Option<&A> {
        self.action.as_ref()
    }

    pub fn f(&self) -> Option<f64> {
        self.f
    }

    pub fn is_goal(&self) -> bool {
        self.is_goal
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Arena owning every node created during one optimizer run.
#[derive(Debug)]
pub struct NodeArena<N, A> {
    nodes: Vec<SearchNode<N, A>>,
}

impl<N: Clone, A> NodeArena<N, A> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Inserts the root node and returns its id.
    pub fn insert_root(&mut self, payload: N, is_goal: bool) -> NodeId {
        debug_assert!(self.nodes.is_empty(), "root inserted twice");
        self.push(SearchNode {
            payload,
            parent: None,
            action: None,
            f: None,
            is_goal,
            depth: 0,
        })
    }

    /// Inserts a child of `parent` reached via `action`.
    pub fn insert_child(&mut self, parent: NodeId, action: A, payload: N, is_goal: bool) -> NodeId {
        let depth = self.nodes[parent.0].depth + 1;
        self.push(SearchNode {
            payload,
            parent: Some(parent),
            action: Some(action),
            f: None,
            is_goal,
            depth,
        })
    }

    fn push(&mut self, node: SearchNode<N, A>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &SearchNode<N, A> {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Memoizes the f-value of a node. The memo is write-once: a second call
    /// for the same node keeps the first value.
    pub fn set_f(&mut self, id: NodeId, f: f64) {
        let node = &mut self.nodes[id.0];
        if node.f.is_none() {
            node.f = Some(f);
        } else {
            debug_assert_eq!(node.f, Some(f), "f-memo overwrite attempted");
        }
    }

    /// Rebuilds the root-to-node payload path by walking parent indices.
    pub fn path_of(&self, id: NodeId) -> Vec<N> {
        let mut indices: SmallVec<[usize; 16]> = SmallVec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            indices.push(c.0);
            current = self.nodes[c.0].parent;
        }
        indices
            .iter()
            .rev()
            .map(|&i| self.nodes[i].payload.clone())
            .collect()
    }
}

impl<N: Clone, A> Default for NodeArena<N, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_children() {
        let mut arena: NodeArena<u32, &str> = NodeArena::new();
        let root = arena.insert_root(1, false);
        let a = arena.insert_child(root, "left", 2, false);
        let b = arena.insert_child(a, "left", 4, true);

        assert_eq!(arena.node(root).depth(), 0);
        assert_eq!(arena.node(a).depth(), 1);
        assert_eq!(arena.node(b).depth(), 2);
        assert!(arena.node(b).is_goal());
        assert_eq!(arena.node(b).parent(), Some(a));
        assert_eq!(arena.node(b).action(), Some(&"left"));
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn path_reconstruction_walks_parents() {
        let mut arena: NodeArena<u32, &str> = NodeArena::new();
        let root = arena.insert_root(1, false);
        let a = arena.insert_child(root, "l", 2, false);
        let b = arena.insert_child(a, "r", 5, true);

        assert_eq!(arena.path_of(b), vec![1, 2, 5]);
        assert_eq!(arena.path_of(root), vec![1]);
    }

    #[test]
    fn f_memo_is_write_once() {
        let mut arena: NodeArena<u32, &str> = NodeArena::new();
        let root = arena.insert_root(1, false);
        assert_eq!(arena.node(root).f(), None);
        arena.set_f(root, 0.5);
        assert_eq!(arena.node(root).f(), Some(0.5));
        // A second write with the same value is a no-op.
        arena.set_f(root, 0.5);
        assert_eq!(arena.node(root).f(), Some(0.5));
    }
}
