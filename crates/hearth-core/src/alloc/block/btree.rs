//! Size-keyed B-tree of free blocks.
//!
//! Nodes live in an index arena and link to each other through parent, child
//! and sibling indices. Only leaves carry a [`BlockId`]; every internal node's
//! key is the maximum key among the leaves below it. Children are kept in
//! non-decreasing key order, so descending into the first child whose key is
//! large enough always ends at the smallest free block that fits.

use super::BlockId;

/// Index of a node in the free tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    key: usize,
    child_count: usize,
    leaf: Option<BlockId>,
}

impl Node {
    fn internal() -> Self {
        Self::default()
    }

    fn leaf(key: usize, block: BlockId) -> Self {
        Self {
            key,
            leaf: Some(block),
            ..Self::default()
        }
    }

    fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }
}

pub(crate) struct FreeTree {
    nodes: Vec<Node>,
    vacant: Vec<NodeId>,
    root: NodeId,
    max_children: usize,
    leaves: usize,
}

impl FreeTree {
    pub(crate) fn new(max_children: usize) -> Self {
        assert!(
            max_children >= 3,
            "free tree needs at least 3 children per node, got {}",
            max_children
        );
        Self {
            nodes: vec![Node::internal()],
            vacant: Vec::new(),
            root: NodeId(0),
            max_children,
            leaves: 0,
        }
    }

    /// Number of free blocks in the tree.
    pub(crate) fn len(&self) -> usize {
        self.leaves
    }

    fn min_children(&self) -> usize {
        self.max_children.div_ceil(2)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn alloc_node(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.vacant.pop() {
            self.nodes[id.index()] = node;
            id
        } else {
            let id = NodeId(u32::try_from(self.nodes.len()).expect("free tree node arena overflow"));
            self.nodes.push(node);
            id
        }
    }

    fn release_node(&mut self, id: NodeId) {
        debug_assert_ne!(id, self.root, "releasing the free tree root");
        self.nodes[id.index()] = Node::internal();
        self.vacant.push(id);
    }

    /// Leaf holding the smallest free block of at least `size` bytes.
    pub(crate) fn find(&self, size: usize) -> Option<(NodeId, BlockId)> {
        let mut node = self.root;
        loop {
            if let Some(block) = self.node(node).leaf {
                return Some((node, block));
            }
            node = self.first_child_at_least(node, size)?;
        }
    }

    fn first_child_at_least(&self, parent: NodeId, key: usize) -> Option<NodeId> {
        let mut child = self.node(parent).first_child;
        while let Some(c) = child {
            if self.node(c).key >= key {
                return Some(c);
            }
            child = self.node(c).next_sibling;
        }
        None
    }

    /// Insert a free block and return the leaf that now owns it.
    pub(crate) fn insert(&mut self, block: BlockId, key: usize) -> NodeId {
        let leaf = self.alloc_node(Node::leaf(key, block));

        let mut node = self.root;
        loop {
            match self.node(node).first_child {
                Some(first) if !self.node(first).is_leaf() => {
                    node = self
                        .first_child_at_least(node, key)
                        .or(self.node(node).last_child)
                        .expect("internal node with a first child has a last child");
                }
                _ => break,
            }
        }

        let before = self.first_child_at_least(node, key);
        self.link_child(node, leaf, before);
        self.leaves += 1;
        self.refresh_keys(node);

        let mut node = node;
        while self.node(node).child_count > self.max_children {
            node = self.split(node);
        }

        leaf
    }

    /// Unlink a leaf and return the block it carried.
    pub(crate) fn remove(&mut self, leaf: NodeId) -> BlockId {
        let block = self
            .node(leaf)
            .leaf
            .expect("free tree remove called on an internal node");
        let parent = self
            .node(leaf)
            .parent
            .expect("free tree leaf is not linked into the tree");

        self.unlink_child(leaf);
        self.release_node(leaf);
        self.leaves -= 1;
        self.refresh_keys(parent);
        self.rebalance(parent);
        self.collapse_root();

        block
    }

    fn link_child(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        let prev = match before {
            Some(b) => self.node(b).prev_sibling,
            None => self.node(parent).last_child,
        };

        {
            let c = self.node_mut(child);
            c.parent = Some(parent);
            c.prev_sibling = prev;
            c.next_sibling = before;
        }
        match prev {
            Some(p) => self.node_mut(p).next_sibling = Some(child),
            None => self.node_mut(parent).first_child = Some(child),
        }
        match before {
            Some(b) => self.node_mut(b).prev_sibling = Some(child),
            None => self.node_mut(parent).last_child = Some(child),
        }
        self.node_mut(parent).child_count += 1;
    }

    fn unlink_child(&mut self, child: NodeId) {
        let Node {
            parent,
            prev_sibling,
            next_sibling,
            ..
        } = *self.node(child);
        let parent = parent.expect("unlinking a node without a parent");

        match prev_sibling {
            Some(p) => self.node_mut(p).next_sibling = next_sibling,
            None => self.node_mut(parent).first_child = next_sibling,
        }
        match next_sibling {
            Some(n) => self.node_mut(n).prev_sibling = prev_sibling,
            None => self.node_mut(parent).last_child = prev_sibling,
        }
        self.node_mut(parent).child_count -= 1;

        let c = self.node_mut(child);
        c.parent = None;
        c.prev_sibling = None;
        c.next_sibling = None;
    }

    /// Recompute keys from `from` up to the root.
    fn refresh_keys(&mut self, from: NodeId) {
        let mut node = Some(from);
        while let Some(n) = node {
            let key = self
                .node(n)
                .last_child
                .map(|last| self.node(last).key)
                .unwrap_or(0);
            self.node_mut(n).key = key;
            node = self.node(n).parent;
        }
    }

    /// Move the upper half of an over-full node's children into a new right
    /// sibling. Returns the parent, which may now be over-full itself.
    fn split(&mut self, node: NodeId) -> NodeId {
        let parent = match self.node(node).parent {
            Some(p) => p,
            None => {
                let new_root = self.alloc_node(Node::internal());
                self.link_child(new_root, node, None);
                self.root = new_root;
                new_root
            }
        };

        let sibling = self.alloc_node(Node::internal());
        let keep = self.node(node).child_count.div_ceil(2);

        let mut moving = self.node(node).first_child;
        for _ in 0..keep {
            moving = moving.and_then(|c| self.node(c).next_sibling);
        }
        while let Some(child) = moving {
            moving = self.node(child).next_sibling;
            self.unlink_child(child);
            self.link_child(sibling, child, None);
        }

        let after = self.node(node).next_sibling;
        self.link_child(parent, sibling, after);
        self.refresh_keys(node);
        self.refresh_keys(sibling);

        parent
    }

    /// Merge under-full nodes with a neighbour, walking towards the root.
    fn rebalance(&mut self, start: NodeId) {
        let min = self.min_children();
        let mut node = start;

        while let Some(parent) = self.node(node).parent {
            if self.node(node).child_count >= min {
                break;
            }

            let (left, right) = match (self.node(node).prev_sibling, self.node(node).next_sibling) {
                (_, Some(next)) => (node, next),
                (Some(prev), None) => (prev, node),
                (None, None) => {
                    if self.node(node).child_count == 0 {
                        self.unlink_child(node);
                        self.release_node(node);
                        self.refresh_keys(parent);
                        node = parent;
                        continue;
                    }
                    break;
                }
            };

            let mut moving = self.node(right).first_child;
            while let Some(child) = moving {
                moving = self.node(child).next_sibling;
                self.unlink_child(child);
                self.link_child(left, child, None);
            }
            self.unlink_child(right);
            self.release_node(right);
            self.refresh_keys(left);

            if self.node(left).child_count > self.max_children {
                self.split(left);
            }

            node = parent;
        }
    }

    fn collapse_root(&mut self) {
        loop {
            let root = self.node(self.root);
            if root.child_count != 1 {
                return;
            }
            let child = root.first_child.expect("root with one child has a first child");
            if self.node(child).is_leaf() {
                return;
            }

            let old_root = self.root;
            self.unlink_child(child);
            self.root = child;
            self.nodes[old_root.index()] = Node::internal();
            self.vacant.push(old_root);
        }
    }

    /// Visit every leaf block in key order.
    pub(crate) fn for_each_leaf(&self, mut f: impl FnMut(NodeId, BlockId, usize)) {
        self.visit(self.root, &mut f);
    }

    fn visit(&self, node: NodeId, f: &mut impl FnMut(NodeId, BlockId, usize)) {
        let n = self.node(node);
        if let Some(block) = n.leaf {
            f(node, block, n.key);
            return;
        }
        let mut child = n.first_child;
        while let Some(c) = child {
            self.visit(c, f);
            child = self.node(c).next_sibling;
        }
    }

    /// Block carried by `leaf`, if it is a live leaf.
    pub(crate) fn leaf_block(&self, leaf: NodeId) -> Option<BlockId> {
        self.nodes.get(leaf.index()).and_then(|n| n.leaf)
    }

    /// Panic if any structural invariant is broken.
    pub(crate) fn check(&self) {
        assert!(self.node(self.root).parent.is_none(), "free tree root has a parent");
        assert!(!self.node(self.root).is_leaf(), "free tree root is a leaf");

        let mut leaf_depth = None;
        let mut leaves = 0;
        let mut last_key = 0;
        self.check_node(self.root, 0, &mut leaf_depth, &mut leaves, &mut last_key);
        assert_eq!(leaves, self.leaves, "free tree leaf count drifted");
    }

    fn check_node(
        &self,
        node: NodeId,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut usize,
        last_key: &mut usize,
    ) {
        let n = self.node(node);
        if n.is_leaf() {
            assert_eq!(n.child_count, 0, "free tree leaf has children");
            match leaf_depth {
                Some(d) => assert_eq!(*d, depth, "free tree leaves at different depths"),
                None => *leaf_depth = Some(depth),
            }
            assert!(n.key >= *last_key, "free tree leaves out of key order");
            *last_key = n.key;
            *leaves += 1;
            return;
        }

        if node != self.root {
            assert!(
                n.child_count >= self.min_children() && n.child_count <= self.max_children,
                "free tree node has {} children (allowed {}..={})",
                n.child_count,
                self.min_children(),
                self.max_children
            );
        } else {
            assert!(n.child_count <= self.max_children, "free tree root over-full");
        }

        let mut count = 0;
        let mut prev = None;
        let mut max_key = 0;
        let mut child = n.first_child;
        while let Some(c) = child {
            let cn = self.node(c);
            assert_eq!(cn.parent, Some(node), "free tree child has wrong parent");
            assert_eq!(cn.prev_sibling, prev, "free tree sibling links broken");
            max_key = max_key.max(cn.key);
            self.check_node(c, depth + 1, leaf_depth, leaves, last_key);
            count += 1;
            prev = Some(c);
            child = cn.next_sibling;
        }
        assert_eq!(n.last_child, prev, "free tree last child link broken");
        assert_eq!(count, n.child_count, "free tree child count drifted");
        if count > 0 {
            assert_eq!(n.key, max_key, "internal key is not the max of its children");
        }
    }
}
