//! The tagged-tree data structure everything else operates on.
//!
//! A [`Tree`] is an arena of slots addressed by [`Node`] handles. Child
//! links, parent links and detached orphans are all handles into the same
//! arena, so a whole tree (or forest) is plain data: cloning a `Tree` clones
//! the arena, serializing it serializes the arena. A node keeps its handle
//! when its content is rewritten in place, which is what the reducer relies
//! on.
//!
//! Handles are only meaningful for the arena that produced them. Passing a
//! freed or foreign handle is a caller bug and panics.

use crate::{CeptrError, ReceptorAddress, SemanticId, Symbol};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A sequence of 1-based child indices; the empty path names the node it is
/// resolved against.
pub type TreePath = Vec<usize>;

/// A node's payload. Which variant a node carries is dictated by the
/// structure of its symbol (see [`crate::semtable`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Surface {
    #[default]
    None,
    Int(i64),
    Float(f64),
    Sem(SemanticId),
    Addr(ReceptorAddress),
    Path(TreePath),
    Str(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
}

/// Handle to a node within one [`Tree`] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Node(u32);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct TreeNode {
    symbol: Symbol,
    surface: Surface,
    parent: Option<Node>,
    children: Vec<Node>,
}

/// An arena holding one primary tree plus any orphan subtrees detached from
/// it. Slot 0 is the primary root and can never be detached or freed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tree {
    slots: Vec<Option<TreeNode>>,
    free: Vec<u32>,
}

impl Tree {
    /// Allocate an arena whose primary root carries `symbol` and `surface`.
    pub fn with_root(symbol: Symbol, surface: Surface) -> Tree {
        Tree {
            slots: vec![Some(TreeNode {
                symbol,
                surface,
                parent: None,
                children: Vec::new(),
            })],
            free: Vec::new(),
        }
    }

    /// The primary root.
    pub fn root(&self) -> Node {
        Node(0)
    }

    fn node(&self, n: Node) -> &TreeNode {
        self.slots[n.0 as usize]
            .as_ref()
            .expect("stale node handle")
    }

    fn node_mut(&mut self, n: Node) -> &mut TreeNode {
        self.slots[n.0 as usize]
            .as_mut()
            .expect("stale node handle")
    }

    fn alloc(&mut self, node: TreeNode) -> Node {
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(node);
                Node(i)
            }
            None => {
                self.slots.push(Some(node));
                Node(self.slots.len() as u32 - 1)
            }
        }
    }

    /// Allocate a parentless node, not reachable from the primary root until
    /// [`Tree::add`]ed somewhere.
    pub fn orphan(&mut self, symbol: Symbol, surface: Surface) -> Node {
        self.alloc(TreeNode {
            symbol,
            surface,
            parent: None,
            children: Vec::new(),
        })
    }

    /// Allocate a node and attach it as `parent`'s last child.
    pub fn new_node(&mut self, parent: Node, symbol: Symbol, surface: Surface) -> Node {
        debug_assert!(self.slots[parent.0 as usize].is_some(), "stale parent");
        let n = self.alloc(TreeNode {
            symbol,
            surface,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.node_mut(parent).children.push(n);
        n
    }

    /// Attach a child with no surface.
    pub fn newr(&mut self, parent: Node, symbol: Symbol) -> Node {
        self.new_node(parent, symbol, Surface::None)
    }

    /// Attach a child with an integer surface.
    pub fn newi(&mut self, parent: Node, symbol: Symbol, value: i64) -> Node {
        self.new_node(parent, symbol, Surface::Int(value))
    }

    /// Attach a child whose surface is a semantic id.
    pub fn news(&mut self, parent: Node, symbol: Symbol, value: SemanticId) -> Node {
        self.new_node(parent, symbol, Surface::Sem(value))
    }

    /// Attach a child whose surface is a process id. Same encoding as
    /// [`Tree::news`]; processes are semantic ids.
    pub fn newp(&mut self, parent: Node, symbol: Symbol, value: crate::Process) -> Node {
        self.new_node(parent, symbol, Surface::Sem(value))
    }

    /// Attach a child with a string surface.
    pub fn new_str(&mut self, parent: Node, symbol: Symbol, value: &str) -> Node {
        self.new_node(parent, symbol, Surface::Str(value.to_owned()))
    }

    pub fn symbol(&self, n: Node) -> Symbol {
        self.node(n).symbol
    }

    pub fn surface(&self, n: Node) -> &Surface {
        &self.node(n).surface
    }

    pub fn set_surface(&mut self, n: Node, surface: Surface) {
        self.node_mut(n).surface = surface;
    }

    pub fn parent(&self, n: Node) -> Option<Node> {
        self.node(n).parent
    }

    /// Number of children of `n`.
    pub fn children(&self, n: Node) -> usize {
        self.node(n).children.len()
    }

    /// The i-th child, 1-based.
    pub fn child(&self, n: Node, i: usize) -> Option<Node> {
        if i == 0 {
            return None;
        }
        self.node(n).children.get(i - 1).copied()
    }

    pub fn child_nodes(&self, n: Node) -> Vec<Node> {
        self.node(n).children.clone()
    }

    /// 1-based position of `n` among its siblings.
    pub fn sibling_index(&self, n: Node) -> Option<usize> {
        let p = self.parent(n)?;
        self.node(p).children.iter().position(|&c| c == n).map(|i| i + 1)
    }

    /// Integer surface, if the node carries one.
    pub fn as_int(&self, n: Node) -> Option<i64> {
        match self.node(n).surface {
            Surface::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Semantic-id surface, if the node carries one.
    pub fn as_sem(&self, n: Node) -> Option<SemanticId> {
        match self.node(n).surface {
            Surface::Sem(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_addr(&self, n: Node) -> Option<ReceptorAddress> {
        match self.node(n).surface {
            Surface::Addr(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self, n: Node) -> Option<&str> {
        match &self.node(n).surface {
            Surface::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_path(&self, n: Node) -> Option<&TreePath> {
        match &self.node(n).surface {
            Surface::Path(v) => Some(v),
            _ => None,
        }
    }

    /// Detach the i-th child (1-based); the orphan stays in this arena and
    /// ownership passes to the caller.
    pub fn detach_by_idx(&mut self, parent: Node, i: usize) -> Result<Node, CeptrError> {
        if i == 0 || i > self.children(parent) {
            return Err(format!("no child {i} to detach").into());
        }
        let c = self.node_mut(parent).children.remove(i - 1);
        self.node_mut(c).parent = None;
        Ok(c)
    }

    /// Sever `child` from its parent; `child` becomes an orphan root.
    pub fn detach(&mut self, child: Node) -> Result<Node, CeptrError> {
        let p = self
            .parent(child)
            .ok_or_else(|| -> CeptrError { "node has no parent to detach from".into() })?;
        self.node_mut(p).children.retain(|&c| c != child);
        self.node_mut(child).parent = None;
        Ok(child)
    }

    /// Attach an orphan as `parent`'s last child. Fails if `child` already
    /// has a parent; the primary root can never be attached.
    pub fn add(&mut self, parent: Node, child: Node) -> Result<(), CeptrError> {
        if child == self.root() {
            return Err("the primary root cannot be attached".into());
        }
        if self.parent(child).is_some() {
            return Err("node already has a parent".into());
        }
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
        Ok(())
    }

    /// Deep-copy the subtree at `n` into a new orphan in this arena. The
    /// copy shares no slots with the original.
    pub fn clone_node(&mut self, n: Node) -> Node {
        let copy = TreeNode {
            symbol: self.symbol(n),
            surface: self.surface(n).clone(),
            parent: None,
            children: Vec::new(),
        };
        let root = self.alloc(copy);
        for c in self.child_nodes(n) {
            let cc = self.clone_node(c);
            self.node_mut(cc).parent = Some(root);
            self.node_mut(root).children.push(cc);
        }
        root
    }

    /// Deep-copy `src_node` (from another arena) in as `parent`'s last child.
    pub fn adopt(&mut self, parent: Node, src: &Tree, src_node: Node) -> Node {
        let n = self.adopt_orphan(src, src_node);
        self.node_mut(n).parent = Some(parent);
        self.node_mut(parent).children.push(n);
        n
    }

    /// Deep-copy `src_node` (from another arena) in as a new orphan.
    pub fn adopt_orphan(&mut self, src: &Tree, src_node: Node) -> Node {
        let n = self.orphan(src.symbol(src_node), src.surface(src_node).clone());
        for c in src.child_nodes(src_node) {
            let cc = self.adopt_orphan(src, c);
            self.node_mut(cc).parent = Some(n);
            self.node_mut(n).children.push(cc);
        }
        n
    }

    /// Deep-copy the subtree at `n` into a fresh single-rooted tree.
    pub fn extract(&self, n: Node) -> Tree {
        let mut t = Tree::with_root(self.symbol(n), self.surface(n).clone());
        let root = t.root();
        for c in self.child_nodes(n) {
            t.adopt(root, self, c);
        }
        t
    }

    fn free_slot(&mut self, n: Node) {
        for c in self.child_nodes(n) {
            self.free_slot(c);
        }
        self.slots[n.0 as usize] = None;
        self.free.push(n.0);
    }

    /// Free the subtree at `n`, detaching it first if attached. The primary
    /// root cannot be removed.
    pub fn remove(&mut self, n: Node) -> Result<(), CeptrError> {
        if n == self.root() {
            return Err("the primary root cannot be removed".into());
        }
        if self.parent(n).is_some() {
            self.detach(n)?;
        }
        self.free_slot(n);
        Ok(())
    }

    /// Replace the content of `n` with the orphan `with`, in place: `n`
    /// keeps its handle and its position under its parent, its old children
    /// are freed, and the orphan's shell slot is released.
    pub fn replace(&mut self, n: Node, with: Node) -> Result<(), CeptrError> {
        if with == n {
            return Ok(());
        }
        if self.parent(with).is_some() {
            return Err("replacement must be an orphan".into());
        }
        for c in self.child_nodes(n) {
            self.free_slot(c);
        }
        let src = self
            .slots[with.0 as usize]
            .take()
            .expect("stale node handle");
        self.free.push(with.0);
        let dst = self.node_mut(n);
        dst.symbol = src.symbol;
        dst.surface = src.surface;
        dst.children = src.children;
        for c in self.child_nodes(n) {
            self.node_mut(c).parent = Some(n);
        }
        Ok(())
    }

    /// 1-based child indices from `n`'s root down to `n`.
    pub fn path_of(&self, n: Node) -> TreePath {
        let mut path = Vec::new();
        let mut cur = n;
        while let Some(i) = self.sibling_index(cur) {
            path.push(i);
            cur = self.parent(cur).expect("indexed node has a parent");
        }
        path.reverse();
        path
    }

    /// Walk `path` down from `base`; the empty path is `base` itself.
    pub fn node_at(&self, base: Node, path: &[usize]) -> Option<Node> {
        let mut cur = base;
        for &i in path {
            cur = self.child(cur, i)?;
        }
        Some(cur)
    }

    /// All nodes of the subtree at `n` in depth-first pre-order.
    pub fn pre_order(&self, n: Node) -> Vec<Node> {
        let mut out = Vec::new();
        let mut stack = vec![n];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            for &c in self.node(cur).children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Number of nodes in the subtree at `n`.
    pub fn size(&self, n: Node) -> usize {
        self.pre_order(n).len()
    }

    /// Structural equality on symbols, surfaces and child order.
    pub fn subtree_eq(&self, n: Node, other: &Tree, m: Node) -> bool {
        if self.symbol(n) != other.symbol(m) || self.surface(n) != other.surface(m) {
            return false;
        }
        let a = self.child_nodes(n);
        let b = other.child_nodes(m);
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|(&x, &y)| self.subtree_eq(x, other, y))
    }

    fn hash_into<H: Hasher>(&self, n: Node, state: &mut H) {
        let node = self.node(n);
        node.symbol.hash(state);
        match &node.surface {
            Surface::None => 0u8.hash(state),
            Surface::Int(v) => (1u8, v).hash(state),
            Surface::Float(v) => (2u8, v.to_bits()).hash(state),
            Surface::Sem(v) => (3u8, v).hash(state),
            Surface::Addr(v) => (4u8, v).hash(state),
            Surface::Path(v) => (5u8, v).hash(state),
            Surface::Str(v) => (6u8, v).hash(state),
            Surface::Bytes(v) => (7u8, v).hash(state),
            Surface::Uuid(v) => (8u8, v).hash(state),
        }
        node.children.len().hash(state);
        for &c in &node.children {
            self.hash_into(c, state);
        }
    }

    /// Structural hash, stable across structurally equal trees regardless of
    /// arena layout.
    pub fn hash(&self, n: Node) -> u64 {
        let mut state = std::collections::hash_map::DefaultHasher::new();
        self.hash_into(n, &mut state);
        state.finish()
    }
}
