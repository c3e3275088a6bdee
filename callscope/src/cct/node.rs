//! Live (mutable) calling-context tree.
//!
//! Each profiled thread owns one [`LiveTree`]: an arena of [`LiveNode`]s
//! addressed by [`NodeRef`]. Nodes are only ever appended; a child belongs
//! to exactly one parent and is found again by structural identity
//! ([`NodeKind`]) with a linear scan over the parent's children.
//!
//! Times are raw timer ticks. Cleansing and unit conversion happen when the
//! tree is frozen into a [`CctContainer`](super::container::CctContainer).

use crate::domain::{Mark, MethodId};
use crate::profiling::events::Parameter;

/// Index of a node inside its thread's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(u32);

impl NodeRef {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural identity of a frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Per-thread pseudo-root
    Thread,
    Method(MethodId),
    /// Category opened by a marker method
    Category(Mark),
    /// Request boundary opened by a servlet dispatch
    Servlet { request_type: u8, path: String },
}

impl NodeKind {
    #[must_use]
    pub fn method_id(&self) -> Option<MethodId> {
        match self {
            NodeKind::Method(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_method(&self) -> bool {
        matches!(self, NodeKind::Method(_))
    }
}

/// Whether a node's class passed the instrumentation filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterStatus {
    /// Not checked yet; resolved against the filter when frozen
    #[default]
    Unchecked,
    /// Excluded: merged into the caller when frozen
    Filtered,
    /// Known to pass
    Unfiltered,
}

/// One frame position in the live tree
#[derive(Debug, Clone)]
pub struct LiveNode {
    pub kind: NodeKind,
    pub filter: FilterStatus,
    pub n_calls: u32,
    /// Self time in ticks, absolute and thread CPU
    pub net_time: [i64; 2],
    /// Wait, park and monitor time (absolute ticks)
    pub wait_time0: i64,
    pub sleep_time0: i64,
    /// Entry instant of the wait/sleep/park currently active in this frame
    pub last_wait_or_sleep_stamp: i64,
    pub children: Vec<NodeRef>,
    /// Captured arguments of the last marker entry
    pub params: Vec<Parameter>,
}

impl LiveNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            filter: FilterStatus::Unchecked,
            n_calls: 0,
            net_time: [0; 2],
            wait_time0: 0,
            sleep_time0: 0,
            last_wait_or_sleep_stamp: 0,
            children: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn add_net_time(&mut self, domain: usize, ticks: i64) {
        self.net_time[domain] += ticks;
    }
}

/// Append-only arena holding one thread's tree
#[derive(Debug, Clone, Default)]
pub struct LiveTree {
    nodes: Vec<LiveNode>,
}

impl LiveTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a parentless node (the thread pseudo-root)
    pub fn add_root(&mut self, kind: NodeKind) -> NodeRef {
        self.alloc(kind)
    }

    /// Existing child of `parent` with identity `kind`, or a new one.
    ///
    /// Returns the node and whether it was created.
    pub fn find_or_insert_child(&mut self, parent: NodeRef, kind: &NodeKind) -> (NodeRef, bool) {
        if let Some(existing) = self.find_child(parent, kind) {
            return (existing, false);
        }
        let child = self.alloc(kind.clone());
        self.nodes[parent.index()].children.push(child);
        (child, true)
    }

    #[must_use]
    pub fn find_child(&self, parent: NodeRef, kind: &NodeKind) -> Option<NodeRef> {
        self.nodes[parent.index()]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.index()].kind == *kind)
    }

    #[must_use]
    pub fn node(&self, node: NodeRef) -> &LiveNode {
        &self.nodes[node.index()]
    }

    pub fn node_mut(&mut self, node: NodeRef) -> &mut LiveNode {
        &mut self.nodes[node.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node in allocation order
    pub fn nodes(&self) -> impl Iterator<Item = &LiveNode> {
        self.nodes.iter()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeRef {
        let idx = u32::try_from(self.nodes.len()).unwrap_or(u32::MAX);
        self.nodes.push(LiveNode::new(kind));
        NodeRef(idx)
    }
}
