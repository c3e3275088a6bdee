//! Read access to frozen trees.
//!
//! Two storage strategies sit behind the [`CctTree`] trait:
//!
//! - **Backed**: [`CctContainer`](super::container::CctContainer), an arena
//!   whose child lists are contiguous ranges of one shared edge vector.
//!   Immutable once built and freely shareable between reader threads.
//! - **Free-standing**: [`FreeTree`], built node by node (reverse trees,
//!   merged views) and sortable in place.
//!
//! [`PrestimeNode`] is a cheap cursor over either. When a node has children
//! and non-zero self time, the cursor adds a synthetic "Self time" child so
//! that a node's children always sum up to its total time.

// Percentages intentionally convert i64 times to f64
#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{MethodId, ThreadId, TimerDomain, View};
use crate::profiling::methods::{MapperLock, MethodInfo, MethodInfoMapper};

/// Name shown for the synthetic self-time child
pub const SELF_TIME_NAME: &str = "Self time";

/// Name shown for the merged all-threads root
pub const ALL_THREADS_NAME: &str = "All threads";

bitflags::bitflags! {
    /// Cross-cutting node properties, orthogonal to the node's id
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Per-thread root (or the merged all-threads root)
        const THREAD = 1 << 0;
        /// Synthetic child carrying its parent's self time
        const SELF_TIME = 1 << 1;
        /// Reverse-tree node: stats of calls reaching the selected method
        /// through this caller path
        const CONTEXT_CALLS = 1 << 2;
    }
}

/// Per-node statistics shared by both storage strategies
///
/// Times are microseconds. Index 0 is absolute time, 1 thread CPU time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeData {
    /// Method, class or package id depending on the view; 0 for thread nodes
    pub id: u32,
    /// Set on per-thread roots
    pub thread: Option<ThreadId>,
    pub flags: NodeFlags,
    pub n_calls: u32,
    pub self_time: [i64; 2],
    pub total_time: [i64; 2],
    pub wait_time0: i64,
    pub sleep_time0: i64,
}

impl NodeData {
    pub(crate) fn add_stats(&mut self, other: &NodeData) {
        self.n_calls = self.n_calls.saturating_add(other.n_calls);
        for d in 0..2 {
            self.self_time[d] += other.self_time[d];
            self.total_time[d] += other.total_time[d];
        }
        self.wait_time0 += other.wait_time0;
        self.sleep_time0 += other.sleep_time0;
    }
}

/// Display names of the ids used by one view
///
/// Captured when a snapshot is taken so that names stay stable after the
/// host's method tables move on.
#[derive(Debug, Clone, Default)]
pub struct MethodNames {
    entries: HashMap<u32, MethodInfo>,
}

impl MethodNames {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `ids` through `mapper` inside one lock/unlock bracket
    pub fn from_mapper(mapper: &dyn MethodInfoMapper, ids: impl IntoIterator<Item = u32>) -> Self {
        let _lock = MapperLock::new(mapper, false);
        let mut names = Self::new();
        for id in ids {
            if id == MethodId::THREAD.0 || names.entries.contains_key(&id) {
                continue;
            }
            let info = mapper.method_info(MethodId(id)).unwrap_or_else(|| {
                MethodInfo::new(
                    format!("<unknown class #{id}>"),
                    format!("<unknown method #{id}>"),
                    "",
                )
            });
            names.entries.insert(id, info);
        }
        names
    }

    pub fn insert(&mut self, id: u32, info: MethodInfo) {
        self.entries.insert(id, info);
    }

    #[must_use]
    pub fn info(&self, id: u32) -> Option<&MethodInfo> {
        self.entries.get(&id)
    }

    /// Every (id, info) pair in id order
    #[must_use]
    pub fn sorted_entries(&self) -> Vec<(u32, &MethodInfo)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(id, info)| (*id, info)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Method view shows `Class.method(sig)`; class and package views show
    /// the aggregated name only
    #[must_use]
    pub fn display_name(&self, id: u32, view: View) -> String {
        match (self.entries.get(&id), view) {
            (Some(info), View::Method) => info.display_name(),
            (Some(info), View::Class | View::Package) => info.class_name.clone(),
            (None, _) => format!("<unknown #{id}>"),
        }
    }
}

/// Orderings for presentation children and flat profile rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Name,
    SelfTime(TimerDomain),
    TotalTime(TimerDomain),
    Invocations,
}

/// Uniform read access to a frozen tree
pub trait CctTree: Send + Sync {
    fn root_index(&self) -> usize;

    fn node_data(&self, idx: usize) -> &NodeData;

    fn child_indices(&self, idx: usize) -> &[u32];

    fn view(&self) -> View;

    fn names(&self) -> &MethodNames;

    /// Thread names for nodes flagged [`NodeFlags::THREAD`]
    fn thread_label(&self, thread: ThreadId) -> Option<&str>;

    /// Denominator of percentages: total time of the whole tree
    fn whole_graph_net_time(&self, domain: TimerDomain) -> i64;

    fn collecting_two_timestamps(&self) -> bool;

    fn node_count(&self) -> usize;

    /// Display name of a stored node
    fn node_name(&self, idx: usize) -> String {
        let data = self.node_data(idx);
        if data.flags.contains(NodeFlags::SELF_TIME) {
            return SELF_TIME_NAME.to_string();
        }
        if data.flags.contains(NodeFlags::THREAD) {
            return match data.thread {
                Some(t) => self
                    .thread_label(t)
                    .map_or_else(|| t.to_string(), str::to_string),
                None => ALL_THREADS_NAME.to_string(),
            };
        }
        self.names().display_name(data.id, self.view())
    }

    /// Cursor at the root
    fn root_node(&self) -> PrestimeNode<'_>
    where
        Self: Sized,
    {
        PrestimeNode::new(self, self.root_index())
    }
}

/// Cursor over one node of a [`CctTree`]
#[derive(Clone, Copy)]
pub struct PrestimeNode<'a> {
    tree: &'a dyn CctTree,
    idx: usize,
    /// Synthetic self-time child of `idx`
    self_time_child: bool,
}

impl std::fmt::Debug for PrestimeNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrestimeNode")
            .field("name", &self.name())
            .field("n_calls", &self.n_calls())
            .field("total_time0", &self.total_time(TimerDomain::Absolute))
            .finish_non_exhaustive()
    }
}

impl<'a> PrestimeNode<'a> {
    #[must_use]
    pub fn new(tree: &'a dyn CctTree, idx: usize) -> Self {
        Self {
            tree,
            idx,
            self_time_child: false,
        }
    }

    fn data(&self) -> &'a NodeData {
        self.tree.node_data(self.idx)
    }

    /// Index of the backing node (the parent for a synthetic self-time child)
    #[must_use]
    pub fn index(&self) -> usize {
        self.idx
    }

    #[must_use]
    pub fn tree(&self) -> &'a dyn CctTree {
        self.tree
    }

    #[must_use]
    pub fn name(&self) -> String {
        if self.self_time_child {
            SELF_TIME_NAME.to_string()
        } else {
            self.tree.node_name(self.idx)
        }
    }

    /// Method/class/package id; 0 for thread and self-time nodes
    #[must_use]
    pub fn id(&self) -> u32 {
        if self.self_time_child || self.is_thread_node() {
            0
        } else {
            self.data().id
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.data().thread
    }

    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        if self.self_time_child {
            NodeFlags::SELF_TIME
        } else {
            self.data().flags
        }
    }

    #[must_use]
    pub fn is_thread_node(&self) -> bool {
        !self.self_time_child && self.data().flags.contains(NodeFlags::THREAD)
    }

    #[must_use]
    pub fn is_self_time_node(&self) -> bool {
        self.flags().contains(NodeFlags::SELF_TIME)
    }

    #[must_use]
    pub fn is_context_calls_node(&self) -> bool {
        self.flags().contains(NodeFlags::CONTEXT_CALLS)
    }

    #[must_use]
    pub fn n_calls(&self) -> u32 {
        self.data().n_calls
    }

    #[must_use]
    pub fn self_time(&self, domain: TimerDomain) -> i64 {
        self.data().self_time[domain.index()]
    }

    /// Total time; for a self-time child this is the parent's self time
    #[must_use]
    pub fn total_time(&self, domain: TimerDomain) -> i64 {
        let data = self.data();
        if self.self_time_child {
            data.self_time[domain.index()]
        } else {
            data.total_time[domain.index()]
        }
    }

    /// Total time as a share of the whole tree, 0.0 - 100.0
    #[must_use]
    pub fn total_time_percent(&self, domain: TimerDomain) -> f64 {
        let whole = self.tree.whole_graph_net_time(domain);
        if whole == 0 {
            0.0
        } else {
            self.total_time(domain) as f64 * 100.0 / whole as f64
        }
    }

    #[must_use]
    pub fn wait_time0(&self) -> i64 {
        if self.self_time_child {
            0
        } else {
            self.data().wait_time0
        }
    }

    #[must_use]
    pub fn sleep_time0(&self) -> i64 {
        if self.self_time_child {
            0
        } else {
            self.data().sleep_time0
        }
    }

    fn has_self_time_child(&self) -> bool {
        if self.self_time_child {
            return false;
        }
        let Some(first) = self.tree.child_indices(self.idx).first() else {
            return false;
        };
        let data = self.data();
        // Caller paths of a reverse tree have no self time of their own
        let context = NodeFlags::CONTEXT_CALLS;
        if data.flags.contains(context) || self.tree.node_data(*first as usize).flags.contains(context) {
            return false;
        }
        data.self_time[0] > 0 || data.self_time[1] > 0
    }

    #[must_use]
    pub fn n_children(&self) -> usize {
        if self.self_time_child {
            return 0;
        }
        self.tree.child_indices(self.idx).len() + usize::from(self.has_self_time_child())
    }

    /// Stored children followed by the synthetic self-time child, if any
    #[must_use]
    pub fn children(&self) -> Vec<PrestimeNode<'a>> {
        if self.self_time_child {
            return Vec::new();
        }
        let mut out: Vec<PrestimeNode<'a>> = self
            .tree
            .child_indices(self.idx)
            .iter()
            .map(|c| PrestimeNode::new(self.tree, *c as usize))
            .collect();
        if self.has_self_time_child() {
            out.push(PrestimeNode {
                tree: self.tree,
                idx: self.idx,
                self_time_child: true,
            });
        }
        out
    }

    /// Child whose name equals `name`
    #[must_use]
    pub fn child_named(&self, name: &str) -> Option<PrestimeNode<'a>> {
        self.children().into_iter().find(|c| c.name() == name)
    }

    /// Follow a path of names from this node
    #[must_use]
    pub fn find_path(&self, names: &[&str]) -> Option<PrestimeNode<'a>> {
        let mut cur = *self;
        for name in names {
            cur = cur.child_named(name)?;
        }
        Some(cur)
    }

    /// Class name and signature of the method behind this node
    #[must_use]
    pub fn method_info(&self) -> Option<&'a MethodInfo> {
        if self.self_time_child || self.is_thread_node() {
            return None;
        }
        self.tree.names().info(self.data().id)
    }
}

/// Free-standing tree, built incrementally
#[derive(Debug, Clone)]
pub struct FreeTree {
    nodes: Vec<NodeData>,
    children: Vec<Vec<u32>>,
    names: Arc<MethodNames>,
    view: View,
    thread_names: Arc<Vec<(ThreadId, String)>>,
    whole_graph_net_time: [i64; 2],
    collecting_two_timestamps: bool,
}

impl FreeTree {
    #[must_use]
    pub fn new(
        root: NodeData,
        names: Arc<MethodNames>,
        view: View,
        thread_names: Arc<Vec<(ThreadId, String)>>,
        whole_graph_net_time: [i64; 2],
        collecting_two_timestamps: bool,
    ) -> Self {
        Self {
            nodes: vec![root],
            children: vec![Vec::new()],
            names,
            view,
            thread_names,
            whole_graph_net_time,
            collecting_two_timestamps,
        }
    }

    pub fn add_child(&mut self, parent: usize, data: NodeData) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(data);
        self.children.push(Vec::new());
        self.children[parent].push(u32::try_from(idx).unwrap_or(u32::MAX));
        idx
    }

    /// Child of `parent` with the given id and flags
    #[must_use]
    pub fn find_child(&self, parent: usize, id: u32, flags: NodeFlags) -> Option<usize> {
        self.children[parent]
            .iter()
            .map(|c| *c as usize)
            .find(|c| self.nodes[*c].id == id && self.nodes[*c].flags == flags)
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut NodeData {
        &mut self.nodes[idx]
    }

    /// Sort every child list of the tree
    pub fn sort_children(&mut self, by: SortBy, descending: bool) {
        let mut lists = std::mem::take(&mut self.children);
        for list in &mut lists {
            list.sort_by(|a, b| {
                let ord = compare_nodes(self, *a as usize, *b as usize, by);
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        self.children = lists;
    }
}

fn compare_nodes(tree: &dyn CctTree, a: usize, b: usize, by: SortBy) -> Ordering {
    let (da, db) = (tree.node_data(a), tree.node_data(b));
    match by {
        SortBy::Name => tree.node_name(a).cmp(&tree.node_name(b)),
        SortBy::SelfTime(d) => da.self_time[d.index()].cmp(&db.self_time[d.index()]),
        SortBy::TotalTime(d) => da.total_time[d.index()].cmp(&db.total_time[d.index()]),
        SortBy::Invocations => da.n_calls.cmp(&db.n_calls),
    }
}

impl CctTree for FreeTree {
    fn root_index(&self) -> usize {
        0
    }

    fn node_data(&self, idx: usize) -> &NodeData {
        &self.nodes[idx]
    }

    fn child_indices(&self, idx: usize) -> &[u32] {
        &self.children[idx]
    }

    fn view(&self) -> View {
        self.view
    }

    fn names(&self) -> &MethodNames {
        &self.names
    }

    fn thread_label(&self, thread: ThreadId) -> Option<&str> {
        self.thread_names
            .iter()
            .find(|(t, _)| *t == thread)
            .map(|(_, n)| n.as_str())
    }

    fn whole_graph_net_time(&self, domain: TimerDomain) -> i64 {
        self.whole_graph_net_time[domain.index()]
    }

    fn collecting_two_timestamps(&self) -> bool {
        self.collecting_two_timestamps
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
