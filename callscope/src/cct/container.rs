//! Frozen per-thread presentation trees.
//!
//! [`CctContainer::freeze`] turns a live tree into an immutable arena:
//!
//! 1. Frames that are not methods (categories, servlet boundaries) and
//!    methods whose class fails the instrumentation filter are folded into
//!    their caller. Their time becomes the caller's self time and their
//!    calls count as the caller's outgoing calls.
//! 2. Siblings that end up with the same method are merged.
//! 3. Self time is cleansed of estimated hook overhead and converted to
//!    microseconds; total time is self time plus the children's totals.

// Tick arithmetic converts between i64 and f64
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use crate::cct::node::{FilterStatus, NodeKind};
use crate::cct::presentation::{CctTree, MethodNames, NodeData, NodeFlags};
use crate::domain::{MethodId, ThreadId, TimerDomain, View};
use crate::filter::InstrumentationFilter;
use crate::profiling::thread_infos::ThreadInfo;
use crate::profiling::timing::TimingAdjuster;

/// Whole-thread timing, in raw ticks
///
/// `gross_cpu` is -1 when the thread CPU domain is not collected.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThreadTimes {
    pub gross_abs: i64,
    pub gross_cpu: i64,
    /// Estimated hook overhead over all invocations of the thread
    pub injected_abs: f64,
    pub injected_cpu: f64,
}

/// Inputs shared by every container frozen from one builder
pub(crate) struct FreezeContext<'a> {
    pub timing: &'a TimingAdjuster,
    pub filter: &'a InstrumentationFilter,
    pub names: &'a Arc<MethodNames>,
    pub thread_names: &'a Arc<Vec<(ThreadId, String)>>,
}

/// Node under construction; children must have larger indices than their
/// parent
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeDraft {
    pub data: NodeData,
    pub children: Vec<usize>,
}

/// Everything about a container except its nodes
#[derive(Debug, Clone)]
pub(crate) struct ContainerShell {
    pub view: View,
    pub thread_id: Option<ThreadId>,
    pub thread_names: Arc<Vec<(ThreadId, String)>>,
    pub names: Arc<MethodNames>,
    pub collecting_two_timestamps: bool,
    pub whole_graph_pure_time: [i64; 2],
    pub display_whole_thread_cpu_time: bool,
    pub thread_times: ThreadTimes,
}

/// Immutable tree of one thread (or of all threads merged) in one view
#[derive(Debug, Clone)]
pub struct CctContainer {
    nodes: Vec<NodeData>,
    /// `child_ranges[i]` indexes `edges`
    child_ranges: Vec<(u32, u32)>,
    edges: Vec<u32>,
    shell: ContainerShell,
    whole_graph_net_time: [i64; 2],
    total_invocations: u64,
}

/// Intermediate node of the filtering pass, still in ticks
#[derive(Debug, Default)]
struct Folded {
    id: u32,
    n_calls: u32,
    /// Calls of folded-in callees
    n_calls_diff: u32,
    net_time: [i64; 2],
    wait_time0: i64,
    sleep_time0: i64,
    children: Vec<usize>,
}

impl Folded {
    fn absorb(&mut self, n_calls: u32, net_time: [i64; 2], wait: i64, sleep: i64) {
        self.n_calls = self.n_calls.saturating_add(n_calls);
        self.add_time(net_time, wait, sleep);
    }

    fn add_time(&mut self, net_time: [i64; 2], wait: i64, sleep: i64) {
        self.net_time[0] += net_time[0];
        self.net_time[1] += net_time[1];
        self.wait_time0 += wait;
        self.sleep_time0 += sleep;
    }
}

impl CctContainer {
    /// Freeze the live tree of `info`; None if the thread never ran code
    pub(crate) fn freeze(info: &ThreadInfo, ctx: &FreezeContext<'_>, times: ThreadTimes) -> Option<Self> {
        let root = info.thread_root()?;
        let tree = &info.tree;

        let mut folded = vec![Folded {
            n_calls: tree.node(root).n_calls,
            ..Folded::default()
        }];
        let mut work: Vec<_> = tree.node(root).children.iter().rev().map(|c| (*c, 0usize)).collect();

        while let Some((node, parent)) = work.pop() {
            let live = tree.node(node);
            let keep = match (&live.kind, live.filter) {
                (NodeKind::Method(_), FilterStatus::Unfiltered) => true,
                (NodeKind::Method(id), FilterStatus::Unchecked) => Self::passes(ctx, *id),
                _ => false,
            };

            let target = if keep {
                let id = live.kind.method_id().map_or(0, |m| m.0);
                let existing = folded[parent]
                    .children
                    .iter()
                    .copied()
                    .find(|c| folded[*c].id == id);
                match existing {
                    Some(existing) => {
                        folded[existing].absorb(
                            live.n_calls,
                            live.net_time,
                            live.wait_time0,
                            live.sleep_time0,
                        );
                        existing
                    }
                    None => {
                        let idx = folded.len();
                        folded.push(Folded {
                            id,
                            ..Folded::default()
                        });
                        folded[idx].absorb(
                            live.n_calls,
                            live.net_time,
                            live.wait_time0,
                            live.sleep_time0,
                        );
                        folded[parent].children.push(idx);
                        idx
                    }
                }
            } else {
                // Nothing folds into the thread node itself
                if parent != 0 {
                    let p = &mut folded[parent];
                    p.add_time(live.net_time, live.wait_time0, live.sleep_time0);
                    p.n_calls_diff = p.n_calls_diff.saturating_add(live.n_calls);
                }
                parent
            };

            for child in live.children.iter().rev() {
                work.push((*child, target));
            }
        }

        let two = ctx.timing.collecting_two_timestamps();
        let drafts: Vec<NodeDraft> = folded
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let outgoing = u64::from(f.n_calls_diff)
                    + f.children.iter().map(|c| u64::from(folded[*c].n_calls)).sum::<u64>();
                let incoming = u64::from(f.n_calls) + u64::from(f.n_calls_diff);
                let mut self_time = [0; 2];
                if i != 0 {
                    self_time[0] = ctx.timing.adjust_time(f.net_time[0], incoming, outgoing, TimerDomain::Absolute);
                    if two {
                        self_time[1] = ctx.timing.adjust_time(f.net_time[1], incoming, outgoing, TimerDomain::ThreadCpu);
                    }
                }
                let (thread, flags) = if i == 0 {
                    (Some(info.thread_id), NodeFlags::THREAD)
                } else {
                    (None, NodeFlags::empty())
                };
                NodeDraft {
                    data: NodeData {
                        id: f.id,
                        thread,
                        flags,
                        n_calls: f.n_calls,
                        self_time,
                        total_time: [0; 2],
                        wait_time0: ctx.timing.ticks_to_micros(f.wait_time0 as f64, TimerDomain::Absolute),
                        sleep_time0: ctx.timing.ticks_to_micros(f.sleep_time0 as f64, TimerDomain::Absolute),
                    },
                    children: f.children.clone(),
                }
            })
            .collect();

        let pure_abs = ctx
            .timing
            .ticks_to_micros(times.gross_abs as f64 - times.injected_abs, TimerDomain::Absolute)
            .max(0);
        let pure_cpu = if times.gross_cpu > 0 {
            ctx.timing
                .ticks_to_micros(times.gross_cpu as f64 - times.injected_cpu, TimerDomain::ThreadCpu)
                .max(0)
        } else {
            0
        };

        Some(Self::assemble(
            drafts,
            ContainerShell {
                view: View::Method,
                thread_id: Some(info.thread_id),
                thread_names: Arc::clone(ctx.thread_names),
                names: Arc::clone(ctx.names),
                collecting_two_timestamps: two,
                whole_graph_pure_time: [pure_abs, pure_cpu],
                display_whole_thread_cpu_time: times.gross_cpu > 0,
                thread_times: times,
            },
        ))
    }

    fn passes(ctx: &FreezeContext<'_>, id: MethodId) -> bool {
        ctx.names
            .info(id.0)
            .map_or(true, |info| ctx.filter.passes(&info.class_name))
    }

    /// Compute totals bottom-up and lay the drafts out as an arena
    pub(crate) fn assemble(mut drafts: Vec<NodeDraft>, shell: ContainerShell) -> Self {
        for i in (0..drafts.len()).rev() {
            let mut total = drafts[i].data.self_time;
            for c in &drafts[i].children {
                debug_assert!(*c > i, "child drafts must follow their parent");
                total[0] += drafts[*c].data.total_time[0];
                total[1] += drafts[*c].data.total_time[1];
            }
            drafts[i].data.total_time = total;
        }

        let mut nodes = Vec::with_capacity(drafts.len());
        let mut child_ranges = Vec::with_capacity(drafts.len());
        let mut edges = Vec::with_capacity(drafts.len().saturating_sub(1));
        let mut total_invocations = 0u64;
        for (i, draft) in drafts.into_iter().enumerate() {
            let start = to_u32(edges.len());
            edges.extend(draft.children.iter().map(|c| to_u32(*c)));
            child_ranges.push((start, to_u32(edges.len())));
            if i != 0 {
                total_invocations += u64::from(draft.data.n_calls);
            }
            nodes.push(draft.data);
        }

        let whole_graph_net_time = nodes.first().map_or([0; 2], |r: &NodeData| r.total_time);
        Self {
            nodes,
            child_ranges,
            edges,
            shell,
            whole_graph_net_time,
            total_invocations,
        }
    }

    /// Merge per-thread containers of one view under an all-threads root
    #[must_use]
    pub fn merge_threads(containers: &[&CctContainer], view: View, names: Arc<MethodNames>) -> Self {
        let mut drafts = vec![NodeDraft {
            data: NodeData {
                flags: NodeFlags::THREAD,
                n_calls: 1,
                ..NodeData::default()
            },
            children: Vec::new(),
        }];
        let mut pure = [0i64; 2];
        let mut display_cpu = false;
        let mut two = false;
        let mut thread_names = Vec::new();

        for container in containers {
            pure[0] += container.shell.whole_graph_pure_time[0];
            pure[1] += container.shell.whole_graph_pure_time[1];
            display_cpu |= container.shell.display_whole_thread_cpu_time;
            two |= container.shell.collecting_two_timestamps;
            if let Some(t) = container.shell.thread_id {
                thread_names.push((t, container.thread_name().to_string()));
            }

            let mut work = vec![(container.root_index(), 0usize)];
            while let Some((src, parent)) = work.pop() {
                let idx = drafts.len();
                drafts.push(NodeDraft {
                    data: container.nodes[src].clone(),
                    children: Vec::new(),
                });
                drafts[parent].children.push(idx);
                for child in container.child_indices(src).iter().rev() {
                    work.push((*child as usize, idx));
                }
            }
        }

        Self::assemble(
            drafts,
            ContainerShell {
                view,
                thread_id: None,
                thread_names: Arc::new(thread_names),
                names,
                collecting_two_timestamps: two,
                whole_graph_pure_time: pure,
                display_whole_thread_cpu_time: display_cpu,
                thread_times: ThreadTimes::default(),
            },
        )
    }

    /// Thread of a per-thread container; None for merged containers
    #[must_use]
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.shell.thread_id
    }

    #[must_use]
    pub fn thread_name(&self) -> &str {
        self.shell
            .thread_id
            .and_then(|t| self.thread_label(t))
            .unwrap_or(crate::cct::presentation::ALL_THREADS_NAME)
    }

    #[must_use]
    pub fn names_arc(&self) -> &Arc<MethodNames> {
        &self.shell.names
    }

    pub(crate) fn shell(&self) -> &ContainerShell {
        &self.shell
    }

    /// Sum of all method invocations in the tree
    #[must_use]
    pub fn total_invocations(&self) -> u64 {
        self.total_invocations
    }

    /// Whole-thread time minus estimated hook overhead, in microseconds
    #[must_use]
    pub fn whole_graph_pure_time(&self, domain: TimerDomain) -> i64 {
        self.shell.whole_graph_pure_time[domain.index()]
    }

    #[must_use]
    pub fn display_whole_thread_cpu_time(&self) -> bool {
        self.shell.display_whole_thread_cpu_time
    }

    #[must_use]
    pub fn thread_times(&self) -> ThreadTimes {
        self.shell.thread_times
    }

    /// True if nothing but the root is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

fn to_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

impl CctTree for CctContainer {
    fn root_index(&self) -> usize {
        0
    }

    fn node_data(&self, idx: usize) -> &NodeData {
        &self.nodes[idx]
    }

    fn child_indices(&self, idx: usize) -> &[u32] {
        let (start, end) = self.child_ranges[idx];
        &self.edges[start as usize..end as usize]
    }

    fn view(&self) -> View {
        self.shell.view
    }

    fn names(&self) -> &MethodNames {
        &self.shell.names
    }

    fn thread_label(&self, thread: ThreadId) -> Option<&str> {
        self.shell
            .thread_names
            .iter()
            .find(|(t, _)| *t == thread)
            .map(|(_, n)| n.as_str())
    }

    fn whole_graph_net_time(&self, domain: TimerDomain) -> i64 {
        self.whole_graph_net_time[domain.index()]
    }

    fn collecting_two_timestamps(&self) -> bool {
        self.shell.collecting_two_timestamps
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cct::node::NodeRef;
    use crate::domain::Mark;
    use crate::profiling::methods::MethodInfo;
    use crate::profiling::timing::ProfilingSessionStatus;

    fn create_names() -> Arc<MethodNames> {
        let mut names = MethodNames::new();
        names.insert(1, MethodInfo::new("app.Main", "main", ""));
        names.insert(2, MethodInfo::new("java.util.HashMap", "get", ""));
        names.insert(3, MethodInfo::new("app.Main", "work", ""));
        Arc::new(names)
    }

    fn child(info: &mut ThreadInfo, parent: NodeRef, kind: NodeKind, n_calls: u32, net: i64) -> NodeRef {
        let (node, _) = info.tree.find_or_insert_child(parent, &kind);
        let live = info.tree.node_mut(node);
        live.n_calls = n_calls;
        live.net_time = [net, 0];
        node
    }

    /// main -> HashMap.get (filtered) -> work; main -> work
    fn create_live() -> ThreadInfo {
        let mut info = ThreadInfo::new(ThreadId(1), "main", "");
        let root = info.ensure_thread_root();
        info.tree.node_mut(root).n_calls = 1;
        let main = child(&mut info, root, NodeKind::Method(MethodId(1)), 1, 100);
        let get = child(&mut info, main, NodeKind::Method(MethodId(2)), 2, 40);
        child(&mut info, get, NodeKind::Method(MethodId(3)), 1, 10);
        child(&mut info, main, NodeKind::Method(MethodId(3)), 3, 30);
        info
    }

    fn freeze(info: &ThreadInfo, filter: &InstrumentationFilter) -> CctContainer {
        let timing = TimingAdjuster::new(&Arc::new(ProfilingSessionStatus {
            timer_counts_in_second: [1_000_000, 1_000_000],
            ..ProfilingSessionStatus::default()
        }));
        let names = create_names();
        let thread_names = Arc::new(vec![(ThreadId(1), "main".to_string())]);
        let ctx = FreezeContext {
            timing: &timing,
            filter,
            names: &names,
            thread_names: &thread_names,
        };
        CctContainer::freeze(info, &ctx, ThreadTimes::default()).unwrap()
    }

    #[test]
    fn test_filtered_frames_fold_into_caller() {
        let info = create_live();
        let container = freeze(&info, &InstrumentationFilter::exclude(["java.*"]));
        let root = container.root_node();
        assert_eq!(root.name(), "main");
        let main = root.child_named("app.Main.main()").unwrap();
        assert_eq!(main.self_time(TimerDomain::Absolute), 140);
        let work = main.child_named("app.Main.work()").unwrap();
        // Both occurrences of work merged under main
        assert_eq!(work.n_calls(), 4);
        assert_eq!(work.total_time(TimerDomain::Absolute), 40);
        assert_eq!(main.total_time(TimerDomain::Absolute), 180);
        assert_eq!(container.whole_graph_net_time(TimerDomain::Absolute), 180);
        assert_eq!(container.total_invocations(), 5);
    }

    #[test]
    fn test_unfiltered_tree_is_structural_copy() {
        let info = create_live();
        let container = freeze(&info, &InstrumentationFilter::none());
        let main = container.root_node().child_named("app.Main.main()").unwrap();
        assert_eq!(main.self_time(TimerDomain::Absolute), 100);
        let get = main.child_named("java.util.HashMap.get()").unwrap();
        assert_eq!(get.total_time(TimerDomain::Absolute), 50);
        assert_eq!(container.node_count(), 5);
    }

    #[test]
    fn test_category_nodes_are_transparent() {
        let mut info = ThreadInfo::new(ThreadId(1), "main", "");
        let root = info.ensure_thread_root();
        let main = child(&mut info, root, NodeKind::Method(MethodId(1)), 1, 10);
        let cat = child(&mut info, main, NodeKind::Category(Mark(3)), 1, 5);
        child(&mut info, cat, NodeKind::Method(MethodId(3)), 1, 20);
        let container = freeze(&info, &InstrumentationFilter::none());
        let main = container.root_node().child_named("app.Main.main()").unwrap();
        assert_eq!(main.self_time(TimerDomain::Absolute), 15);
        assert!(main.child_named("app.Main.work()").is_some());
    }

    #[test]
    fn test_merge_threads_sums_totals() {
        let info = create_live();
        let a = freeze(&info, &InstrumentationFilter::none());
        let b = freeze(&info, &InstrumentationFilter::none());
        let merged = CctContainer::merge_threads(&[&a, &b], View::Method, create_names());
        assert_eq!(merged.root_node().n_children(), 2);
        assert_eq!(
            merged.whole_graph_net_time(TimerDomain::Absolute),
            2 * a.whole_graph_net_time(TimerDomain::Absolute)
        );
        assert_eq!(merged.thread_name(), "All threads");
        assert_eq!(merged.root_node().children()[0].name(), "main");
    }
}
