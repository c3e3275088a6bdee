//! Comparison of two snapshots.
//!
//! Threads are paired by name and tree nodes by display name, since ids are
//! assigned independently in each session. A node or row present on one side
//! only is compared against zero. Deltas are `second - first`.
//!
//! Ids of the second snapshot are exposed negated so that one signed id
//! space addresses both sides; id 0 is reserved for thread nodes.

use serde::Serialize;
use std::sync::Arc;

use crate::cct::flat_profile::FlatProfileContainer;
use crate::cct::presentation::{CctTree, PrestimeNode};
use crate::cct::snapshot::CpuResultsSnapshot;
use crate::domain::{ThreadId, TimerDomain, View};
use crate::profiling::methods::MethodInfo;

/// Stats of one side of a comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSide {
    pub n_calls: u64,
    pub self_time: [i64; 2],
    pub total_time: [i64; 2],
}

impl DiffSide {
    fn of_node(node: &PrestimeNode<'_>) -> Self {
        Self {
            n_calls: u64::from(node.n_calls()),
            self_time: [node.self_time(TimerDomain::Absolute), node.self_time(TimerDomain::ThreadCpu)],
            total_time: [
                node.total_time(TimerDomain::Absolute),
                node.total_time(TimerDomain::ThreadCpu),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffNode {
    pub name: String,
    /// Id in the first snapshot
    pub first_id: Option<u32>,
    /// Id in the second snapshot
    pub second_id: Option<u32>,
    pub first: DiffSide,
    pub second: DiffSide,
    pub children: Vec<DiffNode>,
}

impl DiffNode {
    /// Signed id: positive for the first snapshot, negated for the second
    #[must_use]
    pub fn exposed_id(&self) -> i64 {
        match (self.first_id, self.second_id) {
            (Some(id), _) => i64::from(id),
            (None, Some(id)) => -i64::from(id),
            (None, None) => 0,
        }
    }

    #[must_use]
    pub fn delta_calls(&self) -> i64 {
        i64::try_from(self.second.n_calls).unwrap_or(i64::MAX) - i64::try_from(self.first.n_calls).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn delta_total_time(&self, domain: TimerDomain) -> i64 {
        self.second.total_time[domain.index()] - self.first.total_time[domain.index()]
    }

    #[must_use]
    pub fn delta_self_time(&self, domain: TimerDomain) -> i64 {
        self.second.self_time[domain.index()] - self.first.self_time[domain.index()]
    }

    #[must_use]
    pub fn child_named(&self, name: &str) -> Option<&DiffNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Pairing of one thread name across both snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadPair {
    pub name: String,
    pub first: Option<ThreadId>,
    pub second: Option<ThreadId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffFlatRow {
    pub name: String,
    pub exposed_id: i64,
    pub first: DiffSide,
    pub second: DiffSide,
}

impl DiffFlatRow {
    #[must_use]
    pub fn delta_self_time(&self, domain: TimerDomain) -> i64 {
        self.second.self_time[domain.index()] - self.first.self_time[domain.index()]
    }

    #[must_use]
    pub fn delta_total_time(&self, domain: TimerDomain) -> i64 {
        self.second.total_time[domain.index()] - self.first.total_time[domain.index()]
    }

    #[must_use]
    pub fn delta_calls(&self) -> i64 {
        i64::try_from(self.second.n_calls).unwrap_or(i64::MAX) - i64::try_from(self.first.n_calls).unwrap_or(i64::MAX)
    }
}

/// Read-only comparison of two snapshots
#[derive(Debug, Clone)]
pub struct SnapshotDiff {
    first: Arc<CpuResultsSnapshot>,
    second: Arc<CpuResultsSnapshot>,
}

impl SnapshotDiff {
    #[must_use]
    pub fn new(first: Arc<CpuResultsSnapshot>, second: Arc<CpuResultsSnapshot>) -> Self {
        Self { first, second }
    }

    /// Threads of the first snapshot in order, then threads only present in
    /// the second
    #[must_use]
    pub fn thread_pairs(&self) -> Vec<ThreadPair> {
        let mut pairs: Vec<ThreadPair> = self
            .first
            .threads()
            .iter()
            .map(|(t, name)| ThreadPair {
                name: name.clone(),
                first: Some(*t),
                second: self.second.thread_by_name(name),
            })
            .collect();
        for (t, name) in self.second.threads() {
            if self.first.thread_by_name(name).is_none() {
                pairs.push(ThreadPair {
                    name: name.clone(),
                    first: None,
                    second: Some(*t),
                });
            }
        }
        pairs
    }

    /// Tree diff of one thread (by name) or of all threads
    #[must_use]
    pub fn diff_tree(&self, view: View, thread_name: Option<&str>) -> DiffNode {
        let pick = |snapshot: &CpuResultsSnapshot| match thread_name {
            None => Some(snapshot.all_threads_container(view)),
            Some(name) => snapshot
                .thread_by_name(name)
                .and_then(|t| snapshot.container_for_thread(t, view)),
        };
        let (a, b) = (pick(&self.first), pick(&self.second));
        let a_root = a.as_ref().map(|c| c.root_node());
        let b_root = b.as_ref().map(|c| c.root_node());
        let mut root = diff_nodes(a_root.as_ref(), b_root.as_ref());
        if let Some(name) = thread_name {
            root.name = name.to_string();
        }
        root
    }

    /// Flat profile diff, rows paired by display name
    #[must_use]
    pub fn diff_flat_profile(&self, view: View, thread_name: Option<&str>) -> Vec<DiffFlatRow> {
        let flat = |snapshot: &CpuResultsSnapshot| -> Option<FlatProfileContainer> {
            match thread_name {
                None => Some(snapshot.flat_profile(None, view)),
                Some(name) => snapshot
                    .thread_by_name(name)
                    .map(|t| snapshot.flat_profile(Some(t), view)),
            }
        };
        let a = flat(&self.first);
        let b = flat(&self.second);
        let a_rows = a.as_ref().map_or(&[][..], FlatProfileContainer::rows);
        let b_rows = b.as_ref().map_or(&[][..], FlatProfileContainer::rows);

        let side = |r: &crate::cct::flat_profile::FlatProfileRow| DiffSide {
            n_calls: r.n_calls,
            self_time: r.self_time,
            total_time: r.total_time,
        };

        let mut rows: Vec<DiffFlatRow> = a_rows
            .iter()
            .map(|r| DiffFlatRow {
                name: r.name.clone(),
                exposed_id: i64::from(r.id),
                first: side(r),
                second: b_rows.iter().find(|o| o.name == r.name).map(side).unwrap_or_default(),
            })
            .collect();
        for r in b_rows {
            if !a_rows.iter().any(|o| o.name == r.name) {
                rows.push(DiffFlatRow {
                    name: r.name.clone(),
                    exposed_id: -i64::from(r.id),
                    first: DiffSide::default(),
                    second: side(r),
                });
            }
        }
        rows
    }

    /// Method info behind a signed id
    #[must_use]
    pub fn method_class_name_and_sig(&self, exposed_id: i64, view: View) -> Option<MethodInfo> {
        let id = u32::try_from(exposed_id.unsigned_abs()).ok()?;
        match exposed_id.signum() {
            1 => self.first.method_class_name_and_sig(id, view),
            -1 => self.second.method_class_name_and_sig(id, view),
            _ => None,
        }
    }
}

fn diff_nodes(a: Option<&PrestimeNode<'_>>, b: Option<&PrestimeNode<'_>>) -> DiffNode {
    let name = a.or(b).map(PrestimeNode::name).unwrap_or_default();
    let id_of = |n: &PrestimeNode<'_>| (!n.is_thread_node()).then(|| n.id());
    let mut node = DiffNode {
        name,
        first_id: a.and_then(id_of),
        second_id: b.and_then(id_of),
        first: a.map(DiffSide::of_node).unwrap_or_default(),
        second: b.map(DiffSide::of_node).unwrap_or_default(),
        children: Vec::new(),
    };

    let a_children = stored_children(a);
    let b_children = stored_children(b);
    let b_names: Vec<String> = b_children.iter().map(PrestimeNode::name).collect();
    let mut matched = vec![false; b_children.len()];

    for child in &a_children {
        let name = child.name();
        let other = b_names.iter().position(|n| *n == name).filter(|i| !matched[*i]);
        if let Some(i) = other {
            matched[i] = true;
        }
        node.children
            .push(diff_nodes(Some(child), other.map(|i| &b_children[i])));
    }
    for (i, child) in b_children.iter().enumerate() {
        if !matched[i] {
            node.children.push(diff_nodes(None, Some(child)));
        }
    }
    node
}

/// Children without the synthetic self-time node
fn stored_children<'a>(node: Option<&PrestimeNode<'a>>) -> Vec<PrestimeNode<'a>> {
    node.map(|n| n.children().into_iter().filter(|c| !c.is_self_time_node()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cct::container::{CctContainer, ContainerShell, NodeDraft, ThreadTimes};
    use crate::cct::presentation::{MethodNames, NodeData, NodeFlags};

    /// One thread `name` -> method `id` with `self_time`
    fn snapshot(threads: &[(u32, &str, u32, i64)], names: &[(u32, &str)]) -> Arc<CpuResultsSnapshot> {
        let mut table = MethodNames::new();
        for (id, m) in names {
            table.insert(*id, MethodInfo::new("app.C", *m, ""));
        }
        let table = Arc::new(table);
        let thread_names: Arc<Vec<(ThreadId, String)>> =
            Arc::new(threads.iter().map(|(t, n, _, _)| (ThreadId(*t), (*n).to_string())).collect());
        let containers = threads
            .iter()
            .map(|(t, _, id, time)| {
                let drafts = vec![
                    NodeDraft {
                        data: NodeData {
                            flags: NodeFlags::THREAD,
                            thread: Some(ThreadId(*t)),
                            n_calls: 1,
                            ..NodeData::default()
                        },
                        children: vec![1],
                    },
                    NodeDraft {
                        data: NodeData {
                            id: *id,
                            n_calls: 2,
                            self_time: [*time, 0],
                            ..NodeData::default()
                        },
                        children: Vec::new(),
                    },
                ];
                CctContainer::assemble(
                    drafts,
                    ContainerShell {
                        view: View::Method,
                        thread_id: Some(ThreadId(*t)),
                        thread_names: Arc::clone(&thread_names),
                        names: Arc::clone(&table),
                        collecting_two_timestamps: false,
                        whole_graph_pure_time: [0; 2],
                        display_whole_thread_cpu_time: false,
                        thread_times: ThreadTimes::default(),
                    },
                )
            })
            .collect();
        Arc::new(CpuResultsSnapshot::new(0, 0, containers).unwrap())
    }

    #[test]
    fn test_identical_snapshots_have_zero_deltas() {
        let s = snapshot(&[(1, "main", 1, 50)], &[(1, "run")]);
        let diff = SnapshotDiff::new(Arc::clone(&s), s);
        let root = diff.diff_tree(View::Method, None);
        fn check(node: &DiffNode) {
            assert_eq!(node.delta_total_time(TimerDomain::Absolute), 0);
            assert_eq!(node.delta_calls(), 0);
            node.children.iter().for_each(check);
        }
        check(&root);
        assert!(diff
            .diff_flat_profile(View::Method, None)
            .iter()
            .all(|r| r.delta_self_time(TimerDomain::Absolute) == 0));
    }

    #[test]
    fn test_threads_paired_by_name() {
        let a = snapshot(&[(1, "main", 1, 50), (2, "worker", 1, 10)], &[(1, "run")]);
        let b = snapshot(&[(7, "main", 3, 80), (8, "worker-2", 3, 5)], &[(3, "run")]);
        let diff = SnapshotDiff::new(a, b);
        let pairs = diff.thread_pairs();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].first, Some(ThreadId(1)));
        assert_eq!(pairs[0].second, Some(ThreadId(7)));
        assert_eq!(pairs[1].second, None);
        assert_eq!(pairs[2].name, "worker-2");
        assert_eq!(pairs[2].first, None);

        let main = diff.diff_tree(View::Method, Some("main"));
        let run = main.child_named("app.C.run()").unwrap();
        assert_eq!(run.delta_self_time(TimerDomain::Absolute), 30);
        assert_eq!(run.exposed_id(), 1);

        let worker = diff.diff_tree(View::Method, Some("worker"));
        let run = worker.child_named("app.C.run()").unwrap();
        assert_eq!(run.delta_total_time(TimerDomain::Absolute), -10);
    }

    #[test]
    fn test_second_only_ids_are_negated() {
        let a = snapshot(&[(1, "main", 1, 50)], &[(1, "run")]);
        let b = snapshot(&[(1, "main", 4, 20)], &[(4, "other")]);
        let diff = SnapshotDiff::new(a, b);
        let rows = diff.diff_flat_profile(View::Method, None);
        let other = rows.iter().find(|r| r.name == "app.C.other()").unwrap();
        assert_eq!(other.exposed_id, -4);
        assert_eq!(other.delta_self_time(TimerDomain::Absolute), 20);
        assert_eq!(diff.method_class_name_and_sig(-4, View::Method).unwrap().method_name, "other");
        assert_eq!(diff.method_class_name_and_sig(1, View::Method).unwrap().method_name, "run");
    }
}
