//! Reverse (caller) trees.
//!
//! The root stands for one method and carries the stats of all its
//! occurrences. Each child path walks from an occurrence up through its
//! callers, stopping below the thread node; paths through the same callers
//! share nodes.

use std::sync::Arc;

use crate::cct::presentation::{CctTree, FreeTree, NodeData, NodeFlags};
use crate::domain::{ThreadId, TimerDomain};

/// Build the caller tree of `method` over `tree`; None if the method never
/// occurs
#[must_use]
pub fn build_reverse_tree(
    tree: &dyn CctTree,
    method: u32,
    thread_names: Arc<Vec<(ThreadId, String)>>,
) -> Option<FreeTree> {
    let mut reverse: Option<FreeTree> = None;
    // Ancestors of the node being visited, outermost first
    let mut path: Vec<usize> = Vec::new();
    // Occurrences of `method` on the current path
    let mut nesting = 0u32;
    let mut work = vec![(tree.root_index(), false)];

    while let Some((idx, leaving)) = work.pop() {
        let data = tree.node_data(idx);
        let is_target = data.id == method && !data.flags.intersects(NodeFlags::THREAD | NodeFlags::SELF_TIME);

        if leaving {
            path.pop();
            if is_target {
                nesting -= 1;
            }
            continue;
        }

        if is_target {
            // Total time counts once per outermost occurrence
            let contribution = NodeData {
                id: method,
                n_calls: data.n_calls,
                self_time: data.self_time,
                total_time: if nesting == 0 { data.total_time } else { [0; 2] },
                wait_time0: data.wait_time0,
                sleep_time0: data.sleep_time0,
                ..NodeData::default()
            };
            let rev = reverse.get_or_insert_with(|| {
                FreeTree::new(
                    NodeData {
                        id: method,
                        ..NodeData::default()
                    },
                    Arc::new(tree.names().clone()),
                    tree.view(),
                    Arc::clone(&thread_names),
                    [
                        tree.whole_graph_net_time(TimerDomain::Absolute),
                        tree.whole_graph_net_time(TimerDomain::ThreadCpu),
                    ],
                    tree.collecting_two_timestamps(),
                )
            });
            rev.node_mut(0).add_stats(&contribution);

            let mut cur = 0;
            for ancestor in path.iter().rev() {
                let caller = tree.node_data(*ancestor);
                if caller.flags.contains(NodeFlags::THREAD) {
                    break;
                }
                cur = match rev.find_child(cur, caller.id, NodeFlags::CONTEXT_CALLS) {
                    Some(existing) => existing,
                    None => rev.add_child(
                        cur,
                        NodeData {
                            id: caller.id,
                            flags: NodeFlags::CONTEXT_CALLS,
                            ..NodeData::default()
                        },
                    ),
                };
                rev.node_mut(cur).add_stats(&contribution);
            }
            nesting += 1;
        }

        path.push(idx);
        work.push((idx, true));
        for child in tree.child_indices(idx).iter().rev() {
            work.push((*child as usize, false));
        }
    }

    reverse
}
