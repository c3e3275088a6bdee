//! Per-method flat profile.
//!
//! Collapses one or more trees into one row per id. Self time and
//! invocations are summed over every occurrence; total time only over the
//! outermost occurrence on each path, so recursion is not double counted.

#![allow(clippy::cast_precision_loss)]

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::cct::presentation::{CctTree, NodeFlags, SortBy};
use crate::domain::{TimerDomain, View};

/// One method (class, package) of a flat profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatProfileRow {
    pub id: u32,
    pub name: String,
    /// Microseconds, absolute and thread CPU
    pub self_time: [i64; 2],
    pub total_time: [i64; 2],
    pub n_calls: u64,
}

#[derive(Debug, Clone)]
pub struct FlatProfileContainer {
    rows: Vec<FlatProfileRow>,
    view: View,
    whole_graph_net_time: [i64; 2],
    collecting_two_timestamps: bool,
    /// Self-time percentages of `rows`, cached per domain
    percent_cache: [Option<Vec<f64>>; 2],
}

impl FlatProfileContainer {
    /// Collapse `trees` (all of the same view) into one flat profile
    #[must_use]
    pub fn from_trees(trees: &[&dyn CctTree]) -> Self {
        let view = trees.first().map_or(View::Method, |t| t.view());
        let mut rows: Vec<FlatProfileRow> = Vec::new();
        let mut row_of: HashMap<u32, usize> = HashMap::new();
        let mut whole = [0i64; 2];
        let mut two = false;

        for tree in trees {
            whole[0] += tree.whole_graph_net_time(TimerDomain::Absolute);
            whole[1] += tree.whole_graph_net_time(TimerDomain::ThreadCpu);
            two |= tree.collecting_two_timestamps();

            let mut on_path: HashMap<u32, u32> = HashMap::new();
            // (node, leaving): a node is visited once entering, once leaving
            let mut work = vec![(tree.root_index(), false)];
            while let Some((idx, leaving)) = work.pop() {
                let data = tree.node_data(idx);
                let counted = !data.flags.intersects(NodeFlags::THREAD | NodeFlags::SELF_TIME) && data.id != 0;

                if leaving {
                    if counted {
                        if let Some(depth) = on_path.get_mut(&data.id) {
                            *depth -= 1;
                        }
                    }
                    continue;
                }

                if counted {
                    let slot = *row_of.entry(data.id).or_insert_with(|| {
                        rows.push(FlatProfileRow {
                            id: data.id,
                            name: tree.node_name(idx),
                            self_time: [0; 2],
                            total_time: [0; 2],
                            n_calls: 0,
                        });
                        rows.len() - 1
                    });
                    let row = &mut rows[slot];
                    let depth = on_path.entry(data.id).or_insert(0);
                    for d in 0..2 {
                        row.self_time[d] += data.self_time[d];
                        if *depth == 0 {
                            row.total_time[d] += data.total_time[d];
                        }
                    }
                    row.n_calls += u64::from(data.n_calls);
                    *depth += 1;
                }

                work.push((idx, true));
                for child in tree.child_indices(idx).iter().rev() {
                    work.push((*child as usize, false));
                }
            }
        }

        rows.retain(|r| r.n_calls > 0);
        for row in &mut rows {
            for d in 0..2 {
                row.self_time[d] = row.self_time[d].max(0);
                row.total_time[d] = row.total_time[d].max(0);
            }
        }

        Self {
            rows,
            view,
            whole_graph_net_time: whole,
            collecting_two_timestamps: two,
            percent_cache: [None, None],
        }
    }

    #[must_use]
    pub fn rows(&self) -> &[FlatProfileRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn view(&self) -> View {
        self.view
    }

    #[must_use]
    pub fn collecting_two_timestamps(&self) -> bool {
        self.collecting_two_timestamps
    }

    #[must_use]
    pub fn whole_graph_net_time(&self, domain: TimerDomain) -> i64 {
        self.whole_graph_net_time[domain.index()]
    }

    #[must_use]
    pub fn row_by_name(&self, name: &str) -> Option<&FlatProfileRow> {
        self.rows.iter().find(|r| r.name == name)
    }

    /// Self time of row `idx` as a share of the whole profile
    pub fn percent(&mut self, idx: usize, domain: TimerDomain) -> f64 {
        let d = domain.index();
        let whole = self.whole_graph_net_time[d];
        let rows = &self.rows;
        let cache = self.percent_cache[d].get_or_insert_with(|| {
            rows.iter()
                .map(|r| {
                    if whole == 0 {
                        0.0
                    } else {
                        r.self_time[d] as f64 * 100.0 / whole as f64
                    }
                })
                .collect()
        });
        cache.get(idx).copied().unwrap_or(0.0)
    }

    /// Stable sort of the rows
    pub fn sort_by(&mut self, by: SortBy, descending: bool) {
        self.rows.sort_by(|a, b| {
            let ord = compare_rows(a, b, by);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        self.percent_cache = [None, None];
    }

    /// Rows whose name contains `needle`, case-insensitively
    #[must_use]
    pub fn filter_by_name(&self, needle: &str) -> Self {
        let needle = needle.to_lowercase();
        Self {
            rows: self
                .rows
                .iter()
                .filter(|r| r.name.to_lowercase().contains(&needle))
                .cloned()
                .collect(),
            view: self.view,
            whole_graph_net_time: self.whole_graph_net_time,
            collecting_two_timestamps: self.collecting_two_timestamps,
            percent_cache: [None, None],
        }
    }

    /// Keep only the first `n` rows
    pub fn truncate(&mut self, n: usize) {
        self.rows.truncate(n);
        self.percent_cache = [None, None];
    }
}

fn compare_rows(a: &FlatProfileRow, b: &FlatProfileRow, by: SortBy) -> Ordering {
    match by {
        SortBy::Name => a.name.cmp(&b.name),
        SortBy::SelfTime(d) => a.self_time[d.index()].cmp(&b.self_time[d.index()]),
        SortBy::TotalTime(d) => a.total_time[d.index()].cmp(&b.total_time[d.index()]),
        SortBy::Invocations => a.n_calls.cmp(&b.n_calls),
    }
}
