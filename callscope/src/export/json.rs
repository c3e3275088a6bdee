//! JSON export of presentation trees, flat profiles and diffs
//!
//! Times are microseconds. Thread CPU columns are only emitted when the
//! session collected two timestamps.

#![allow(clippy::cast_precision_loss)]

use serde::Serialize;
use std::io::Write;

use crate::cct::diff::{DiffFlatRow, DiffNode};
use crate::cct::flat_profile::FlatProfileContainer;
use crate::cct::presentation::{CctTree, PrestimeNode};
use crate::domain::{ExportError, TimerDomain, View};

/// One node of an exported tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportNode {
    pub name: String,
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<u32>,
    pub calls: u32,
    pub self_time_us: i64,
    pub total_time_us: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_cpu_time_us: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cpu_time_us: Option<i64>,
    /// Share of the whole tree's time, 0-100
    pub percent: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExportNode>,
}

impl ExportNode {
    /// Copy `node` and its subtree, down to `max_depth` levels below it
    #[must_use]
    pub fn from_node(node: &PrestimeNode<'_>, max_depth: Option<usize>) -> Self {
        let two = node.tree().collecting_two_timestamps();
        let children = match max_depth {
            Some(0) => Vec::new(),
            _ => node
                .children()
                .iter()
                .map(|c| Self::from_node(c, max_depth.map(|d| d - 1)))
                .collect(),
        };
        Self {
            name: node.name(),
            id: node.id(),
            thread: node.thread_id().map(|t| t.0),
            calls: node.n_calls(),
            self_time_us: node.self_time(TimerDomain::Absolute),
            total_time_us: node.total_time(TimerDomain::Absolute),
            self_cpu_time_us: two.then(|| node.self_time(TimerDomain::ThreadCpu)),
            total_cpu_time_us: two.then(|| node.total_time(TimerDomain::ThreadCpu)),
            percent: node.total_time_percent(TimerDomain::Absolute),
            children,
        }
    }
}

#[derive(Serialize)]
struct TreeDocument {
    view: View,
    collecting_two_timestamps: bool,
    whole_graph_time_us: i64,
    root: ExportNode,
}

#[derive(Serialize)]
struct FlatRowJson<'a> {
    id: u32,
    name: &'a str,
    calls: u64,
    self_time_us: i64,
    self_percent: f64,
    total_time_us: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    self_cpu_time_us: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_cpu_time_us: Option<i64>,
}

#[derive(Serialize)]
struct FlatDocument<'a> {
    view: View,
    whole_graph_time_us: i64,
    rows: Vec<FlatRowJson<'a>>,
}

#[derive(Serialize)]
struct DiffRowJson<'a> {
    name: &'a str,
    id: i64,
    calls: [u64; 2],
    self_time_us: [i64; 2],
    total_time_us: [i64; 2],
    delta_calls: i64,
    delta_self_time_us: i64,
    delta_total_time_us: i64,
}

/// Write the tree below its root
///
/// # Errors
///
/// I/O or serialization failure of `writer`.
pub fn export_tree_json<W: Write>(tree: &dyn CctTree, max_depth: Option<usize>, mut writer: W) -> Result<(), ExportError> {
    let root = PrestimeNode::new(tree, tree.root_index());
    let doc = TreeDocument {
        view: tree.view(),
        collecting_two_timestamps: tree.collecting_two_timestamps(),
        whole_graph_time_us: tree.whole_graph_net_time(TimerDomain::Absolute),
        root: ExportNode::from_node(&root, max_depth),
    };
    serde_json::to_writer_pretty(&mut writer, &doc)?;
    writer.flush()?;
    Ok(())
}

/// Write the rows of a flat profile in their current order
///
/// # Errors
///
/// I/O or serialization failure of `writer`.
pub fn export_flat_profile_json<W: Write>(flat: &FlatProfileContainer, mut writer: W) -> Result<(), ExportError> {
    let whole = flat.whole_graph_net_time(TimerDomain::Absolute);
    let two = flat.collecting_two_timestamps();
    let rows = flat
        .rows()
        .iter()
        .map(|r| FlatRowJson {
            id: r.id,
            name: &r.name,
            calls: r.n_calls,
            self_time_us: r.self_time[0],
            self_percent: if whole == 0 {
                0.0
            } else {
                r.self_time[0] as f64 * 100.0 / whole as f64
            },
            total_time_us: r.total_time[0],
            self_cpu_time_us: two.then_some(r.self_time[1]),
            total_cpu_time_us: two.then_some(r.total_time[1]),
        })
        .collect();
    let doc = FlatDocument {
        view: flat.view(),
        whole_graph_time_us: whole,
        rows,
    };
    serde_json::to_writer_pretty(&mut writer, &doc)?;
    writer.flush()?;
    Ok(())
}

/// Write a paired diff tree as is
///
/// # Errors
///
/// I/O or serialization failure of `writer`.
pub fn export_diff_tree_json<W: Write>(diff: &DiffNode, mut writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, diff)?;
    writer.flush()?;
    Ok(())
}

/// Write flat diff rows with their absolute-time deltas
///
/// # Errors
///
/// I/O or serialization failure of `writer`.
pub fn export_diff_flat_json<W: Write>(rows: &[DiffFlatRow], mut writer: W) -> Result<(), ExportError> {
    let rows: Vec<DiffRowJson<'_>> = rows
        .iter()
        .map(|r| DiffRowJson {
            name: &r.name,
            id: r.exposed_id,
            calls: [r.first.n_calls, r.second.n_calls],
            self_time_us: [r.first.self_time[0], r.second.self_time[0]],
            total_time_us: [r.first.total_time[0], r.second.total_time[0]],
            delta_calls: r.delta_calls(),
            delta_self_time_us: r.delta_self_time(TimerDomain::Absolute),
            delta_total_time_us: r.delta_total_time(TimerDomain::Absolute),
        })
        .collect();
    serde_json::to_writer_pretty(&mut writer, &rows)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cct::presentation::{FreeTree, MethodNames, NodeData, NodeFlags};
    use crate::cct::diff::DiffSide;
    use crate::profiling::methods::MethodInfo;
    use std::sync::Arc;

    fn create_test_tree() -> FreeTree {
        let mut names = MethodNames::new();
        names.insert(1, MethodInfo::new("app.Main", "main", ""));
        names.insert(2, MethodInfo::new("app.Main", "work", ""));
        let root = NodeData {
            flags: NodeFlags::THREAD,
            n_calls: 1,
            total_time: [100, 0],
            ..NodeData::default()
        };
        let mut tree = FreeTree::new(root, Arc::new(names), View::Method, Arc::new(Vec::new()), [100, 0], false);
        let main = tree.add_child(
            0,
            NodeData {
                id: 1,
                n_calls: 1,
                self_time: [40, 0],
                total_time: [100, 0],
                ..NodeData::default()
            },
        );
        tree.add_child(
            main,
            NodeData {
                id: 2,
                n_calls: 3,
                self_time: [60, 0],
                total_time: [60, 0],
                ..NodeData::default()
            },
        );
        tree
    }

    #[test]
    fn test_tree_export_shape() {
        let tree = create_test_tree();
        let mut buffer = Vec::new();
        export_tree_json(&tree, None, &mut buffer).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(json["view"], "method");
        let main = &json["root"]["children"][0];
        assert_eq!(main["name"], "app.Main.main()");
        assert_eq!(main["total_time_us"], 100);
        // work plus the synthesized self time node
        assert_eq!(main["children"].as_array().unwrap().len(), 2);
        assert_eq!(main["children"][0]["calls"], 3);
        assert!(main.get("self_cpu_time_us").is_none());
    }

    #[test]
    fn test_tree_export_depth_limit() {
        let tree = create_test_tree();
        let node = ExportNode::from_node(&tree.root_node(), Some(1));
        assert_eq!(node.children.len(), 1);
        assert!(node.children[0].children.is_empty());
    }

    #[test]
    fn test_flat_profile_export() {
        let tree = create_test_tree();
        let flat = FlatProfileContainer::from_trees(&[&tree as &dyn CctTree]);
        let mut buffer = Vec::new();
        export_flat_profile_json(&flat, &mut buffer).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        let rows = json["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        let work = rows.iter().find(|r| r["name"] == "app.Main.work()").unwrap();
        assert_eq!(work["self_percent"], 60.0);
    }

    #[test]
    fn test_diff_rows_export() {
        let rows = vec![DiffFlatRow {
            name: "a.B.c()".to_string(),
            exposed_id: -4,
            first: DiffSide::default(),
            second: DiffSide {
                n_calls: 2,
                self_time: [10, 0],
                total_time: [15, 0],
            },
        }];
        let mut buffer = Vec::new();
        export_diff_flat_json(&rows, &mut buffer).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(json[0]["id"], -4);
        assert_eq!(json[0]["delta_total_time_us"], 15);
    }
}
