//! CSV export of flat profiles
//!
//! One header line, then one row per method in the container's current
//! order. Quoting follows the `csv` writer defaults.

use serde::Serialize;
use std::io::Write;

use crate::cct::diff::DiffFlatRow;
use crate::cct::flat_profile::FlatProfileContainer;
use crate::domain::{ExportError, TimerDomain};

#[derive(Serialize)]
struct FlatCsvRow<'a> {
    name: &'a str,
    calls: u64,
    self_time_us: i64,
    total_time_us: i64,
    self_cpu_time_us: Option<i64>,
    total_cpu_time_us: Option<i64>,
}

/// First snapshot `a`, second `b`
#[derive(Serialize)]
struct DiffCsvRow<'a> {
    name: &'a str,
    id: i64,
    calls_a: u64,
    calls_b: u64,
    self_time_us_a: i64,
    self_time_us_b: i64,
    delta_self_time_us: i64,
    delta_total_time_us: i64,
}

/// Write a flat profile; CPU columns stay empty without thread CPU time
///
/// # Errors
///
/// I/O failure of `writer`.
pub fn export_flat_profile_csv<W: Write>(flat: &FlatProfileContainer, writer: W) -> Result<(), ExportError> {
    let mut out = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    let two = flat.collecting_two_timestamps();
    for row in flat.rows() {
        out.serialize(FlatCsvRow {
            name: &row.name,
            calls: row.n_calls,
            self_time_us: row.self_time[0],
            total_time_us: row.total_time[0],
            self_cpu_time_us: two.then_some(row.self_time[1]),
            total_cpu_time_us: two.then_some(row.total_time[1]),
        })?;
    }
    out.flush()?;
    Ok(())
}

/// Write flat diff rows (first snapshot `a`, second `b`)
///
/// # Errors
///
/// I/O failure of `writer`.
pub fn export_diff_flat_csv<W: Write>(rows: &[DiffFlatRow], writer: W) -> Result<(), ExportError> {
    let mut out = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    for row in rows {
        out.serialize(DiffCsvRow {
            name: &row.name,
            id: row.exposed_id,
            calls_a: row.first.n_calls,
            calls_b: row.second.n_calls,
            self_time_us_a: row.first.self_time[0],
            self_time_us_b: row.second.self_time[0],
            delta_self_time_us: row.delta_self_time(TimerDomain::Absolute),
            delta_total_time_us: row.delta_total_time(TimerDomain::Absolute),
        })?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cct::diff::DiffSide;
    use crate::cct::presentation::{CctTree, FreeTree, MethodNames, NodeData, NodeFlags};
    use crate::domain::View;
    use crate::profiling::methods::MethodInfo;
    use std::sync::Arc;

    fn create_test_tree(two_timestamps: bool) -> FreeTree {
        let mut names = MethodNames::new();
        names.insert(1, MethodInfo::new("app.Main", "run", "(II)V"));
        let root = NodeData {
            flags: NodeFlags::THREAD,
            n_calls: 1,
            ..NodeData::default()
        };
        let mut tree = FreeTree::new(
            root,
            Arc::new(names),
            View::Method,
            Arc::new(Vec::new()),
            [7, 3],
            two_timestamps,
        );
        tree.add_child(
            0,
            NodeData {
                id: 1,
                n_calls: 2,
                self_time: [7, 3],
                total_time: [7, 3],
                ..NodeData::default()
            },
        );
        tree
    }

    fn lines(buffer: Vec<u8>) -> Vec<String> {
        String::from_utf8(buffer).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_flat_profile_csv() {
        let tree = create_test_tree(true);
        let flat = FlatProfileContainer::from_trees(&[&tree as &dyn CctTree]);
        let mut buffer = Vec::new();
        export_flat_profile_csv(&flat, &mut buffer).unwrap();
        let lines = lines(buffer);
        assert_eq!(
            lines[0],
            "name,calls,self_time_us,total_time_us,self_cpu_time_us,total_cpu_time_us"
        );
        assert_eq!(lines[1], "app.Main.run(II)V,2,7,7,3,3");
    }

    #[test]
    fn test_cpu_columns_empty_without_thread_time() {
        let tree = create_test_tree(false);
        let flat = FlatProfileContainer::from_trees(&[&tree as &dyn CctTree]);
        let mut buffer = Vec::new();
        export_flat_profile_csv(&flat, &mut buffer).unwrap();
        assert_eq!(lines(buffer)[1], "app.Main.run(II)V,2,7,7,,");
    }

    #[test]
    fn test_diff_csv_quotes_names() {
        let rows = vec![DiffFlatRow {
            name: "say \"hi\", there".to_string(),
            exposed_id: -3,
            first: DiffSide::default(),
            second: DiffSide {
                n_calls: 1,
                self_time: [5, 0],
                total_time: [8, 0],
            },
        }];
        let mut buffer = Vec::new();
        export_diff_flat_csv(&rows, &mut buffer).unwrap();
        let lines = lines(buffer);
        assert!(lines[0].starts_with("name,id,calls_a,calls_b"));
        assert_eq!(lines[1], "\"say \"\"hi\"\", there\",-3,0,1,0,5,5,8");
    }
}
