//! Plain-text rendering of profiles for the terminal
//!
//! Times are stored in microseconds and printed as milliseconds.

#![allow(clippy::cast_precision_loss)]

use std::io::{self, Write};

use crate::cct::{CctTree, DiffFlatRow, DiffNode, FlatProfileContainer, PrestimeNode};
use crate::domain::TimerDomain;
use crate::profiling::ThreadActiveTime;
use crate::recording::ReplayStats;

const NAME_WIDTH: usize = 60;

fn ms(micros: i64) -> f64 {
    micros as f64 / 1000.0
}

fn clip(name: &str) -> String {
    if name.chars().count() <= NAME_WIDTH {
        name.to_string()
    } else {
        let tail: String = name.chars().skip(name.chars().count() - (NAME_WIDTH - 1)).collect();
        format!("…{tail}")
    }
}

fn limit(top: usize, len: usize) -> usize {
    if top == 0 {
        len
    } else {
        top.min(len)
    }
}

/// Flat profile table in the container's current row order
///
/// # Errors
///
/// I/O failure of `out`.
pub fn write_flat_profile<W: Write>(flat: &mut FlatProfileContainer, top: usize, mut out: W) -> io::Result<()> {
    let two = flat.collecting_two_timestamps();
    write!(out, "{:<NAME_WIDTH$} {:>12} {:>7} {:>12}", flat.view().to_string(), "self ms", "self %", "total ms")?;
    if two {
        write!(out, " {:>12}", "self cpu ms")?;
    }
    writeln!(out, " {:>9}", "calls")?;

    for idx in 0..limit(top, flat.len()) {
        let percent = flat.percent(idx, TimerDomain::Absolute);
        let row = &flat.rows()[idx];
        write!(
            out,
            "{:<NAME_WIDTH$} {:>12.3} {:>6.1}% {:>12.3}",
            clip(&row.name),
            ms(row.self_time[0]),
            percent,
            ms(row.total_time[0])
        )?;
        if two {
            write!(out, " {:>12.3}", ms(row.self_time[1]))?;
        }
        writeln!(out, " {:>9}", row.n_calls)?;
    }
    if top != 0 && flat.len() > top {
        writeln!(out, "... {} more", flat.len() - top)?;
    }
    Ok(())
}

/// Indented call tree below the root
///
/// # Errors
///
/// I/O failure of `out`.
pub fn write_tree<W: Write>(tree: &dyn CctTree, max_depth: Option<usize>, mut out: W) -> io::Result<()> {
    writeln!(
        out,
        "{} view, {:.3} ms total",
        tree.view(),
        ms(tree.whole_graph_net_time(TimerDomain::Absolute))
    )?;
    let root = PrestimeNode::new(tree, tree.root_index());
    write_tree_node(&root, 0, max_depth, &mut out)
}

fn write_tree_node<W: Write>(node: &PrestimeNode<'_>, depth: usize, max_depth: Option<usize>, out: &mut W) -> io::Result<()> {
    writeln!(
        out,
        "{:indent$}{:>5.1}% {:>10.3} ms {:>7}x  {}",
        "",
        node.total_time_percent(TimerDomain::Absolute),
        ms(node.total_time(TimerDomain::Absolute)),
        node.n_calls(),
        node.name(),
        indent = depth * 2
    )?;
    if max_depth.is_some_and(|max| depth >= max) {
        return Ok(());
    }
    for child in node.children() {
        write_tree_node(&child, depth + 1, max_depth, out)?;
    }
    Ok(())
}

/// Flat diff rows, second minus first
///
/// # Errors
///
/// I/O failure of `out`.
pub fn write_diff_flat<W: Write>(rows: &[DiffFlatRow], top: usize, mut out: W) -> io::Result<()> {
    writeln!(
        out,
        "{:<NAME_WIDTH$} {:>12} {:>12} {:>12} {:>9}",
        "name", "before ms", "after ms", "delta ms", "Δ calls"
    )?;
    for row in &rows[..limit(top, rows.len())] {
        writeln!(
            out,
            "{:<NAME_WIDTH$} {:>12.3} {:>12.3} {:>+12.3} {:>+9}",
            clip(&row.name),
            ms(row.first.self_time[0]),
            ms(row.second.self_time[0]),
            ms(row.delta_self_time(TimerDomain::Absolute)),
            row.delta_calls()
        )?;
    }
    Ok(())
}

/// Paired diff tree with total-time deltas
///
/// # Errors
///
/// I/O failure of `out`.
pub fn write_diff_tree<W: Write>(node: &DiffNode, max_depth: Option<usize>, mut out: W) -> io::Result<()> {
    write_diff_node(node, 0, max_depth, &mut out)
}

fn write_diff_node<W: Write>(node: &DiffNode, depth: usize, max_depth: Option<usize>, out: &mut W) -> io::Result<()> {
    let side = match (node.first_id, node.second_id) {
        (Some(_), None) => " (removed)",
        (None, Some(_)) => " (added)",
        _ => "",
    };
    writeln!(
        out,
        "{:indent$}{:>+10.3} ms {:>+7}x  {}{side}",
        "",
        ms(node.delta_total_time(TimerDomain::Absolute)),
        node.delta_calls(),
        node.name,
        indent = depth * 2
    )?;
    if max_depth.is_some_and(|max| depth >= max) {
        return Ok(());
    }
    for child in &node.children {
        write_diff_node(child, depth + 1, max_depth, out)?;
    }
    Ok(())
}

/// Replay counters and per-thread active times
///
/// # Errors
///
/// I/O failure of `out`.
pub fn write_stats<W: Write>(stats: &ReplayStats, threads: &[ThreadActiveTime], mut out: W) -> io::Result<()> {
    writeln!(
        out,
        "records={} events={} frames={} decode_failures={} dumps={} integrity_violations={}",
        stats.records, stats.events, stats.frames, stats.decode_failures, stats.dumps, stats.integrity_violations
    )?;
    for (kind, count) in &stats.kind_counts {
        writeln!(out, "  {kind:<24} {count:>9}")?;
    }
    for thread in threads {
        match thread.cpu_ms {
            Some(cpu) => writeln!(out, "{} ({}): {} ms, cpu {cpu} ms", thread.name, thread.thread, thread.absolute_ms)?,
            None => writeln!(out, "{} ({}): {} ms", thread.name, thread.thread, thread.absolute_ms)?,
        }
    }
    Ok(())
}
