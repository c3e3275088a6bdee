//! # callscope - Main Entry Point
//!
//! Three subcommands over recorded profiler sessions:
//! - **replay**: rebuild the calling-context trees and print a flat profile or call tree
//! - **diff**: compare two recordings thread by thread
//! - **reverse**: list every calling context of one method

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;

use callscope::cct::{CctTree, SnapshotDiff};
use callscope::cli::report::{write_diff_flat, write_diff_tree, write_flat_profile, write_stats, write_tree};
use callscope::cli::{Args, Command, DiffArgs, ReplayArgs, ReverseArgs};
use callscope::domain::{ThreadId, TimerDomain, View};
use callscope::export::{
    export_diff_flat_csv, export_diff_flat_json, export_diff_tree_json, export_flat_profile_csv,
    export_flat_profile_json, export_tree_json,
};
use callscope::recording::{load_snapshot, replay_file};
use callscope::CpuResultsSnapshot;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.starts_with("unknown thread") || msg.starts_with("unknown method") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match &args.command {
        Command::Replay(replay) => run_replay(replay, args.quiet),
        Command::Diff(diff) => run_diff(diff, args.quiet),
        Command::Reverse(reverse) => run_reverse(reverse),
    }
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn resolve_thread(snapshot: &CpuResultsSnapshot, name: Option<&str>) -> Result<Option<ThreadId>> {
    let Some(name) = name else {
        return Ok(None);
    };
    match snapshot.thread_by_name(name) {
        Some(thread) => Ok(Some(thread)),
        None => {
            let known: Vec<&str> = snapshot.threads().iter().map(|(_, n)| n.as_str()).collect();
            bail!("Unknown thread '{name}' (recorded threads: {})", known.join(", "))
        }
    }
}

fn run_replay(args: &ReplayArgs, quiet: bool) -> Result<()> {
    let outcome = replay_file(&args.recording)
        .with_context(|| format!("Failed to replay {}", args.recording.display()))?;
    let snapshot = &outcome.snapshot;
    let display = &args.display;
    let view = View::from(display.view);
    let thread = resolve_thread(snapshot, display.thread.as_deref())?;

    if !quiet {
        eprintln!(
            "{}: {} threads, {} events, {} stack dumps",
            args.recording.display(),
            snapshot.n_threads(),
            outcome.stats.events,
            outcome.stats.dumps
        );
        if outcome.stats.integrity_violations > 0 {
            eprintln!(
                "warning: {} events did not match the recorded call stack",
                outcome.stats.integrity_violations
            );
        }
    }

    if display.tree {
        let tree = match thread {
            Some(t) => snapshot
                .container_for_thread(t, view)
                .context("Thread has no recorded calls")?,
            None => snapshot.all_threads_container(view),
        };
        match &display.export {
            Some(path) => {
                export_tree_json(tree.as_ref() as &dyn CctTree, display.depth, create_output(path)?)?;
                info!("Call tree written to {}", path.display());
            }
            None => write_tree(tree.as_ref(), display.depth, io::stdout().lock())?,
        }
    } else {
        let mut flat = snapshot.flat_profile(thread, view);
        if let Some(needle) = &args.filter {
            flat = flat.filter_by_name(needle);
        }
        let (by, descending) = args.sort.ordering();
        flat.sort_by(by, descending);
        match &display.export {
            Some(path) => {
                if display.top > 0 {
                    flat.truncate(display.top);
                }
                let out = create_output(path)?;
                if display.csv {
                    export_flat_profile_csv(&flat, out)?;
                } else {
                    export_flat_profile_json(&flat, out)?;
                }
                info!("Flat profile written to {}", path.display());
            }
            None => write_flat_profile(&mut flat, display.top, io::stdout().lock())?,
        }
    }

    if args.stats {
        write_stats(&outcome.stats, &outcome.thread_times, io::stdout().lock())?;
    }
    Ok(())
}

fn run_diff(args: &DiffArgs, quiet: bool) -> Result<()> {
    let first = load_snapshot(&args.first).with_context(|| format!("Failed to load {}", args.first.display()))?;
    let second = load_snapshot(&args.second).with_context(|| format!("Failed to load {}", args.second.display()))?;
    let display = &args.display;
    let view = View::from(display.view);
    let thread = display.thread.as_deref();
    if let Some(name) = thread {
        if first.thread_by_name(name).is_none() && second.thread_by_name(name).is_none() {
            bail!("Unknown thread '{name}' (not present in either recording)");
        }
    }

    let diff = SnapshotDiff::new(Arc::new(first), Arc::new(second));
    if !quiet {
        for pair in diff.thread_pairs() {
            if pair.first.is_none() || pair.second.is_none() {
                eprintln!(
                    "thread '{}' only in the {} recording",
                    pair.name,
                    if pair.first.is_some() { "first" } else { "second" }
                );
            }
        }
    }

    if display.tree {
        let tree = diff.diff_tree(view, thread);
        match &display.export {
            Some(path) => export_diff_tree_json(&tree, create_output(path)?)?,
            None => write_diff_tree(&tree, display.depth, io::stdout().lock())?,
        }
    } else {
        let mut rows = diff.diff_flat_profile(view, thread);
        rows.sort_by_key(|r| std::cmp::Reverse(r.delta_self_time(TimerDomain::Absolute).abs()));
        if display.top > 0 {
            rows.truncate(display.top);
        }
        match &display.export {
            Some(path) if display.csv => export_diff_flat_csv(&rows, create_output(path)?)?,
            Some(path) => export_diff_flat_json(&rows, create_output(path)?)?,
            None => write_diff_flat(&rows, 0, io::stdout().lock())?,
        }
    }
    Ok(())
}

fn run_reverse(args: &ReverseArgs) -> Result<()> {
    let snapshot = load_snapshot(&args.recording)
        .with_context(|| format!("Failed to load {}", args.recording.display()))?;
    let view = View::from(args.view);
    let thread = resolve_thread(&snapshot, args.thread.as_deref())?;

    let id = match args.method.parse::<u32>() {
        Ok(id) if snapshot.method_class_name_and_sig(id, view).is_some() => id,
        _ => match snapshot.find_id_by_name(&args.method, view) {
            Some(id) => id,
            None => bail!("Unknown method '{}' in the {view} view", args.method),
        },
    };
    let Some(tree) = snapshot.reverse_cct(thread, id, view) else {
        bail!("'{}' was never called in the selected threads", args.method);
    };

    match &args.export {
        Some(path) => {
            export_tree_json(&tree, args.depth, create_output(path)?)?;
        }
        None => write_tree(&tree, args.depth, io::stdout().lock())?,
    }
    Ok(())
}
