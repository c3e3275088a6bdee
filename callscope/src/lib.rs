//! # callscope - Calling-Context Tree Engine for CPU Profiles
//!
//! callscope turns a stream of method entry/exit events (from an
//! instrumenting agent) or periodic thread stack dumps (from a sampler) into
//! per-thread calling-context trees (CCTs), and derives from them the views
//! a profiler front end needs: call trees, flat profiles, reverse (caller)
//! trees, class/package aggregations and snapshot diffs.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────┐      ┌────────────────────────────┐
//! │   Instrumenting agent      │      │      Stack sampler          │
//! │  binary event frames       │      │  thread dumps per tick      │
//! └─────────────┬──────────────┘      └─────────────┬──────────────┘
//!               │ FrameDecoder                      │ diff_stacks
//!               ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      CallGraphBuilder                           │
//! │  • ThreadInfos: per-thread live tree + stack (registry gate)    │
//! │  • TimingAdjuster: tick conversion, hook overhead cleansing     │
//! │  • Blocking time: wait / sleep / park / monitor buckets         │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             │ create_presentation_ccts
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    CpuResultsSnapshot                           │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ CctContainer │──▶│ Flat profile │   │ Reverse tree │         │
//! │  │ (per thread) │   └──────────────┘   └──────────────┘         │
//! │  └──────┬───────┘                                               │
//! │         ▼                                                       │
//! │  ┌──────────────┐   ┌──────────────┐                            │
//! │  │ Class/package│   │ SnapshotDiff │                            │
//! │  │    views     │   │ (two shots)  │                            │
//! │  └──────────────┘   └──────────────┘                            │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             ▼
//!                    export (JSON / CSV), cli reports
//! ```
//!
//! ## Module Structure
//!
//! - [`profiling`]: everything between raw input and a frozen snapshot
//!   - `events`: the event model and the [`ProfilingEventSink`] seam
//!   - `event_processor`: binary frame decoding and dispatch
//!   - `timing`: session calibration and overhead cleansing
//!   - `call_graph`: the builder applying events to live trees
//!   - `stack_sampler`: sampled stacks turned into synthetic events
//!
//! - [`cct`]: live arena nodes, frozen presentation trees and their views
//!
//! - [`filter`]: which classes count as profiled code
//!
//! - [`export`]: JSON and CSV writers for trees, flat profiles and diffs
//!
//! - [`recording`]: JSON Lines recordings and their replay
//!
//! - [`cli`]: command-line arguments and terminal reports
//!
//! - [`domain`]: newtype ids, timer domains, views and error types
//!
//! ## Typical Usage
//!
//! ```bash
//! # Flat profile of a recorded session
//! callscope replay session.jsonl
//!
//! # Call tree of one thread, as JSON
//! callscope replay session.jsonl --thread main --tree --export tree.json
//!
//! # What changed between two runs
//! callscope diff before.jsonl after.jsonl --view class
//! ```
//!
//! ## Key Concepts
//!
//! - **CCT**: a tree whose nodes are call paths, not just methods
//! - **Self time**: time in a node minus the time of its children
//! - **Root method**: entry point that opens a profiled call tree
//! - **Two timestamps**: absolute (wall clock) plus thread CPU time per event

pub mod cct;
pub mod cli;
pub mod domain;
pub mod export;
pub mod filter;
pub mod profiling;
pub mod recording;

pub use cct::CpuResultsSnapshot;
pub use filter::InstrumentationFilter;
pub use profiling::{CallGraphBuilder, Event, ProfilingEventSink, StackTraceSnapshotBuilder};
