//! Live calling-context tree construction.
//!
//! [`CallGraphBuilder`] consumes the ordered event stream and keeps one
//! simulated call stack per thread. Every stamped transition charges the
//! ticks elapsed since the previous transition to the frame that was on top,
//! so a node's net time is exactly the time during which it was the
//! innermost active frame.
//!
//! ```text
//!  entry(m, t)            exit(m, t)
//!  ───────────            ──────────
//!  top.net += t - last    m.net += t - last
//!  push m                 pop m (and any category/servlet frame under it)
//!  last = t               last = t
//! ```
//!
//! Events arrive in batches; each batch is applied inside one write
//! transaction of the thread registry so readers never see half a frame.

// Tick arithmetic converts between i64 and f64
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::cct::container::{CctContainer, FreezeContext, ThreadTimes};
use crate::cct::flat_profile::FlatProfileContainer;
use crate::cct::node::{FilterStatus, NodeKind, NodeRef};
use crate::cct::presentation::{CctTree, MethodNames};
use crate::domain::{Mark, MethodId, ThreadId, TimerDomain};
use crate::filter::InstrumentationFilter;
use crate::profiling::events::{Event, MethodType, Parameter, ProfilingEventSink};
use crate::profiling::methods::MethodInfoMapper;
use crate::profiling::thread_infos::{lock_thread, Registry, ThreadInfo, ThreadInfos};
use crate::profiling::timing::{ProfilingSessionStatus, TimingAdjuster};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Frames of classes failing the filter are folded into their callers
    pub filter: InstrumentationFilter,
    /// Charge the still-running top frames up to the dump timestamp when
    /// presentation trees are created (undone afterwards)
    pub charge_open_frames: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            filter: InstrumentationFilter::none(),
            charge_open_frames: true,
        }
    }
}

// ============================================================================
// Side statistics
// ============================================================================

/// Contention recorded for one monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorContention {
    pub monitor: u32,
    pub entries: u64,
    /// Blocked ticks summed over all entries with a matching exit
    pub wait_ticks: i64,
    /// How often each owner held the monitor at contention time
    pub owners: Vec<(u32, u64)>,
}

#[derive(Debug, Default)]
struct MonitorStats {
    monitors: HashMap<u32, MonitorContention>,
    /// Monitor and entry time of threads currently blocked
    pending: HashMap<ThreadId, (u32, i64)>,
}

impl MonitorStats {
    fn entry(&mut self, thread: ThreadId, monitor: u32, owner: Option<u32>, ts0: i64) {
        let record = self.monitors.entry(monitor).or_insert_with(|| MonitorContention {
            monitor,
            ..MonitorContention::default()
        });
        record.entries += 1;
        if let Some(owner) = owner {
            match record.owners.iter_mut().find(|(o, _)| *o == owner) {
                Some((_, count)) => *count += 1,
                None => record.owners.push((owner, 1)),
            }
        }
        self.pending.insert(thread, (monitor, ts0));
    }

    fn exit(&mut self, thread: ThreadId, ts0: i64) {
        if let Some((monitor, start)) = self.pending.remove(&thread) {
            if let Some(record) = self.monitors.get_mut(&monitor) {
                record.wait_ticks += (ts0 - start).max(0);
            }
        }
    }
}

/// Whole-thread times of one thread, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadActiveTime {
    pub thread: ThreadId,
    pub name: String,
    pub absolute_ms: i64,
    /// None when thread CPU time is not collected
    pub cpu_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
enum BlockBucket {
    Wait,
    Sleep,
}

// ============================================================================
// Builder
// ============================================================================

/// Event sink that maintains the live per-thread calling-context trees
pub struct CallGraphBuilder {
    threads: ThreadInfos,
    timing: RwLock<TimingAdjuster>,
    collecting_two_timestamps: AtomicBool,
    mapper: Arc<dyn MethodInfoMapper>,
    config: BuilderConfig,
    marks: RwLock<HashMap<MethodId, Mark>>,
    /// Latest absolute timestamp seen, or set explicitly by a sampler
    dump_timestamp: AtomicI64,
    integrity_reported: AtomicBool,
    integrity_violations: AtomicU64,
    monitors: Mutex<MonitorStats>,
    profiling_points: Mutex<HashMap<u16, u64>>,
}

impl std::fmt::Debug for CallGraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGraphBuilder")
            .field("threads", &self.threads)
            .field("config", &self.config)
            .field("integrity_violations", &self.integrity_violations())
            .finish_non_exhaustive()
    }
}

impl CallGraphBuilder {
    #[must_use]
    pub fn new(
        status: &Arc<ProfilingSessionStatus>,
        mapper: Arc<dyn MethodInfoMapper>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            threads: ThreadInfos::new(),
            timing: RwLock::new(TimingAdjuster::new(status)),
            collecting_two_timestamps: AtomicBool::new(status.collecting_two_timestamps),
            mapper,
            config,
            marks: RwLock::new(HashMap::new()),
            dump_timestamp: AtomicI64::new(0),
            integrity_reported: AtomicBool::new(false),
            integrity_violations: AtomicU64::new(0),
            monitors: Mutex::new(MonitorStats::default()),
            profiling_points: Mutex::new(HashMap::new()),
        }
    }

    /// Swap in a new session status; calibration is recomputed only if the
    /// status object changed
    pub fn set_session_status(&self, status: &Arc<ProfilingSessionStatus>) {
        let mut timing = self.timing.write().unwrap_or_else(PoisonError::into_inner);
        if timing.refresh(status) {
            self.collecting_two_timestamps
                .store(status.collecting_two_timestamps, Ordering::Relaxed);
            info!(
                "Timing calibration refreshed (two timestamps: {}, calibrated: {})",
                status.collecting_two_timestamps, status.calibrated
            );
        }
    }

    /// Root and marker entries of `method` open a category node for `mark`
    pub fn mark_method(&self, method: MethodId, mark: Mark) {
        self.marks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method, mark);
    }

    #[must_use]
    pub fn timing(&self) -> TimingAdjuster {
        self.timing.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn mapper(&self) -> &Arc<dyn MethodInfoMapper> {
        &self.mapper
    }

    #[must_use]
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Number of dropped events that contradicted a simulated stack
    #[must_use]
    pub fn integrity_violations(&self) -> u64 {
        self.integrity_violations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dump_timestamp(&self) -> i64 {
        self.dump_timestamp.load(Ordering::Relaxed)
    }

    pub fn set_dump_timestamp(&self, ts: i64) {
        self.dump_timestamp.store(ts, Ordering::Relaxed);
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.begin_read_transaction().len()
    }

    /// Drop all collected data; skipped (returns false) while a reader holds
    /// the registry
    pub fn reset(&self) -> bool {
        if !self.threads.try_reset() {
            return false;
        }
        self.clear_side_stats();
        true
    }

    fn clear_side_stats(&self) {
        *self.monitors.lock().unwrap_or_else(PoisonError::into_inner) = MonitorStats::default();
        self.profiling_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.integrity_reported.store(false, Ordering::Relaxed);
    }

    /// Monitor contention, ordered by monitor hash
    #[must_use]
    pub fn monitor_contention(&self) -> Vec<MonitorContention> {
        let stats = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = stats.monitors.values().cloned().collect();
        out.sort_by_key(|m| m.monitor);
        out
    }

    /// Hit counts per profiling point id
    #[must_use]
    pub fn profiling_point_hits(&self) -> Vec<(u16, u64)> {
        let points = self
            .profiling_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = points.iter().map(|(k, v)| (*k, *v)).collect();
        out.sort_unstable();
        out
    }

    /// Display names of the frames currently active on `thread`, innermost
    /// first. Only the thread's own lock is held while copying.
    #[must_use]
    pub fn live_stack(&self, thread: ThreadId) -> Option<Vec<String>> {
        let handle = self.threads.thread(thread)?;
        let ti = lock_thread(&handle);
        let frames = ti
            .stack()
            .iter()
            .rev()
            .map(|n| match &ti.tree.node(*n).kind {
                NodeKind::Method(id) => self.mapper.method_name(*id),
                NodeKind::Category(mark) => format!("[{mark}]"),
                NodeKind::Servlet { path, .. } => format!("[{path}]"),
                NodeKind::Thread => "[thread]".to_string(),
            })
            .collect();
        Some(frames)
    }

    fn is_collecting_two_timestamps(&self) -> bool {
        self.collecting_two_timestamps.load(Ordering::Relaxed)
    }

    fn mark_of(&self, method: MethodId) -> Mark {
        self.marks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&method)
            .copied()
            .unwrap_or(Mark::DEFAULT)
    }

    fn class_passes(&self, method: MethodId) -> bool {
        if self.config.filter.is_pass_all() {
            return true;
        }
        self.mapper
            .method_info(method)
            .map_or(true, |m| self.config.filter.passes(&m.class_name))
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    fn apply_locked(&self, tx: &mut Registry, event: &Event) {
        if let Some(ts) = event.absolute_timestamp() {
            self.dump_timestamp.fetch_max(ts, Ordering::Relaxed);
        }

        match event {
            Event::MethodEntry {
                method,
                thread,
                kind,
                ts0,
                ts1,
                params,
            } => {
                let handle = tx.get_or_create(*thread);
                self.method_entry(&mut lock_thread(&handle), *method, *kind, Some([*ts0, *ts1]), params);
            }
            Event::MethodEntryUnstamped {
                method,
                thread,
                kind,
                params,
            } => {
                let handle = tx.get_or_create(*thread);
                self.method_entry(&mut lock_thread(&handle), *method, *kind, None, params);
            }
            Event::MethodExit {
                method,
                thread,
                kind,
                ts0,
                ts1,
            } => {
                let handle = tx.get_or_create(*thread);
                self.method_exit(&mut lock_thread(&handle), *method, *kind, Some([*ts0, *ts1]));
            }
            Event::MethodExitUnstamped { method, thread, kind } => {
                let handle = tx.get_or_create(*thread);
                self.method_exit(&mut lock_thread(&handle), *method, *kind, None);
            }
            Event::NewThread {
                thread,
                name,
                class_name,
            } => {
                let handle = tx.get_or_create(*thread);
                let mut ti = lock_thread(&handle);
                ti.name.clone_from(name);
                ti.class_name.clone_from(class_name);
                debug!("New thread {thread}: {name}");
            }
            Event::ServletRequest {
                thread,
                request_type,
                path,
                ..
            } => {
                let handle = tx.get_or_create(*thread);
                Self::servlet_request(&mut lock_thread(&handle), *request_type, path);
            }
            Event::WaitEntry { thread, ts0, ts1 }
            | Event::SleepEntry { thread, ts0, ts1 }
            | Event::ParkEntry { thread, ts0, ts1 } => {
                let handle = tx.get_or_create(*thread);
                self.block_entry(&mut lock_thread(&handle), [*ts0, *ts1]);
            }
            Event::WaitExit { thread, ts0, .. } | Event::ParkExit { thread, ts0, .. } => {
                let handle = tx.get_or_create(*thread);
                Self::block_exit(&mut lock_thread(&handle), *ts0, BlockBucket::Wait);
            }
            Event::SleepExit { thread, ts0, .. } => {
                let handle = tx.get_or_create(*thread);
                Self::block_exit(&mut lock_thread(&handle), *ts0, BlockBucket::Sleep);
            }
            Event::MonitorEntry {
                thread,
                ts0,
                ts1,
                monitor,
                owner,
            } => {
                let handle = tx.get_or_create(*thread);
                self.block_entry(&mut lock_thread(&handle), [*ts0, *ts1]);
                if let Some(monitor) = monitor {
                    self.monitors
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(*thread, *monitor, *owner, *ts0);
                }
            }
            Event::MonitorExit { thread, ts0, .. } => {
                let handle = tx.get_or_create(*thread);
                Self::block_exit(&mut lock_thread(&handle), *ts0, BlockBucket::Wait);
                self.monitors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .exit(*thread, *ts0);
            }
            Event::ThreadsSuspended { ts0, .. } => Self::threads_suspended(tx, *ts0),
            Event::ThreadsResumed { ts0, .. } => Self::threads_resumed(tx, *ts0),
            Event::AdjustTime { thread, diff0, diff1 } => {
                let handle = tx.get_or_create(*thread);
                self.adjust_time(&mut lock_thread(&handle), *diff0, *diff1);
            }
            Event::Reset => {
                tx.reset_all();
                self.clear_side_stats();
                info!("Collected data reset");
            }
            Event::ProfilingPointHit { point, .. } => {
                *self
                    .profiling_points
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(*point)
                    .or_insert(0) += 1;
            }
        }
    }

    // ========================================================================
    // Stack transitions
    // ========================================================================

    /// Charge the ticks since the last transition to the top frame and move
    /// the transition point to `ts`. Timestamps that go backwards are
    /// clamped to the previous transition point.
    fn advance_top(&self, ti: &mut ThreadInfo, ts: [i64; 2]) -> [i64; 2] {
        let mut effective = ts;
        let top = ti.peek();
        let domains = if self.is_collecting_two_timestamps() { 2 } else { 1 };
        for d in 0..domains {
            let diff = ts[d] - ti.top_method_entry_time[d];
            if diff > 0 {
                if let Some(top) = top {
                    ti.tree.node_mut(top).add_net_time(d, diff);
                }
            } else {
                effective[d] = ti.top_method_entry_time[d];
            }
        }
        self.set_top_times(ti, effective);
        effective
    }

    fn set_top_times(&self, ti: &mut ThreadInfo, ts: [i64; 2]) {
        ti.top_method_entry_time[0] = ts[0];
        if self.is_collecting_two_timestamps() {
            ti.top_method_entry_time[1] = ts[1];
        }
    }

    /// Start accumulating whole-thread gross time
    fn open_window(&self, ti: &mut ThreadInfo, ts: [i64; 2]) {
        ti.gross_window_open = true;
        ti.root_method_entry_time_abs = ts[0];
        ti.root_method_entry_time_cpu = if self.is_collecting_two_timestamps() { ts[1] } else { 0 };
    }

    fn close_window(&self, ti: &mut ThreadInfo, ts: Option<[i64; 2]>) {
        if ti.gross_window_open {
            if let Some(ts) = ts {
                ti.root_gross_time_abs += ts[0] - ti.root_method_entry_time_abs;
                if self.is_collecting_two_timestamps() {
                    ti.root_gross_time_cpu += ts[1] - ti.root_method_entry_time_cpu;
                }
            }
        }
        ti.gross_window_open = false;
        ti.root_method_entry_time_abs = 0;
        ti.root_method_entry_time_cpu = 0;
    }

    /// Push `method` (and its category, if requested and marked) on top of
    /// the current frame, or under the thread root if the stack is empty
    fn push_method_frames(&self, ti: &mut ThreadInfo, method: MethodId, with_category: bool) -> (NodeRef, bool) {
        let mut parent = match ti.peek() {
            Some(top) => top,
            None => {
                let root = ti.ensure_thread_root();
                ti.tree.node_mut(root).n_calls += 1;
                root
            }
        };
        if with_category {
            let mark = self.mark_of(method);
            if !mark.is_default() {
                let (category, _) = ti.tree.find_or_insert_child(parent, &NodeKind::Category(mark));
                ti.push(category);
                parent = category;
            }
        }
        let (node, created) = ti.tree.find_or_insert_child(parent, &NodeKind::Method(method));
        ti.push(node);
        (node, created)
    }

    fn method_entry(
        &self,
        ti: &mut ThreadInfo,
        method: MethodId,
        kind: MethodType,
        stamp: Option<[i64; 2]>,
        params: &[Parameter],
    ) {
        match kind {
            MethodType::Normal => self.plain_entry(ti, method, stamp),
            MethodType::Root => self.root_entry(ti, method, stamp),
            MethodType::Marker => self.marker_entry(ti, method, stamp, params),
        }
    }

    fn plain_entry(&self, ti: &mut ThreadInfo, method: MethodId, stamp: Option<[i64; 2]>) {
        let Some(top) = ti.peek() else {
            self.integrity_violation(
                ti,
                &format!("entry of {} with an empty stack", self.mapper.method_name(method)),
            );
            return;
        };
        if let Some(ts) = stamp {
            self.advance_top(ti, ts);
        }
        let (node, created) = ti.tree.find_or_insert_child(top, &NodeKind::Method(method));
        ti.push(node);
        if created && !ti.is_in_root() && !self.class_passes(method) {
            ti.tree.node_mut(node).filter = FilterStatus::Filtered;
        }
    }

    fn root_entry(&self, ti: &mut ThreadInfo, method: MethodId, stamp: Option<[i64; 2]>) {
        let was_empty = ti.is_stack_empty();
        if ti.is_in_root() {
            debug!("Re-entrant root method {} on {}", method, ti.thread_id);
        }
        let effective = stamp.map(|ts| if was_empty { ts } else { self.advance_top(ti, ts) });
        self.push_method_frames(ti, method, true);
        ti.in_root_depth += 1;
        if let Some(ts) = effective {
            if was_empty {
                self.open_window(ti, ts);
            }
            self.set_top_times(ti, ts);
        }
    }

    fn marker_entry(&self, ti: &mut ThreadInfo, method: MethodId, stamp: Option<[i64; 2]>, params: &[Parameter]) {
        let was_empty = ti.is_stack_empty();
        let effective = stamp.map(|ts| if was_empty { ts } else { self.advance_top(ti, ts) });
        let (node, _) = self.push_method_frames(ti, method, true);
        let in_root = ti.is_in_root();
        let live = ti.tree.node_mut(node);
        // Outside a root the marker only delimits its category
        if !in_root {
            live.filter = FilterStatus::Filtered;
        }
        if !params.is_empty() {
            live.params = params.to_vec();
        }
        if let Some(ts) = effective {
            if was_empty {
                self.open_window(ti, ts);
            }
            self.set_top_times(ti, ts);
        }
    }

    fn method_exit(&self, ti: &mut ThreadInfo, method: MethodId, kind: MethodType, stamp: Option<[i64; 2]>) {
        // A servlet boundary without a method above it closes with its caller
        Self::pop_context_frames(ti);
        if !self.check_top(ti, method) {
            return;
        }
        let effective = stamp.map(|ts| self.advance_top(ti, ts));
        ti.pop();
        Self::pop_context_frames(ti);
        if kind == MethodType::Root {
            ti.in_root_depth = ti.in_root_depth.saturating_sub(1);
        }
        if ti.is_stack_empty() {
            self.close_window(ti, effective);
        }
    }

    /// True if `method` is the innermost frame; otherwise the event is an
    /// integrity violation and must be dropped
    fn check_top(&self, ti: &ThreadInfo, method: MethodId) -> bool {
        let problem = match ti.peek().map(|n| &ti.tree.node(n).kind) {
            Some(NodeKind::Method(id)) if *id == method => return true,
            None => format!("exit of {} with an empty stack", self.mapper.method_name(method)),
            Some(NodeKind::Method(other)) => format!(
                "exit of {} while {} is on top",
                self.mapper.method_name(method),
                self.mapper.method_name(*other)
            ),
            Some(kind) => format!(
                "exit of {} while a {kind:?} frame is on top",
                self.mapper.method_name(method)
            ),
        };
        self.integrity_violation(ti, &problem);
        false
    }

    fn pop_context_frames(ti: &mut ThreadInfo) {
        while let Some(top) = ti.peek() {
            match ti.tree.node(top).kind {
                NodeKind::Category(_) | NodeKind::Servlet { .. } => {
                    ti.pop();
                }
                _ => break,
            }
        }
    }

    fn integrity_violation(&self, ti: &ThreadInfo, problem: &str) {
        self.integrity_violations.fetch_add(1, Ordering::Relaxed);
        if self.integrity_reported.swap(true, Ordering::Relaxed) {
            debug!("Stack integrity violation on {}: {problem}", ti.thread_id);
            return;
        }
        error!(
            "*** Profiler stack integrity violation on {} ({}): {problem}; event dropped",
            ti.thread_id, ti.name
        );
        error!("{}", ti.dump_stack(self.mapper.as_ref()));
    }

    fn servlet_request(ti: &mut ThreadInfo, request_type: u8, path: &str) {
        let Some(top) = ti.peek() else {
            debug!("Servlet request {path} on {} outside any call tree", ti.thread_id);
            return;
        };
        let kind = NodeKind::Servlet {
            request_type,
            path: path.to_string(),
        };
        let (node, _) = ti.tree.find_or_insert_child(top, &kind);
        ti.push(node);
    }

    // ========================================================================
    // Blocking and global time events
    // ========================================================================

    fn block_entry(&self, ti: &mut ThreadInfo, ts: [i64; 2]) {
        let Some(top) = ti.peek() else {
            return;
        };
        let effective = self.advance_top(ti, ts);
        ti.tree.node_mut(top).last_wait_or_sleep_stamp = effective[0];
    }

    /// Blocked time is recorded as wait or sleep time, not as self time
    fn block_exit(ti: &mut ThreadInfo, ts0: i64, bucket: BlockBucket) {
        let Some(top) = ti.peek() else {
            return;
        };
        let node = ti.tree.node_mut(top);
        let elapsed = ts0 - node.last_wait_or_sleep_stamp;
        node.last_wait_or_sleep_stamp = 0;
        if elapsed > 0 {
            match bucket {
                BlockBucket::Wait => node.wait_time0 += elapsed,
                BlockBucket::Sleep => node.sleep_time0 += elapsed,
            }
        }
        if ts0 - ti.top_method_entry_time[0] > 0 {
            ti.top_method_entry_time[0] = ts0;
        }
    }

    fn threads_suspended(tx: &Registry, ts0: i64) {
        for handle in tx.threads() {
            let mut ti = lock_thread(handle);
            let Some(top) = ti.peek() else {
                continue;
            };
            let diff = ts0 - ti.top_method_entry_time[0];
            if diff > 0 {
                ti.tree.node_mut(top).add_net_time(0, diff);
                ti.top_method_entry_time[0] = ts0;
            }
            if ti.gross_window_open {
                ti.root_gross_time_abs += ts0 - ti.root_method_entry_time_abs;
                ti.root_method_entry_time_abs = ts0;
            }
        }
    }

    fn threads_resumed(tx: &Registry, ts0: i64) {
        for handle in tx.threads() {
            let mut ti = lock_thread(handle);
            if ti.is_stack_empty() {
                continue;
            }
            ti.top_method_entry_time[0] = ts0;
            if ti.gross_window_open {
                ti.root_method_entry_time_abs = ts0;
            }
        }
    }

    /// Shift the thread's time references by host-measured overhead
    fn adjust_time(&self, ti: &mut ThreadInfo, diff0: i64, diff1: i64) {
        let two = self.is_collecting_two_timestamps();
        ti.top_method_entry_time[0] += diff0;
        if two {
            ti.top_method_entry_time[1] += diff1;
        }
        if ti.gross_window_open {
            ti.root_method_entry_time_abs += diff0;
            if two {
                ti.root_method_entry_time_cpu += diff1;
            }
        }
    }

    // ========================================================================
    // Results
    // ========================================================================

    fn thread_times(ti: &ThreadInfo, timing: &TimingAdjuster, dump_ts: i64, thread_clock: Option<i64>) -> ThreadTimes {
        let two = timing.collecting_two_timestamps();
        let mut gross_abs = ti.root_gross_time_abs;
        let mut gross_cpu = ti.root_gross_time_cpu;
        if ti.gross_window_open {
            gross_abs += dump_ts.max(ti.top_method_entry_time[0]) - ti.root_method_entry_time_abs;
            if two {
                let now = thread_clock.map_or(ti.top_method_entry_time[1], |c| c.max(ti.top_method_entry_time[1]));
                gross_cpu += now - ti.root_method_entry_time_cpu;
            } else {
                gross_cpu = -1;
            }
        }

        let root_invocations = ti.root_invocations();
        let other = ti.total_invocations.saturating_sub(root_invocations);
        let injected_abs = timing.delta(root_invocations, other, TimerDomain::Absolute);
        let injected_cpu = if two {
            timing.delta(root_invocations, other, TimerDomain::ThreadCpu)
        } else {
            timing.absolute_to_cpu_ticks(injected_abs)
        };
        ThreadTimes {
            gross_abs,
            gross_cpu,
            injected_abs,
            injected_cpu,
        }
    }

    /// Whole-thread times of one thread, in ticks
    #[must_use]
    pub fn thread_active_times(&self, thread: ThreadId) -> Option<ThreadTimes> {
        let handle = self.threads.thread(thread)?;
        let timing = self.timing();
        let times = Self::thread_times(&lock_thread(&handle), &timing, self.dump_timestamp(), None);
        Some(times)
    }

    /// Active time of every thread, net of estimated hook overhead
    #[must_use]
    pub fn all_threads_active_times(&self) -> Vec<ThreadActiveTime> {
        let timing = self.timing();
        let dump_ts = self.dump_timestamp();
        let tx = self.threads.begin_read_transaction();
        tx.threads()
            .map(|handle| {
                let ti = lock_thread(handle);
                let times = Self::thread_times(&ti, &timing, dump_ts, None);
                let absolute_ms =
                    timing.ticks_to_millis(times.gross_abs as f64 - times.injected_abs, TimerDomain::Absolute);
                let cpu_ms = (times.gross_cpu >= 0).then(|| {
                    timing.ticks_to_millis(times.gross_cpu as f64 - times.injected_cpu, TimerDomain::ThreadCpu)
                });
                ThreadActiveTime {
                    thread: ti.thread_id,
                    name: ti.name.clone(),
                    absolute_ms: absolute_ms.max(0),
                    cpu_ms: cpu_ms.map(|ms| ms.max(0)),
                }
            })
            .collect()
    }

    /// Freeze every thread's live tree; threads without data are skipped
    #[must_use]
    pub fn create_presentation_ccts(&self) -> Vec<CctContainer> {
        self.create_presentation_ccts_at(None, &HashMap::new())
    }

    /// Like [`create_presentation_ccts`](Self::create_presentation_ccts),
    /// charging open frames up to `dump_ts` instead of the latest timestamp.
    /// With two timestamps, a thread found in `thread_clocks` also has its
    /// open frame charged up to that thread CPU clock.
    #[must_use]
    pub fn create_presentation_ccts_at(
        &self,
        dump_ts: Option<i64>,
        thread_clocks: &HashMap<ThreadId, i64>,
    ) -> Vec<CctContainer> {
        let dump_ts = dump_ts.unwrap_or_else(|| self.dump_timestamp());
        let timing = self.timing();

        if self.config.charge_open_frames {
            let two = timing.collecting_two_timestamps();
            let tx = self.threads.begin_write_transaction();
            let handles: Vec<_> = tx.threads().cloned().collect();
            for handle in &handles {
                let mut ti = lock_thread(handle);
                let clock = if two { thread_clocks.get(&ti.thread_id).copied() } else { None };
                charge_open_frame(&mut ti, dump_ts, clock);
            }
            let containers = self.freeze_all(&handles, &timing, dump_ts, thread_clocks);
            for handle in &handles {
                undo_open_frame(&mut lock_thread(handle));
            }
            containers
        } else {
            let tx = self.threads.begin_read_transaction();
            let handles: Vec<_> = tx.threads().cloned().collect();
            self.freeze_all(&handles, &timing, dump_ts, thread_clocks)
        }
    }

    fn freeze_all(
        &self,
        handles: &[Arc<Mutex<ThreadInfo>>],
        timing: &TimingAdjuster,
        dump_ts: i64,
        thread_clocks: &HashMap<ThreadId, i64>,
    ) -> Vec<CctContainer> {
        let mut ids = BTreeSet::new();
        let mut thread_names = Vec::with_capacity(handles.len());
        for handle in handles {
            let ti = lock_thread(handle);
            thread_names.push((ti.thread_id, ti.name.clone()));
            ids.extend(ti.tree.nodes().filter_map(|n| n.kind.method_id()).map(|m| m.0));
        }
        let names = Arc::new(MethodNames::from_mapper(self.mapper.as_ref(), ids));
        let thread_names = Arc::new(thread_names);
        let ctx = FreezeContext {
            timing,
            filter: &self.config.filter,
            names: &names,
            thread_names: &thread_names,
        };

        handles
            .iter()
            .filter_map(|handle| {
                let ti = lock_thread(handle);
                let clock = thread_clocks.get(&ti.thread_id).copied();
                let times = Self::thread_times(&ti, timing, dump_ts, clock);
                CctContainer::freeze(&ti, &ctx, times)
            })
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Flat profile over all threads; None if nothing was collected
    #[must_use]
    pub fn create_flat_profile(&self) -> Option<FlatProfileContainer> {
        let containers = self.create_presentation_ccts();
        if containers.is_empty() {
            return None;
        }
        let trees: Vec<&dyn CctTree> = containers.iter().map(|c| c as &dyn CctTree).collect();
        Some(FlatProfileContainer::from_trees(&trees))
    }
}

fn charge_open_frame(ti: &mut ThreadInfo, dump_ts: i64, thread_clock: Option<i64>) {
    let Some(top) = ti.peek() else {
        return;
    };
    let charge = [
        (dump_ts - ti.top_method_entry_time[0]).max(0),
        thread_clock.map_or(0, |clock| (clock - ti.top_method_entry_time[1]).max(0)),
    ];
    if charge != [0, 0] {
        let node = ti.tree.node_mut(top);
        node.add_net_time(0, charge[0]);
        node.add_net_time(1, charge[1]);
        ti.open_frame_charge = Some((top, charge));
    }
}

fn undo_open_frame(ti: &mut ThreadInfo) {
    if let Some((node, charge)) = ti.open_frame_charge.take() {
        let live = ti.tree.node_mut(node);
        live.net_time[0] -= charge[0];
        live.net_time[1] -= charge[1];
    }
}

impl ProfilingEventSink for CallGraphBuilder {
    fn apply(&self, event: &Event) {
        let mut tx = self.threads.begin_write_transaction();
        self.apply_locked(&mut tx, event);
    }

    fn apply_all(&self, events: &[Event]) {
        let mut tx = self.threads.begin_write_transaction();
        for event in events {
            self.apply_locked(&mut tx, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cct::presentation::PrestimeNode;
    use crate::profiling::methods::{MethodInfo, MethodTable};

    const MAIN: MethodId = MethodId(1);
    const FOO: MethodId = MethodId(2);
    const BAR: MethodId = MethodId(3);
    const T0: ThreadId = ThreadId(0);

    fn create_builder(config: BuilderConfig) -> CallGraphBuilder {
        let table = MethodTable::new();
        table.insert(MAIN, MethodInfo::new("app.Main", "main", ""));
        table.insert(FOO, MethodInfo::new("app.Main", "foo", ""));
        table.insert(BAR, MethodInfo::new("java.util.List", "bar", ""));
        let status = Arc::new(ProfilingSessionStatus {
            timer_counts_in_second: [1_000_000, 1_000_000],
            ..ProfilingSessionStatus::default()
        });
        CallGraphBuilder::new(&status, Arc::new(table), config)
    }

    fn entry(method: MethodId, kind: MethodType, ts0: i64) -> Event {
        Event::MethodEntry {
            method,
            thread: T0,
            kind,
            ts0,
            ts1: 0,
            params: Vec::new(),
        }
    }

    fn exit(method: MethodId, kind: MethodType, ts0: i64) -> Event {
        Event::MethodExit {
            method,
            thread: T0,
            kind,
            ts0,
            ts1: 0,
        }
    }

    fn create_two_timestamp_builder() -> CallGraphBuilder {
        let table = MethodTable::new();
        table.insert(MAIN, MethodInfo::new("app.Main", "main", ""));
        table.insert(FOO, MethodInfo::new("app.Main", "foo", ""));
        let status = Arc::new(ProfilingSessionStatus {
            timer_counts_in_second: [1_000_000, 1_000_000],
            collecting_two_timestamps: true,
            ..ProfilingSessionStatus::default()
        });
        CallGraphBuilder::new(&status, Arc::new(table), BuilderConfig::default())
    }

    fn named<'a>(node: &PrestimeNode<'a>, name: &str) -> PrestimeNode<'a> {
        node.child_named(name).unwrap()
    }

    #[test]
    fn test_self_time_charged_to_top_frame() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            entry(FOO, MethodType::Normal, 10),
            exit(FOO, MethodType::Normal, 40),
            exit(MAIN, MethodType::Root, 50),
        ]);
        let containers = builder.create_presentation_ccts();
        assert_eq!(containers.len(), 1);
        let root = containers[0].root_node();
        let main = named(&root, "app.Main.main()");
        assert_eq!(main.self_time(TimerDomain::Absolute), 20);
        assert_eq!(main.total_time(TimerDomain::Absolute), 50);
        assert_eq!(named(&main, "app.Main.foo()").self_time(TimerDomain::Absolute), 30);
        assert_eq!(builder.integrity_violations(), 0);
        let times = builder.thread_active_times(T0).unwrap();
        assert_eq!(times.gross_abs, 50);
    }

    #[test]
    fn test_mismatched_exit_dropped() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            entry(FOO, MethodType::Normal, 10),
            exit(BAR, MethodType::Normal, 20),
            entry(FOO, MethodType::Normal, 25),
        ]);
        assert_eq!(builder.integrity_violations(), 1);
        assert_eq!(builder.live_stack(T0).unwrap().len(), 3);
    }

    #[test]
    fn test_entry_outside_root_is_violation() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply(&entry(FOO, MethodType::Normal, 5));
        assert_eq!(builder.integrity_violations(), 1);
        assert!(builder.create_presentation_ccts().is_empty());
    }

    #[test]
    fn test_open_frames_charged_then_undone() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[entry(MAIN, MethodType::Root, 0), entry(FOO, MethodType::Normal, 10)]);
        let first = builder.create_presentation_ccts_at(Some(100), &HashMap::new());
        let main = named(&first[0].root_node(), "app.Main.main()");
        assert_eq!(named(&main, "app.Main.foo()").self_time(TimerDomain::Absolute), 90);
        let second = builder.create_presentation_ccts_at(Some(50), &HashMap::new());
        let main = named(&second[0].root_node(), "app.Main.main()");
        assert_eq!(named(&main, "app.Main.foo()").self_time(TimerDomain::Absolute), 40);
    }

    #[test]
    fn test_open_frames_charged_on_thread_clock() {
        let builder = create_two_timestamp_builder();
        builder.apply_all(&[
            Event::MethodEntry {
                method: MAIN,
                thread: T0,
                kind: MethodType::Root,
                ts0: 0,
                ts1: 0,
                params: Vec::new(),
            },
            Event::MethodEntry {
                method: FOO,
                thread: T0,
                kind: MethodType::Normal,
                ts0: 10,
                ts1: 10,
                params: Vec::new(),
            },
        ]);
        let clocks = HashMap::from([(T0, 40)]);
        let charged = builder.create_presentation_ccts_at(Some(100), &clocks);
        let main = named(&charged[0].root_node(), "app.Main.main()");
        let foo = named(&main, "app.Main.foo()");
        assert_eq!(foo.self_time(TimerDomain::Absolute), 90);
        assert_eq!(foo.self_time(TimerDomain::ThreadCpu), 30);
        assert_eq!(charged[0].thread_times().gross_cpu, 40);

        // The charge does not stick to the live tree
        let plain = builder.create_presentation_ccts_at(Some(100), &HashMap::new());
        let main = named(&plain[0].root_node(), "app.Main.main()");
        assert_eq!(named(&main, "app.Main.foo()").self_time(TimerDomain::ThreadCpu), 0);
    }

    #[test]
    fn test_suspended_time_excluded() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            Event::ThreadsSuspended { ts0: 20, ts1: 0 },
            Event::ThreadsResumed { ts0: 70, ts1: 0 },
            exit(MAIN, MethodType::Root, 100),
        ]);
        let containers = builder.create_presentation_ccts();
        let main = named(&containers[0].root_node(), "app.Main.main()");
        assert_eq!(main.self_time(TimerDomain::Absolute), 50);
        assert_eq!(builder.thread_active_times(T0).unwrap().gross_abs, 50);
    }

    #[test]
    fn test_adjust_time_shifts_top_and_root_times() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            entry(FOO, MethodType::Normal, 10),
            Event::AdjustTime {
                thread: T0,
                diff0: 5,
                diff1: 0,
            },
            exit(FOO, MethodType::Normal, 40),
            exit(MAIN, MethodType::Root, 50),
        ]);
        let containers = builder.create_presentation_ccts();
        let main = named(&containers[0].root_node(), "app.Main.main()");
        assert_eq!(named(&main, "app.Main.foo()").self_time(TimerDomain::Absolute), 25);
        assert_eq!(main.total_time(TimerDomain::Absolute), 45);
        assert_eq!(builder.thread_active_times(T0).unwrap().gross_abs, 45);
    }

    #[test]
    fn test_sleep_and_park_buckets() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            Event::SleepEntry {
                thread: T0,
                ts0: 10,
                ts1: 0,
            },
            Event::SleepExit {
                thread: T0,
                ts0: 40,
                ts1: 0,
            },
            Event::ParkEntry {
                thread: T0,
                ts0: 50,
                ts1: 0,
            },
            Event::ParkExit {
                thread: T0,
                ts0: 60,
                ts1: 0,
            },
            exit(MAIN, MethodType::Root, 70),
        ]);
        let containers = builder.create_presentation_ccts();
        let main = named(&containers[0].root_node(), "app.Main.main()");
        assert_eq!(main.sleep_time0(), 30);
        assert_eq!(main.wait_time0(), 10);
        assert_eq!(main.self_time(TimerDomain::Absolute), 30);
    }

    #[test]
    fn test_servlet_frame_popped_with_method() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            Event::ServletRequest {
                thread: T0,
                request_type: 1,
                path: "/index".to_string(),
                session_id: -1,
            },
            entry(FOO, MethodType::Normal, 10),
        ]);
        assert_eq!(
            builder.live_stack(T0).unwrap(),
            vec!["app.Main.foo()".to_string(), "[/index]".to_string(), "app.Main.main()".to_string()]
        );
        builder.apply(&exit(FOO, MethodType::Normal, 30));
        assert_eq!(builder.live_stack(T0).unwrap(), vec!["app.Main.main()".to_string()]);
        builder.apply(&exit(MAIN, MethodType::Root, 40));
        assert!(builder.live_stack(T0).unwrap().is_empty());
        assert_eq!(builder.integrity_violations(), 0);
    }

    #[test]
    fn test_marker_parameters_attached() {
        let builder = create_builder(BuilderConfig::default());
        let params = vec![Parameter::Int(42), Parameter::String("SELECT 1".to_string())];
        builder.apply(&Event::MethodEntry {
            method: MAIN,
            thread: T0,
            kind: MethodType::Marker,
            ts0: 0,
            ts1: 0,
            params: params.clone(),
        });
        let handle = builder.threads.thread(T0).unwrap();
        let ti = lock_thread(&handle);
        let top = ti.peek().unwrap();
        assert_eq!(ti.tree.node(top).params, params);
    }

    #[test]
    fn test_wait_time_excluded_from_self_time() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            Event::WaitEntry {
                thread: T0,
                ts0: 10,
                ts1: 0,
            },
            Event::WaitExit {
                thread: T0,
                ts0: 60,
                ts1: 0,
            },
            exit(MAIN, MethodType::Root, 70),
        ]);
        let containers = builder.create_presentation_ccts();
        let main = named(&containers[0].root_node(), "app.Main.main()");
        assert_eq!(main.self_time(TimerDomain::Absolute), 20);
        assert_eq!(main.wait_time0(), 50);
    }

    #[test]
    fn test_filter_folds_calls_outside_profiled_classes() {
        let builder = create_builder(BuilderConfig {
            filter: InstrumentationFilter::exclude(["java.*"]),
            ..BuilderConfig::default()
        });
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            entry(BAR, MethodType::Normal, 10),
            exit(BAR, MethodType::Normal, 30),
            exit(MAIN, MethodType::Root, 40),
        ]);
        let containers = builder.create_presentation_ccts();
        let main = named(&containers[0].root_node(), "app.Main.main()");
        assert_eq!(main.n_children(), 0);
        assert_eq!(main.self_time(TimerDomain::Absolute), 40);
    }

    #[test]
    fn test_monitor_and_profiling_point_stats() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            entry(MAIN, MethodType::Root, 0),
            Event::MonitorEntry {
                thread: T0,
                ts0: 5,
                ts1: 0,
                monitor: Some(0xBEEF),
                owner: Some(7),
            },
            Event::MonitorExit {
                thread: T0,
                ts0: 25,
                ts1: 0,
                monitor: Some(0xBEEF),
            },
            Event::ProfilingPointHit {
                point: 3,
                thread: T0,
                timestamp: 30,
            },
        ]);
        let monitors = builder.monitor_contention();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].wait_ticks, 20);
        assert_eq!(monitors[0].owners, vec![(7, 1)]);
        assert_eq!(builder.profiling_point_hits(), vec![(3, 1)]);
    }

    #[test]
    fn test_reset_event_clears_trees() {
        let builder = create_builder(BuilderConfig::default());
        builder.apply_all(&[
            Event::NewThread {
                thread: T0,
                name: "main".to_string(),
                class_name: String::new(),
            },
            entry(MAIN, MethodType::Root, 0),
            exit(MAIN, MethodType::Root, 10),
            Event::Reset,
        ]);
        assert!(builder.create_presentation_ccts().is_empty());
        assert!(builder.create_flat_profile().is_none());
        let times = builder.all_threads_active_times();
        assert_eq!(times[0].name, "main");
    }

    #[test]
    fn test_marked_root_opens_category() {
        let builder = create_builder(BuilderConfig::default());
        builder.mark_method(MAIN, Mark(4));
        builder.apply_all(&[entry(MAIN, MethodType::Root, 0)]);
        let stack = builder.live_stack(T0).unwrap();
        assert_eq!(stack, vec!["app.Main.main()".to_string(), "[Mark:4]".to_string()]);
        builder.apply(&exit(MAIN, MethodType::Root, 10));
        assert!(builder.live_stack(T0).unwrap().is_empty());
    }
}
