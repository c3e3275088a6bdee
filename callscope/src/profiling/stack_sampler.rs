//! Call trees from periodic stack dumps.
//!
//! Sampling gives no entry/exit events, only a full stack per thread every
//! few milliseconds. [`StackTraceSnapshotBuilder`] compares each thread's new
//! stack with the previous one and synthesizes the method exits and entries
//! that explain the difference, stamped with the dump timestamp. The events
//! feed an internal [`CallGraphBuilder`], so sampled and instrumented trees
//! share one representation.
//!
//! ## Stack diff
//!
//! ```text
//!   old (leaf first)     new (leaf first)
//!   bar  ── exit          baz  ── entry
//!   foo ───────────────── foo        common suffix, compared from the root
//!   main ──────────────── main
//! ```
//!
//! Exits are emitted leaf first, then entries root first, so the simulated
//! stack never sees an entry above a frame that already left.
//!
//! ## Thread CPU time
//!
//! When a sample carries no CPU clock, a thread's CPU time advances by the
//! wall time between two dumps while its previous sample was RUNNABLE.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::blocking_methods::{BlockingMethodPolicy, KnownBlockingMethods, NoBlockingMethods};
use super::call_graph::{BuilderConfig, CallGraphBuilder};
use super::events::{Event, MethodType, ProfilingEventSink};
use super::methods::{MethodInfo, MethodInfoMapper, MethodTable};
use super::timing::ProfilingSessionStatus;
use crate::cct::snapshot::CpuResultsSnapshot;
use crate::domain::{MethodId, NoDataAvailable, SamplingError, ThreadId};
use crate::filter::InstrumentationFilter;

/// Suffix appended to native method names
pub const NATIVE_SUFFIX: &str = "[native]";

/// Separates a method name from a signature appended by the dump source
pub const NAME_SIG_SPLITTER: char = '|';

// ============================================================================
// Samples
// ============================================================================

/// One frame of a sampled stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub native: bool,
}

impl StackFrame {
    #[must_use]
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            line: None,
            native: false,
        }
    }

    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    /// Same method, possibly at a different call site
    #[must_use]
    pub fn same_method(&self, other: &StackFrame) -> bool {
        self.class_name == other.class_name
            && self.method_name == other.method_name
            && self.native == other.native
    }

    /// Bare method name and the signature after `|`, if any
    #[must_use]
    pub fn name_and_signature(&self) -> (&str, &str) {
        match self.method_name.split_once(NAME_SIG_SPLITTER) {
            Some((name, sig)) if !name.is_empty() => (name, sig),
            _ => (self.method_name.as_str(), ""),
        }
    }

    /// Method name as registered: natives carry a `[native]` suffix, placed
    /// before the argument list when the name spells one out
    #[must_use]
    pub fn decorated_method_name(&self) -> String {
        let (name, _) = self.name_and_signature();
        if !self.native {
            return name.to_string();
        }
        match name.find('(') {
            Some(i) if i > 0 => format!("{}{NATIVE_SUFFIX}{}", &name[..i], &name[i..]),
            _ => format!("{name}{NATIVE_SUFFIX}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Stack of one thread at dump time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSample {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    /// Innermost frame first
    #[serde(default)]
    pub frames: Vec<StackFrame>,
    /// Thread CPU clock, when the dump source provides one
    #[serde(default)]
    pub cpu_time: Option<i64>,
}

/// All threads of one dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDump {
    pub timestamp: i64,
    pub threads: Vec<ThreadSample>,
}

// ============================================================================
// Stack diff
// ============================================================================

/// Frames that left and frames that appeared between two samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackDiff<'a> {
    /// Exited frames, innermost first
    pub exits: &'a [StackFrame],
    /// Entered frames, innermost first; enter them in reverse
    pub entries: &'a [StackFrame],
    /// The outermost exit closes the thread's call tree
    pub exits_root: bool,
    /// The outermost entry opens the thread's call tree
    pub entries_root: bool,
}

impl StackDiff<'_> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exits.is_empty() && self.entries.is_empty()
    }

    /// Entered frames in the order they must be entered
    pub fn entries_root_first(&self) -> impl Iterator<Item = &StackFrame> {
        self.entries.iter().rev()
    }
}

/// Diff two leaf-first stacks of the same thread
///
/// Frames are compared from the root end. At the first differing pair, a
/// frame of the same method at another line still counts as common and
/// comparison stops there.
#[must_use]
pub fn diff_stacks<'a>(old: &'a [StackFrame], new: &'a [StackFrame]) -> StackDiff<'a> {
    let mut common = 0;
    for (o, n) in old.iter().rev().zip(new.iter().rev()) {
        if o == n {
            common += 1;
            continue;
        }
        if o.same_method(n) {
            common += 1;
        }
        break;
    }

    let exits = &old[..old.len() - common];
    let entries = &new[..new.len() - common];
    StackDiff {
        exits,
        entries,
        exits_root: new.is_empty() && !exits.is_empty(),
        entries_root: old.is_empty() && !entries.is_empty(),
    }
}

/// Cut a leaf-first stack down to the part that passes `filter`
///
/// Everything from the outermost frame to the innermost passing frame is
/// kept, plus the one callee frame directly under it.
fn trim_to_filter(frames: &[StackFrame], filter: &InstrumentationFilter) -> Vec<StackFrame> {
    if filter.is_pass_all() {
        return frames.to_vec();
    }
    match frames.iter().position(|f| filter.passes(&f.class_name)) {
        Some(i) if i > 1 => frames[i - 1..].to_vec(),
        Some(_) => frames.to_vec(),
        None => Vec::new(),
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Which blocking-method table reclassifies RUNNABLE samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMethods {
    #[default]
    Known,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub filter: InstrumentationFilter,
    /// Threads whose samples are dropped, by name
    pub ignored_threads: Vec<String>,
    pub blocking_methods: BlockingMethods,
}

// ============================================================================
// Snapshot builder
// ============================================================================

#[derive(Debug, Clone)]
struct LastSample {
    name: String,
    state: ThreadState,
    frames: Vec<StackFrame>,
}

#[derive(Debug, Default)]
struct SamplerState {
    last: HashMap<ThreadId, LastSample>,
    known_threads: HashSet<ThreadId>,
    /// Synthesized thread CPU clock per thread
    thread_times: HashMap<ThreadId, i64>,
    current_dump_ts: i64,
    first_dump_ts: Option<i64>,
    sample_count: u64,
    ignored: HashSet<String>,
}

/// Turns successive stack dumps into a CPU results snapshot
pub struct StackTraceSnapshotBuilder {
    methods: Arc<MethodTable>,
    builder: CallGraphBuilder,
    filter: InstrumentationFilter,
    blocking: Box<dyn BlockingMethodPolicy>,
    state: Mutex<SamplerState>,
}

impl fmt::Debug for StackTraceSnapshotBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackTraceSnapshotBuilder")
            .field("methods", &self.methods.len())
            .field("builder", &self.builder)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl Default for StackTraceSnapshotBuilder {
    fn default() -> Self {
        Self::new(&SamplerConfig::default())
    }
}

impl StackTraceSnapshotBuilder {
    #[must_use]
    pub fn new(config: &SamplerConfig) -> Self {
        let blocking: Box<dyn BlockingMethodPolicy> = match config.blocking_methods {
            BlockingMethods::Known => Box::new(KnownBlockingMethods::new()),
            BlockingMethods::None => Box::new(NoBlockingMethods),
        };
        let mut sampler = Self::with_policy(config.filter.clone(), blocking);
        for name in &config.ignored_threads {
            sampler.ignore_thread(name.clone());
        }
        sampler
    }

    /// Builder with a custom blocking-method policy
    #[must_use]
    pub fn with_policy(filter: InstrumentationFilter, blocking: Box<dyn BlockingMethodPolicy>) -> Self {
        let methods = Arc::new(MethodTable::new());
        let mapper: Arc<dyn MethodInfoMapper> = Arc::clone(&methods) as Arc<dyn MethodInfoMapper>;
        // Stacks are trimmed here, the tree builder sees only kept frames
        let builder = CallGraphBuilder::new(
            &Arc::new(ProfilingSessionStatus::sampled()),
            mapper,
            BuilderConfig::default(),
        );
        Self {
            methods,
            builder,
            filter,
            blocking,
            state: Mutex::new(SamplerState::default()),
        }
    }

    /// Drop every future sample of threads called `name`
    pub fn ignore_thread(&self, name: impl Into<String>) {
        self.lock_state().ignored.insert(name.into());
    }

    #[must_use]
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }

    #[must_use]
    pub fn call_graph(&self) -> &CallGraphBuilder {
        &self.builder
    }

    /// Number of dumps accepted so far
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.lock_state().sample_count
    }

    #[must_use]
    pub fn current_dump_timestamp(&self) -> i64 {
        self.lock_state().current_dump_ts
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SamplerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one stack dump taken at `dump_ts`
    ///
    /// Dumps that are not newer than the last accepted one are ignored.
    /// Threads present in the previous dump but missing from this one are
    /// treated as terminated.
    ///
    /// # Errors
    ///
    /// A sample contradicting a thread's lifecycle rejects the whole dump:
    /// [`SamplingError::ThreadTerminated`] for a thread sampled again after
    /// it terminated, [`SamplingError::InvalidState`] for a thread moving
    /// back to NEW.
    pub fn add_stacktrace(&self, samples: &[ThreadSample], dump_ts: i64) -> Result<(), SamplingError> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if dump_ts <= state.current_dump_ts {
            debug!(
                "Ignoring misplaced stack dump at {dump_ts} (last accepted {})",
                state.current_dump_ts
            );
            return Ok(());
        }

        // Last sample of a thread wins within one dump
        let mut current: BTreeMap<ThreadId, &ThreadSample> = BTreeMap::new();
        for sample in samples {
            if !state.ignored.contains(&sample.name) {
                current.insert(sample.id, sample);
            }
        }
        for sample in current.values() {
            validate(state.last.get(&sample.id).map(|l| l.state), sample)?;
        }

        let timediff = dump_ts - state.current_dump_ts;
        state.current_dump_ts = dump_ts;
        state.first_dump_ts.get_or_insert(dump_ts);

        let mut events = Vec::new();
        let mut next_last = HashMap::with_capacity(current.len());

        for sample in current.values() {
            if sample.state == ThreadState::New {
                debug!("Skipping sample of not yet started thread {}", sample.id);
                continue;
            }
            if state.known_threads.insert(sample.id) {
                events.push(Event::NewThread {
                    thread: sample.id,
                    name: sample.name.clone(),
                    class_name: String::new(),
                });
                state.thread_times.insert(sample.id, sample.cpu_time.unwrap_or(dump_ts));
            }

            let new_state = match sample.frames.first() {
                Some(top)
                    if sample.state == ThreadState::Runnable
                        && self.blocking.is_blocking(&top.class_name, &top.decorated_method_name()) =>
                {
                    ThreadState::Waiting
                }
                _ => sample.state,
            };
            let frames = trim_to_filter(&sample.frames, &self.filter);

            let previous = state.last.get(&sample.id);
            let old_state = previous.map_or(ThreadState::New, |l| l.state);
            let old_frames = previous.map_or(&[][..], |l| l.frames.as_slice());
            let thread_ts = advance_thread_time(&mut state.thread_times, sample.id, old_state, sample.cpu_time, timediff);

            self.push_diff(&mut events, sample.id, old_frames, &frames, [dump_ts, thread_ts]);
            next_last.insert(
                sample.id,
                LastSample {
                    name: sample.name.clone(),
                    state: new_state,
                    frames,
                },
            );
        }

        // Threads that vanished from the dump exit with an empty stack
        let vanished: Vec<(ThreadId, LastSample)> = state
            .last
            .iter()
            .filter(|(id, l)| !current.contains_key(id) && !state.ignored.contains(&l.name))
            .map(|(id, l)| (*id, l.clone()))
            .collect();
        for (id, gone) in vanished {
            debug!("{id} ({}) missing from dump at {dump_ts}; treating as terminated", gone.name);
            let thread_ts = advance_thread_time(&mut state.thread_times, id, gone.state, None, timediff);
            self.push_diff(&mut events, id, &gone.frames, &[], [dump_ts, thread_ts]);
        }

        state.last = next_last;
        state.sample_count += 1;
        drop(guard);

        self.builder.set_dump_timestamp(dump_ts);
        self.builder.apply_all(&events);
        Ok(())
    }

    fn push_diff(
        &self,
        events: &mut Vec<Event>,
        thread: ThreadId,
        old: &[StackFrame],
        new: &[StackFrame],
        ts: [i64; 2],
    ) {
        let diff = diff_stacks(old, new);
        if diff.is_empty() {
            return;
        }

        let n_exits = diff.exits.len();
        for (i, frame) in diff.exits.iter().enumerate() {
            let kind = if diff.exits_root && i + 1 == n_exits {
                MethodType::Root
            } else {
                MethodType::Normal
            };
            events.push(Event::MethodExit {
                method: self.method_id(frame),
                thread,
                kind,
                ts0: ts[0],
                ts1: ts[1],
            });
        }
        for (i, frame) in diff.entries_root_first().enumerate() {
            let kind = if diff.entries_root && i == 0 {
                MethodType::Root
            } else {
                MethodType::Normal
            };
            events.push(Event::MethodEntry {
                method: self.method_id(frame),
                thread,
                kind,
                ts0: ts[0],
                ts1: ts[1],
                params: Vec::new(),
            });
        }
    }

    fn method_id(&self, frame: &StackFrame) -> MethodId {
        let (_, signature) = frame.name_and_signature();
        self.methods.register(MethodInfo::new(
            frame.class_name.as_str(),
            frame.decorated_method_name(),
            signature,
        ))
    }

    /// Snapshot of everything sampled so far, covering `since` up to the
    /// latest dump. Frames still on the stacks are charged up to that dump.
    ///
    /// # Errors
    ///
    /// [`NoDataAvailable`] before the first accepted dump or when no thread
    /// produced any frames.
    pub fn create_snapshot(&self, since: i64) -> Result<CpuResultsSnapshot, NoDataAvailable> {
        let (count, dump_ts, thread_clocks) = {
            let state = self.lock_state();
            (state.sample_count, state.current_dump_ts, state.thread_times.clone())
        };
        if count == 0 {
            return Err(NoDataAvailable);
        }
        let containers = self.builder.create_presentation_ccts_at(Some(dump_ts), &thread_clocks);
        info!(
            "Sampled snapshot: {count} dumps, {} threads, {} methods",
            containers.len(),
            self.methods.len()
        );
        CpuResultsSnapshot::new(since, dump_ts, containers)
    }

    /// Timestamp of the first accepted dump
    #[must_use]
    pub fn first_dump_timestamp(&self) -> Option<i64> {
        self.lock_state().first_dump_ts
    }

    /// Forget all samples; ignored thread names and method ids are kept.
    /// Returns false (and keeps everything) while results are being read.
    pub fn reset(&self) -> bool {
        let mut state = self.lock_state();
        if !self.builder.reset() {
            warn!("Sampler reset skipped: results are being read");
            return false;
        }
        let ignored = std::mem::take(&mut state.ignored);
        *state = SamplerState {
            ignored,
            ..SamplerState::default()
        };
        true
    }
}

fn validate(old_state: Option<ThreadState>, sample: &ThreadSample) -> Result<(), SamplingError> {
    match (old_state, sample.state) {
        (Some(ThreadState::Terminated), new) if new != ThreadState::Terminated => {
            Err(SamplingError::ThreadTerminated(sample.id))
        }
        (Some(old), ThreadState::New) if old != ThreadState::New => Err(SamplingError::InvalidState {
            thread: sample.id,
            state: ThreadState::New.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Thread clock for this dump
fn advance_thread_time(
    times: &mut HashMap<ThreadId, i64>,
    thread: ThreadId,
    old_state: ThreadState,
    cpu_time: Option<i64>,
    timediff: i64,
) -> i64 {
    let time = times.entry(thread).or_insert(0);
    match cpu_time {
        Some(cpu) => *time = cpu.max(*time),
        None if old_state == ThreadState::Runnable => *time += timediff,
        None => {}
    }
    *time
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cct::presentation::{CctTree, PrestimeNode};
    use crate::domain::{TimerDomain, View};

    fn frames(names: &[&str]) -> Vec<StackFrame> {
        // Given root first for readability, stored leaf first
        names.iter().rev().map(|n| StackFrame::new("app.Main", *n)).collect()
    }

    fn sample(id: u32, state: ThreadState, stack: &[&str]) -> ThreadSample {
        ThreadSample {
            id: ThreadId(id),
            name: format!("thread-{id}"),
            state,
            frames: frames(stack),
            cpu_time: None,
        }
    }

    fn names(frames: &[StackFrame]) -> Vec<&str> {
        frames.iter().map(|f| f.method_name.as_str()).collect()
    }

    #[test]
    fn test_diff_replaces_leaf_only() {
        let old = frames(&["main", "foo", "bar"]);
        let new = frames(&["main", "foo", "baz"]);
        let diff = diff_stacks(&old, &new);
        assert_eq!(names(diff.exits), vec!["bar"]);
        assert_eq!(names(diff.entries), vec!["baz"]);
        assert!(!diff.exits_root);
        assert!(!diff.entries_root);
    }

    #[test]
    fn test_diff_same_method_other_line() {
        let old = vec![
            StackFrame::new("app.Main", "bar"),
            StackFrame::new("app.Main", "foo").at_line(10),
            StackFrame::new("app.Main", "main"),
        ];
        let new = vec![
            StackFrame::new("app.Main", "baz"),
            StackFrame::new("app.Main", "foo").at_line(12),
            StackFrame::new("app.Main", "main"),
        ];
        let diff = diff_stacks(&old, &new);
        assert_eq!(names(diff.exits), vec!["bar"]);
        assert_eq!(names(diff.entries), vec!["baz"]);
    }

    #[test]
    fn test_diff_root_flags() {
        let empty: Vec<StackFrame> = Vec::new();
        let stack = frames(&["main", "foo"]);
        let enter = diff_stacks(&empty, &stack);
        assert!(enter.entries_root);
        let order: Vec<&str> = enter.entries_root_first().map(|f| f.method_name.as_str()).collect();
        assert_eq!(order, vec!["main", "foo"]);
        let leave = diff_stacks(&stack, &empty);
        assert!(leave.exits_root);
        assert_eq!(names(leave.exits), vec!["foo", "main"]);
        assert!(diff_stacks(&stack, &stack).is_empty());
    }

    #[test]
    fn test_trim_keeps_one_callee_frame() {
        let stack = vec![
            StackFrame::new("java.util.HashMap", "hash"),
            StackFrame::new("java.util.HashMap", "put"),
            StackFrame::new("app.Main", "run"),
            StackFrame::new("java.lang.Thread", "run"),
        ];
        let filter = InstrumentationFilter::include(["app.*"]);
        let trimmed = trim_to_filter(&stack, &filter);
        assert_eq!(names(&trimmed), vec!["put", "run", "run"]);
        let none = trim_to_filter(&stack, &InstrumentationFilter::include(["org.*"]));
        assert!(none.is_empty());
    }

    #[test]
    fn test_samples_build_tree() {
        let sampler = StackTraceSnapshotBuilder::default();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main", "foo"])], 1_000)
            .unwrap();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main", "bar"])], 3_000)
            .unwrap();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main", "bar"])], 4_000)
            .unwrap();
        let snapshot = sampler.create_snapshot(0).unwrap();
        let tree = snapshot.container_for_thread(ThreadId(1), View::Method).unwrap();
        let main = tree.root_node().child_named("app.Main.main()").unwrap();
        // 2µs in foo, 1µs in bar so far
        assert_eq!(main.child_named("app.Main.foo()").unwrap().total_time(TimerDomain::Absolute), 2);
        let bar = main.child_named("app.Main.bar()").unwrap();
        assert_eq!(bar.total_time(TimerDomain::Absolute), 1);
        assert_eq!(bar.n_calls(), 1);
        assert_eq!(sampler.sample_count(), 3);
    }

    #[test]
    fn test_misplaced_dump_ignored() {
        let sampler = StackTraceSnapshotBuilder::default();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main"])], 5_000)
            .unwrap();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["other"])], 5_000)
            .unwrap();
        assert_eq!(sampler.sample_count(), 1);
        assert_eq!(sampler.current_dump_timestamp(), 5_000);
    }

    #[test]
    fn test_terminated_thread_rejects_samples() {
        let sampler = StackTraceSnapshotBuilder::default();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main"])], 1_000)
            .unwrap();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Terminated, &[])], 2_000)
            .unwrap();
        let err = sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main"])], 3_000)
            .unwrap_err();
        assert_eq!(err, SamplingError::ThreadTerminated(ThreadId(1)));
        assert_eq!(sampler.sample_count(), 2);
    }

    #[test]
    fn test_back_to_new_rejected_and_new_skipped() {
        let sampler = StackTraceSnapshotBuilder::default();
        sampler
            .add_stacktrace(&[sample(2, ThreadState::New, &["main"])], 1_000)
            .unwrap();
        assert!(sampler.create_snapshot(0).is_err());
        sampler
            .add_stacktrace(&[sample(2, ThreadState::Runnable, &["main"])], 2_000)
            .unwrap();
        let err = sampler
            .add_stacktrace(&[sample(2, ThreadState::New, &[])], 3_000)
            .unwrap_err();
        assert!(matches!(err, SamplingError::InvalidState { .. }));
    }

    #[test]
    fn test_missing_thread_exits_all_frames() {
        let sampler = StackTraceSnapshotBuilder::default();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main", "foo"])], 1_000)
            .unwrap();
        sampler.add_stacktrace(&[], 2_000).unwrap();
        assert_eq!(sampler.call_graph().live_stack(ThreadId(1)).unwrap().len(), 0);
        assert_eq!(sampler.call_graph().integrity_violations(), 0);
        let snapshot = sampler.create_snapshot(0).unwrap();
        assert_eq!(snapshot.n_threads(), 1);
    }

    /// Absolute and CPU time of an `EPoll.wait` frame that is
    /// sampled RUNNABLE twice and then left
    fn blocking_frame_times(blocking: BlockingMethods) -> (i64, i64) {
        let sampler = StackTraceSnapshotBuilder::new(&SamplerConfig {
            blocking_methods: blocking,
            ..SamplerConfig::default()
        });
        let polling = ThreadSample {
            frames: vec![
                StackFrame::new("sun.nio.ch.EPoll", "wait").native(),
                StackFrame::new("app.Main", "main"),
            ],
            ..sample(1, ThreadState::Runnable, &[])
        };
        sampler.add_stacktrace(&[polling.clone()], 1_000).unwrap();
        sampler.add_stacktrace(&[polling], 3_000).unwrap();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main"])], 4_000)
            .unwrap();
        let snapshot = sampler.create_snapshot(0).unwrap();
        let tree = snapshot.container_for_thread(ThreadId(1), View::Method).unwrap();
        assert!(tree.collecting_two_timestamps());
        tree.root_node()
            .find_path(&["app.Main.main()", "sun.nio.ch.EPoll.wait[native]()"])
            .map(|n: PrestimeNode<'_>| (n.total_time(TimerDomain::Absolute), n.total_time(TimerDomain::ThreadCpu)))
            .unwrap()
    }

    #[test]
    fn test_blocking_top_frame_stops_cpu_clock() {
        assert_eq!(blocking_frame_times(BlockingMethods::Known), (3, 0));
        assert_eq!(blocking_frame_times(BlockingMethods::None), (3, 3));
    }

    #[test]
    fn test_open_frame_charged_in_both_domains() {
        let sampler = StackTraceSnapshotBuilder::default();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main", "work"])], 1_000)
            .unwrap();
        sampler
            .add_stacktrace(&[sample(1, ThreadState::Runnable, &["main", "work"])], 3_000)
            .unwrap();
        let snapshot = sampler.create_snapshot(0).unwrap();
        let tree = snapshot.container_for_thread(ThreadId(1), View::Method).unwrap();
        let work = tree
            .root_node()
            .find_path(&["app.Main.main()", "app.Main.work()"])
            .unwrap();
        assert_eq!(work.total_time(TimerDomain::Absolute), 2);
        assert_eq!(work.total_time(TimerDomain::ThreadCpu), 2);
    }

    #[test]
    fn test_frame_signature_and_native_suffix() {
        let plain = StackFrame::new("app.Db", "query|(I)V");
        assert_eq!(plain.name_and_signature(), ("query", "(I)V"));
        assert_eq!(plain.decorated_method_name(), "query");
        let native = StackFrame::new("sun.nio.ch.Net", "poll(java.io.FileDescriptor, int, long) : int").native();
        assert_eq!(
            native.decorated_method_name(),
            "poll[native](java.io.FileDescriptor, int, long) : int"
        );
        let odd = StackFrame::new("app.Db", "|x");
        assert_eq!(odd.name_and_signature(), ("|x", ""));

        let sampler = StackTraceSnapshotBuilder::default();
        let id = sampler.method_id(&plain);
        let info = sampler.methods().method_info(id).unwrap();
        assert_eq!(info.method_name, "query");
        assert_eq!(info.signature, "(I)V");
        assert_eq!(info.display_name(), "app.Db.query(I)V");
    }

    #[test]
    fn test_ignored_thread_and_reset() {
        let sampler = StackTraceSnapshotBuilder::new(&SamplerConfig {
            ignored_threads: vec!["thread-9".to_string()],
            ..SamplerConfig::default()
        });
        sampler
            .add_stacktrace(
                &[
                    sample(1, ThreadState::Runnable, &["main"]),
                    sample(9, ThreadState::Runnable, &["noise"]),
                ],
                1_000,
            )
            .unwrap();
        assert_eq!(sampler.call_graph().thread_count(), 1);
        assert!(sampler.reset());
        assert_eq!(sampler.sample_count(), 0);
        assert!(sampler.create_snapshot(0).is_err());
        sampler
            .add_stacktrace(&[sample(9, ThreadState::Runnable, &["noise"])], 500)
            .unwrap();
        assert_eq!(sampler.sample_count(), 1);
        assert!(sampler.create_snapshot(0).is_err());
    }
}
