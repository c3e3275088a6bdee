//! Per-thread simulated call stacks and the registry that holds them.
//!
//! ## Locking
//!
//! ```text
//! ThreadInfos ── RwLock<Registry> ─────────── transaction gate
//!                   │  write: builder batches, growth, reset
//!                   │  read:  snapshotting, flat profiles
//!                   ▼
//!               Vec<Option<Arc<Mutex<ThreadInfo>>>>   indexed by thread id
//!                                  │
//!                                  └── per-thread stack lock (live peeks)
//! ```
//!
//! A reset is best effort: if any reader holds the gate the reset is skipped
//! rather than queued.

use log::debug;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cct::node::{LiveTree, NodeKind, NodeRef};
use crate::domain::ThreadId;
use crate::profiling::methods::MethodInfoMapper;

/// Simulated call stack plus time bookkeeping of one thread
#[derive(Debug)]
pub struct ThreadInfo {
    pub thread_id: ThreadId,
    pub name: String,
    pub class_name: String,
    pub tree: LiveTree,
    /// Thread pseudo-root; created on the first root-level entry
    thread_root: Option<NodeRef>,
    /// Active frames above the thread root, innermost last
    stack: Vec<NodeRef>,
    /// Nesting counter of root methods currently on the stack
    pub in_root_depth: u32,
    /// Method invocations pushed since the last reset
    pub total_invocations: u64,
    /// True while the stack is non-empty and was opened with a timestamp
    pub gross_window_open: bool,
    pub root_gross_time_abs: i64,
    pub root_gross_time_cpu: i64,
    pub root_method_entry_time_abs: i64,
    pub root_method_entry_time_cpu: i64,
    /// When the current top frame last started accumulating self time
    pub top_method_entry_time: [i64; 2],
    /// Ticks charged to the top frame for a snapshot; undone afterwards
    pub(crate) open_frame_charge: Option<(NodeRef, [i64; 2])>,
}

impl ThreadInfo {
    #[must_use]
    pub fn new(thread_id: ThreadId, name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            thread_id,
            name: name.into(),
            class_name: class_name.into(),
            tree: LiveTree::new(),
            thread_root: None,
            stack: Vec::new(),
            in_root_depth: 0,
            total_invocations: 0,
            gross_window_open: false,
            root_gross_time_abs: 0,
            root_gross_time_cpu: 0,
            root_method_entry_time_abs: 0,
            root_method_entry_time_cpu: 0,
            top_method_entry_time: [0; 2],
            open_frame_charge: None,
        }
    }

    /// Innermost active frame
    #[must_use]
    pub fn peek(&self) -> Option<NodeRef> {
        self.stack.last().copied()
    }

    /// Frame just below the top
    #[must_use]
    pub fn peek_below(&self) -> Option<NodeRef> {
        self.stack.len().checked_sub(2).map(|i| self.stack[i])
    }

    /// Activate `node`, counting one invocation of it
    pub fn push(&mut self, node: NodeRef) {
        let live = self.tree.node_mut(node);
        live.n_calls += 1;
        if live.kind.is_method() {
            self.total_invocations += 1;
        }
        self.stack.push(node);
    }

    pub fn pop(&mut self) -> Option<NodeRef> {
        self.stack.pop()
    }

    #[must_use]
    pub fn stack(&self) -> &[NodeRef] {
        &self.stack
    }

    #[must_use]
    pub fn is_stack_empty(&self) -> bool {
        self.stack.is_empty()
    }

    #[must_use]
    pub fn is_in_root(&self) -> bool {
        self.in_root_depth > 0
    }

    /// Thread pseudo-root, if anything ever ran on this thread
    #[must_use]
    pub fn thread_root(&self) -> Option<NodeRef> {
        self.thread_root
    }

    /// Thread pseudo-root, created on demand
    pub fn ensure_thread_root(&mut self) -> NodeRef {
        match self.thread_root {
            Some(root) => root,
            None => {
                let root = self.tree.add_root(NodeKind::Thread);
                self.thread_root = Some(root);
                root
            }
        }
    }

    #[must_use]
    pub fn total_nodes(&self) -> usize {
        self.tree.len()
    }

    /// Number of times a root-level call tree was opened on this thread
    #[must_use]
    pub fn root_invocations(&self) -> u64 {
        self.thread_root
            .map_or(0, |r| u64::from(self.tree.node(r).n_calls))
    }

    /// Discard the tree and stack; name and class are kept
    pub fn reset(&mut self) {
        let (id, name, class_name) = (
            self.thread_id,
            std::mem::take(&mut self.name),
            std::mem::take(&mut self.class_name),
        );
        *self = Self::new(id, name, class_name);
    }

    /// Human-readable stack for integrity diagnostics, innermost first
    #[must_use]
    pub fn dump_stack(&self, mapper: &dyn MethodInfoMapper) -> String {
        let mut out = format!("*** Stack of {} ({}):\n", self.thread_id, self.name);
        for node in self.stack.iter().rev() {
            let line = match &self.tree.node(*node).kind {
                NodeKind::Method(id) => mapper.method_name(*id),
                NodeKind::Category(mark) => format!("[category {mark}]"),
                NodeKind::Servlet { path, .. } => format!("[servlet {path}]"),
                NodeKind::Thread => "[thread]".to_string(),
            };
            let _ = writeln!(out, "    {line}");
        }
        out
    }
}

/// Thread ids below this bound index the dense table directly
pub const DENSE_THREAD_SLOTS: usize = 1 << 16;

/// Slots of the registry, indexed by thread id. Ids from sources that hand
/// out large values (JVM thread ids in sampled dumps) go to a sparse map.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<Option<Arc<Mutex<ThreadInfo>>>>,
    sparse: BTreeMap<ThreadId, Arc<Mutex<ThreadInfo>>>,
}

fn new_record(thread: ThreadId) -> Arc<Mutex<ThreadInfo>> {
    Arc::new(Mutex::new(ThreadInfo::new(
        thread,
        format!("Thread-{}", thread.0),
        String::new(),
    )))
}

impl Registry {
    #[must_use]
    pub fn get(&self, thread: ThreadId) -> Option<Arc<Mutex<ThreadInfo>>> {
        let idx = thread.index();
        if idx < DENSE_THREAD_SLOTS {
            self.slots.get(idx).cloned().flatten()
        } else {
            self.sparse.get(&thread).cloned()
        }
    }

    /// Existing record or a new unnamed one; grows the dense table up to
    /// [`DENSE_THREAD_SLOTS`]
    pub fn get_or_create(&mut self, thread: ThreadId) -> Arc<Mutex<ThreadInfo>> {
        let idx = thread.index();
        if idx >= DENSE_THREAD_SLOTS {
            let record = self.sparse.entry(thread).or_insert_with(|| {
                debug!("{thread} is beyond the dense thread table; stored sparsely");
                new_record(thread)
            });
            return Arc::clone(record);
        }
        if self.slots.len() <= idx {
            self.slots.resize(idx + 1, None);
        }
        Arc::clone(self.slots[idx].get_or_insert_with(|| new_record(thread)))
    }

    /// Every registered thread in id order
    pub fn threads(&self) -> impl Iterator<Item = &Arc<Mutex<ThreadInfo>>> {
        self.slots.iter().flatten().chain(self.sparse.values())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn reset_all(&mut self) {
        for slot in self.slots.iter().flatten() {
            lock_thread(slot).reset();
        }
    }
}

/// Registry of all profiled threads behind the transaction gate
#[derive(Debug, Default)]
pub struct ThreadInfos {
    registry: RwLock<Registry>,
}

impl ThreadInfos {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared transaction: tree walks that must not see a reset
    pub fn begin_read_transaction(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive transaction: event application and table growth
    pub fn begin_write_transaction(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle to one thread's record; the record can then be locked
    /// without holding the registry gate
    #[must_use]
    pub fn thread(&self, thread: ThreadId) -> Option<Arc<Mutex<ThreadInfo>>> {
        self.begin_read_transaction().get(thread)
    }

    /// Best-effort reset. Returns false (and does nothing) if a
    /// transaction is open.
    pub fn try_reset(&self) -> bool {
        match self.registry.try_write() {
            Ok(mut registry) => {
                registry.reset_all();
                true
            }
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().reset_all();
                true
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                debug!("Reset skipped: thread registry is in use");
                false
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.begin_read_transaction().is_empty()
    }
}

/// Lock a thread record, recovering from poisoning
pub fn lock_thread(info: &Mutex<ThreadInfo>) -> std::sync::MutexGuard<'_, ThreadInfo> {
    info.lock().unwrap_or_else(PoisonError::into_inner)
}
