//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep thread ids, method ids and marker tags from
//! being mixed up in the builder and view signatures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Profiled thread id
///
/// Assigned by the agent, small and dense. Used as the index into the
/// thread registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Registry slot for this thread
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread#{}", self.0)
    }
}

/// Instrumented method id
///
/// Id 0 is reserved for the thread pseudo-method that roots every
/// per-thread tree; method tables hand out ids starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub u32);

impl MethodId {
    /// The thread pseudo-method
    pub const THREAD: MethodId = MethodId(0);

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M#{}", self.0)
    }
}

/// Category tag attached to marker methods (e.g. a JDBC boundary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mark(pub u16);

impl Mark {
    /// Untagged calls; no category node is created for it
    pub const DEFAULT: Mark = Mark(0);

    #[must_use]
    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mark:{}", self.0)
    }
}

/// Which of the two clocks a time value was read from
///
/// `Absolute` is wall-clock time (ts0), `ThreadCpu` is per-thread CPU time
/// (ts1, only present when the session collects two timestamps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerDomain {
    #[default]
    Absolute,
    ThreadCpu,
}

impl TimerDomain {
    /// Column index used by the two-element per-domain arrays
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            TimerDomain::Absolute => 0,
            TimerDomain::ThreadCpu => 1,
        }
    }
}

/// Aggregation level of a presentation tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Method,
    Class,
    Package,
}

impl View {
    pub const ALL: [View; 3] = [View::Method, View::Class, View::Package];

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            View::Method => 0,
            View::Class => 1,
            View::Package => 2,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            View::Method => "method",
            View::Class => "class",
            View::Package => "package",
        };
        f.write_str(name)
    }
}
