//! Typed profiling events
//!
//! Every record of the incoming stream, whether decoded from a binary frame
//! or read from a JSON recording, becomes one [`Event`]. Ordering of events
//! as received is authoritative; sinks must apply them in sequence.

use serde::{Deserialize, Serialize};

use crate::domain::{MethodId, ThreadId};

/// How a method entry/exit participates in the call tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodType {
    #[default]
    Normal,
    /// Outermost instrumented method of a call tree
    Root,
    /// Method that opens a category node
    Marker,
}

/// A captured method argument of a marker entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Parameter {
    Boolean(bool),
    Char(u16),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

/// One decoded profiling event
///
/// `ts0` is always absolute time in timer ticks. `ts1` is thread CPU time
/// and only meaningful when the session collects two timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    MethodEntry {
        method: MethodId,
        thread: ThreadId,
        #[serde(default)]
        kind: MethodType,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Parameter>,
    },
    MethodExit {
        method: MethodId,
        thread: ThreadId,
        #[serde(default)]
        kind: MethodType,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    MethodEntryUnstamped {
        method: MethodId,
        thread: ThreadId,
        #[serde(default)]
        kind: MethodType,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Parameter>,
    },
    MethodExitUnstamped {
        method: MethodId,
        thread: ThreadId,
        #[serde(default)]
        kind: MethodType,
    },
    NewThread {
        thread: ThreadId,
        name: String,
        #[serde(default)]
        class_name: String,
    },
    ServletRequest {
        thread: ThreadId,
        request_type: u8,
        path: String,
        session_id: i32,
    },
    WaitEntry {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    WaitExit {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    SleepEntry {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    SleepExit {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    ParkEntry {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    ParkExit {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    MonitorEntry {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
        #[serde(default)]
        monitor: Option<u32>,
        #[serde(default)]
        owner: Option<u32>,
    },
    MonitorExit {
        thread: ThreadId,
        ts0: i64,
        #[serde(default)]
        ts1: i64,
        #[serde(default)]
        monitor: Option<u32>,
    },
    ThreadsSuspended {
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    ThreadsResumed {
        ts0: i64,
        #[serde(default)]
        ts1: i64,
    },
    AdjustTime {
        thread: ThreadId,
        diff0: i64,
        #[serde(default)]
        diff1: i64,
    },
    Reset,
    ProfilingPointHit {
        point: u16,
        thread: ThreadId,
        timestamp: i64,
    },
}

impl Event {
    /// Thread the event is tagged with, if it is thread-specific
    #[must_use]
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            Event::MethodEntry { thread, .. }
            | Event::MethodExit { thread, .. }
            | Event::MethodEntryUnstamped { thread, .. }
            | Event::MethodExitUnstamped { thread, .. }
            | Event::NewThread { thread, .. }
            | Event::ServletRequest { thread, .. }
            | Event::WaitEntry { thread, .. }
            | Event::WaitExit { thread, .. }
            | Event::SleepEntry { thread, .. }
            | Event::SleepExit { thread, .. }
            | Event::ParkEntry { thread, .. }
            | Event::ParkExit { thread, .. }
            | Event::MonitorEntry { thread, .. }
            | Event::MonitorExit { thread, .. }
            | Event::AdjustTime { thread, .. }
            | Event::ProfilingPointHit { thread, .. } => Some(*thread),
            Event::ThreadsSuspended { .. } | Event::ThreadsResumed { .. } | Event::Reset => None,
        }
    }

    /// Short name used in logs and per-kind counters
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::MethodEntry { .. } => "method_entry",
            Event::MethodExit { .. } => "method_exit",
            Event::MethodEntryUnstamped { .. } => "method_entry_unstamped",
            Event::MethodExitUnstamped { .. } => "method_exit_unstamped",
            Event::NewThread { .. } => "new_thread",
            Event::ServletRequest { .. } => "servlet_request",
            Event::WaitEntry { .. } => "wait_entry",
            Event::WaitExit { .. } => "wait_exit",
            Event::SleepEntry { .. } => "sleep_entry",
            Event::SleepExit { .. } => "sleep_exit",
            Event::ParkEntry { .. } => "park_entry",
            Event::ParkExit { .. } => "park_exit",
            Event::MonitorEntry { .. } => "monitor_entry",
            Event::MonitorExit { .. } => "monitor_exit",
            Event::ThreadsSuspended { .. } => "threads_suspended",
            Event::ThreadsResumed { .. } => "threads_resumed",
            Event::AdjustTime { .. } => "adjust_time",
            Event::Reset => "reset",
            Event::ProfilingPointHit { .. } => "profiling_point_hit",
        }
    }

    /// Absolute timestamp carried by the event, if any
    #[must_use]
    pub fn absolute_timestamp(&self) -> Option<i64> {
        match self {
            Event::MethodEntry { ts0, .. }
            | Event::MethodExit { ts0, .. }
            | Event::WaitEntry { ts0, .. }
            | Event::WaitExit { ts0, .. }
            | Event::SleepEntry { ts0, .. }
            | Event::SleepExit { ts0, .. }
            | Event::ParkEntry { ts0, .. }
            | Event::ParkExit { ts0, .. }
            | Event::MonitorEntry { ts0, .. }
            | Event::MonitorExit { ts0, .. }
            | Event::ThreadsSuspended { ts0, .. }
            | Event::ThreadsResumed { ts0, .. } => Some(*ts0),
            Event::ProfilingPointHit { timestamp, .. } => Some(*timestamp),
            _ => None,
        }
    }
}

/// Consumer of an ordered event stream
///
/// Implementations use interior locking so a sink can be shared between the
/// decode thread and result readers.
pub trait ProfilingEventSink: Send + Sync {
    fn apply(&self, event: &Event);

    /// Apply a batch decoded from one frame
    fn apply_all(&self, events: &[Event]) {
        for event in events {
            self.apply(event);
        }
    }
}
