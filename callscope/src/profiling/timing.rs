//! Timer-tick conversion and instrumentation overhead cleansing.
//!
//! Raw times in the live tree are timer ticks and include the cost of the
//! injected entry/exit hooks. The [`TimingAdjuster`] converts ticks into
//! microseconds and subtracts an estimate of that cost, derived from the
//! calibration constants of a [`ProfilingSessionStatus`].
//!
//! # Cleansing model
//!
//! ```text
//! delta(in, out)    = inner * in + outer * out          (instrumented)
//! delta(in, _)      = call * in                         (sampled)
//! adjust(t, in, out) = max(0, (t - delta(in, out)) * 1e6 / ticks_per_second)
//! ```
//!
//! `in` counts invocations of the node itself, `out` counts calls made from
//! it. Without calibration data the delta is zero and times pass through
//! unchanged apart from the unit conversion.

// Tick arithmetic converts between i64 counters and f64 rates
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::TimerDomain;

/// Default tick rate: nanosecond timers
pub const DEFAULT_TIMER_COUNTS_IN_SECOND: i64 = 1_000_000_000;

/// Session parameters that affect time accounting
///
/// Deserialized from the header line of a recording; the host may also
/// build one directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingSessionStatus {
    /// Ticks per second for the absolute and thread CPU timers
    pub timer_counts_in_second: [i64; 2],
    /// Calibrated cost of a full entry+exit hook pair, per domain
    pub method_entry_exit_call_time: [f64; 2],
    /// Part of the hook cost charged to the callee, per domain
    pub method_entry_exit_inner_time: [f64; 2],
    /// Part of the hook cost charged to the caller, per domain
    pub method_entry_exit_outer_time: [f64; 2],
    /// Whether events carry a thread CPU timestamp (ts1)
    pub collecting_two_timestamps: bool,
    /// Sampled session: fixed per-sample overhead instead of per-call
    pub sampling: bool,
    /// Monitor records carry monitor hash and owner thread
    pub monitor_info: bool,
    /// False when no calibration run happened; cleansing is then disabled
    pub calibrated: bool,
}

impl Default for ProfilingSessionStatus {
    fn default() -> Self {
        Self {
            timer_counts_in_second: [DEFAULT_TIMER_COUNTS_IN_SECOND; 2],
            method_entry_exit_call_time: [0.0; 2],
            method_entry_exit_inner_time: [0.0; 2],
            method_entry_exit_outer_time: [0.0; 2],
            collecting_two_timestamps: false,
            sampling: false,
            monitor_info: false,
            calibrated: false,
        }
    }
}

impl ProfilingSessionStatus {
    /// Status used by stack-sampling sessions: both clocks in nanoseconds,
    /// two timestamps, no hook overhead
    #[must_use]
    pub fn sampled() -> Self {
        Self {
            collecting_two_timestamps: true,
            sampling: true,
            ..Self::default()
        }
    }
}

/// Calibration constants resolved from a session status
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InstrTimingData {
    pub timer_counts_in_second: [f64; 2],
    pub method_entry_exit_call_time: [f64; 2],
    pub method_entry_exit_inner_time: [f64; 2],
    pub method_entry_exit_outer_time: [f64; 2],
}

impl InstrTimingData {
    fn from_status(status: &ProfilingSessionStatus) -> Self {
        let counts = status
            .timer_counts_in_second
            .map(|c| if c > 0 { c as f64 } else { DEFAULT_TIMER_COUNTS_IN_SECOND as f64 });

        if !status.calibrated {
            return Self {
                timer_counts_in_second: counts,
                ..Self::default()
            };
        }

        if status.sampling {
            // One sample costs one hook call; callers are not charged separately
            return Self {
                timer_counts_in_second: counts,
                method_entry_exit_call_time: status.method_entry_exit_call_time,
                method_entry_exit_inner_time: status.method_entry_exit_call_time,
                method_entry_exit_outer_time: [0.0; 2],
            };
        }

        Self {
            timer_counts_in_second: counts,
            method_entry_exit_call_time: status.method_entry_exit_call_time,
            method_entry_exit_inner_time: status.method_entry_exit_inner_time,
            method_entry_exit_outer_time: status.method_entry_exit_outer_time,
        }
    }
}

/// Converts raw ticks to cleansed microseconds
///
/// Owned by the call-graph builder and shared read-only with containers.
/// Recomputed only when the session status reference changes.
#[derive(Debug, Clone)]
pub struct TimingAdjuster {
    status: Arc<ProfilingSessionStatus>,
    data: InstrTimingData,
}

impl TimingAdjuster {
    #[must_use]
    pub fn new(status: &Arc<ProfilingSessionStatus>) -> Self {
        Self {
            status: Arc::clone(status),
            data: InstrTimingData::from_status(status),
        }
    }

    /// Adjuster that only converts units (nanosecond ticks, no cleansing)
    #[must_use]
    pub fn uncalibrated() -> Self {
        Self::new(&Arc::new(ProfilingSessionStatus::default()))
    }

    /// Re-derive calibration if `status` is a different object.
    ///
    /// Returns true if the calibration was recomputed.
    pub fn refresh(&mut self, status: &Arc<ProfilingSessionStatus>) -> bool {
        if Arc::ptr_eq(&self.status, status) {
            return false;
        }
        *self = Self::new(status);
        true
    }

    #[must_use]
    pub fn status(&self) -> &Arc<ProfilingSessionStatus> {
        &self.status
    }

    #[must_use]
    pub fn timing_data(&self) -> &InstrTimingData {
        &self.data
    }

    #[must_use]
    pub fn collecting_two_timestamps(&self) -> bool {
        self.status.collecting_two_timestamps
    }

    /// Estimated hook time, in ticks, for `incoming` invocations making
    /// `outgoing` calls. Never negative.
    #[must_use]
    pub fn delta(&self, incoming: u64, outgoing: u64, domain: TimerDomain) -> f64 {
        let d = domain.index();
        let inner = self.data.method_entry_exit_inner_time[d];
        let outer = self.data.method_entry_exit_outer_time[d];
        let delta = inner * incoming as f64 + outer * outgoing as f64;
        if delta.is_finite() && delta > 0.0 {
            delta
        } else {
            0.0
        }
    }

    /// Cleansed time in microseconds, clamped at zero
    #[must_use]
    pub fn adjust_time(&self, ticks: i64, incoming: u64, outgoing: u64, domain: TimerDomain) -> i64 {
        let cleansed = ticks as f64 - self.delta(incoming, outgoing, domain);
        let micros = cleansed * 1_000_000.0 / self.data.timer_counts_in_second[domain.index()];
        if micros > 0.0 {
            micros as i64
        } else {
            0
        }
    }

    /// Plain unit conversion, no cleansing
    #[must_use]
    pub fn ticks_to_micros(&self, ticks: f64, domain: TimerDomain) -> i64 {
        (ticks * 1_000_000.0 / self.data.timer_counts_in_second[domain.index()]) as i64
    }

    #[must_use]
    pub fn ticks_to_seconds(&self, ticks: f64, domain: TimerDomain) -> f64 {
        ticks / self.data.timer_counts_in_second[domain.index()]
    }

    #[must_use]
    pub fn ticks_to_millis(&self, ticks: f64, domain: TimerDomain) -> i64 {
        (ticks * 1_000.0 / self.data.timer_counts_in_second[domain.index()]) as i64
    }

    /// Convert a tick amount from the absolute clock rate to the CPU clock rate
    #[must_use]
    pub fn absolute_to_cpu_ticks(&self, ticks: f64) -> f64 {
        ticks * self.data.timer_counts_in_second[1] / self.data.timer_counts_in_second[0]
    }
}

impl Default for TimingAdjuster {
    fn default() -> Self {
        Self::uncalibrated()
    }
}
