//! # Shared Wire Constants (Agent ↔ Engine)
//!
//! Defines the tag bytes and layout constants of the CPU event frame format
//! shared between the in-process agent that records events and the
//! `callscope` engine that decodes them.
//!
//! ## Frame Layout
//!
//! A frame is a flat sequence of records. Each record starts with one tag
//! byte; the tag alone determines the shape of the rest of the record:
//!
//! ```text
//! ┌─────┬───────────┬──────────────┬──────────────┐
//! │ tag │ method id │ timestamp 0  │ timestamp 1  │   stamped method events
//! │ u8  │ u16 BE    │ 7 bytes BE   │ 7 bytes BE   │   (ts1 only when two
//! └─────┴───────────┴──────────────┴──────────────┘    timestamps are collected)
//!
//! ┌───────────────────────┐
//! │ 1x mmmmmm mmmmmmmm    │   compact unstamped entry (10) / exit (11)
//! └───────────────────────┘
//! ```
//!
//! Strings are a `u16` big-endian byte length followed by UTF-8 bytes.
//!
//! ## Key Groups
//!
//! - Method events: root, marker and normal entry/exit (stamped or not)
//! - Blocking transitions: wait, sleep, park, monitor
//! - Session control: thread suspend/resume, reset, time adjustment
//! - Thread and context metadata: new thread, following-events thread,
//!   servlet request, marker parameters, profiling point hits

#![cfg_attr(not(test), no_std)]

// ============================================================================
// Method Event Tags
// ============================================================================

/// **Root Method Entry**: first instrumented method of a call tree
///
/// Layout: method id, ts0, [ts1]
pub const ROOT_ENTRY: u8 = 1;

/// **Root Method Exit**: paired with `ROOT_ENTRY`
pub const ROOT_EXIT: u8 = 2;

/// **Marker Method Entry**: method that opens a category node
///
/// Layout: method id, ts0, [ts1]
pub const MARKER_ENTRY: u8 = 3;

/// **Marker Method Exit**: paired with `MARKER_ENTRY`
pub const MARKER_EXIT: u8 = 4;

/// **Time Adjustment**: shift the current thread's clocks
///
/// Layout: diff0, [diff1]
pub const ADJUST_TIME: u8 = 5;

/// **Method Entry**: ordinary instrumented method
///
/// Layout: method id, ts0, [ts1]
pub const METHOD_ENTRY: u8 = 6;

/// **Method Exit**: paired with `METHOD_ENTRY`
pub const METHOD_EXIT: u8 = 7;

// ============================================================================
// Session Control Tags
// ============================================================================

/// **All Threads Suspended**: the target stopped every thread
///
/// Layout: ts0, [ts1]
pub const THREADS_SUSPENDED: u8 = 8;

/// **All Threads Resumed**: paired with `THREADS_SUSPENDED`
pub const THREADS_RESUMED: u8 = 9;

/// **Reset Collectors**: discard every live tree
///
/// Layout: tag only
pub const RESET_COLLECTORS: u8 = 10;

/// **New Thread**: registers a thread and makes it current
///
/// Layout: thread id (u16), name (string), class name (string)
pub const NEW_THREAD: u8 = 11;

/// **Following Events Thread**: selects the thread for subsequent records
///
/// Layout: thread id (u16)
pub const SET_FOLLOWING_EVENTS_THREAD: u8 = 13;

// ============================================================================
// Unstamped Method Event Tags
// ============================================================================

/// **Unstamped Method Entry**: entry without timestamps
///
/// Layout: method id
pub const METHOD_ENTRY_UNSTAMPED: u8 = 16;

/// **Unstamped Method Exit**
pub const METHOD_EXIT_UNSTAMPED: u8 = 17;

/// **Unstamped Marker Entry**
pub const MARKER_ENTRY_UNSTAMPED: u8 = 18;

/// **Unstamped Marker Exit**
pub const MARKER_EXIT_UNSTAMPED: u8 = 19;

// ============================================================================
// Blocking Transition Tags
// ============================================================================

/// **Wait Entry**: current thread called a wait primitive
///
/// Layout: ts0 only (never carries ts1)
pub const WAIT_ENTRY: u8 = 20;

/// **Wait Exit**
pub const WAIT_EXIT: u8 = 21;

/// **Monitor Entry**: current thread blocked on a contended monitor
///
/// Layout: ts0, then monitor hash (u32) and owner thread id (u32) when
/// monitor info is enabled for the session
pub const MONITOR_ENTRY: u8 = 22;

/// **Monitor Exit**
///
/// Layout: ts0, then monitor hash (u32) when monitor info is enabled
pub const MONITOR_EXIT: u8 = 23;

/// **Sleep Entry**
///
/// Layout: ts0 only
pub const SLEEP_ENTRY: u8 = 24;

/// **Sleep Exit**
pub const SLEEP_EXIT: u8 = 25;

/// **Park Entry**: accounted as wait time
///
/// Layout: ts0 only
pub const PARK_ENTRY: u8 = 26;

/// **Park Exit**
pub const PARK_EXIT: u8 = 27;

// ============================================================================
// Context Tags
// ============================================================================

/// **Profiling Point Hit**
///
/// Layout: point id (u16), timestamp (7 bytes), thread id (u16)
pub const PROFILEPOINT_HIT: u8 = 29;

/// **Servlet Request**: opens a request boundary node
///
/// Layout: request type (u8), path (string), session id (i32)
pub const SERVLET_DO_METHOD: u8 = 30;

/// **Marker Parameters**: captured arguments of the next marker entry
///
/// Layout: count (u8), then `count` typed parameters
pub const MARKER_ENTRY_PARAMETERS: u8 = 35;

// ============================================================================
// Compact Format
// ============================================================================

/// Tag bit that marks a two-byte compact unstamped entry/exit record
pub const COMPACT_EVENT_FORMAT_BYTE_MASK: u8 = 0x80;

/// High bits of a compact unstamped exit record
pub const METHOD_EXIT_COMPACT_BYTE_MASK: u8 = 0xC0;

/// Method id bits of a compact record (after joining both bytes)
pub const COMPACT_EVENT_METHOD_ID_MASK: u16 = 0x3FFF;

/// Width of an encoded timestamp in bytes (56-bit big-endian)
pub const TIMESTAMP_BYTES: usize = 7;

// ============================================================================
// Parameter Type Codes
// ============================================================================

/// Boolean parameter (one byte, 0 or 1)
pub const PARAM_BOOLEAN: u8 = b'Z';
/// UTF-16 code unit parameter (u16)
pub const PARAM_CHAR: u8 = b'C';
/// Byte parameter
pub const PARAM_BYTE: u8 = b'B';
/// Short parameter (i16)
pub const PARAM_SHORT: u8 = b'S';
/// Int parameter (i32)
pub const PARAM_INT: u8 = b'I';
/// Long parameter (i64)
pub const PARAM_LONG: u8 = b'J';
/// Float parameter (IEEE-754 bits in a u32)
pub const PARAM_FLOAT: u8 = b'F';
/// Double parameter (IEEE-754 bits in a u64)
pub const PARAM_DOUBLE: u8 = b'D';
/// String parameter: byte length (u16) then UTF-16BE code units
pub const PARAM_REFERENCE: u8 = b'L';

/// Returns true if `tag` starts a compact two-byte record
#[must_use]
pub const fn is_compact(tag: u8) -> bool {
    tag & COMPACT_EVENT_FORMAT_BYTE_MASK != 0
}

/// Returns true if a compact record starting with `tag` is an exit
#[must_use]
pub const fn is_compact_exit(tag: u8) -> bool {
    tag & METHOD_EXIT_COMPACT_BYTE_MASK == METHOD_EXIT_COMPACT_BYTE_MASK
}

/// Returns true for stamped method records that may carry a second
/// (thread CPU) timestamp
#[must_use]
pub const fn carries_method_timestamps(tag: u8) -> bool {
    matches!(
        tag,
        ROOT_ENTRY | ROOT_EXIT | MARKER_ENTRY | MARKER_EXIT | METHOD_ENTRY | METHOD_EXIT
    )
}
