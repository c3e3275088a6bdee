//! # Event Processing
//!
//! Decodes binary event frames and routes the resulting events to a
//! [`ProfilingEventSink`].
//!
//! ## Frame decoding
//!
//! - Compact records (`1x......`) → unstamped entry/exit of the current thread
//! - `NEW_THREAD` / `SET_FOLLOWING_EVENTS_THREAD` → switch the current thread
//! - `MARKER_ENTRY_PARAMETERS` → held until that thread's next marker entry
//! - Everything else → one [`Event`] tagged with the current thread
//!
//! The current thread and pending parameters survive across frames; a frame
//! may start in the middle of a thread's event run.
//!
//! ## Errors
//!
//! An unknown tag stops decoding of the frame: the events before it are kept.
//! A record cut short by the end of the frame is a [`DecodeError`]; events
//! decoded before it are still delivered.

use callscope_common as wire;
use log::{debug, error};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use super::events::{Event, MethodType, Parameter, ProfilingEventSink};
use super::timing::ProfilingSessionStatus;
use crate::domain::{DecodeError, MethodId, ThreadId};

/// Bytes shown on each side of a failing offset in diagnostics
const HEX_DUMP_CONTEXT: usize = 16;

// ============================================================================
// Byte cursor
// ============================================================================

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: n,
                len: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// 56-bit big-endian timestamp
    fn read_timestamp(&mut self) -> Result<i64, DecodeError> {
        let b = self.take(wire::TIMESTAMP_BYTES)?;
        Ok(b.iter().fold(0i64, |acc, byte| (acc << 8) | i64::from(*byte)))
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = usize::from(self.read_u16()?);
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString { offset })
    }

    /// Byte length followed by UTF-16BE code units
    fn read_utf16_string(&mut self) -> Result<String, DecodeError> {
        let len = usize::from(self.read_u16()?);
        let offset = self.pos;
        let bytes = self.take(len)?;
        if len % 2 != 0 {
            return Err(DecodeError::InvalidString { offset });
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| DecodeError::InvalidString { offset })
    }
}

/// Hex bytes of `data` around `offset`, the byte at `offset` bracketed
fn hex_dump(data: &[u8], offset: usize) -> String {
    let start = offset.saturating_sub(HEX_DUMP_CONTEXT);
    let end = (offset + HEX_DUMP_CONTEXT).min(data.len());
    let mut out = format!("@{start}:");
    for (i, byte) in data[start..end].iter().enumerate() {
        if start + i == offset {
            let _ = write!(out, " [{byte:02x}]");
        } else {
            let _ = write!(out, " {byte:02x}");
        }
    }
    out
}

// ============================================================================
// Frame decoder
// ============================================================================

/// Stateful decoder of binary event frames
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    collecting_two_timestamps: bool,
    monitor_info: bool,
    current_thread: ThreadId,
    pending_params: HashMap<ThreadId, Vec<Parameter>>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(status: &ProfilingSessionStatus) -> Self {
        Self {
            collecting_two_timestamps: status.collecting_two_timestamps,
            monitor_info: status.monitor_info,
            current_thread: ThreadId(0),
            pending_params: HashMap::new(),
        }
    }

    /// Pick up changed timestamp or monitor settings
    pub fn set_session_status(&mut self, status: &ProfilingSessionStatus) {
        self.collecting_two_timestamps = status.collecting_two_timestamps;
        self.monitor_info = status.monitor_info;
    }

    #[must_use]
    pub fn current_thread(&self) -> ThreadId {
        self.current_thread
    }

    /// Decode a whole frame
    ///
    /// # Errors
    ///
    /// Returns the [`DecodeError`] of a malformed record; use
    /// [`decode_into`](Self::decode_into) to keep the events before it.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<Event>, DecodeError> {
        let mut events = Vec::new();
        self.decode_into(frame, &mut events)?;
        Ok(events)
    }

    /// Decode a frame, appending to `events`
    ///
    /// # Errors
    ///
    /// On a malformed record; `events` then holds everything decoded before
    /// it.
    pub fn decode_into(&mut self, frame: &[u8], events: &mut Vec<Event>) -> Result<(), DecodeError> {
        let mut cursor = Cursor::new(frame);
        while !cursor.is_done() {
            let start = cursor.pos;
            match self.decode_record(&mut cursor, events) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "Unknown event tag {:#04x} at offset {start}; dropping rest of frame ({})",
                        frame[start],
                        hex_dump(frame, start)
                    );
                    return Ok(());
                }
                Err(e) => {
                    error!("Malformed event record at offset {start}: {e} ({})", hex_dump(frame, start));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// One record; false on an unknown tag
    fn decode_record(&mut self, cur: &mut Cursor<'_>, events: &mut Vec<Event>) -> Result<bool, DecodeError> {
        let tag = cur.read_u8()?;
        let thread = self.current_thread;

        if wire::is_compact(tag) {
            let low = cur.read_u8()?;
            let method = MethodId(u32::from(
                u16::from_be_bytes([tag, low]) & wire::COMPACT_EVENT_METHOD_ID_MASK,
            ));
            events.push(if wire::is_compact_exit(tag) {
                Event::MethodExitUnstamped {
                    method,
                    thread,
                    kind: MethodType::Normal,
                }
            } else {
                Event::MethodEntryUnstamped {
                    method,
                    thread,
                    kind: MethodType::Normal,
                    params: Vec::new(),
                }
            });
            return Ok(true);
        }

        let event = match tag {
            wire::ROOT_ENTRY | wire::MARKER_ENTRY | wire::METHOD_ENTRY => {
                let method = Self::read_method(cur)?;
                let (ts0, ts1) = self.read_stamps(cur)?;
                let kind = method_type(tag);
                let params = self.take_params(thread, kind);
                Event::MethodEntry {
                    method,
                    thread,
                    kind,
                    ts0,
                    ts1,
                    params,
                }
            }
            wire::ROOT_EXIT | wire::MARKER_EXIT | wire::METHOD_EXIT => {
                let method = Self::read_method(cur)?;
                let (ts0, ts1) = self.read_stamps(cur)?;
                Event::MethodExit {
                    method,
                    thread,
                    kind: method_type(tag),
                    ts0,
                    ts1,
                }
            }
            wire::METHOD_ENTRY_UNSTAMPED | wire::MARKER_ENTRY_UNSTAMPED => {
                let method = Self::read_method(cur)?;
                let kind = if tag == wire::MARKER_ENTRY_UNSTAMPED {
                    MethodType::Marker
                } else {
                    MethodType::Normal
                };
                let params = self.take_params(thread, kind);
                Event::MethodEntryUnstamped {
                    method,
                    thread,
                    kind,
                    params,
                }
            }
            wire::METHOD_EXIT_UNSTAMPED | wire::MARKER_EXIT_UNSTAMPED => Event::MethodExitUnstamped {
                method: Self::read_method(cur)?,
                thread,
                kind: if tag == wire::MARKER_EXIT_UNSTAMPED {
                    MethodType::Marker
                } else {
                    MethodType::Normal
                },
            },
            wire::ADJUST_TIME => {
                let (diff0, diff1) = self.read_stamps(cur)?;
                Event::AdjustTime { thread, diff0, diff1 }
            }
            wire::THREADS_SUSPENDED | wire::THREADS_RESUMED => {
                let (ts0, ts1) = self.read_stamps(cur)?;
                if tag == wire::THREADS_SUSPENDED {
                    Event::ThreadsSuspended { ts0, ts1 }
                } else {
                    Event::ThreadsResumed { ts0, ts1 }
                }
            }
            wire::WAIT_ENTRY
            | wire::WAIT_EXIT
            | wire::SLEEP_ENTRY
            | wire::SLEEP_EXIT
            | wire::PARK_ENTRY
            | wire::PARK_EXIT => {
                let ts0 = cur.read_timestamp()?;
                blocking_event(tag, thread, ts0)
            }
            wire::MONITOR_ENTRY => {
                let ts0 = cur.read_timestamp()?;
                let (monitor, owner) = if self.monitor_info {
                    (Some(cur.read_u32()?), Some(cur.read_u32()?))
                } else {
                    (None, None)
                };
                Event::MonitorEntry {
                    thread,
                    ts0,
                    ts1: 0,
                    monitor,
                    owner,
                }
            }
            wire::MONITOR_EXIT => {
                let ts0 = cur.read_timestamp()?;
                let monitor = if self.monitor_info {
                    Some(cur.read_u32()?)
                } else {
                    None
                };
                Event::MonitorExit {
                    thread,
                    ts0,
                    ts1: 0,
                    monitor,
                }
            }
            wire::RESET_COLLECTORS => {
                self.pending_params.clear();
                Event::Reset
            }
            wire::NEW_THREAD => {
                let thread = ThreadId(u32::from(cur.read_u16()?));
                let name = cur.read_string()?;
                let class_name = cur.read_string()?;
                self.current_thread = thread;
                Event::NewThread {
                    thread,
                    name,
                    class_name,
                }
            }
            wire::SET_FOLLOWING_EVENTS_THREAD => {
                self.current_thread = ThreadId(u32::from(cur.read_u16()?));
                return Ok(true);
            }
            wire::SERVLET_DO_METHOD => {
                let request_type = cur.read_u8()?;
                let path = cur.read_string()?;
                let session_id = i32::from_be_bytes(cur.read_u32()?.to_be_bytes());
                Event::ServletRequest {
                    thread,
                    request_type,
                    path,
                    session_id,
                }
            }
            wire::PROFILEPOINT_HIT => {
                let point = cur.read_u16()?;
                let timestamp = cur.read_timestamp()?;
                let thread = ThreadId(u32::from(cur.read_u16()?));
                Event::ProfilingPointHit {
                    point,
                    thread,
                    timestamp,
                }
            }
            wire::MARKER_ENTRY_PARAMETERS => {
                let count = cur.read_u8()?;
                let mut params = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    params.push(read_parameter(cur)?);
                }
                debug!("{} marker parameters pending for {thread}", params.len());
                self.pending_params.insert(thread, params);
                return Ok(true);
            }
            _ => return Ok(false),
        };
        events.push(event);
        Ok(true)
    }

    fn read_method(cur: &mut Cursor<'_>) -> Result<MethodId, DecodeError> {
        Ok(MethodId(u32::from(cur.read_u16()?)))
    }

    /// ts0 and, when the session collects it, ts1
    fn read_stamps(&self, cur: &mut Cursor<'_>) -> Result<(i64, i64), DecodeError> {
        let ts0 = cur.read_timestamp()?;
        let ts1 = if self.collecting_two_timestamps {
            cur.read_timestamp()?
        } else {
            0
        };
        Ok((ts0, ts1))
    }

    fn take_params(&mut self, thread: ThreadId, kind: MethodType) -> Vec<Parameter> {
        if kind == MethodType::Marker {
            self.pending_params.remove(&thread).unwrap_or_default()
        } else {
            Vec::new()
        }
    }
}

fn method_type(tag: u8) -> MethodType {
    match tag {
        wire::ROOT_ENTRY | wire::ROOT_EXIT => MethodType::Root,
        wire::MARKER_ENTRY | wire::MARKER_EXIT => MethodType::Marker,
        _ => MethodType::Normal,
    }
}

fn blocking_event(tag: u8, thread: ThreadId, ts0: i64) -> Event {
    let ts1 = 0;
    match tag {
        wire::WAIT_ENTRY => Event::WaitEntry { thread, ts0, ts1 },
        wire::WAIT_EXIT => Event::WaitExit { thread, ts0, ts1 },
        wire::SLEEP_ENTRY => Event::SleepEntry { thread, ts0, ts1 },
        wire::SLEEP_EXIT => Event::SleepExit { thread, ts0, ts1 },
        wire::PARK_ENTRY => Event::ParkEntry { thread, ts0, ts1 },
        _ => Event::ParkExit { thread, ts0, ts1 },
    }
}

fn read_parameter(cur: &mut Cursor<'_>) -> Result<Parameter, DecodeError> {
    let offset = cur.pos;
    let tag = cur.read_u8()?;
    let param = match tag {
        wire::PARAM_BOOLEAN => Parameter::Boolean(cur.read_u8()? != 0),
        wire::PARAM_CHAR => Parameter::Char(cur.read_u16()?),
        wire::PARAM_BYTE => Parameter::Byte(i8::from_be_bytes([cur.read_u8()?])),
        wire::PARAM_SHORT => Parameter::Short(i16::from_be_bytes(cur.read_u16()?.to_be_bytes())),
        wire::PARAM_INT => Parameter::Int(i32::from_be_bytes(cur.read_u32()?.to_be_bytes())),
        wire::PARAM_LONG => Parameter::Long(i64::from_be_bytes(cur.read_u64()?.to_be_bytes())),
        wire::PARAM_FLOAT => Parameter::Float(f32::from_bits(cur.read_u32()?)),
        wire::PARAM_DOUBLE => Parameter::Double(f64::from_bits(cur.read_u64()?)),
        wire::PARAM_REFERENCE => Parameter::String(cur.read_utf16_string()?),
        _ => return Err(DecodeError::InvalidParameter { tag, offset }),
    };
    Ok(param)
}

// ============================================================================
// Event processor
// ============================================================================

/// Feeds decoded frames into a sink and keeps pipeline counters
pub struct EventProcessor<'a> {
    sink: &'a dyn ProfilingEventSink,
    decoder: FrameDecoder,

    pub event_count: usize,
    pub frame_count: usize,
    /// Frames that ended in a malformed record
    pub decode_failures: usize,
    /// Events applied, per [`Event::kind_name`]
    pub kind_counts: BTreeMap<&'static str, usize>,
}

impl<'a> EventProcessor<'a> {
    #[must_use]
    pub fn new(sink: &'a dyn ProfilingEventSink, status: &ProfilingSessionStatus) -> Self {
        Self {
            sink,
            decoder: FrameDecoder::new(status),
            event_count: 0,
            frame_count: 0,
            decode_failures: 0,
            kind_counts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn set_session_status(&mut self, status: &ProfilingSessionStatus) {
        self.decoder.set_session_status(status);
    }

    /// Decode one frame and apply its events as a single batch
    ///
    /// Returns the number of events applied. Events before a malformed
    /// record are still applied.
    pub fn process_frame(&mut self, frame: &[u8]) -> usize {
        self.frame_count += 1;
        let mut events = Vec::new();
        if self.decoder.decode_into(frame, &mut events).is_err() {
            self.decode_failures += 1;
        }
        self.process_events(&events);
        events.len()
    }

    /// Apply events that are already decoded
    pub fn process_events(&mut self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        for event in events {
            self.count(event);
        }
        self.sink.apply_all(events);
    }

    pub fn process_event(&mut self, event: &Event) {
        self.count(event);
        self.sink.apply(event);
    }

    fn count(&mut self, event: &Event) {
        self.event_count += 1;
        *self.kind_counts.entry(event.kind_name()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ts(value: i64) -> Vec<u8> {
        value.to_be_bytes()[1..].to_vec()
    }

    fn string(s: &str) -> Vec<u8> {
        let mut out = u16::try_from(s.len()).unwrap().to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn stamped(tag: u8, method: u16, ts0: i64) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&method.to_be_bytes());
        out.extend(ts(ts0));
        out
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl ProfilingEventSink for RecordingSink {
        fn apply(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_decode_thread_and_method_records() {
        let mut frame = vec![wire::NEW_THREAD, 0, 3];
        frame.extend(string("main"));
        frame.extend(string("java.lang.Thread"));
        frame.extend(stamped(wire::ROOT_ENTRY, 7, 100));
        frame.extend([0x80, 0x09, 0xC0, 0x09]);
        frame.extend(stamped(wire::ROOT_EXIT, 7, 250));

        let mut decoder = FrameDecoder::new(&ProfilingSessionStatus::default());
        let events = decoder.decode(&frame).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[1],
            Event::MethodEntry {
                method: MethodId(7),
                thread: ThreadId(3),
                kind: MethodType::Root,
                ts0: 100,
                ts1: 0,
                params: Vec::new(),
            }
        );
        assert!(matches!(
            events[2],
            Event::MethodEntryUnstamped { method: MethodId(9), thread: ThreadId(3), .. }
        ));
        assert!(matches!(events[3], Event::MethodExitUnstamped { method: MethodId(9), .. }));
        assert_eq!(decoder.current_thread(), ThreadId(3));
    }

    #[test]
    fn test_two_timestamps() {
        let status = ProfilingSessionStatus {
            collecting_two_timestamps: true,
            ..ProfilingSessionStatus::default()
        };
        let mut frame = stamped(wire::METHOD_EXIT, 1, 10);
        frame.extend(ts(4));
        frame.extend([wire::WAIT_ENTRY]);
        frame.extend(ts(12));
        let events = FrameDecoder::new(&status).decode(&frame).unwrap();
        assert!(matches!(events[0], Event::MethodExit { ts0: 10, ts1: 4, .. }));
        assert!(matches!(events[1], Event::WaitEntry { ts0: 12, .. }));
    }

    #[test]
    fn test_current_thread_persists_across_frames() {
        let mut decoder = FrameDecoder::new(&ProfilingSessionStatus::default());
        decoder.decode(&[wire::SET_FOLLOWING_EVENTS_THREAD, 0, 5]).unwrap();
        let events = decoder.decode(&stamped(wire::METHOD_ENTRY, 2, 1)).unwrap();
        assert_eq!(events[0].thread(), Some(ThreadId(5)));
    }

    #[test]
    fn test_marker_parameters_attach_to_next_marker() {
        let mut frame = vec![wire::MARKER_ENTRY_PARAMETERS, 2, wire::PARAM_INT, 0, 0, 0, 42, wire::PARAM_REFERENCE, 0, 4, 0, b'h', 0, b'i'];
        frame.extend(stamped(wire::METHOD_ENTRY, 1, 5));
        frame.extend(stamped(wire::MARKER_ENTRY, 2, 6));
        let events = FrameDecoder::new(&ProfilingSessionStatus::default()).decode(&frame).unwrap();
        assert_eq!(events.len(), 2);
        let Event::MethodEntry { params, kind, .. } = &events[1] else {
            panic!("expected marker entry");
        };
        assert_eq!(*kind, MethodType::Marker);
        assert_eq!(params, &vec![Parameter::Int(42), Parameter::String("hi".to_string())]);
    }

    #[test]
    fn test_unknown_tag_keeps_prefix() {
        let mut frame = stamped(wire::METHOD_ENTRY, 1, 5);
        frame.extend([0x7F, 1, 2, 3]);
        let events = FrameDecoder::new(&ProfilingSessionStatus::default()).decode(&frame).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_truncated_record() {
        let frame = &stamped(wire::METHOD_ENTRY, 1, 5)[..6];
        let err = FrameDecoder::new(&ProfilingSessionStatus::default()).decode(frame).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 3,
                needed: 7,
                len: 6
            }
        );
    }

    #[test]
    fn test_invalid_parameter_type() {
        let frame = [wire::MARKER_ENTRY_PARAMETERS, 1, b'Q', 0];
        let err = FrameDecoder::new(&ProfilingSessionStatus::default()).decode(&frame).unwrap_err();
        assert_eq!(err, DecodeError::InvalidParameter { tag: b'Q', offset: 2 });
    }

    #[test]
    fn test_monitor_info_and_servlet() {
        let status = ProfilingSessionStatus {
            monitor_info: true,
            ..ProfilingSessionStatus::default()
        };
        let mut frame = vec![wire::MONITOR_ENTRY];
        frame.extend(ts(9));
        frame.extend(0xABCDu32.to_be_bytes());
        frame.extend(2u32.to_be_bytes());
        frame.push(wire::SERVLET_DO_METHOD);
        frame.push(1);
        frame.extend(string("/index"));
        frame.extend((-1i32).to_be_bytes());
        let events = FrameDecoder::new(&status).decode(&frame).unwrap();
        assert!(matches!(
            events[0],
            Event::MonitorEntry { monitor: Some(0xABCD), owner: Some(2), .. }
        ));
        assert!(matches!(&events[1], Event::ServletRequest { session_id: -1, path, .. } if path == "/index"));
    }

    #[test]
    fn test_processor_counts_and_partial_frames() {
        let sink = RecordingSink::default();
        let mut processor = EventProcessor::new(&sink, &ProfilingSessionStatus::default());
        let mut frame = stamped(wire::ROOT_ENTRY, 1, 5);
        frame.extend(stamped(wire::METHOD_ENTRY, 2, 6));
        frame.extend([wire::METHOD_EXIT, 0]);
        assert_eq!(processor.process_frame(&frame), 2);
        assert_eq!(processor.decode_failures, 1);
        assert_eq!(processor.frame_count, 1);
        assert_eq!(processor.kind_counts.get("method_entry"), Some(&2));
        processor.process_event(&Event::Reset);
        assert_eq!(processor.event_count, 3);
        assert_eq!(sink.events.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_hex_dump_marks_offset() {
        assert_eq!(hex_dump(&[1, 2, 0xff], 2), "@0: 01 02 [ff]");
    }
}
