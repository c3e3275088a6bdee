//! Recording files and their replay.
//!
//! A recording is JSON Lines. The first line is a [`RecordingHeader`]; every
//! further line is one record:
//!
//! - instrumented recordings: an [`Event`] object, or `{"frame": "<hex>"}`
//!   holding one binary event frame
//! - sampled recordings: a [`StackDump`]
//!
//! Replay parses lines on a reader thread and hands records to the builder
//! over a bounded channel, so parsing and tree building overlap.
//!
//! ```text
//!  file ──▶ reader thread ──(bounded 1000)──▶ builder ──▶ snapshot
//! ```

use crossbeam_channel::bounded;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use crate::cct::snapshot::CpuResultsSnapshot;
use crate::domain::{Mark, MethodId, RecordingError};
use crate::profiling::call_graph::{BuilderConfig, CallGraphBuilder, MonitorContention, ThreadActiveTime};
use crate::profiling::event_processor::EventProcessor;
use crate::profiling::events::Event;
use crate::profiling::methods::{MethodInfo, MethodTable};
use crate::profiling::stack_sampler::{SamplerConfig, StackDump, StackTraceSnapshotBuilder};
use crate::profiling::timing::ProfilingSessionStatus;

/// Capacity of the reader → builder queue
const RECORD_QUEUE_CAPACITY: usize = 1000;

// ============================================================================
// File format
// ============================================================================

/// A method table entry under a host-assigned id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEntry {
    pub id: MethodId,
    #[serde(flatten)]
    pub info: MethodInfo,
}

/// A method whose root/marker entries open a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub method: MethodId,
    pub mark: Mark,
}

/// First line of a recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum RecordingHeader {
    Instrumented {
        #[serde(default)]
        session: ProfilingSessionStatus,
        #[serde(default)]
        methods: Vec<MethodEntry>,
        #[serde(default)]
        marks: Vec<MarkEntry>,
        #[serde(default)]
        config: BuilderConfig,
    },
    Sampled {
        #[serde(default)]
        config: SamplerConfig,
    },
}

impl RecordingHeader {
    fn format_name(&self) -> &'static str {
        match self {
            RecordingHeader::Instrumented { .. } => "instrumented",
            RecordingHeader::Sampled { .. } => "sampled",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Event(Event),
    Frame { frame: String },
    Dump(StackDump),
}

/// One parsed body line
#[derive(Debug, Clone)]
enum Record {
    Event(Event),
    Frame(Vec<u8>),
    Dump(StackDump),
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn parse_record(line_no: usize, line: &str) -> Result<Record, RecordingError> {
    let raw: RawRecord = serde_json::from_str(line).map_err(|source| RecordingError::Parse { line: line_no, source })?;
    Ok(match raw {
        RawRecord::Event(event) => Record::Event(event),
        RawRecord::Dump(dump) => Record::Dump(dump),
        RawRecord::Frame { frame } => Record::Frame(decode_hex(&frame).ok_or(RecordingError::UnexpectedRecord {
            line: line_no,
            format: "hex frame",
        })?),
    })
}

/// Line-by-line writer of a recording
pub struct RecordingWriter<W: Write> {
    writer: W,
    lines: usize,
}

impl<W: Write> RecordingWriter<W> {
    /// Start a recording with its header line
    ///
    /// # Errors
    ///
    /// I/O failure of `writer`.
    pub fn new(mut writer: W, header: &RecordingHeader) -> Result<Self, RecordingError> {
        write_json_line(&mut writer, header)?;
        Ok(Self { writer, lines: 1 })
    }

    /// # Errors
    ///
    /// I/O failure of the underlying writer.
    pub fn write_event(&mut self, event: &Event) -> Result<(), RecordingError> {
        self.lines += 1;
        write_json_line(&mut self.writer, event)
    }

    /// # Errors
    ///
    /// I/O failure of the underlying writer.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), RecordingError> {
        self.lines += 1;
        let record = serde_json::json!({ "frame": encode_hex(frame) });
        write_json_line(&mut self.writer, &record)
    }

    /// # Errors
    ///
    /// I/O failure of the underlying writer.
    pub fn write_dump(&mut self, dump: &StackDump) -> Result<(), RecordingError> {
        self.lines += 1;
        write_json_line(&mut self.writer, dump)
    }

    /// Lines written so far, header included
    #[must_use]
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Flush and hand back the writer
    ///
    /// # Errors
    ///
    /// I/O failure while flushing.
    pub fn finish(mut self) -> Result<W, RecordingError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn write_json_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), RecordingError> {
    serde_json::to_writer(&mut *writer, value).map_err(std::io::Error::from)?;
    writer.write_all(b"\n")?;
    Ok(())
}

// ============================================================================
// Replay
// ============================================================================

/// Counters of one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Body lines read
    pub records: usize,
    pub events: usize,
    pub frames: usize,
    pub decode_failures: usize,
    pub dumps: usize,
    pub integrity_violations: u64,
    pub kind_counts: BTreeMap<&'static str, usize>,
}

/// Everything a replay produced
#[derive(Debug)]
pub struct ReplayOutcome {
    pub snapshot: CpuResultsSnapshot,
    pub stats: ReplayStats,
    pub thread_times: Vec<ThreadActiveTime>,
    pub monitor_contention: Vec<MonitorContention>,
    pub profiling_point_hits: Vec<(u16, u64)>,
}

/// Replay a recording file into a snapshot
///
/// # Errors
///
/// I/O and parse failures, an empty file, records of the wrong kind,
/// lifecycle violations in sampled dumps, or a recording without data.
pub fn replay_file(path: impl AsRef<Path>) -> Result<ReplayOutcome, RecordingError> {
    let path = path.as_ref();
    info!("Replaying {}", path.display());
    replay(BufReader::new(File::open(path)?))
}

/// Snapshot of a recording file, without the replay side data
///
/// # Errors
///
/// As [`replay_file`].
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<CpuResultsSnapshot, RecordingError> {
    replay_file(path).map(|outcome| outcome.snapshot)
}

/// Replay a recording from any buffered reader
///
/// # Errors
///
/// As [`replay_file`].
pub fn replay<R: BufRead + Send + 'static>(mut reader: R) -> Result<ReplayOutcome, RecordingError> {
    let mut first = String::new();
    if reader.read_line(&mut first)? == 0 || first.trim().is_empty() {
        return Err(RecordingError::Empty);
    }
    let header: RecordingHeader =
        serde_json::from_str(first.trim()).map_err(|source| RecordingError::Parse { line: 1, source })?;
    debug!("Recording format: {}", header.format_name());

    let (tx, rx) = bounded(RECORD_QUEUE_CAPACITY);
    let handle = std::thread::spawn(move || {
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 2;
            let record = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => parse_record(line_no, &line).map(|r| (line_no, r)),
                Err(e) => Err(RecordingError::Io(e)),
            };
            let failed = record.is_err();
            if tx.send(record).is_err() || failed {
                break;
            }
        }
    });

    let result = match header {
        RecordingHeader::Instrumented {
            session,
            methods,
            marks,
            config,
        } => replay_instrumented(&rx, session, &methods, &marks, config),
        RecordingHeader::Sampled { config } => replay_sampled(&rx, &config),
    };
    // Unblock the reader if the builder stopped early
    drop(rx);
    if handle.join().is_err() {
        warn!("Recording reader thread panicked");
    }
    result
}

type RecordReceiver = crossbeam_channel::Receiver<Result<(usize, Record), RecordingError>>;

fn replay_instrumented(
    rx: &RecordReceiver,
    session: ProfilingSessionStatus,
    methods: &[MethodEntry],
    marks: &[MarkEntry],
    config: BuilderConfig,
) -> Result<ReplayOutcome, RecordingError> {
    let table = Arc::new(MethodTable::new());
    for entry in methods {
        table.insert(entry.id, entry.info.clone());
    }
    let session = Arc::new(session);
    let builder = CallGraphBuilder::new(&session, table, config);
    for entry in marks {
        builder.mark_method(entry.method, entry.mark);
    }

    let mut stats = ReplayStats::default();
    let mut begin_ts: Option<i64> = None;
    let mut processor = EventProcessor::new(&builder, &session);
    // Consecutive JSON events are applied as one batch
    let mut batch: Vec<Event> = Vec::new();

    for message in rx {
        let (line, record) = message?;
        stats.records += 1;
        match record {
            Record::Event(event) => {
                if begin_ts.is_none() {
                    begin_ts = event.absolute_timestamp();
                }
                batch.push(event);
                if batch.len() >= RECORD_QUEUE_CAPACITY {
                    processor.process_events(&batch);
                    batch.clear();
                }
            }
            Record::Frame(frame) => {
                processor.process_events(&batch);
                batch.clear();
                processor.process_frame(&frame);
            }
            Record::Dump(_) => {
                return Err(RecordingError::UnexpectedRecord {
                    line,
                    format: "instrumented",
                })
            }
        }
    }
    processor.process_events(&batch);

    stats.events = processor.event_count;
    stats.frames = processor.frame_count;
    stats.decode_failures = processor.decode_failures;
    stats.kind_counts = std::mem::take(&mut processor.kind_counts);
    stats.integrity_violations = builder.integrity_violations();
    info!(
        "Replayed {} events ({} frames, {} decode failures, {} integrity violations)",
        stats.events, stats.frames, stats.decode_failures, stats.integrity_violations
    );

    let containers = builder.create_presentation_ccts();
    let begin = begin_ts.unwrap_or(0);
    let snapshot = CpuResultsSnapshot::new(begin, builder.dump_timestamp(), containers)?;
    Ok(ReplayOutcome {
        snapshot,
        stats,
        thread_times: builder.all_threads_active_times(),
        monitor_contention: builder.monitor_contention(),
        profiling_point_hits: builder.profiling_point_hits(),
    })
}

fn replay_sampled(rx: &RecordReceiver, config: &SamplerConfig) -> Result<ReplayOutcome, RecordingError> {
    let sampler = StackTraceSnapshotBuilder::new(config);
    let mut stats = ReplayStats::default();

    for message in rx {
        let (line, record) = message?;
        stats.records += 1;
        let Record::Dump(dump) = record else {
            return Err(RecordingError::UnexpectedRecord { line, format: "sampled" });
        };
        sampler.add_stacktrace(&dump.threads, dump.timestamp)?;
        stats.dumps += 1;
    }

    let builder = sampler.call_graph();
    stats.integrity_violations = builder.integrity_violations();
    info!("Replayed {} stack dumps ({} accepted)", stats.dumps, sampler.sample_count());

    let since = sampler.first_dump_timestamp().unwrap_or(0);
    let snapshot = sampler.create_snapshot(since)?;
    Ok(ReplayOutcome {
        snapshot,
        stats,
        thread_times: builder.all_threads_active_times(),
        monitor_contention: Vec::new(),
        profiling_point_hits: Vec::new(),
    })
}
