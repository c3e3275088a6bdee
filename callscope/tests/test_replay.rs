use std::io::BufWriter;
use std::path::PathBuf;
use std::process::Command;

use callscope::domain::{MethodId, RecordingError, ThreadId, View};
use callscope::profiling::{Event, MethodInfo, MethodType, ProfilingSessionStatus};
use callscope::recording::{load_snapshot, replay_file, MethodEntry, RecordingHeader, RecordingWriter};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn callscope(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_callscope"))
        .args(args)
        .output()
        .expect("Failed to run callscope")
}

#[test]
fn test_replay_instrumented_fixture() {
    let outcome = replay_file(fixture("instrumented.jsonl")).expect("Failed to replay");
    assert_eq!(outcome.stats.frames, 1);
    assert_eq!(outcome.stats.decode_failures, 0);
    assert_eq!(outcome.stats.events, 18);
    assert_eq!(outcome.stats.kind_counts.get("method_entry"), Some(&7));
    assert_eq!(outcome.stats.integrity_violations, 0);

    let snapshot = &outcome.snapshot;
    assert_eq!(snapshot.begin_time(), 0);
    assert_eq!(snapshot.thread_by_name("worker"), Some(ThreadId(2)));
    let flat = snapshot.flat_profile(None, View::Method);
    let query = flat.row_by_name("app.Db.query(I)V").unwrap();
    assert_eq!(query.n_calls, 2);
    assert_eq!(query.total_time[0], 90);

    let names: Vec<&str> = outcome.thread_times.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"main") && names.contains(&"worker"));
}

#[test]
fn test_replay_sampled_fixture() {
    let outcome = replay_file(fixture("sampled.jsonl")).expect("Failed to replay");
    assert_eq!(outcome.stats.dumps, 4);
    let snapshot = &outcome.snapshot;
    assert_eq!(snapshot.n_threads(), 2);
    assert!(snapshot.thread_by_name("Reference Handler").is_none());
    let flat = snapshot.flat_profile(snapshot.thread_by_name("main"), View::Method);
    assert_eq!(flat.row_by_name("app.Main.compute()").unwrap().n_calls, 1);
    assert_eq!(flat.row_by_name("app.Main.render()").unwrap().n_calls, 1);
}

#[test]
fn test_written_recording_replays() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let header = RecordingHeader::Instrumented {
        session: ProfilingSessionStatus {
            timer_counts_in_second: [1_000_000, 1_000_000],
            ..ProfilingSessionStatus::default()
        },
        methods: vec![MethodEntry {
            id: MethodId(9),
            info: MethodInfo::new("app/Job", "execute", "()V"),
        }],
        marks: Vec::new(),
        config: Default::default(),
    };
    let mut writer = RecordingWriter::new(BufWriter::new(file.reopen().unwrap()), &header).unwrap();
    for (i, kind) in [MethodType::Root; 3].into_iter().enumerate() {
        let start = i64::try_from(i).unwrap() * 100;
        writer
            .write_event(&Event::MethodEntry {
                method: MethodId(9),
                thread: ThreadId(0),
                kind,
                ts0: start,
                ts1: 0,
                params: Vec::new(),
            })
            .unwrap();
        writer
            .write_event(&Event::MethodExit {
                method: MethodId(9),
                thread: ThreadId(0),
                kind,
                ts0: start + 40,
                ts1: 0,
            })
            .unwrap();
    }
    assert_eq!(writer.lines(), 7);
    writer.finish().unwrap();

    let snapshot = load_snapshot(file.path()).unwrap();
    let flat = snapshot.flat_profile(None, View::Method);
    let job = flat.row_by_name("app.Job.execute()V").unwrap();
    assert_eq!(job.n_calls, 3);
    assert_eq!(job.total_time[0], 120);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = replay_file(fixture("does-not-exist.jsonl")).unwrap_err();
    assert!(matches!(err, RecordingError::Io(_)));
}

#[test]
fn test_cli_replay_prints_flat_profile() {
    let output = callscope(&["replay", fixture("instrumented.jsonl").to_str().unwrap(), "--quiet"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().next().unwrap().starts_with("method"));
    assert!(stdout.contains("app.Db.query(I)V"));
}

#[test]
fn test_cli_replay_class_tree() {
    let output = callscope(&[
        "replay",
        fixture("instrumented.jsonl").to_str().unwrap(),
        "--view",
        "class",
        "--tree",
        "--thread",
        "main",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("app.Svc"));
    assert!(!stdout.contains("handle"));
}

#[test]
fn test_cli_unknown_thread_is_usage_error() {
    let output = callscope(&["replay", fixture("sampled.jsonl").to_str().unwrap(), "--thread", "nope"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown thread 'nope'"));
}

#[test]
fn test_cli_diff_exports_csv() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("diff.csv");
    let recording = fixture("instrumented.jsonl");
    let output = callscope(&[
        "diff",
        recording.to_str().unwrap(),
        recording.to_str().unwrap(),
        "--export",
        out.to_str().unwrap(),
        "--csv",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let csv = std::fs::read_to_string(&out).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("name,id,calls_a,calls_b"));
    assert!(lines.all(|l| l.ends_with(",0,0")));
}

#[test]
fn test_cli_reverse_lists_callers() {
    let output = callscope(&[
        "reverse",
        fixture("instrumented.jsonl").to_str().unwrap(),
        "--method",
        "app.Db.query(I)V",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("app.Svc.handle()V"));
    assert!(stdout.contains("app.Main.main()V"));
}

#[test]
fn test_cli_export_tree_json() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("tree.json");
    let output = callscope(&[
        "replay",
        fixture("sampled.jsonl").to_str().unwrap(),
        "--tree",
        "--export",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(json["view"], "method");
    assert_eq!(json["root"]["children"].as_array().unwrap().len(), 2);
}
