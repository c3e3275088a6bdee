use std::sync::Arc;

use callscope::cct::{CctContainer, CctTree, PrestimeNode};
use callscope::domain::{MethodId, ThreadId, TimerDomain};
use callscope::profiling::{
    BuilderConfig, CallGraphBuilder, Event, MethodInfo, MethodTable, MethodType, ProfilingEventSink,
    ProfilingSessionStatus,
};

const MAIN: MethodId = MethodId(1);
const PARSE: MethodId = MethodId(2);
const READ: MethodId = MethodId(3);
const EMIT: MethodId = MethodId(4);

fn create_builder() -> CallGraphBuilder {
    let table = MethodTable::new();
    table.insert(MAIN, MethodInfo::new("app.Main", "main", "()V"));
    table.insert(PARSE, MethodInfo::new("app.Parser", "parse", "()V"));
    table.insert(READ, MethodInfo::new("app.Reader", "read", "()I"));
    table.insert(EMIT, MethodInfo::new("app.Emitter", "emit", "()V"));
    let status = Arc::new(ProfilingSessionStatus {
        timer_counts_in_second: [1_000_000, 1_000_000],
        ..ProfilingSessionStatus::default()
    });
    CallGraphBuilder::new(&status, Arc::new(table), BuilderConfig::default())
}

fn entry(thread: u32, method: MethodId, kind: MethodType, ts0: i64) -> Event {
    Event::MethodEntry {
        method,
        thread: ThreadId(thread),
        kind,
        ts0,
        ts1: 0,
        params: Vec::new(),
    }
}

fn exit(thread: u32, method: MethodId, kind: MethodType, ts0: i64) -> Event {
    Event::MethodExit {
        method,
        thread: ThreadId(thread),
        kind,
        ts0,
        ts1: 0,
    }
}

fn new_thread(thread: u32, name: &str) -> Event {
    Event::NewThread {
        thread: ThreadId(thread),
        name: name.to_string(),
        class_name: "java.lang.Thread".to_string(),
    }
}

/// main -> parse -> read (x2), then main -> emit, on one thread
fn session(thread: u32, offset: i64) -> Vec<Event> {
    let t = |ts: i64| ts + offset;
    vec![
        entry(thread, MAIN, MethodType::Root, t(0)),
        entry(thread, PARSE, MethodType::Normal, t(5)),
        entry(thread, READ, MethodType::Normal, t(10)),
        exit(thread, READ, MethodType::Normal, t(20)),
        entry(thread, READ, MethodType::Normal, t(25)),
        exit(thread, READ, MethodType::Normal, t(40)),
        exit(thread, PARSE, MethodType::Normal, t(50)),
        entry(thread, EMIT, MethodType::Normal, t(60)),
        exit(thread, EMIT, MethodType::Normal, t(90)),
        exit(thread, MAIN, MethodType::Root, t(100)),
    ]
}

fn visit<'a>(node: &PrestimeNode<'a>, f: &mut impl FnMut(&PrestimeNode<'a>)) {
    f(node);
    for child in node.children() {
        visit(&child, f);
    }
}

/// Method nodes below the thread root as (path, calls, self, total)
fn shape(container: &CctContainer) -> Vec<(String, u32, i64, i64)> {
    fn walk(node: &PrestimeNode<'_>, path: &str, out: &mut Vec<(String, u32, i64, i64)>) {
        for child in node.children() {
            if child.is_self_time_node() {
                continue;
            }
            let path = format!("{path}/{}", child.name());
            out.push((
                path.clone(),
                child.n_calls(),
                child.self_time(TimerDomain::Absolute),
                child.total_time(TimerDomain::Absolute),
            ));
            walk(&child, &path, out);
        }
    }
    let mut out = Vec::new();
    walk(&container.root_node(), "", &mut out);
    out
}

#[test]
fn test_self_time_plus_children_equals_total() {
    let builder = create_builder();
    builder.apply(&new_thread(1, "main"));
    builder.apply_all(&session(1, 0));
    let containers = builder.create_presentation_ccts();
    let root = containers[0].root_node();

    let mut checked = 0;
    visit(&root, &mut |node| {
        if node.is_thread_node() || node.is_self_time_node() {
            return;
        }
        let children: i64 = node
            .children()
            .iter()
            .filter(|c| !c.is_self_time_node())
            .map(|c| c.total_time(TimerDomain::Absolute))
            .sum();
        assert_eq!(
            node.self_time(TimerDomain::Absolute) + children,
            node.total_time(TimerDomain::Absolute),
            "{}",
            node.name()
        );
        checked += 1;
    });
    assert_eq!(checked, 4);

    let main = root.child_named("app.Main.main()V").unwrap();
    assert_eq!(main.total_time(TimerDomain::Absolute), 100);
    assert_eq!(main.self_time(TimerDomain::Absolute), 25);
}

#[test]
fn test_invocation_count_conservation() {
    let builder = create_builder();
    builder.apply(&new_thread(1, "main"));
    for round in 0..3 {
        builder.apply_all(&session(1, round * 1_000));
    }
    let containers = builder.create_presentation_ccts();
    let mut reads = 0;
    visit(&containers[0].root_node(), &mut |node| {
        if node.name() == "app.Reader.read()I" {
            reads += node.n_calls();
        }
    });
    // two reads per session
    assert_eq!(reads, 6);
    assert_eq!(builder.integrity_violations(), 0);
}

#[test]
fn test_flat_profile_lists_each_called_method_once() {
    let builder = create_builder();
    builder.apply(&new_thread(1, "main"));
    builder.apply_all(&session(1, 0));
    let flat = builder.create_flat_profile().unwrap();
    let mut names: Vec<&str> = flat.rows().iter().map(|r| r.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec!["app.Emitter.emit()V", "app.Main.main()V", "app.Parser.parse()V", "app.Reader.read()I"]
    );
    assert!(flat.rows().iter().all(|r| r.n_calls > 0));
    let read = flat.row_by_name("app.Reader.read()I").unwrap();
    assert_eq!(read.n_calls, 2);
    assert_eq!(read.self_time[0], 25);
}

#[test]
fn test_thread_isolation() {
    // Interleave two threads' streams event by event
    let interleaved = create_builder();
    interleaved.apply_all(&[new_thread(1, "a"), new_thread(2, "b")]);
    let a = session(1, 0);
    let b = session(2, 3);
    for (ea, eb) in a.iter().zip(&b) {
        interleaved.apply(ea);
        interleaved.apply(eb);
    }

    let alone = create_builder();
    alone.apply(&new_thread(1, "a"));
    alone.apply_all(&a);

    let mixed = interleaved.create_presentation_ccts();
    let single = alone.create_presentation_ccts();
    let thread_a = mixed.iter().find(|c| c.thread_id() == Some(ThreadId(1))).unwrap();
    let thread_b = mixed.iter().find(|c| c.thread_id() == Some(ThreadId(2))).unwrap();
    assert_eq!(shape(thread_a), shape(&single[0]));
    assert_eq!(shape(thread_b), shape(&single[0]));
}

#[test]
fn test_root_reentrancy() {
    let builder = create_builder();
    builder.apply(&new_thread(1, "main"));
    builder.apply_all(&[
        entry(1, MAIN, MethodType::Root, 0),
        entry(1, MAIN, MethodType::Root, 10),
        entry(1, MAIN, MethodType::Root, 20),
        exit(1, MAIN, MethodType::Root, 30),
        exit(1, MAIN, MethodType::Root, 45),
    ]);
    // still inside the outermost root
    assert_eq!(builder.live_stack(ThreadId(1)).unwrap().len(), 1);
    builder.apply(&exit(1, MAIN, MethodType::Root, 60));
    assert!(builder.live_stack(ThreadId(1)).unwrap().is_empty());

    let containers = builder.create_presentation_ccts();
    let outer = containers[0].root_node().child_named("app.Main.main()V").unwrap();
    let middle = outer.child_named("app.Main.main()V").unwrap();
    let inner = middle.child_named("app.Main.main()V").unwrap();
    assert_eq!(outer.total_time(TimerDomain::Absolute), 60);
    assert_eq!(outer.self_time(TimerDomain::Absolute), 25);
    assert_eq!(middle.self_time(TimerDomain::Absolute), 25);
    assert_eq!(inner.self_time(TimerDomain::Absolute), 10);
    assert_eq!(builder.integrity_violations(), 0);
}

#[test]
fn test_whole_tree_percentages() {
    let builder = create_builder();
    builder.apply(&new_thread(1, "main"));
    builder.apply_all(&session(1, 0));
    let containers = builder.create_presentation_ccts();
    let tree: &dyn CctTree = &containers[0];
    assert_eq!(tree.whole_graph_net_time(TimerDomain::Absolute), 100);
    let main = containers[0].root_node().child_named("app.Main.main()V").unwrap();
    let emit = main.child_named("app.Emitter.emit()V").unwrap();
    assert!((emit.total_time_percent(TimerDomain::Absolute) - 30.0).abs() < 1e-9);
}
