//! Known blocking methods for stack sampling.
//!
//! A thread sampled as RUNNABLE may in fact be parked inside a native call
//! that blocks (socket accept, GUI event loops, `Object.wait`). When the top
//! frame of such a sample is a known blocking method, the sample is treated
//! as WAITING so the time does not show up as CPU activity.
//!
//! # Matching
//!
//! Methods are matched by declaring class and decorated method name
//! (`name[native]` for native frames, with the suffix placed before the
//! argument list when the dump spells one out). A signature appended after
//! [`NAME_SIG_SPLITTER`] is not part of the match.

use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};

use super::stack_sampler::NAME_SIG_SPLITTER;

/// Decides whether a top frame means the thread is blocked
pub trait BlockingMethodPolicy: Send + Sync {
    fn is_blocking(&self, class_name: &str, method_name: &str) -> bool;
}

// =============================================================================
// BLOCKING METHOD TABLE
// =============================================================================

/// (class, decorated method) pairs of well-known blocking natives, in both
/// the bare and the spelled-out argument form
const JVM_BLOCKING_METHODS: &[(&str, &str)] = &[
    ("java.net.PlainSocketImpl", "socketAccept[native]"),
    ("java.net.PlainSocketImpl", "socketAccept[native](java.net.SocketImpl) : void"),
    ("sun.awt.windows.WToolkit", "eventLoop[native]"),
    ("sun.awt.windows.WToolkit", "eventLoop[native]() : void"),
    ("java.lang.UNIXProcess", "waitForProcessExit[native]"),
    ("java.lang.UNIXProcess", "waitForProcessExit[native](int) : int"),
    ("sun.awt.X11.XToolkit", "waitForEvents[native]"),
    ("sun.awt.X11.XToolkit", "waitForEvents[native](long) : void"),
    ("apple.awt.CToolkit", "doAWTRunLoop[native]"),
    ("apple.awt.CToolkit", "doAWTRunLoop[native](long, boolean, boolean) : void"),
    ("java.lang.Object", "wait[native]"),
    ("java.lang.Object", "wait[native](long) : void"),
    ("java.lang.Thread", "sleep[native]"),
    ("java.lang.Thread", "sleep[native](long) : void"),
    ("sun.net.dns.ResolverConfigurationImpl", "notifyAddrChange0[native]"),
    ("sun.net.dns.ResolverConfigurationImpl", "notifyAddrChange0[native]() : int"),
    ("java.lang.ProcessImpl", "waitFor[native]"),
    ("java.lang.ProcessImpl", "waitFor[native]() : int"),
    ("sun.nio.ch.EPollArrayWrapper", "epollWait[native]"),
    ("sun.nio.ch.EPollArrayWrapper", "epollWait[native](long, int, long, int) : int"),
    ("java.net.DualStackPlainSocketImpl", "accept0[native]"),
    ("java.net.DualStackPlainSocketImpl", "accept0[native](int, java.net.InetSocketAddress[]) : int"),
    ("java.lang.ProcessImpl", "waitForInterruptibly[native]"),
    ("java.lang.ProcessImpl", "waitForInterruptibly[native](long) : void"),
    ("sun.print.Win32PrintServiceLookup", "notifyPrinterChange[native]"),
    ("sun.print.Win32PrintServiceLookup", "notifyPrinterChange[native](long) : int"),
    ("java.net.DualStackPlainSocketImpl", "waitForConnect[native]"),
    ("java.net.DualStackPlainSocketImpl", "waitForConnect[native](int, int) : void"),
    ("sun.nio.ch.KQueueArrayWrapper", "kevent0[native]"),
    ("sun.nio.ch.KQueueArrayWrapper", "kevent0[native](int, long, int, long) : int"),
    ("sun.nio.ch.WindowsSelectorImpl$SubSelector", "poll0[native]"),
    (
        "sun.nio.ch.WindowsSelectorImpl$SubSelector",
        "poll0[native](long, int, int[], int[], int[], long) : int",
    ),
    ("java.net.PlainSocketImpl", "socketConnect[native]"),
    ("java.net.PlainSocketImpl", "socketConnect[native](java.net.InetAddress, int, int) : void"),
    ("sun.nio.ch.ServerSocketChannelImpl", "accept0[native]"),
    (
        "sun.nio.ch.ServerSocketChannelImpl",
        "accept0[native](java.io.FileDescriptor, java.io.FileDescriptor, java.net.InetSocketAddress[]) : int",
    ),
    ("java.lang.ref.Reference", "waitForReferencePendingList[native]"),
    ("java.lang.ref.Reference", "waitForReferencePendingList[native]() : void"),
    ("sun.nio.fs.LinuxWatchService", "poll[native]"),
    ("sun.nio.fs.LinuxWatchService", "poll[native](int, int) : int"),
    ("sun.nio.ch.Net", "accept[native]"),
    (
        "sun.nio.ch.Net",
        "accept[native](java.io.FileDescriptor, java.io.FileDescriptor, java.net.InetSocketAddress[]) : int",
    ),
    ("sun.nio.ch.Net", "poll[native]"),
    ("sun.nio.ch.Net", "poll[native](java.io.FileDescriptor, int, long) : int"),
    ("sun.nio.ch.Net", "connect0[native]"),
    (
        "sun.nio.ch.Net",
        "connect0[native](boolean, java.io.FileDescriptor, java.net.InetAddress, int) : int",
    ),
    ("java.lang.ProcessHandleImpl", "waitForProcessExit0[native]"),
    ("java.lang.ProcessHandleImpl", "waitForProcessExit0[native](long, boolean) : int"),
    ("java.net.PlainSocketImpl", "accept0[native]"),
    ("java.net.PlainSocketImpl", "accept0[native](int, java.net.InetSocketAddress[]) : int"),
    ("sun.nio.ch.KQueue", "keventPoll[native]"),
    ("sun.nio.ch.KQueue", "keventPoll[native](int, long, int) : int"),
    ("sun.nio.ch.KQueue", "poll[native]"),
    ("sun.nio.ch.KQueue", "poll[native](int, long, int, long) : int"),
    ("sun.nio.ch.UnixDomainSockets", "accept0[native]"),
    (
        "sun.nio.ch.UnixDomainSockets",
        "accept0[native](java.io.FileDescriptor, java.io.FileDescriptor, java.lang.Object[]) : int",
    ),
    ("sun.nio.ch.EPoll", "wait[native]"),
    ("sun.nio.ch.EPoll", "wait[native](int, long, int, int) : int"),
];

/// Table-driven policy; starts from the well-known JVM blocking natives
#[derive(Debug)]
pub struct KnownBlockingMethods {
    methods: Vec<(String, String)>,
    /// Samples reclassified from RUNNABLE to WAITING
    reclassified: AtomicU64,
}

impl KnownBlockingMethods {
    #[must_use]
    pub fn new() -> Self {
        Self::with_methods(JVM_BLOCKING_METHODS.iter().map(|(c, m)| ((*c).to_string(), (*m).to_string())))
    }

    /// Policy over an explicit table
    #[must_use]
    pub fn with_methods(methods: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
            reclassified: AtomicU64::new(0),
        }
    }

    /// Add one more (class, decorated method) pair
    pub fn add(&mut self, class_name: impl Into<String>, method_name: impl Into<String>) {
        self.methods.push((class_name.into(), method_name.into()));
    }

    #[must_use]
    pub fn reclassified_samples(&self) -> u64 {
        self.reclassified.load(Ordering::Relaxed)
    }
}

impl Default for KnownBlockingMethods {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingMethodPolicy for KnownBlockingMethods {
    fn is_blocking(&self, class_name: &str, method_name: &str) -> bool {
        let method_name = method_name
            .split_once(NAME_SIG_SPLITTER)
            .map_or(method_name, |(m, _)| m);
        let blocking = self
            .methods
            .iter()
            .any(|(c, m)| c == class_name && m == method_name);
        if blocking {
            self.reclassified.fetch_add(1, Ordering::Relaxed);
            debug!("Top frame {class_name}.{method_name} is blocking; sample treated as waiting");
        }
        blocking
    }
}

/// Policy that never reclassifies
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBlockingMethods;

impl BlockingMethodPolicy for NoBlockingMethods {
    fn is_blocking(&self, _class_name: &str, _method_name: &str) -> bool {
        false
    }
}
