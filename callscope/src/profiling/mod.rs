//! Profiling core modules
//!
//! Everything between the incoming event stream and a frozen snapshot:
//! - Event model and binary frame decoding
//! - Timer calibration and overhead cleansing
//! - Method identity lookup
//! - Per-thread live trees behind the registry gate
//! - The call-graph builder that applies events
//! - Stack sampling with synthesized entry/exit events

pub mod blocking_methods;
pub mod call_graph;
pub mod event_processor;
pub mod events;
pub mod methods;
pub mod stack_sampler;
pub mod thread_infos;
pub mod timing;

// Re-export common types
pub use blocking_methods::{BlockingMethodPolicy, KnownBlockingMethods, NoBlockingMethods};
pub use call_graph::{BuilderConfig, CallGraphBuilder, MonitorContention, ThreadActiveTime};
pub use event_processor::{EventProcessor, FrameDecoder};
pub use events::{Event, MethodType, Parameter, ProfilingEventSink};
pub use methods::{MapperLock, MethodInfo, MethodInfoMapper, MethodTable};
pub use stack_sampler::{
    diff_stacks, BlockingMethods, SamplerConfig, StackDiff, StackDump, StackFrame, StackTraceSnapshotBuilder, ThreadSample,
    ThreadState,
};
pub use thread_infos::{ThreadInfo, ThreadInfos};
pub use timing::{ProfilingSessionStatus, TimingAdjuster};
