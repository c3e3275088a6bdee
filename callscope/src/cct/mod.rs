//! Calling-context trees: the live arena mutated by the builder and the
//! frozen, shareable presentation views derived from it.

pub mod class_view;
pub mod container;
pub mod diff;
pub mod flat_profile;
pub mod node;
pub mod presentation;
pub mod reverse;
pub mod snapshot;

pub use container::{CctContainer, ThreadTimes};
pub use diff::{DiffFlatRow, DiffNode, SnapshotDiff, ThreadPair};
pub use flat_profile::{FlatProfileContainer, FlatProfileRow};
pub use presentation::{CctTree, FreeTree, MethodNames, NodeData, NodeFlags, PrestimeNode, SortBy};
pub use snapshot::CpuResultsSnapshot;
