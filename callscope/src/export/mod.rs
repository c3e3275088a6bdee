//! Result export
//!
//! Presentation trees, flat profiles and snapshot diffs can be written as
//! JSON; flat profiles also as CSV. Every writer accepts any `impl Write`
//! (file, stdout, in-memory buffer).

pub mod csv;
pub mod json;

pub use self::csv::{export_diff_flat_csv, export_flat_profile_csv};
pub use json::{
    export_diff_flat_json, export_diff_tree_json, export_flat_profile_json, export_tree_json, ExportNode,
};
