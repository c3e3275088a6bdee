//! Command-line surface: argument parsing and terminal reports

pub mod args;
pub mod report;

pub use args::{Args, Command, DiffArgs, DisplayArgs, ReplayArgs, ReverseArgs, SortArg, ViewArg};
