//! Summary output: a human readable table or pretty JSON, to stdout or a file.
mod format;
mod writers;


pub use writers::{emit_summary, render_summary};
