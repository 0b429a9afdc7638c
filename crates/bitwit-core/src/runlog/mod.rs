//! Append-only run log tailed by the dashboard.
//!
//! Lines are persisted to a file and mirrored in a bounded in-memory window so
//! `tail` never touches the disk. The file writer is serialized by a mutex and
//! each line is pushed to the window while that mutex is held, so the window
//! order always matches the file order.
//!
//! The completion marker (`All {N} BitWit runs completed in background
//! thread.`) is reserved for the orchestrator. Any other caller that tries to
//! append it gets the line prefixed with `[pipeline] `.

mod sink;

pub use sink::*;

/// Default number of lines returned by `tail` when the caller gives none.
pub const DEFAULT_TAIL_LINES: usize = 100;

/// Default size of the in-memory tail window.
pub const DEFAULT_RETAINED_LINES: usize = 10_000;

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "bitwit_ai.log";

const MARKER_PREFIX: &str = "All ";
const MARKER_SUFFIX: &str = " BitWit runs completed in background thread.";
const NEUTRALIZED_PREFIX: &str = "[pipeline] ";

/// The reserved line announcing that a batch of `total` runs finished.
pub fn completion_marker(total: u32) -> String {
    format!("{}{}{}", MARKER_PREFIX, total, MARKER_SUFFIX)
}

/// Whether `line` has the reserved completion marker shape.
pub fn is_completion_marker(line: &str) -> bool {
    line.strip_prefix(MARKER_PREFIX)
        .and_then(|rest| rest.strip_suffix(MARKER_SUFFIX))
        .is_some_and(|count| !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit()))
}

/// Clamp a requested tail length. Missing means [`DEFAULT_TAIL_LINES`],
/// anything below 1 becomes 1.
pub fn clamp_tail_lines(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_TAIL_LINES,
        Some(n) if n < 1 => 1,
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    }
}

pub(crate) fn neutralize(line: &str) -> std::borrow::Cow<'_, str> {
    if is_completion_marker(line.trim()) {
        std::borrow::Cow::Owned(format!("{}{}", NEUTRALIZED_PREFIX, line))
    } else {
        std::borrow::Cow::Borrowed(line)
    }
}
