//! Small shared helpers.

use std::io::{self, Write};
use std::time::Duration;
use tokio::runtime::RuntimeFlavor;
use tracing::warn;

use crate::error::{Error, Result};

/// Attempts made for a persistence write before it is surfaced as `TransientIo`.
pub const IO_ATTEMPTS: u32 = 3;

const IO_BACKOFF: Duration = Duration::from_millis(5);

/// Run a blocking filesystem operation, retrying transient failures.
///
/// `NotFound` and `PermissionDenied` are not retried since repeating them
/// cannot succeed.
pub fn retry_io<T, F>(operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> std::io::Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < IO_ATTEMPTS && is_retryable(&err) => {
                warn!(operation, attempt, error = %err, "Transient IO failure, retrying");
                backoff(IO_BACKOFF * attempt);
                attempt += 1;
            }
            Err(err) => {
                return Err(Error::TransientIo {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

/// Write all of `bytes`, retrying transient failures.
///
/// A retry resumes after the bytes already accepted, so a short write never
/// duplicates part of a line.
pub fn write_all_retrying<W: Write>(operation: &str, writer: &mut W, bytes: &[u8]) -> Result<()> {
    let mut written = 0;
    retry_io(operation, || {
        while written < bytes.len() {
            match writer.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        writer.flush()
    })
}

/// Sleep between attempts without stalling other tasks on a runtime worker.
fn backoff(delay: Duration) {
    let multi_thread = tokio::runtime::Handle::try_current()
        .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);
    if multi_thread {
        tokio::task::block_in_place(|| std::thread::sleep(delay));
    } else {
        std::thread::sleep(delay);
    }
}

fn is_retryable(err: &std::io::Error) -> bool {
    !matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
    )
}
