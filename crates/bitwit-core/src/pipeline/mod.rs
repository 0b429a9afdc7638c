//! The pipeline seam and the single-run executor.
//!
//! A [`Pipeline`] is the content-generation job invoked once per run. It gets
//! the settings snapshot committed when the run started and a [`RunOutput`]
//! through which it writes lines to the run log.
//!
//! ## Flow of one run
//!
//! ```text
//! RunExecutor::run_once
//!   ├─ settings = SettingsStore::get()       (last committed snapshot)
//!   ├─ spawn Pipeline::run(settings, output)  (own task: panics are contained)
//!   │     └─ output.line(..) → LogSink::append
//!   └─ RunReport | Error::PipelineFailure     (error line written to the log)
//! ```

mod executor;
mod simulated;

pub use executor::*;
pub use simulated::*;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

use crate::error::Result;
use crate::runlog::LogSink;
use crate::settings::Settings;

/// One invocation of the content-generation job.
///
/// Returning `Err` marks the run as failed; the batch continues regardless.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    async fn run(&self, settings: &Settings, output: &RunOutput) -> Result<()>;
}

/// Line writer handed to a pipeline for one run.
#[derive(Clone)]
pub struct RunOutput {
    sink: Arc<LogSink>,
    written: Arc<AtomicUsize>,
}

impl RunOutput {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self {
            sink,
            written: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Relay a line to the run log.
    ///
    /// A log write that still fails after retries is reported through
    /// `tracing` and does not fail the run.
    pub fn line(&self, text: impl AsRef<str>) {
        match self.sink.append(text.as_ref()) {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => error!(error = %e, "Failed to write pipeline output to run log"),
        }
    }

    /// Number of successful `line` calls so far
    pub fn lines_written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }
}
