//! Executes a single pipeline run.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Pipeline, RunOutput};
use crate::error::{Error, Result};
use crate::runlog::LogSink;
use crate::settings::SettingsStore;

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Lines the pipeline wrote to the run log
    pub lines: usize,
    pub duration_ms: u64,
}

/// Reads the settings, invokes the pipeline and relays its output.
pub struct RunExecutor {
    settings: Arc<SettingsStore>,
    sink: Arc<LogSink>,
    pipeline: Arc<dyn Pipeline>,
    deadline: Option<Duration>,
}

impl RunExecutor {
    pub fn new(
        settings: Arc<SettingsStore>,
        sink: Arc<LogSink>,
        pipeline: Arc<dyn Pipeline>,
    ) -> Self {
        Self {
            settings,
            sink,
            pipeline,
            deadline: None,
        }
    }

    /// Fail any run that takes longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    /// Run the pipeline once against the current settings snapshot.
    ///
    /// The pipeline runs in its own task so a panic surfaces as
    /// `PipelineFailure` instead of tearing down the caller. On failure an
    /// error line is written to the run log before returning.
    pub async fn run_once(&self) -> Result<RunReport> {
        let started = Instant::now();
        let settings = self.settings.get();
        let output = RunOutput::new(Arc::clone(&self.sink));

        let pipeline = Arc::clone(&self.pipeline);
        let task_output = output.clone();
        let mut handle =
            tokio::spawn(async move { pipeline.run(&settings, &task_output).await });

        let joined = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(self.fail(format!(
                        "run exceeded its deadline of {}ms",
                        deadline.as_millis()
                    )));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(())) => {
                let report = RunReport {
                    lines: output.lines_written(),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                debug!(lines = report.lines, duration_ms = report.duration_ms, "Run finished");
                Ok(report)
            }
            Ok(Err(e)) => Err(self.fail(match e {
                Error::PipelineFailure(reason) => reason,
                other => other.to_string(),
            })),
            Err(join_err) if join_err.is_panic() => Err(self.fail("pipeline panicked")),
            Err(join_err) => Err(self.fail(format!("pipeline task aborted: {}", join_err))),
        }
    }

    fn fail(&self, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        warn!(%reason, "Run failed");
        if let Err(e) = self.sink.append(&format!("Error during BitWit run: {}", reason)) {
            warn!(error = %e, "Failed to record run failure in run log");
        }
        Error::PipelineFailure(reason)
    }
}
