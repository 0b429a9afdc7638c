//! bitwit-core - Core library for the BitWit control plane
//!
//! This crate provides the pieces the control server wires together:
//!
//! - **settings**: Validated runtime settings with TOML persistence
//! - **runlog**: Append-only run log with a bounded tail window
//! - **pipeline**: Pipeline seam, single-run executor, simulated pipeline
//! - **orchestrator**: Single-flight batch state machine
//! - **util**: Transient I/O retry helpers

pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod runlog;
pub mod settings;
pub mod util;

// Re-export commonly used types
pub use error::{Error, Result, SettingIssue};
pub use orchestrator::{BatchOrchestrator, BatchState, BatchStatus, BatchSummary, BatchTicket};
pub use pipeline::{Pipeline, RunExecutor, RunOutput, RunReport, SimulatedPipeline};
pub use runlog::LogSink;
pub use settings::{Settings, SettingsPatch, SettingsStore};
