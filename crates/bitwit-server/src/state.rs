//! Application state.

use bitwit_core::{BatchOrchestrator, LogSink, Pipeline, RunExecutor, SettingsStore};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::logging::LogLevelControl;

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Runtime settings
    pub settings: Arc<SettingsStore>,
    /// Run log tailed by the dashboard
    pub log: Arc<LogSink>,
    /// Batch state machine
    pub orchestrator: Arc<BatchOrchestrator>,
    /// Follows the LOG_LEVEL setting
    pub log_level: LogLevelControl,
    /// Server start time
    pub start_time: Instant,
    /// Active request count
    pub active_requests: Arc<AtomicUsize>,
}

impl AppState {
    /// Wire the stores, executor and orchestrator around `pipeline`.
    pub fn new(
        config: Config,
        settings: SettingsStore,
        log: LogSink,
        pipeline: Arc<dyn Pipeline>,
        log_level: LogLevelControl,
    ) -> Arc<Self> {
        let settings = Arc::new(settings);
        let log = Arc::new(log);
        let executor = RunExecutor::new(Arc::clone(&settings), Arc::clone(&log), pipeline)
            .with_deadline(config.run_timeout);
        let orchestrator =
            BatchOrchestrator::new(Arc::new(executor)).with_run_delay(config.run_delay);

        Arc::new(Self {
            config: Arc::new(config),
            settings,
            log,
            orchestrator: Arc::new(orchestrator),
            log_level,
            start_time: Instant::now(),
            active_requests: Arc::new(AtomicUsize::new(0)),
        })
    }
}
