use crate::harvest::traits::PipelineStage;
use crate::traits::PluginError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

/// Shared cancellation signal for a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Typed result of one plugin invocation; the orchestrator dispatches on it.
#[derive(Debug)]
pub enum PluginOutcome {
    Completed,
    /// Recoverable: the plugin's remaining work for this stage is skipped
    Skipped(PluginError),
    /// The run was cancelled and must stop
    Aborted(PluginError),
}

impl PluginOutcome {
    pub fn from_result(result: Result<(), PluginError>) -> Self {
        match result {
            Ok(()) => PluginOutcome::Completed,
            Err(err) if err.aborts_run() => PluginOutcome::Aborted(err),
            Err(err) => PluginOutcome::Skipped(err),
        }
    }
}

/// Runs plugin calls one at a time with an optional timeout and cancellation.
#[derive(Debug, Clone, Default)]
pub struct PluginExecutor {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl PluginExecutor {
    pub fn new(timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[instrument(skip(self, stage, call), fields(stage = %stage))]
    pub async fn invoke<F>(
        &self,
        stage: PipelineStage,
        plugin: &str,
        target: &str,
        call: F,
    ) -> PluginOutcome
    where
        F: Future<Output = Result<(), PluginError>>,
    {
        if self.cancel.is_cancelled() {
            return PluginOutcome::Aborted(PluginError::Cancelled);
        }

        info!("Starting plugin");

        let guarded = async {
            match self.timeout {
                Some(limit) => timeout(limit, call)
                    .await
                    .unwrap_or(Err(PluginError::Timeout(limit.as_secs()))),
                None => call.await,
            }
        };

        let result = tokio::select! {
            result = guarded => result,
            _ = self.cancel.cancelled() => Err(PluginError::Cancelled),
        };

        let outcome = PluginOutcome::from_result(result);
        match &outcome {
            PluginOutcome::Completed => info!("Finished plugin"),
            PluginOutcome::Skipped(err) => {
                warn!(error = %err, "Plugin failed, skipping its remaining work")
            }
            PluginOutcome::Aborted(err) => warn!(error = %err, "Run cancelled"),
        }
        outcome
    }
}
