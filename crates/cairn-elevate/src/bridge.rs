//! Re-execution of permission-denied operations with elevated privileges.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use cairn_core::SettingsStore;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::backend::{ElevationBackend, ExitClass};
use crate::error::EscalationError;
use crate::processes::ProcessSet;
use crate::request::EscalationRequest;
use crate::script::build_script;

/// Default time an elevated process may run.
pub const DEFAULT_ELEVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Asks the user whether an operation may be retried with elevated rights.
pub trait ElevationConsent: Send + Sync {
    fn confirm(&self, request: &EscalationRequest) -> bool;
}

impl<F> ElevationConsent for F
where
    F: Fn(&EscalationRequest) -> bool + Send + Sync,
{
    fn confirm(&self, request: &EscalationRequest) -> bool {
        self(request)
    }
}

/// Host-facing result of one escalation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    pub elevated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), EscalationError>> for EscalationOutcome {
    fn from(result: Result<(), EscalationError>) -> Self {
        match result {
            Ok(()) => Self {
                elevated: true,
                error: None,
            },
            Err(e) => Self {
                elevated: false,
                error: Some(e.to_string()),
            },
        }
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Terminated,
}

/// Runs single elevated operations through the platform's privilege prompt.
pub struct EscalationBridge {
    backend: ElevationBackend,
    consent: Arc<dyn ElevationConsent>,
    settings: Arc<dyn SettingsStore>,
    processes: ProcessSet,
    timeout: Duration,
    script_dir: Option<PathBuf>,
}

impl std::fmt::Debug for EscalationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationBridge")
            .field("backend", &self.backend)
            .field("timeout", &self.timeout)
            .field("live_processes", &self.processes.len())
            .finish_non_exhaustive()
    }
}

impl EscalationBridge {
    /// Create a bridge with the default timeout.
    pub fn new(
        backend: ElevationBackend,
        consent: Arc<dyn ElevationConsent>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            backend,
            consent,
            settings,
            processes: ProcessSet::new(),
            timeout: DEFAULT_ELEVATION_TIMEOUT,
            script_dir: None,
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write scripts into `dir` instead of the system temp directory.
    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = Some(dir.into());
        self
    }

    /// Live elevated processes.
    pub fn processes(&self) -> &ProcessSet {
        &self.processes
    }

    /// Kill every running elevated process.
    pub fn shutdown(&self) -> usize {
        self.processes.kill_all()
    }

    /// Escalate and report the result in host form.
    pub async fn run(&self, request: &EscalationRequest) -> EscalationOutcome {
        self.escalate(request).await.into()
    }

    /// Ask for consent, then run `request` elevated.
    pub async fn escalate(&self, request: &EscalationRequest) -> Result<(), EscalationError> {
        request.check()?;

        if !self.consented(request).await {
            info!(operation = request.verb(), "elevation declined at consent gate");
            return Err(EscalationError::Declined);
        }

        let script_text = build_script(request, self.backend.shell())?;

        // The temp file is removed when `script` drops, on every return path.
        let mut builder = tempfile::Builder::new();
        builder
            .prefix("cairn-elevate-")
            .suffix(self.backend.shell().extension());
        let mut script = match &self.script_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        script.write_all(script_text.as_bytes())?;
        script.flush()?;

        debug!(
            operation = request.verb(),
            path = %request.primary_path().display(),
            "launching elevated script"
        );

        let result = self.launch(script.path()).await;

        if let Err(e) = script.close() {
            warn!(error = %e, "failed to remove elevation script");
        }

        match &result {
            Ok(()) => info!(operation = request.verb(), "elevated operation completed"),
            Err(e) if e.is_cancellation() => {
                info!(operation = request.verb(), reason = %e, "elevated operation cancelled")
            }
            Err(e) => warn!(operation = request.verb(), error = %e, "elevated operation failed"),
        }
        result
    }

    async fn consented(&self, request: &EscalationRequest) -> bool {
        if self.settings.skip_elevation_confirmation() {
            return true;
        }
        let consent = Arc::clone(&self.consent);
        let request = request.clone();
        tokio::task::spawn_blocking(move || consent.confirm(&request))
            .await
            .unwrap_or(false)
    }

    async fn launch(&self, script: &std::path::Path) -> Result<(), EscalationError> {
        let mut child = self.backend.command(script).spawn()?;
        let tracked = self.processes.track();

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let waited = tokio::select! {
            res = tokio::time::timeout(self.timeout, child.wait()) => match res {
                Ok(status) => Waited::Exited(status),
                Err(_) => Waited::TimedOut,
            },
            _ = tracked.token().cancelled() => Waited::Terminated,
        };

        let status = match waited {
            Waited::Exited(status) => status?,
            Waited::TimedOut => {
                kill(&mut child).await;
                return Err(EscalationError::TimedOut {
                    secs: self.timeout.as_secs(),
                });
            }
            Waited::Terminated => {
                kill(&mut child).await;
                return Err(EscalationError::Terminated);
            }
        };

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        match self.backend.classify(status, &stderr) {
            ExitClass::Success => Ok(()),
            ExitClass::Declined => Err(EscalationError::DeclinedAtPrompt),
            ExitClass::Failed(message) => Err(EscalationError::Failed { message }),
        }
    }
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill elevated process");
    }
}
