//! Host-facing entry point.
//!
//! Every operation returns an [`OpOutcome`]: cancellations and failures are
//! values, never panics. Writes into one directory are serialized; writes
//! into different directories run concurrently.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cairn_core::{
    ConflictBehavior, EngineConfig, FileOperation, MemorySettings, OpError, OpOutcome, OpResult,
    OperationId, PathPolicy, SettingsStore, TransferMode,
};
use cairn_elevate::{ElevationBackend, ElevationConsent, EscalationBridge, EscalationRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::executor::{Executor, TransferReport};
use crate::fsutil;
use crate::ledger::{Ledger, LedgerEntry, SharedLedger, UndoAction};
use crate::planner::Planner;
use crate::progress::ProgressSender;
use crate::registry::{DestinationGuard, DestinationLocks, OperationRegistry};
use crate::resolver::ConflictResolver;
use crate::stash::{StashManager, StashedBackup, SweepReport};

/// A copy or move request.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub mode: TransferMode,
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    /// `None` uses the stored default.
    pub behavior: Option<ConflictBehavior>,
    /// Id the host can later pass to [`Engine::cancel`].
    pub id: Option<OperationId>,
}

impl TransferRequest {
    pub fn copy(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(TransferMode::Copy, sources, destination)
    }

    pub fn move_to(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(TransferMode::Move, sources, destination)
    }

    pub fn new(mode: TransferMode, sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            sources,
            destination: destination.into(),
            behavior: None,
            id: None,
        }
    }

    pub fn behavior(mut self, behavior: ConflictBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn id(mut self, id: impl Into<OperationId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A finished single-item operation.
struct Done {
    path: Option<PathBuf>,
    elevated: bool,
}

impl Done {
    fn at(path: impl Into<Option<PathBuf>>) -> Self {
        Self {
            path: path.into(),
            elevated: false,
        }
    }

    fn elevated(path: impl Into<Option<PathBuf>>) -> Self {
        Self {
            path: path.into(),
            elevated: true,
        }
    }
}

fn outcome(result: OpResult<Done>) -> OpOutcome {
    match result {
        Ok(done) => OpOutcome {
            success: true,
            path: done.path,
            error: None,
            elevated: done.elevated,
        },
        Err(e) => {
            if e.is_cancellation() {
                info!(reason = %e, "operation cancelled");
            } else {
                debug!(error = %e, "operation failed");
            }
            OpOutcome::failed(e.to_string())
        }
    }
}

/// Run filesystem work on the blocking pool.
async fn blocking<T, F>(f: F) -> OpResult<T>
where
    F: FnOnce() -> OpResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OpError::Task {
            message: e.to_string(),
        })?
}

/// The file operations engine.
pub struct Engine {
    config: EngineConfig,
    planner: Planner,
    executor: Executor,
    ledger: SharedLedger,
    stash: Arc<StashManager>,
    settings: Arc<dyn SettingsStore>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    escalation: Option<Arc<EscalationBridge>>,
    registry: OperationRegistry,
    destinations: DestinationLocks,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("live_operations", &self.registry.len())
            .field("escalation", &self.escalation.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Create an engine with in-memory settings, no resolver and no escalation.
    pub fn new(config: EngineConfig) -> Self {
        let ledger = Ledger::from_config(&config).shared();
        let stash = Arc::new(StashManager::new(&config));
        let executor = Executor::new(&config, Arc::clone(&stash), Arc::clone(&ledger));

        Self {
            planner: Planner::new(&config),
            executor,
            ledger,
            stash,
            settings: Arc::new(MemorySettings::default()),
            resolver: None,
            escalation: None,
            registry: OperationRegistry::new(),
            destinations: DestinationLocks::new(),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    /// Use `settings` for stored preferences.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    /// Ask `resolver` about conflicts when the behavior is `ask`.
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Retry permission-denied operations through `bridge`.
    pub fn with_escalation(mut self, bridge: Arc<EscalationBridge>) -> Self {
        self.executor = self.executor.with_escalation(Arc::clone(&bridge));
        self.escalation = Some(bridge);
        self
    }

    /// Escalate through the platform's privilege prompt.
    pub fn with_platform_escalation(self, consent: Arc<dyn ElevationConsent>) -> Self {
        let bridge = EscalationBridge::new(
            ElevationBackend::platform_default(),
            consent,
            Arc::clone(&self.settings),
        )
        .with_timeout(self.config.elevation_timeout());
        self.with_escalation(Arc::new(bridge))
    }

    /// Send batch progress to `tx`.
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.executor = self.executor.with_progress(tx);
        self
    }

    /// Replace the path policy.
    pub fn with_policy(mut self, policy: PathPolicy) -> Self {
        self.planner = self.planner.with_policy(policy);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The undo/redo ledger.
    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    pub fn stash(&self) -> &Arc<StashManager> {
        &self.stash
    }

    /// Run any operation.
    pub async fn execute(&self, operation: FileOperation) -> OpOutcome {
        match operation {
            FileOperation::Copy {
                sources,
                destination,
                behavior,
            } => self.copy(sources, destination, behavior).await,
            FileOperation::Move {
                sources,
                destination,
                behavior,
            } => self.move_to(sources, destination, behavior).await,
            FileOperation::Delete { target } => self.delete(target).await,
            FileOperation::Rename { source, new_name } => self.rename(source, new_name).await,
            FileOperation::CreateFile { parent, name } => self.create_file(parent, name).await,
            FileOperation::CreateDirectory { parent, name } => {
                self.create_folder(parent, name).await
            }
        }
    }

    /// Copy `sources` into `destination`.
    pub async fn copy(
        &self,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        behavior: Option<ConflictBehavior>,
    ) -> OpOutcome {
        let mut request = TransferRequest::copy(sources, destination);
        request.behavior = behavior;
        self.transfer(request).await
    }

    /// Move `sources` into `destination`.
    pub async fn move_to(
        &self,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        behavior: Option<ConflictBehavior>,
    ) -> OpOutcome {
        let mut request = TransferRequest::move_to(sources, destination);
        request.behavior = behavior;
        self.transfer(request).await
    }

    /// Run a copy or move and report it as an outcome.
    pub async fn transfer(&self, request: TransferRequest) -> OpOutcome {
        let destination = request.destination.clone();
        let result = self
            .try_transfer(request)
            .await
            .map(|report| Done {
                path: Some(destination),
                elevated: report.elevated > 0,
            });
        outcome(result)
    }

    /// Run a copy or move and return the detailed report.
    pub async fn try_transfer(&self, request: TransferRequest) -> OpResult<TransferReport> {
        let TransferRequest {
            mode,
            sources,
            destination,
            behavior,
            id,
        } = request;

        let registration = id
            .clone()
            .map(|id| self.registry.register(id))
            .transpose()?;
        let token = match &registration {
            Some(registration) => registration.token().clone(),
            None => self.shutdown.child_token(),
        };

        if sources.is_empty() {
            return Ok(TransferReport::default());
        }

        self.planner.policy().validate_path(&destination)?;
        let _guard = self.lock_dir(&destination).await;
        if token.is_cancelled() {
            return Err(OpError::Cancelled);
        }

        let behavior = behavior.unwrap_or_else(|| self.settings.default_conflict_behavior());
        let planner = self.planner.clone();
        let resolver = self.resolver.clone();
        let plan = blocking(move || {
            planner.plan(mode, &sources, &destination, behavior, resolver.as_deref())
        })
        .await?;

        if plan.is_empty() {
            info!(operation = %mode.kind(), "nothing to do after conflict resolution");
            return Ok(TransferReport::default());
        }

        self.executor.execute(mode, plan, id, &token).await
    }

    /// Delete a file or directory tree.
    pub async fn delete(&self, target: PathBuf) -> OpOutcome {
        outcome(self.try_delete(target).await)
    }

    async fn try_delete(&self, target: PathBuf) -> OpResult<Done> {
        self.planner.policy().validate_path(&target)?;
        let parent = parent_of(&target)?;
        let _guard = self.lock_dir(&parent).await;

        let use_trash = self.config.delete_to_trash;
        let path = target.clone();
        let result = blocking(move || {
            fs::symlink_metadata(&path).map_err(|e| OpError::io(&path, e))?;
            if use_trash {
                trash::delete(&path).map_err(|e| OpError::Io {
                    path: path.clone(),
                    source: io::Error::other(e.to_string()),
                })
            } else {
                fsutil::remove_path(&path).map_err(|e| OpError::io(&path, e))
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!(path = %target.display(), trash = use_trash, "deleted");
                Ok(Done::at(None))
            }
            Err(e) if e.is_permission_denied() => {
                self.escalate(EscalationRequest::Delete { path: target }, e)
                    .await?;
                Ok(Done::elevated(None))
            }
            Err(e) => Err(e),
        }
    }

    /// Rename an item within its directory.
    pub async fn rename(&self, source: PathBuf, new_name: impl Into<String>) -> OpOutcome {
        outcome(self.try_rename(source, new_name.into()).await)
    }

    async fn try_rename(&self, source: PathBuf, new_name: String) -> OpResult<Done> {
        let policy = self.planner.policy();
        policy.validate_path(&source)?;
        policy.validate_name(&new_name)?;

        let parent = parent_of(&source)?;
        let target = parent.join(&new_name);
        let _guard = self.lock_dir(&parent).await;

        let case_insensitive = self.config.case_insensitive;
        let (from, to, name) = (source.clone(), target.clone(), new_name.clone());
        let result = blocking(move || {
            fs::symlink_metadata(&from).map_err(|e| OpError::io(&from, e))?;
            if from == to {
                return Ok(false);
            }
            let case_only = case_insensitive
                && from.to_string_lossy().to_lowercase() == to.to_string_lossy().to_lowercase();
            if fsutil::exists(&to) && !case_only {
                return Err(OpError::AlreadyExists { name });
            }
            fs::rename(&from, &to).map_err(|e| OpError::io(&from, e))?;
            Ok(true)
        })
        .await;

        match result {
            Ok(renamed) => {
                if renamed {
                    info!(from = %source.display(), to = %target.display(), "renamed");
                    self.record(UndoAction::Rename {
                        original: source,
                        renamed: target.clone(),
                    });
                }
                Ok(Done::at(target))
            }
            Err(e) if e.is_permission_denied() => {
                self.escalate(EscalationRequest::Rename { source, new_name }, e)
                    .await?;
                Ok(Done::elevated(target))
            }
            Err(e) => Err(e),
        }
    }

    /// Create an empty directory.
    pub async fn create_folder(&self, parent: PathBuf, name: impl Into<String>) -> OpOutcome {
        outcome(self.try_create(parent, name.into(), true).await)
    }

    /// Create an empty file.
    pub async fn create_file(&self, parent: PathBuf, name: impl Into<String>) -> OpOutcome {
        outcome(self.try_create(parent, name.into(), false).await)
    }

    async fn try_create(&self, parent: PathBuf, name: String, is_directory: bool) -> OpResult<Done> {
        let policy = self.planner.policy();
        policy.validate_path(&parent)?;
        policy.validate_name(&name)?;

        let target = parent.join(&name);
        let _guard = self.lock_dir(&parent).await;

        let (dir, path, taken) = (parent.clone(), target.clone(), name.clone());
        let result = blocking(move || {
            let metadata = fs::metadata(&dir).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => OpError::NotADirectory { path: dir.clone() },
                _ => OpError::io(&dir, e),
            })?;
            if !metadata.is_dir() {
                return Err(OpError::NotADirectory { path: dir });
            }
            let created = if is_directory {
                fs::create_dir(&path)
            } else {
                fs::File::create_new(&path).map(|_| ())
            };
            created.map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => OpError::AlreadyExists { name: taken },
                _ => OpError::io(&path, e),
            })
        })
        .await;

        match result {
            Ok(()) => {
                info!(path = %target.display(), directory = is_directory, "created");
                self.record(UndoAction::Create {
                    path: target.clone(),
                    is_directory,
                });
                Ok(Done::at(target))
            }
            Err(e) if e.is_permission_denied() => {
                let request = if is_directory {
                    EscalationRequest::CreateFolder { parent, name }
                } else {
                    EscalationRequest::CreateFile { parent, name }
                };
                self.escalate(request, e).await?;
                Ok(Done::elevated(target))
            }
            Err(e) => Err(e),
        }
    }

    /// Reverse the most recent recorded operation.
    pub async fn undo(&self) -> OpOutcome {
        outcome(self.try_undo().await.map(|_| Done::at(None)))
    }

    pub async fn try_undo(&self) -> OpResult<LedgerEntry> {
        let ledger = Arc::clone(&self.ledger);
        let entry = blocking(move || {
            let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
            ledger.undo()
        })
        .await?;
        info!(action = %entry.description(), "undone");
        Ok(entry)
    }

    /// Re-apply the most recently undone operation.
    pub async fn redo(&self) -> OpOutcome {
        outcome(self.try_redo().await.map(|_| Done::at(None)))
    }

    pub async fn try_redo(&self) -> OpResult<LedgerEntry> {
        let ledger = Arc::clone(&self.ledger);
        let entry = blocking(move || {
            let mut ledger = ledger.lock().unwrap_or_else(|e| e.into_inner());
            ledger.redo()
        })
        .await?;
        info!(action = %entry.description(), "redone");
        Ok(entry)
    }

    /// Cancel an in-flight transfer. Returns whether it was found.
    pub fn cancel(&self, id: &OperationId) -> bool {
        self.registry.cancel(id)
    }

    /// Stashed backups, newest first.
    pub async fn list_stash(&self) -> OpResult<Vec<StashedBackup>> {
        let stash = Arc::clone(&self.stash);
        blocking(move || stash.list()).await
    }

    /// Sweep the stash once.
    pub async fn sweep_stash(&self) -> OpResult<SweepReport> {
        let stash = Arc::clone(&self.stash);
        blocking(move || stash.sweep()).await
    }

    /// Sweep the stash periodically until [`Engine::shutdown`].
    pub fn spawn_stash_sweeper(&self) -> JoinHandle<()> {
        self.stash.spawn_periodic_sweep(
            self.config.stash_sweep_interval(),
            self.shutdown.child_token(),
        )
    }

    /// Cancel every transfer, stop the sweeper and kill elevated processes.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let cancelled = self.registry.cancel_all();
        let killed = self
            .escalation
            .as_ref()
            .map(|bridge| bridge.shutdown())
            .unwrap_or(0);
        info!(cancelled, killed, "engine shut down");
    }

    fn record(&self, action: UndoAction) {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
    }

    async fn escalate(&self, request: EscalationRequest, cause: OpError) -> OpResult<()> {
        match &self.escalation {
            Some(bridge) => bridge.escalate(&request).await.map_err(OpError::from),
            None => Err(cause),
        }
    }

    async fn lock_dir(&self, dir: &Path) -> DestinationGuard {
        let resolved = tokio::fs::canonicalize(dir)
            .await
            .unwrap_or_else(|_| dir.to_path_buf());
        let key = PathBuf::from(self.planner.dest_key(&resolved));
        self.destinations.lock(key).await
    }
}

fn parent_of(path: &Path) -> OpResult<PathBuf> {
    path.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| OpError::invalid_path(path, "path has no parent"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> Engine {
        let config = EngineConfig {
            stash_root: dir.path().join("stash"),
            case_insensitive: false,
            ..Default::default()
        };
        Engine::new(config)
    }

    #[tokio::test]
    async fn test_create_rename_undo_redo() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let outcome = engine
            .create_file(dir.path().to_path_buf(), "notes.txt")
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.path, Some(dir.path().join("notes.txt")));

        let outcome = engine
            .rename(dir.path().join("notes.txt"), "todo.txt")
            .await;
        assert!(outcome.success);
        assert!(dir.path().join("todo.txt").exists());

        assert!(engine.undo().await.success);
        assert!(dir.path().join("notes.txt").exists());
        assert!(!dir.path().join("todo.txt").exists());

        assert!(engine.redo().await.success);
        assert!(dir.path().join("todo.txt").exists());
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("taken")).unwrap();
        let engine = engine(&dir);

        let outcome = engine
            .create_folder(dir.path().to_path_buf(), "taken")
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("'taken' already exists"));
        assert!(!engine.ledger().lock().unwrap().can_undo());
    }

    #[tokio::test]
    async fn test_rename_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), b"").unwrap();
        let engine = engine(&dir);

        for name in ["", "..", "a/b"] {
            let outcome = engine.rename(dir.path().join("a"), name).await;
            assert!(!outcome.success, "{name:?} should be rejected");
        }
        assert!(dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("inner")).unwrap();
        fs::write(tree.join("inner").join("f"), b"x").unwrap();
        let engine = engine(&dir);

        assert!(engine.delete(tree.clone()).await.success);
        assert!(!tree.exists());

        let outcome = engine.delete(tree).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_duplicate_operation_id() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let _registration = engine.registry.register(OperationId::new("busy")).unwrap();

        let outcome = engine
            .transfer(TransferRequest::copy(vec![], dir.path()).id("busy"))
            .await;
        assert!(!outcome.success);
        assert!(!engine.cancel(&OperationId::new("idle")));
    }
}
