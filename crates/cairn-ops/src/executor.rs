//! Transactional execution of planned copy and move batches.
//!
//! Items run in fixed-width batches on blocking threads. After each batch
//! joins, results are inspected in source order: the first failure rolls back
//! everything committed so far, restores overwritten items from their
//! backups, and surfaces that failure. Permission-denied items are retried
//! one at a time through the escalation bridge before that decision is made.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use cairn_core::{
    EngineConfig, OpError, OpResult, OperationId, PlannedOperation, TransferMode,
};
use cairn_elevate::{EscalationBridge, EscalationRequest};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backup::{self, BackupRecord, BackupSet};
use crate::fsutil::{self, MoveMethod};
use crate::ledger::{MovedItem, SharedLedger, UndoAction};
use crate::progress::{OperationComplete, OperationProgress, ProgressEvent, ProgressSender};
use crate::stash::StashManager;

/// Summary of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Final path of every committed item.
    pub destinations: Vec<PathBuf>,
    /// Items that needed elevated privileges.
    pub elevated: usize,
    pub bytes: u64,
}

/// An item that reached its destination.
#[derive(Debug)]
struct Committed {
    item: PlannedOperation,
    method: Option<MoveMethod>,
    bytes: u64,
    elevated: bool,
}

/// An item that did not.
#[derive(Debug)]
struct ItemFailure {
    item: PlannedOperation,
    error: OpError,
    /// The transfer itself hit a permission error and left nothing behind.
    escalatable: bool,
    /// A move that copied across volumes but could not remove its source.
    residue: Option<Committed>,
}

/// Runs planned batches with rollback.
#[derive(Debug)]
pub struct Executor {
    batch_width: usize,
    stash: Arc<StashManager>,
    ledger: SharedLedger,
    escalation: Option<Arc<EscalationBridge>>,
    progress: Option<ProgressSender>,
}

impl Executor {
    pub fn new(config: &EngineConfig, stash: Arc<StashManager>, ledger: SharedLedger) -> Self {
        Self {
            batch_width: config.batch_width.max(1),
            stash,
            ledger,
            escalation: None,
            progress: None,
        }
    }

    /// Retry permission-denied items through `bridge`.
    pub fn with_escalation(mut self, bridge: Arc<EscalationBridge>) -> Self {
        self.escalation = Some(bridge);
        self
    }

    /// Send progress events to `tx`.
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Execute a planned batch.
    ///
    /// On success every item is at its destination, backups are deleted and
    /// a move is recorded in the ledger. On failure or cancellation the
    /// filesystem is returned to its pre-batch state as far as possible.
    pub async fn execute(
        &self,
        mode: TransferMode,
        plan: Vec<PlannedOperation>,
        id: Option<OperationId>,
        token: &CancellationToken,
    ) -> OpResult<TransferReport> {
        let kind = mode.kind();
        let backups = Arc::new(BackupSet::new());
        let mut committed = Vec::with_capacity(plan.len());
        let mut progress = OperationProgress::new(id.clone(), kind, plan.len());

        info!(operation = %kind, items = plan.len(), "executing batch");

        let result = self
            .run_batches(mode, &plan, &backups, &mut committed, &mut progress, token)
            .await;

        match result {
            Ok(()) => {
                self.discard_backups(&backups).await;
                if mode == TransferMode::Move {
                    self.record_move(&committed);
                }

                let report = TransferReport {
                    destinations: committed
                        .iter()
                        .map(|c| c.item.destination.clone())
                        .collect(),
                    elevated: committed.iter().filter(|c| c.elevated).count(),
                    bytes: committed.iter().map(|c| c.bytes).sum(),
                };
                info!(
                    operation = %kind,
                    items = report.destinations.len(),
                    elevated = report.elevated,
                    "batch committed"
                );
                self.emit(ProgressEvent::Complete(OperationComplete {
                    id,
                    kind,
                    succeeded: report.destinations.len(),
                    elevated: report.elevated,
                    bytes_processed: report.bytes,
                    error: None,
                }));
                Ok(report)
            }
            Err(cause) => {
                let error = self.rollback(mode, committed, &backups, cause).await;
                self.emit(ProgressEvent::Complete(OperationComplete {
                    id,
                    kind,
                    succeeded: 0,
                    elevated: 0,
                    bytes_processed: 0,
                    error: Some(error.to_string()),
                }));
                Err(error)
            }
        }
    }

    async fn run_batches(
        &self,
        mode: TransferMode,
        plan: &[PlannedOperation],
        backups: &Arc<BackupSet>,
        committed: &mut Vec<Committed>,
        progress: &mut OperationProgress,
        token: &CancellationToken,
    ) -> OpResult<()> {
        for batch in plan.chunks(self.batch_width) {
            if token.is_cancelled() {
                return Err(OpError::Cancelled);
            }

            let mut set = JoinSet::new();
            for (index, item) in batch.iter().cloned().enumerate() {
                let backups = Arc::clone(backups);
                set.spawn_blocking(move || (index, run_item(mode, item, &backups)));
            }

            let mut results = Vec::with_capacity(batch.len());
            let mut task_error = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        task_error = Some(OpError::Task {
                            message: e.to_string(),
                        })
                    }
                }
            }
            results.sort_by_key(|(index, _)| *index);

            let mut first_error = None;
            let mut denied = Vec::new();
            for (_, result) in results {
                match result {
                    Ok(done) => {
                        progress.complete_item(done.item.destination.clone(), done.bytes);
                        self.emit(ProgressEvent::Progress(progress.clone()));
                        committed.push(done);
                    }
                    Err(failure) => {
                        let ItemFailure {
                            item,
                            error,
                            escalatable,
                            residue,
                        } = failure;
                        if let Some(residue) = residue {
                            committed.push(residue);
                        }
                        if escalatable && self.escalation.is_some() {
                            denied.push((item, error));
                        } else if first_error.is_none() {
                            debug!(path = %item.source.display(), error = %error, "item failed");
                            first_error = Some(error);
                        }
                    }
                }
            }

            if let Some(error) = first_error.or(task_error) {
                return Err(error);
            }

            // Escalation is never batched: one OS prompt at a time.
            for (item, cause) in denied {
                if token.is_cancelled() {
                    return Err(OpError::Cancelled);
                }
                self.escalate_item(mode, &item, cause).await?;
                progress.complete_item(item.destination.clone(), 0);
                self.emit(ProgressEvent::Progress(progress.clone()));
                committed.push(Committed {
                    item,
                    method: match mode {
                        TransferMode::Copy => None,
                        TransferMode::Move => Some(MoveMethod::Renamed),
                    },
                    bytes: 0,
                    elevated: true,
                });
            }
        }

        Ok(())
    }

    async fn escalate_item(
        &self,
        mode: TransferMode,
        item: &PlannedOperation,
        cause: OpError,
    ) -> OpResult<()> {
        let Some(bridge) = &self.escalation else {
            return Err(cause);
        };

        let source = item.source.clone();
        let destination = item.destination.clone();
        let request = match mode {
            TransferMode::Copy => EscalationRequest::Copy {
                source,
                destination,
            },
            TransferMode::Move => EscalationRequest::Move {
                source,
                destination,
            },
        };

        info!(
            operation = %mode.kind(),
            path = %item.source.display(),
            "retrying item with elevated privileges"
        );
        bridge.escalate(&request).await.map_err(OpError::from)
    }

    /// Undo committed items in reverse order and put backups back.
    ///
    /// Returns `cause`, or `cause` wrapped with the stash locations of
    /// backups that could not be restored.
    async fn rollback(
        &self,
        mode: TransferMode,
        committed: Vec<Committed>,
        backups: &Arc<BackupSet>,
        cause: OpError,
    ) -> OpError {
        if cause.is_cancellation() {
            info!(operation = %mode.kind(), items = committed.len(), "batch cancelled, rolling back");
        } else {
            warn!(
                operation = %mode.kind(),
                items = committed.len(),
                error = %cause,
                "batch failed, rolling back"
            );
        }

        let records = backups.take();
        let stash = Arc::clone(&self.stash);
        let stashed = tokio::task::spawn_blocking(move || {
            for done in committed.iter().rev() {
                reverse_item(mode, done);
            }
            restore_backups(&stash, records)
        })
        .await;

        let stashed = match stashed {
            Ok(stashed) => stashed,
            Err(e) => {
                warn!(error = %e, "rollback task failed");
                Vec::new()
            }
        };

        if stashed.is_empty() {
            cause
        } else {
            OpError::RolledBack {
                message: cause.to_string(),
                stashed,
            }
        }
    }

    async fn discard_backups(&self, backups: &Arc<BackupSet>) {
        if backups.is_empty() {
            return;
        }
        let backups = Arc::clone(backups);
        if let Err(e) = tokio::task::spawn_blocking(move || backups.discard_all()).await {
            warn!(error = %e, "backup cleanup task failed");
        }
    }

    fn record_move(&self, committed: &[Committed]) {
        // Elevated items were moved by another process; reversing them would
        // need another elevation, so they stay out of the ledger.
        let items: Vec<MovedItem> = committed
            .iter()
            .filter(|c| !c.elevated)
            .map(|c| MovedItem {
                from: c.item.source.clone(),
                to: c.item.destination.clone(),
            })
            .collect();

        let Some(original_parent) = items
            .first()
            .and_then(|item| item.from.parent())
            .map(|p| p.to_path_buf())
        else {
            return;
        };

        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.push(UndoAction::Move {
            items,
            original_parent,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // A slow subscriber loses events rather than stalling the batch.
            let _ = tx.try_send(event);
        }
    }
}

/// Run one planned item on a blocking thread.
fn run_item(
    mode: TransferMode,
    item: PlannedOperation,
    backups: &BackupSet,
) -> Result<Committed, ItemFailure> {
    if item.overwrite {
        if let Err(error) = backups.ensure(&item.destination) {
            return Err(ItemFailure {
                item,
                error,
                escalatable: false,
                residue: None,
            });
        }
    }

    match mode {
        TransferMode::Copy => match fsutil::copy_item(&item.source, &item.destination) {
            Ok(bytes) => Ok(Committed {
                item,
                method: None,
                bytes,
                elevated: false,
            }),
            // `copy_item` already removed anything it created.
            Err(e) => Err(item_failure(item, e)),
        },
        TransferMode::Move => match fsutil::move_path(&item.source, &item.destination) {
            Ok(method) => Ok(Committed {
                item,
                method: Some(method),
                bytes: 0,
                elevated: false,
            }),
            Err(e)
                if e.kind() != io::ErrorKind::AlreadyExists
                    && fsutil::exists(&item.destination) =>
            {
                // The copy landed but the source could not be removed.
                Err(ItemFailure {
                    item: item.clone(),
                    error: OpError::io(&item.source, e),
                    escalatable: false,
                    residue: Some(Committed {
                        item,
                        method: Some(MoveMethod::Copied),
                        bytes: 0,
                        elevated: false,
                    }),
                })
            }
            Err(e) => Err(item_failure(item, e)),
        },
    }
}

/// A failed item that left nothing of its own behind.
///
/// A destination that appeared after planning is reported as a conflict and
/// never touched.
fn item_failure(item: PlannedOperation, e: io::Error) -> ItemFailure {
    if e.kind() == io::ErrorKind::AlreadyExists {
        return ItemFailure {
            error: OpError::AlreadyExists {
                name: item.item_name.to_string(),
            },
            item,
            escalatable: false,
            residue: None,
        };
    }

    let error = OpError::io(&item.source, e);
    let escalatable = error.is_permission_denied() && !fsutil::exists(&item.destination);
    ItemFailure {
        item,
        error,
        escalatable,
        residue: None,
    }
}

/// Put one committed item back where it came from.
fn reverse_item(mode: TransferMode, done: &Committed) {
    let item = &done.item;
    let result = match mode {
        TransferMode::Copy => fsutil::remove_if_exists(&item.destination),
        TransferMode::Move => {
            if done.method == Some(MoveMethod::Copied) {
                if let Err(e) = fsutil::remove_if_exists(&item.source) {
                    warn!(path = %item.source.display(), error = %e, "failed to clear source remnant");
                }
            }
            fsutil::move_path(&item.destination, &item.source).map(|_| ())
        }
    };

    match result {
        Ok(()) => debug!(path = %item.destination.display(), "reversed item"),
        Err(e) => warn!(
            path = %item.destination.display(),
            error = %e,
            "failed to reverse item during rollback"
        ),
    }
}

/// Restore every backup, stashing the ones whose location is taken.
fn restore_backups(stash: &StashManager, records: Vec<BackupRecord>) -> Vec<PathBuf> {
    let mut stashed = Vec::new();
    for record in records {
        if !fsutil::exists(&record.destination) {
            match backup::restore(&record.backup, &record.destination) {
                Ok(()) => {
                    debug!(path = %record.destination.display(), "restored backup");
                    continue;
                }
                Err(e) => warn!(
                    path = %record.destination.display(),
                    error = %e,
                    "failed to restore backup"
                ),
            }
        }
        stashed.push(stash_or_keep(stash, &record));
    }
    stashed
}

fn stash_or_keep(stash: &StashManager, record: &BackupRecord) -> PathBuf {
    match stash.stash(&record.backup, &record.destination) {
        Ok(path) => path,
        Err(e) => {
            warn!(
                backup = %record.backup.display(),
                error = %e,
                "failed to stash backup, leaving it in place"
            );
            record.backup.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use compact_str::CompactString;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn executor(dir: &TempDir, width: usize) -> (Executor, SharedLedger) {
        let config = EngineConfig {
            batch_width: width,
            ..Default::default()
        };
        let stash = Arc::new(StashManager::with_limits(
            dir.path().join("stash"),
            Duration::from_secs(3600),
            10,
        ));
        let ledger = Ledger::new(10).shared();
        (
            Executor::new(&config, stash, Arc::clone(&ledger)),
            ledger,
        )
    }

    fn planned(source: PathBuf, destination: PathBuf, overwrite: bool) -> PlannedOperation {
        let item_name = CompactString::from(
            destination
                .file_name()
                .unwrap()
                .to_string_lossy()
                .as_ref(),
        );
        PlannedOperation {
            source,
            destination,
            item_name,
            is_directory: false,
            overwrite,
        }
    }

    #[tokio::test]
    async fn test_move_batch_records_ledger() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::create_dir(&dst).unwrap();
        fs::write(src.join("a"), b"a").unwrap();
        fs::write(src.join("b"), b"b").unwrap();

        let (executor, ledger) = executor(&dir, 1);
        let plan = vec![
            planned(src.join("a"), dst.join("a"), false),
            planned(src.join("b"), dst.join("b"), false),
        ];
        let report = executor
            .execute(TransferMode::Move, plan, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.destinations.len(), 2);
        assert!(dst.join("a").exists() && dst.join("b").exists());
        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.peek_undo().unwrap().description(),
            format!("Moved 2 items from {}", src.display())
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), b"a").unwrap();
        let (executor, _) = executor(&dir, 4);

        let token = CancellationToken::new();
        token.cancel();
        let err = executor
            .execute(
                TransferMode::Copy,
                vec![planned(dir.path().join("a"), dir.path().join("b"), false)],
                None,
                &token,
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Operation cancelled");
        assert!(!dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn test_overwrite_restored_on_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("new"), b"new").unwrap();
        fs::write(dir.path().join("target"), b"original").unwrap();
        let (executor, _) = executor(&dir, 4);

        let plan = vec![
            planned(dir.path().join("new"), dir.path().join("target"), true),
            planned(dir.path().join("missing"), dir.path().join("other"), false),
        ];
        let err = executor
            .execute(TransferMode::Copy, plan, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OpError::NotFound { .. }));
        assert_eq!(fs::read(dir.path().join("target")).unwrap(), b"original");
        assert!(!dir.path().join("other").exists());
        assert!(!dir.path().join("stash").exists());
    }

    #[test]
    fn test_occupied_destination_is_stashed() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doc.txt");
        fs::write(&target, b"original").unwrap();
        let saved = backup::backup(&target).unwrap();
        fs::write(&target, b"intruder").unwrap();

        let stash =
            StashManager::with_limits(dir.path().join("stash"), Duration::from_secs(60), 10);
        let stashed = restore_backups(
            &stash,
            vec![BackupRecord {
                destination: target.clone(),
                backup: saved.clone(),
            }],
        );

        assert_eq!(stashed.len(), 1);
        assert!(stashed[0].starts_with(dir.path().join("stash")));
        assert_eq!(fs::read(&stashed[0]).unwrap(), b"original");
        assert_eq!(fs::read(&target).unwrap(), b"intruder");
        assert!(!saved.exists());
    }

    #[tokio::test]
    async fn test_progress_events() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), b"abc").unwrap();
        let (executor, _) = executor(&dir, 4);
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let executor = executor.with_progress(tx);

        executor
            .execute(
                TransferMode::Copy,
                vec![planned(dir.path().join("a"), dir.path().join("b"), false)],
                Some(OperationId::new("p1")),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            ProgressEvent::Progress(p) => {
                assert_eq!(p.items_completed, 1);
                assert_eq!(p.bytes_processed, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ProgressEvent::Complete(c) => {
                assert!(c.is_success());
                assert_eq!(c.id, Some(OperationId::new("p1")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_copy_never_clobbers_file_created_after_planning() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir(&dst).unwrap();
        fs::write(dir.path().join("a.txt"), b"new").unwrap();
        let plan = vec![planned(dir.path().join("a.txt"), dst.join("a.txt"), false)];

        fs::write(dst.join("a.txt"), b"user data").unwrap();
        let (executor, _) = executor(&dir, 4);
        let err = executor
            .execute(TransferMode::Copy, plan, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "'a.txt' already exists");
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"user data");
    }

    #[tokio::test]
    async fn test_copy_leaves_directory_created_after_planning() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("d")).unwrap();
        fs::write(src.join("d").join("f"), b"x").unwrap();
        fs::create_dir(&dst).unwrap();
        let plan = vec![planned(src.join("d"), dst.join("d"), false)];

        fs::create_dir(dst.join("d")).unwrap();
        fs::write(dst.join("d").join("precious"), b"keep").unwrap();
        let (executor, _) = executor(&dir, 4);
        let err = executor
            .execute(TransferMode::Copy, plan, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OpError::AlreadyExists { .. }));
        assert_eq!(fs::read(dst.join("d").join("precious")).unwrap(), b"keep");
        assert!(!dst.join("d").join("f").exists());
    }

    #[tokio::test]
    async fn test_move_never_replaces_file_created_after_planning() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::create_dir(&dst).unwrap();
        fs::write(src.join("a"), b"first").unwrap();
        fs::write(src.join("b"), b"mine").unwrap();
        let plan = vec![
            planned(src.join("a"), dst.join("a"), false),
            planned(src.join("b"), dst.join("b"), false),
        ];

        fs::write(dst.join("b"), b"theirs").unwrap();
        let (executor, ledger) = executor(&dir, 4);
        let err = executor
            .execute(TransferMode::Move, plan, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OpError::AlreadyExists { .. }));
        assert_eq!(fs::read(src.join("a")).unwrap(), b"first");
        assert_eq!(fs::read(src.join("b")).unwrap(), b"mine");
        assert_eq!(fs::read(dst.join("b")).unwrap(), b"theirs");
        assert!(!dst.join("a").exists());
        assert!(ledger.lock().unwrap().is_empty());
    }
}
