use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cairn_core::{ConflictBehavior, ConflictDecision, EngineConfig, OpError, TransferMode};
use cairn_ops::{
    ChannelResolver, Engine, Executor, Ledger, Planner, StashManager, TransferRequest,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        stash_root: dir.path().join("stash"),
        case_insensitive: false,
        ..Default::default()
    }
}

fn engine(dir: &TempDir) -> Engine {
    Engine::new(config(dir))
}

/// Workspace with `src/` and `dst/` directories.
fn workspace() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    (dir, src, dst)
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        out.push(path.strip_prefix(root).unwrap().to_path_buf());
        if path.is_dir() {
            collect(root, &path, out);
        }
    }
}

/// Hash of every relative path and file content under `root`.
fn tree_hash(root: &Path) -> String {
    let mut paths = Vec::new();
    collect(root, root, &mut paths);
    paths.sort();

    let mut hasher = blake3::Hasher::new();
    for rel in paths {
        hasher.update(rel.to_string_lossy().as_bytes());
        let full = root.join(&rel);
        if full.is_file() {
            hasher.update(&fs::read(&full).unwrap());
        }
    }
    hasher.finalize().to_hex().to_string()
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_validation_failure_leaves_fs_unchanged() {
    let (dir, src, dst) = workspace();
    fs::write(src.join("a.txt"), b"a").unwrap();
    let other = dir.path().join("other");
    fs::create_dir(&other).unwrap();
    fs::write(other.join("a.txt"), b"b").unwrap();
    let before = tree_hash(dir.path());

    let engine = engine(&dir);
    let relative = engine
        .copy(vec![src.join("a.txt")], PathBuf::from("dst"), None)
        .await;
    let duplicate = engine
        .copy(
            vec![src.join("a.txt"), other.join("a.txt")],
            dst.clone(),
            Some(ConflictBehavior::Rename),
        )
        .await;
    let traversal = engine
        .move_to(vec![src.join("..").join("other")], dst.clone(), None)
        .await;
    let missing = engine
        .move_to(vec![src.join("a.txt"), src.join("ghost")], dst.clone(), None)
        .await;

    for outcome in [&relative, &duplicate, &traversal, &missing] {
        assert!(!outcome.success);
        assert!(!outcome.is_cancelled());
    }
    assert_eq!(missing.error.as_deref(), Some("Source not found: ghost"));
    assert_eq!(tree_hash(dir.path()), before);
}

#[tokio::test]
async fn test_self_containment_rejected() {
    let (dir, src, _dst) = workspace();
    let nested = src.join("inner");
    fs::create_dir(&nested).unwrap();
    let engine = engine(&dir);

    let outcome = engine.move_to(vec![src.clone()], nested.clone(), None).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("into itself"));
    assert!(src.is_dir());
    assert!(names(&nested).is_empty());
}

#[tokio::test]
async fn test_move_then_undo_restores_tree() {
    let (dir, src, dst) = workspace();
    fs::create_dir_all(src.join("tree").join("deep")).unwrap();
    fs::write(src.join("tree").join("deep").join("f.bin"), [7u8; 4096]).unwrap();
    fs::write(src.join("tree").join("g.txt"), b"g").unwrap();
    fs::write(src.join("file.txt"), b"top").unwrap();
    let before = tree_hash(&src);

    let engine = engine(&dir);
    let outcome = engine
        .move_to(vec![src.join("tree"), src.join("file.txt")], dst.clone(), None)
        .await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert!(names(&src).is_empty());
    assert_eq!(names(&dst), vec!["file.txt", "tree"]);

    let undo = engine.undo().await;
    assert!(undo.success, "{:?}", undo.error);
    assert_eq!(tree_hash(&src), before);
    assert!(names(&dst).is_empty());

    let redo = engine.redo().await;
    assert!(redo.success);
    assert_eq!(names(&dst), vec!["file.txt", "tree"]);
}

#[tokio::test]
async fn test_undo_move_precondition() {
    let (dir, src, dst) = workspace();
    fs::write(src.join("a.txt"), b"a").unwrap();
    let engine = engine(&dir);

    assert!(engine.move_to(vec![src.join("a.txt")], dst.clone(), None).await.success);
    fs::write(src.join("a.txt"), b"newcomer").unwrap();

    let outcome = engine.undo().await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().starts_with("Cannot undo"));
    assert_eq!(fs::read(src.join("a.txt")).unwrap(), b"newcomer");
    assert!(dst.join("a.txt").exists());
    assert!(!engine.ledger().lock().unwrap().can_undo());
}

#[tokio::test]
async fn test_copy_is_not_undoable() {
    let (dir, src, dst) = workspace();
    fs::write(src.join("a.txt"), b"a").unwrap();
    let engine = engine(&dir);

    assert!(engine.copy(vec![src.join("a.txt")], dst, None).await.success);
    let outcome = engine.undo().await;
    assert_eq!(outcome.error.as_deref(), Some("Nothing to undo"));
}

#[tokio::test]
async fn test_rename_and_skip_behaviors() {
    let (dir, src, dst) = workspace();
    fs::write(src.join("x.txt"), b"new").unwrap();
    fs::write(dst.join("x.txt"), b"old").unwrap();
    let engine = engine(&dir);

    let outcome = engine
        .copy(vec![src.join("x.txt")], dst.clone(), Some(ConflictBehavior::Rename))
        .await;
    assert!(outcome.success);
    assert_eq!(fs::read(dst.join("x.txt")).unwrap(), b"old");
    assert_eq!(fs::read(dst.join("x (2).txt")).unwrap(), b"new");

    let outcome = engine
        .copy(vec![src.join("x.txt")], dst.clone(), Some(ConflictBehavior::Skip))
        .await;
    assert!(outcome.success);
    assert_eq!(names(&dst), vec!["x (2).txt", "x.txt"]);
    assert_eq!(fs::read(dst.join("x.txt")).unwrap(), b"old");
}

#[tokio::test]
async fn test_overwrite_deletes_backup_after_commit() {
    let (dir, src, dst) = workspace();
    fs::write(src.join("report.txt"), b"fresh").unwrap();
    fs::create_dir(src.join("folder")).unwrap();
    fs::write(src.join("folder").join("inside"), b"1").unwrap();
    fs::write(dst.join("report.txt"), b"stale").unwrap();
    fs::create_dir(dst.join("folder")).unwrap();
    fs::write(dst.join("folder").join("old"), b"0").unwrap();
    let engine = engine(&dir);

    let outcome = engine
        .copy(
            vec![src.join("report.txt"), src.join("folder")],
            dst.clone(),
            Some(ConflictBehavior::Overwrite),
        )
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(fs::read(dst.join("report.txt")).unwrap(), b"fresh");
    assert_eq!(names(&dst.join("folder")), vec!["inside"]);
    // Only the two items remain: no hidden backups left behind.
    assert_eq!(names(&dst), vec!["folder", "report.txt"]);
    assert!(!dir.path().join("stash").exists());
}

#[tokio::test]
async fn test_failure_mid_batch_rolls_back() {
    let (dir, src, dst) = workspace();
    for i in 1..=5 {
        fs::write(src.join(format!("f{i}.txt")), format!("new {i}")).unwrap();
    }
    fs::write(dst.join("f1.txt"), b"original 1").unwrap();
    let before = tree_hash(&dst);

    let config = EngineConfig {
        batch_width: 2,
        ..config(&dir)
    };
    let sources: Vec<PathBuf> = (1..=5).map(|i| src.join(format!("f{i}.txt"))).collect();
    let plan = Planner::new(&config)
        .plan(
            TransferMode::Copy,
            &sources,
            &dst,
            ConflictBehavior::Overwrite,
            None,
        )
        .unwrap();
    assert_eq!(plan.len(), 5);
    assert!(plan[0].overwrite);

    // Item 3 disappears between planning and execution.
    fs::remove_file(src.join("f3.txt")).unwrap();
    let src_before = tree_hash(&src);

    let stash = Arc::new(StashManager::new(&config));
    let executor = Executor::new(&config, stash, Ledger::new(10).shared());
    let err = executor
        .execute(TransferMode::Copy, plan, None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OpError::NotFound { .. }));
    assert_eq!(tree_hash(&dst), before);
    assert_eq!(fs::read(dst.join("f1.txt")).unwrap(), b"original 1");
    assert_eq!(tree_hash(&src), src_before);
    assert_eq!(
        names(&src),
        vec!["f1.txt", "f2.txt", "f4.txt", "f5.txt"]
    );
}

#[tokio::test]
async fn test_move_failure_puts_items_back() {
    let (dir, src, dst) = workspace();
    for i in 1..=4 {
        fs::write(src.join(format!("m{i}")), format!("{i}")).unwrap();
    }
    let src_before = tree_hash(&src);

    let config = EngineConfig {
        batch_width: 1,
        ..config(&dir)
    };
    let sources: Vec<PathBuf> = (1..=4).map(|i| src.join(format!("m{i}"))).collect();
    let plan = Planner::new(&config)
        .plan(TransferMode::Move, &sources, &dst, ConflictBehavior::Ask, None)
        .unwrap();
    fs::rename(src.join("m4"), dir.path().join("elsewhere")).unwrap();

    let ledger = Ledger::new(10).shared();
    let executor = Executor::new(
        &config,
        Arc::new(StashManager::new(&config)),
        Arc::clone(&ledger),
    );
    assert!(
        executor
            .execute(TransferMode::Move, plan, None, &CancellationToken::new())
            .await
            .is_err()
    );

    fs::rename(dir.path().join("elsewhere"), src.join("m4")).unwrap();
    assert_eq!(tree_hash(&src), src_before);
    assert!(names(&dst).is_empty());
    assert!(!ledger.lock().unwrap().can_undo());
}

#[test]
fn test_stashing_twice_yields_distinct_files() {
    let dir = TempDir::new().unwrap();
    let stash = StashManager::new(&config(&dir));
    let destination = dir.path().join("dst").join("report.txt");

    let first_backup = dir.path().join(".report.txt.1.bak");
    let second_backup = dir.path().join(".report.txt.2.bak");
    fs::write(&first_backup, b"first").unwrap();
    fs::write(&second_backup, b"second").unwrap();

    let first = stash.stash(&first_backup, &destination).unwrap();
    let second = stash.stash(&second_backup, &destination).unwrap();

    assert_ne!(first, second);
    assert_eq!(fs::read(&first).unwrap(), b"first");
    assert_eq!(fs::read(&second).unwrap(), b"second");
    assert!(first.to_string_lossy().ends_with("-0.txt"));
    assert!(second.to_string_lossy().ends_with("-1.txt"));
    assert_eq!(stash.list().unwrap().len(), 2);
}

#[test]
fn test_sweep_caps_entry_count() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("stash");
    fs::create_dir(&root).unwrap();

    let now = SystemTime::now();
    for i in 0..205u64 {
        let path = root.join(format!("entry-{i:03}"));
        fs::write(&path, b"x").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(now - Duration::from_secs(60 * i))
            .unwrap();
    }

    let stash = StashManager::with_limits(root.clone(), Duration::from_secs(30 * 24 * 3600), 200);
    let report = stash.sweep().unwrap();

    assert_eq!(report.removed_expired, 0);
    assert_eq!(report.removed_over_cap, 5);
    assert_eq!(report.retained, 200);
    assert_eq!(names(&root).len(), 200);
    for i in 200..205 {
        assert!(!root.join(format!("entry-{i:03}")).exists());
    }
    assert!(root.join("entry-000").exists());
    assert!(root.join("entry-199").exists());
}

#[tokio::test]
async fn test_ask_through_channel_resolver() {
    let (dir, src, dst) = workspace();
    for name in ["a.txt", "b.txt"] {
        fs::write(src.join(name), b"new").unwrap();
        fs::write(dst.join(name), b"old").unwrap();
    }

    let (resolver, mut prompts) = ChannelResolver::new(4);
    let engine = engine(&dir).with_resolver(Arc::new(resolver));

    let host = tokio::spawn(async move {
        let mut asked = Vec::new();
        while let Some(prompt) = prompts.recv().await {
            asked.push(prompt.conflict.item_name.to_string());
            let decision = if prompt.conflict.item_name == "a.txt" {
                ConflictDecision::Overwrite
            } else {
                ConflictDecision::Skip
            };
            prompt.respond(decision);
        }
        asked
    });

    let outcome = engine
        .copy(vec![src.join("a.txt"), src.join("b.txt")], dst.clone(), None)
        .await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"new");
    assert_eq!(fs::read(dst.join("b.txt")).unwrap(), b"old");

    drop(engine);
    assert_eq!(host.await.unwrap(), vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn test_ask_without_resolver_is_cancelled() {
    let (dir, src, dst) = workspace();
    fs::write(src.join("a.txt"), b"new").unwrap();
    fs::write(dst.join("a.txt"), b"old").unwrap();
    let engine = engine(&dir);

    let outcome = engine.copy(vec![src.join("a.txt")], dst.clone(), None).await;
    assert!(outcome.is_cancelled());
    assert_eq!(outcome.error.as_deref(), Some("Operation cancelled"));
    assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"old");
}

#[tokio::test]
async fn test_cancel_in_flight_operation() {
    let (dir, src, dst) = workspace();
    fs::write(src.join("a.txt"), b"new").unwrap();
    fs::write(dst.join("a.txt"), b"old").unwrap();

    let (resolver, mut prompts) = ChannelResolver::new(1);
    let engine = Arc::new(engine(&dir).with_resolver(Arc::new(resolver)));

    let task = {
        let engine = Arc::clone(&engine);
        let request = TransferRequest::copy(vec![src.join("a.txt")], dst.clone()).id("job-7");
        tokio::spawn(async move { engine.transfer(request).await })
    };

    // The batch is parked on the conflict prompt: cancel, then answer.
    let prompt = prompts.recv().await.unwrap();
    assert!(engine.cancel(&"job-7".into()));
    prompt.respond(ConflictDecision::Overwrite);

    let outcome = task.await.unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"old");
    assert_eq!(names(&dst), vec!["a.txt"]);
    assert!(!engine.cancel(&"job-7".into()));
}

#[tokio::test]
async fn test_same_destination_is_serialized() {
    let (dir, src, dst) = workspace();
    let other = dir.path().join("other");
    fs::create_dir(&other).unwrap();
    fs::write(src.join("a.txt"), b"one").unwrap();
    fs::write(other.join("a.txt"), b"two").unwrap();
    let engine = engine(&dir);

    let (first, second) = tokio::join!(
        engine.copy(vec![src.join("a.txt")], dst.clone(), Some(ConflictBehavior::Rename)),
        engine.copy(vec![other.join("a.txt")], dst.clone(), Some(ConflictBehavior::Rename)),
    );

    assert!(first.success && second.success);
    assert_eq!(names(&dst), vec!["a (2).txt", "a.txt"]);
    let mut contents = vec![
        fs::read(dst.join("a.txt")).unwrap(),
        fs::read(dst.join("a (2).txt")).unwrap(),
    ];
    contents.sort();
    assert_eq!(contents, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[tokio::test]
async fn test_ledger_is_bounded() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(EngineConfig {
        undo_capacity: 2,
        ..config(&dir)
    });

    for name in ["one", "two", "three"] {
        assert!(engine.create_folder(dir.path().to_path_buf(), name).await.success);
    }

    assert!(engine.undo().await.success);
    assert!(engine.undo().await.success);
    let third = engine.undo().await;
    assert_eq!(third.error.as_deref(), Some("Nothing to undo"));

    assert!(dir.path().join("one").exists());
    assert!(!dir.path().join("two").exists());
    assert!(!dir.path().join("three").exists());
}

#[tokio::test]
async fn test_same_path_move_is_noop() {
    let (dir, src, _dst) = workspace();
    fs::write(src.join("a.txt"), b"a").unwrap();
    let engine = engine(&dir);

    let outcome = engine
        .move_to(vec![src.join("a.txt")], src.clone(), Some(ConflictBehavior::Overwrite))
        .await;
    assert!(outcome.success);
    assert_eq!(fs::read(src.join("a.txt")).unwrap(), b"a");
    assert!(!engine.ledger().lock().unwrap().can_undo());
}

#[tokio::test]
async fn test_periodic_sweeper_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let sweeper = engine.spawn_stash_sweeper();
    engine.shutdown();
    tokio::time::timeout(Duration::from_secs(5), sweeper)
        .await
        .expect("sweeper should stop")
        .unwrap();
}
