use cairn_core::{
    ConflictBehavior, EngineConfig, FileOperation, MemorySettings, OpError, OpOutcome,
    OperationKind, PathPolicy, SettingsStore, UserSettings, is_reserved_device_name,
    validate_filename,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[test]
fn test_config_builder_defaults() {
    let config = EngineConfig::builder().build().unwrap();

    assert_eq!(config.batch_width, 4);
    assert_eq!(config.undo_capacity, 50);
    assert_eq!(config.stash_max_entries, 200);
    assert_eq!(config.stash_retention(), Duration::from_secs(30 * 24 * 3600));
    assert_eq!(config.elevation_timeout(), Duration::from_secs(30));
    assert!(config.stash_root.ends_with(Path::new("cairn").join("backups")));
}

#[test]
fn test_config_builder_rejects_zero_values() {
    assert!(EngineConfig::builder().batch_width(0usize).build().is_err());
    assert!(EngineConfig::builder().undo_capacity(0usize).build().is_err());
    assert!(EngineConfig::builder().rename_attempts(0u32).build().is_err());
    assert!(
        EngineConfig::builder()
            .stash_root(PathBuf::new())
            .build()
            .is_err()
    );
}

#[test]
fn test_settings_persist_as_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.toml");

    let settings = UserSettings {
        skip_elevation_confirmation: true,
        default_conflict_behavior: ConflictBehavior::Rename,
    };
    settings.save_to(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("default_conflict_behavior = \"rename\""));
    assert_eq!(UserSettings::load_from(&path), settings);
}

#[test]
fn test_settings_missing_or_corrupt_fall_back_to_defaults() {
    let dir = tempfile::TempDir::new().unwrap();
    assert_eq!(
        UserSettings::load_from(&dir.path().join("absent.toml")),
        UserSettings::default()
    );

    let corrupt = dir.path().join("corrupt.toml");
    std::fs::write(&corrupt, "default_conflict_behavior = 42").unwrap();
    assert_eq!(UserSettings::load_from(&corrupt), UserSettings::default());
}

#[test]
fn test_memory_settings_update() {
    let settings = MemorySettings::default();
    assert!(!settings.skip_elevation_confirmation());
    assert_eq!(settings.default_conflict_behavior(), ConflictBehavior::Ask);

    settings.set(UserSettings {
        skip_elevation_confirmation: true,
        default_conflict_behavior: ConflictBehavior::Skip,
    });
    assert!(settings.skip_elevation_confirmation());
    assert_eq!(settings.default_conflict_behavior(), ConflictBehavior::Skip);
}

#[test]
fn test_windows_policy_on_any_host() {
    let policy = PathPolicy::windows();

    assert!(policy.validate_name("report.txt").is_ok());
    assert!(policy.validate_name("what?.txt").is_err());
    assert!(policy.validate_name("CON").is_err());
    assert!(policy.validate_name("lpt1.log").is_err());
    assert!(policy.validate_name("trailing.").is_err());
    assert!(is_reserved_device_name("nul.txt"));
    assert!(!is_reserved_device_name("console"));
}

#[test]
fn test_filename_validation_messages() {
    let err = validate_filename("..").unwrap_err();
    assert!(matches!(err, OpError::InvalidName { .. }));
    assert!(validate_filename(&"x".repeat(256)).is_err());
    assert!(validate_filename(&"x".repeat(255)).is_ok());
    assert!(validate_filename("a\0b").is_err());
}

#[test]
fn test_behavior_names() {
    for (text, behavior) in [
        ("ask", ConflictBehavior::Ask),
        ("RENAME", ConflictBehavior::Rename),
        ("skip", ConflictBehavior::Skip),
        ("Overwrite", ConflictBehavior::Overwrite),
        ("cancel", ConflictBehavior::Cancel),
    ] {
        assert_eq!(ConflictBehavior::from_str(text).unwrap(), behavior);
    }
    assert!(ConflictBehavior::from_str("merge").is_err());
}

#[test]
fn test_file_operation_kinds() {
    let ops = [
        FileOperation::copy(vec![], PathBuf::from("/d")),
        FileOperation::move_to(vec![], PathBuf::from("/d")),
        FileOperation::delete(PathBuf::from("/d/x")),
        FileOperation::rename(PathBuf::from("/d/x"), "y"),
        FileOperation::create_file(PathBuf::from("/d"), "f"),
        FileOperation::create_directory(PathBuf::from("/d"), "g"),
    ];
    let kinds: Vec<OperationKind> = ops.iter().map(FileOperation::kind).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::Copy,
            OperationKind::Move,
            OperationKind::Delete,
            OperationKind::Rename,
            OperationKind::CreateFile,
            OperationKind::CreateDirectory,
        ]
    );
    assert_eq!(OperationKind::CreateDirectory.to_string(), "Create directory");
}

#[test]
fn test_outcome_cancellation_detection() {
    assert!(OpOutcome::failed("Operation cancelled").is_cancelled());
    assert!(OpOutcome::failed("Operation cancelled by user").is_cancelled());
    assert!(OpOutcome::failed(OpError::TimedOut { secs: 30 }.to_string()).is_cancelled());
    assert!(!OpOutcome::failed("Permission denied: /x").is_cancelled());
    assert!(OpOutcome::ok().elevated().elevated);
}
