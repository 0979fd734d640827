//! Unit-level tests for the validator chain.

use ocibundle::policy::{
    CountPolicy, PathPolicy, PermissionPolicy, Policy, PolicyChain, SizePolicy,
};
use ocibundle::{
    sanitize_mode, EntryInfo, EntryKind, Error, ExtractOptions, ExtractionState, SecurityError,
};
use tempfile::tempdir;

fn file_info(name: &str, size: u64, mode: u32) -> EntryInfo {
    EntryInfo {
        name: name.to_string(),
        size,
        kind: EntryKind::File,
        mode: Some(mode),
    }
}

// ============================================================================
// Size policy
// ============================================================================

#[test]
fn size_policy_rejects_oversized_file() {
    let policy = SizePolicy::new(100, 1000);
    assert!(policy.check_file(&file_info("ok.bin", 100, 0o644)).is_ok());
    let err = policy
        .check_file(&file_info("big.bin", 101, 0o644))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Security(SecurityError::FileTooLarge { size: 101, .. })
    ));
}

#[test]
fn size_policy_rejects_running_total() {
    let policy = SizePolicy::new(0, 1000);
    let mut state = ExtractionState::default();
    state.bytes_written = 1000;
    assert!(policy.check_archive(&state).is_ok());
    state.bytes_written = 1001;
    assert!(policy.check_archive(&state).is_err());
}

#[test]
fn zero_size_bounds_disable() {
    let policy = SizePolicy::new(0, 0);
    assert!(policy
        .check_file(&file_info("huge.bin", u64::MAX, 0o644))
        .is_ok());
    let mut state = ExtractionState::default();
    state.bytes_written = u64::MAX;
    assert!(policy.check_archive(&state).is_ok());
}

// ============================================================================
// Count policy
// ============================================================================

#[test]
fn count_policy_bounds_members() {
    let policy = CountPolicy::new(2);
    let mut state = ExtractionState::default();
    state.files_extracted = 2;
    assert!(policy.check_archive(&state).is_ok());
    state.files_extracted = 3;
    let err = policy.check_archive(&state).unwrap_err();
    assert!(matches!(
        err,
        Error::Security(SecurityError::FileCountExceeded {
            limit: 2,
            attempted: 3
        })
    ));
}

#[test]
fn zero_count_disables() {
    let policy = CountPolicy::new(0);
    let mut state = ExtractionState::default();
    state.files_extracted = 1_000_000;
    assert!(policy.check_archive(&state).is_ok());
}

// ============================================================================
// Permission policy
// ============================================================================

#[test]
fn permission_policy_rejects_setuid_and_setgid() {
    let policy = PermissionPolicy;
    assert!(policy.check_file(&file_info("a", 1, 0o755)).is_ok());
    assert!(policy.check_file(&file_info("b", 1, 0o4755)).is_err());
    assert!(policy.check_file(&file_info("c", 1, 0o2644)).is_err());
    assert!(policy.check_file(&file_info("d", 1, 0o6777)).is_err());
}

#[test]
fn permission_policy_passes_unknown_mode() {
    let info = EntryInfo {
        name: "x".to_string(),
        size: 1,
        kind: EntryKind::File,
        mode: None,
    };
    assert!(PermissionPolicy.check_file(&info).is_ok());
}

#[test]
fn sanitize_helper_clears_bits() {
    assert_eq!(sanitize_mode(0o4755), 0o755);
    assert_eq!(sanitize_mode(0o2755), 0o755);
    assert_eq!(sanitize_mode(0o755), 0o755);
}

// ============================================================================
// Path policy
// ============================================================================

#[test]
fn path_policy_accepts_nested_paths() {
    let root = tempdir().unwrap();
    let policy = PathPolicy::new(root.path(), false).unwrap();
    assert!(policy.check_path("a.txt").is_ok());
    assert!(policy.check_path("deep/nested/dir/file.txt").is_ok());
}

#[test]
fn path_policy_rejects_traversal_and_absolute() {
    let root = tempdir().unwrap();
    let policy = PathPolicy::new(root.path(), false).unwrap();
    assert!(policy.check_path("../escape.txt").is_err());
    assert!(policy.check_path("a/../../escape.txt").is_err());
    assert!(policy.check_path("/etc/passwd").is_err());
    assert!(policy.check_path("%2e%2e/escape.txt").is_err());
}

#[test]
fn path_policy_gates_hidden_files() {
    let root = tempdir().unwrap();

    let strict = PathPolicy::new(root.path(), false).unwrap();
    assert!(matches!(
        strict.check_path(".bashrc").unwrap_err(),
        Error::Security(SecurityError::HiddenFile { .. })
    ));
    assert!(strict.check_path("sub/.hidden").is_err());
    // Only the last segment matters
    assert!(strict.check_path(".config/ok.txt").is_ok());

    let relaxed = PathPolicy::new(root.path(), true).unwrap();
    assert!(relaxed.check_path(".bashrc").is_ok());
}

#[test]
fn path_policy_rejects_bad_filenames() {
    let root = tempdir().unwrap();
    let policy = PathPolicy::new(root.path(), false).unwrap();
    assert!(policy.check_path("").is_err());
    assert!(policy.check_path("nul\u{0}byte").is_err());
    assert!(policy.check_path("back\\slash.txt").is_err());
    assert!(policy.check_path(&"a/".repeat(600)).is_err());
}

#[test]
fn symlink_validation_resolves_relative_targets() {
    let root = tempdir().unwrap();
    let policy = PathPolicy::new(root.path(), false).unwrap();

    assert!(policy.check_symlink("sub/link", "../file.txt").is_ok());
    assert!(policy.check_symlink("link", "file.txt").is_ok());
    assert!(policy.check_symlink("a/b/link", "../../a/file").is_ok());

    assert!(policy.check_symlink("link", "../outside").is_err());
    assert!(policy.check_symlink("sub/link", "../../outside").is_err());
    assert!(policy.check_symlink("link", "/etc/passwd").is_err());
}

// ============================================================================
// Chain composition
// ============================================================================

#[test]
fn default_chain_runs_all_hooks() {
    let options = ExtractOptions::new()
        .max_files(1)
        .max_size(10)
        .max_file_size(5);
    let chain = PolicyChain::default_chain(&options);

    assert!(chain.check_file(&file_info("ok", 5, 0o644)).is_ok());
    assert!(chain.check_file(&file_info("big", 6, 0o644)).is_err());
    assert!(chain.check_file(&file_info("suid", 1, 0o4111)).is_err());

    let mut state = ExtractionState::default();
    state.files_extracted = 1;
    state.bytes_written = 10;
    assert!(chain.check_archive(&state).is_ok());
    state.files_extracted = 2;
    assert!(chain.check_archive(&state).is_err());
}

#[test]
fn chain_reports_first_violation() {
    let options = ExtractOptions::new().max_file_size(5);
    let chain = PolicyChain::default_chain(&options);

    // Oversized and setuid: the size policy sits first in the chain
    let err = chain.check_file(&file_info("evil", 100, 0o4755)).unwrap_err();
    assert!(matches!(
        err,
        Error::Security(SecurityError::FileTooLarge { .. })
    ));
}

#[test]
fn custom_chain_composes() {
    let chain = PolicyChain::new()
        .with(SizePolicy::new(10, 0))
        .with(PermissionPolicy);
    assert!(chain.check_file(&file_info("a", 5, 0o644)).is_ok());
    assert!(chain.check_file(&file_info("b", 11, 0o644)).is_err());
    assert!(chain.check_file(&file_info("c", 5, 0o4644)).is_err());
}
