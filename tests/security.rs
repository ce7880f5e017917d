//! Security integration tests for workspace provisioning.
//!
//! Exercises the archive admission policy end to end: traversal
//! defense, segment blocklist, extension allowlist, quota enforcement,
//! and cleanup behaviour.

mod common;

use common::{b64, tar_gz, TestEnv};
use lintbox::error::WorkspaceError;
use lintbox::services::ArchiveKind;
use std::fs;
use std::path::PathBuf;

// ============================================================================
// Path Traversal Defense
// ============================================================================

#[test]
fn test_traversal_archive_yields_empty_workspace() {
    let env = TestEnv::new();

    let archive = tar_gz(&[
        ("../../../etc/passwd.txt", "root:x:0:0"),
        ("../../malicious.js", "pwn()"),
    ]);
    let ws = env
        .workspaces
        .create_from_buffer(&archive, ArchiveKind::TarGz)
        .unwrap();

    assert!(ws.files.is_empty());
    assert_eq!(ws.size_bytes, 0);

    // Nothing landed outside the workspace base
    assert!(!env.dir.path().join("malicious.js").exists());
    assert!(!env.dir.path().join("etc").exists());
}

#[test]
fn test_mixed_archive_keeps_only_safe_entries() {
    let env = TestEnv::new();

    let archive = tar_gz(&[
        ("src/app.js", "console.log(1)"),
        ("../escape.js", "evil"),
        ("node_modules/dep/index.js", "dep"),
        (".git/config.yml", "vcs"),
        ("binary.exe", "MZ"),
        ("docs/readme.md", "# hi"),
    ]);
    let ws = env
        .workspaces
        .create_from_buffer(&archive, ArchiveKind::TarGz)
        .unwrap();

    assert_eq!(
        ws.files,
        vec![PathBuf::from("docs/readme.md"), PathBuf::from("src/app.js")]
    );
}

#[test]
fn test_every_extracted_file_resolves_inside_workspace() {
    let env = TestEnv::new();

    let archive = tar_gz(&[
        ("a.js", "1"),
        ("nested/deep/b.py", "2"),
        ("nested/../c.rb", "3"),
    ]);
    let ws = env
        .workspaces
        .create_from_buffer(&archive, ArchiveKind::TarGz)
        .unwrap();

    for rel in &ws.files {
        let resolved = ws.path.join(rel).canonicalize().unwrap();
        assert!(
            resolved.starts_with(ws.path.canonicalize().unwrap()),
            "{} escaped the workspace",
            rel.display()
        );
    }
    // The normalized "nested/../c.rb" became "c.rb"
    assert!(ws.files.contains(&PathBuf::from("c.rb")));
}

// ============================================================================
// Quotas
// ============================================================================

#[test]
fn test_single_file_quota() {
    let env = TestEnv::with_config(|c| c.max_file_bytes = 1024);

    let err = env
        .workspaces
        .create_from_text(&"x".repeat(1500), Some("big.js"))
        .unwrap_err();
    assert!(matches!(
        err,
        WorkspaceError::ContentTooLarge {
            size: 1500,
            limit: 1024
        }
    ));
}

#[test]
fn test_archive_decompression_quota() {
    let env = TestEnv::with_config(|c| c.max_archive_bytes = 32 * 1024);

    let bomb = "0".repeat(1024 * 1024);
    let archive = tar_gz(&[("huge.js", bomb.as_str())]);
    assert!(archive.len() < 32 * 1024, "bomb should compress small");

    let err = env
        .workspaces
        .create_from_buffer(&archive, ArchiveKind::TarGz)
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::ArchiveTooLarge { .. }));

    // No partial workspace survives
    assert_eq!(
        fs::read_dir(env.workspaces.base_dir()).unwrap().count(),
        0
    );
}

#[test]
fn test_file_count_quota() {
    let env = TestEnv::with_config(|c| c.max_workspace_files = 3);

    let names: Vec<String> = (0..5).map(|i| format!("f{i}.js")).collect();
    let entries: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "x")).collect();

    let err = env
        .workspaces
        .create_from_buffer(&tar_gz(&entries), ArchiveKind::TarGz)
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::TooManyFiles { limit: 3 }));
    assert_eq!(
        fs::read_dir(env.workspaces.base_dir()).unwrap().count(),
        0
    );
}

#[test]
fn test_blocked_entries_do_not_count_toward_quota() {
    let env = TestEnv::with_config(|c| c.max_workspace_files = 2);

    let archive = tar_gz(&[
        ("node_modules/a.js", "x"),
        ("node_modules/b.js", "x"),
        ("node_modules/c.js", "x"),
        ("keep1.js", "x"),
        ("keep2.js", "x"),
    ]);
    let ws = env
        .workspaces
        .create_from_buffer(&archive, ArchiveKind::TarGz)
        .unwrap();
    assert_eq!(ws.files.len(), 2);
}

// ============================================================================
// Base64 dispatch
// ============================================================================

#[test]
fn test_base64_gzip_magic_routes_to_archive() {
    let env = TestEnv::new();

    let archive = tar_gz(&[("src/main.py", "x = 1")]);
    let ws = env.workspaces.create_from_base64(&b64(&archive)).unwrap();
    assert_eq!(ws.files, vec![PathBuf::from("src/main.py")]);
}

#[test]
fn test_base64_plain_text_becomes_single_file() {
    let env = TestEnv::new();

    let ws = env
        .workspaces
        .create_from_base64(&b64(b"plain source text"))
        .unwrap();
    assert_eq!(ws.files, vec![PathBuf::from("code.txt")]);
    let content = fs::read_to_string(ws.path.join("code.txt")).unwrap();
    assert_eq!(content, "plain source text");
}

#[test]
fn test_invalid_base64_rejected() {
    let env = TestEnv::new();
    let err = env.workspaces.create_from_base64("!!definitely not b64!!").unwrap_err();
    assert!(matches!(err, WorkspaceError::InvalidBase64(_)));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_cleanup_idempotent_and_silent_on_missing() {
    let env = TestEnv::new();

    let ws = env.workspaces.create_from_text("x", None).unwrap();
    env.workspaces.cleanup(&ws.path).unwrap();
    env.workspaces.cleanup(&ws.path).unwrap();
    env.workspaces
        .cleanup(std::path::Path::new("/nonexistent/nowhere"))
        .unwrap();
}

#[test]
fn test_cleanup_expired_removes_only_old_workspaces() {
    let env = TestEnv::with_config(|c| c.workspace_max_age_secs = 0);

    let ws = env.workspaces.create_from_text("x", None).unwrap();
    // With a zero max age everything qualifies immediately
    std::thread::sleep(std::time::Duration::from_millis(20));
    let removed = env.workspaces.cleanup_expired().unwrap();
    assert_eq!(removed, 1);
    assert!(!ws.path.exists());

    let fresh_env = TestEnv::new(); // default one-hour max age
    let fresh = fresh_env.workspaces.create_from_text("x", None).unwrap();
    assert_eq!(fresh_env.workspaces.cleanup_expired().unwrap(), 0);
    assert!(fresh.path.exists());
}

#[test]
fn test_validate_reports() {
    let env = TestEnv::new();

    let ws = env.workspaces.create_from_text("x", Some("ok.js")).unwrap();
    let report = env.workspaces.validate(&ws.path);
    assert!(report.valid);
    assert!(report.errors.is_empty());

    env.workspaces.cleanup(&ws.path).unwrap();
    let report = env.workspaces.validate(&ws.path);
    assert!(!report.valid);
}
