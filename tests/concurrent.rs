//! Concurrent access tests for thread safety verification.
//!
//! Tests that the cache, workspace manager, and job submission handle
//! concurrent access correctly without panics or data corruption.

mod common;

use common::TestEnv;
use lintbox::services::{CacheService, Payload};
use lintbox::types::{CacheStatus, LintOptions, OutputFormat};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

// ============================================================================
// Concurrent Cache Access
// ============================================================================

#[test]
fn test_concurrent_cache_reads_and_writes() {
    let env = TestEnv::new();
    let cache = Arc::clone(&env.cache);
    let oh = CacheService::generate_options_hash(&LintOptions::default());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let oh = oh.clone();
            thread::spawn(move || {
                let ch = CacheService::generate_content_hash(format!("content {i}").as_bytes());
                for _ in 0..20 {
                    cache
                        .set(&ch, "eslint", "json", &oh, "{}".into(), CacheStatus::Success, None, None)
                        .unwrap();
                    let entry = cache.get(&ch, "eslint", &oh);
                    assert!(entry.is_some());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_hit_miss_counters_consistent_under_concurrency() {
    let env = TestEnv::new();
    let cache = Arc::clone(&env.cache);
    let oh = CacheService::generate_options_hash(&LintOptions::default());
    let ch = CacheService::generate_content_hash(b"shared");
    cache
        .set(&ch, "eslint", "json", &oh, "{}".into(), CacheStatus::Success, None, None)
        .unwrap();
    cache.reset_stats();

    const THREADS: u64 = 8;
    const CALLS: u64 = 50;
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let (ch, oh) = (ch.clone(), oh.clone());
            thread::spawn(move || {
                for k in 0..CALLS {
                    if (i + k) % 2 == 0 {
                        cache.get(&ch, "eslint", &oh);
                    } else {
                        // Unknown key: always a miss
                        cache.get(&"0".repeat(64), "eslint", &oh);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // After k calls to get, hits + misses == k
    let stats = cache.get_hit_miss_stats();
    assert_eq!(stats.hits + stats.misses, THREADS * CALLS);
    assert_eq!(stats.hits, THREADS * CALLS / 2);
}

#[test]
fn test_last_writer_wins_for_same_key() {
    let env = TestEnv::new();
    let cache = Arc::clone(&env.cache);
    let ch = CacheService::generate_content_hash(b"contended");
    let oh = CacheService::generate_options_hash(&LintOptions::default());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let (ch, oh) = (ch.clone(), oh.clone());
            thread::spawn(move || {
                cache
                    .set(
                        &ch,
                        "eslint",
                        "json",
                        &oh,
                        format!(r#"{{"writer":{i}}}"#),
                        CacheStatus::Success,
                        None,
                        None,
                    )
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Readers see one consistent entry written by some writer
    let entry = cache.get(&ch, "eslint", &oh).unwrap();
    assert!(entry.result.starts_with(r#"{"writer":"#));
}

// ============================================================================
// Concurrent Workspace Creation
// ============================================================================

#[test]
fn test_concurrent_workspace_creation_isolated() {
    let env = TestEnv::new();
    let workspaces = Arc::clone(&env.workspaces);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let workspaces = Arc::clone(&workspaces);
            thread::spawn(move || {
                let ws = workspaces
                    .create_from_text(&format!("content {i}"), Some("file.js"))
                    .unwrap();
                let content = std::fs::read_to_string(ws.path.join("file.js")).unwrap();
                assert_eq!(content, format!("content {i}"));
                ws.path
            })
        })
        .collect();

    let paths: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let unique: HashSet<_> = paths.iter().collect();
    assert_eq!(unique.len(), paths.len(), "workspace paths collided");
}

#[test]
fn test_concurrent_cleanup_and_creation() {
    let env = TestEnv::new();
    let workspaces = Arc::clone(&env.workspaces);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let workspaces = Arc::clone(&workspaces);
            thread::spawn(move || {
                for _ in 0..10 {
                    let ws = workspaces.create_from_text("x", None).unwrap();
                    workspaces.cleanup(&ws.path).unwrap();
                    // Idempotent under concurrency as well
                    workspaces.cleanup(&ws.path).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        std::fs::read_dir(workspaces.base_dir()).unwrap().count(),
        0
    );
}

// ============================================================================
// Concurrent Job Submission
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_unique_ids() {
    let env = TestEnv::new();
    let jobs = env.jobs(2, 30_000).await;

    let mut handles = Vec::new();
    for i in 0..24 {
        let jobs = Arc::clone(&jobs);
        handles.push(tokio::spawn(async move {
            jobs.submit_job(
                "eslint",
                OutputFormat::Json,
                &Payload::Text {
                    content: format!("console.log({i})"),
                    filename: None,
                },
                &LintOptions::default(),
            )
            .await
            .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let id = handle.await.unwrap();
        assert!(ids.insert(id.as_str().to_string()), "duplicate job id");
    }
    assert_eq!(ids.len(), 24);
}
