//! Cache behaviour integration tests.
//!
//! Covers key derivation stability, expiry visibility, hit/miss
//! accounting through the pipeline, and cached-outcome replay for
//! success, timeout, and failure entries.

mod common;

use common::TestEnv;
use lintbox::services::{CacheService, LintOutcome, Payload};
use lintbox::types::{CacheStatus, ExecutionResult, LintOptions, OutputFormat};

fn text_payload(content: &str) -> Payload {
    Payload::Text {
        content: content.to_string(),
        filename: Some("code.js".to_string()),
    }
}

// ============================================================================
// Key derivation
// ============================================================================

#[test]
fn test_options_hash_ignores_key_and_array_order() {
    let a: LintOptions = serde_json::from_str(
        r#"{"validate_all":true,"exclude_patterns":["b","a"],"timeout":5000}"#,
    )
    .unwrap();
    let b: LintOptions = serde_json::from_str(
        r#"{"timeout":5000,"exclude_patterns":["a","b"],"validate_all":true}"#,
    )
    .unwrap();

    assert_eq!(
        CacheService::generate_options_hash(&a),
        CacheService::generate_options_hash(&b)
    );
}

#[test]
fn test_content_hash_is_64_hex_chars() {
    for content in ["", "a", "console.log(1)", "\u{1F980} unicode"] {
        let hash = CacheService::generate_content_hash(content.as_bytes());
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}

#[test]
fn test_cache_key_layout() {
    let key = CacheService::generate_cache_key("c", "eslint", "json", "o");
    assert_eq!(key, "eslint:json:c:o");
}

// ============================================================================
// Round trip and expiry
// ============================================================================

#[test]
fn test_round_trip_preserves_result() {
    let env = TestEnv::new();
    let original = ExecutionResult {
        success: true,
        exit_code: 1,
        stdout: "raw".into(),
        stderr: String::new(),
        execution_time_ms: 33,
        parsed_output: serde_json::json!({"k": [1, 2]}),
        file_count: 2,
        issues: vec![],
        output_truncated: false,
    };

    let ch = CacheService::generate_content_hash(b"content");
    let oh = CacheService::generate_options_hash(&LintOptions::default());
    env.cache
        .set(
            &ch,
            "eslint",
            "json",
            &oh,
            serde_json::to_string(&original).unwrap(),
            CacheStatus::Success,
            None,
            None,
        )
        .unwrap();

    let entry = env.cache.get(&ch, "eslint", &oh).unwrap();
    let restored: ExecutionResult = serde_json::from_str(&entry.result).unwrap();
    assert_eq!(restored.exit_code, original.exit_code);
    assert_eq!(restored.parsed_output, original.parsed_output);
    assert_eq!(restored.file_count, original.file_count);
}

#[test]
fn test_expired_entry_invisible_then_swept() {
    let env = TestEnv::new();
    let ch = CacheService::generate_content_hash(b"short lived");
    let oh = CacheService::generate_options_hash(&LintOptions::default());

    env.cache
        .set(&ch, "eslint", "json", &oh, "{}".into(), CacheStatus::Success, None, Some(0))
        .unwrap();

    assert!(env.cache.get(&ch, "eslint", &oh).is_none());
    assert_eq!(env.cache.cleanup().unwrap(), 1);
    assert_eq!(env.cache.get_stats().unwrap().total_entries, 0);
}

// ============================================================================
// Pipeline replay
// ============================================================================

#[tokio::test]
async fn test_pipeline_replays_cached_success_without_running() {
    let env = TestEnv::new();
    let options = LintOptions::default();
    env.seed_cache("console.log(1)", "eslint", "json", &options);

    // eslint is not installed in the test environment; only a cache
    // hit can produce a success here.
    let LintOutcome { result, cache_hit } = env
        .pipeline
        .execute(
            "eslint",
            OutputFormat::Json,
            &text_payload("console.log(1)"),
            &options,
            None,
        )
        .await
        .unwrap();

    assert!(cache_hit);
    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.file_count, 1);
}

#[tokio::test]
async fn test_pipeline_replays_cached_timeout_as_error() {
    let env = TestEnv::new();
    let options = LintOptions::default();
    let ch = CacheService::generate_content_hash(b"slow code");
    let oh = CacheService::generate_options_hash(&options);
    env.cache
        .set(
            &ch,
            "eslint",
            "json",
            &oh,
            "null".into(),
            CacheStatus::Timeout,
            Some("Linter eslint exceeded timeout of 1000ms".into()),
            None,
        )
        .unwrap();

    let err = env
        .pipeline
        .execute(
            "eslint",
            OutputFormat::Json,
            &text_payload("slow code"),
            &options,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TIMEOUT_ERROR");
    assert_eq!(err.http_status(), 408);
}

#[tokio::test]
async fn test_pipeline_replays_cached_failure_as_error() {
    let env = TestEnv::new();
    let options = LintOptions::default();
    let ch = CacheService::generate_content_hash(b"broken code");
    let oh = CacheService::generate_options_hash(&options);
    env.cache
        .set(
            &ch,
            "eslint",
            "json",
            &oh,
            "null".into(),
            CacheStatus::Error,
            Some("parse explosion".into()),
            None,
        )
        .unwrap();

    let err = env
        .pipeline
        .execute(
            "eslint",
            OutputFormat::Json,
            &text_payload("broken code"),
            &options,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LINTER_EXECUTION_FAILED");
}

#[tokio::test]
async fn test_pipeline_counts_hits_and_misses() {
    let env = TestEnv::new();
    let options = LintOptions::default();
    env.seed_cache("cached", "eslint", "json", &options);
    env.cache.reset_stats();

    // Hit
    env.pipeline
        .execute(
            "eslint",
            OutputFormat::Json,
            &text_payload("cached"),
            &options,
            None,
        )
        .await
        .unwrap();

    // Miss (then fails because eslint is absent; the miss still counts)
    let _ = env
        .pipeline
        .execute(
            "eslint",
            OutputFormat::Json,
            &text_payload("uncached"),
            &options,
            None,
        )
        .await;

    let stats = env.cache.get_hit_miss_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.misses, 2);
}

#[tokio::test]
async fn test_different_options_split_the_cache() {
    let env = TestEnv::new();
    let strict = LintOptions::default();
    let relaxed = LintOptions {
        exclude_patterns: vec!["tests/**".into()],
        ..LintOptions::default()
    };
    env.seed_cache("same content", "eslint", "json", &strict);

    // Same content, different options: miss
    let err = env
        .pipeline
        .execute(
            "eslint",
            OutputFormat::Json,
            &text_payload("same content"),
            &relaxed,
            None,
        )
        .await
        .unwrap_err();
    // The miss fell through to the real runner, which has no eslint
    assert_eq!(err.code(), "LINTER_NOT_FOUND");
}

#[tokio::test]
async fn test_invalidation_forces_rerun() {
    let env = TestEnv::new();
    let options = LintOptions::default();
    env.seed_cache("content", "eslint", "json", &options);

    env.cache.invalidate(None, Some("eslint")).unwrap();

    let err = env
        .pipeline
        .execute(
            "eslint",
            OutputFormat::Json,
            &text_payload("content"),
            &options,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LINTER_NOT_FOUND");
}
