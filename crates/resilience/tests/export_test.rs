use std::io::BufRead;
use std::time::Duration;

use mdcache_common::ManualClock;
use mdcache_errors::AppError;
use mdcache_resilience::{
    ErrorRecord, ExportFormat, FaultContext, FaultToleranceConfig, RecoveryEngine, Severity,
};

async fn engine_with_history() -> RecoveryEngine {
    let engine = RecoveryEngine::new(
        FaultToleranceConfig::default().with_breaker(3, Duration::from_secs(10), 2),
        ManualClock::starting_now(),
    );
    engine
        .handle(
            AppError::connection("connection reset"),
            FaultContext::new().with_source("tdx"),
        )
        .await
        .unwrap();
    engine
        .handle(
            AppError::validation("bad symbol"),
            FaultContext::new()
                .with_severity(Severity::Low)
                .with_context("symbol", "ABC"),
        )
        .await
        .unwrap();
    engine
}

#[tokio::test]
async fn test_export_json_array() {
    let engine = engine_with_history().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("errors.json");

    let count = engine.export(&path, ExportFormat::Json).unwrap();
    assert_eq!(count, 2);

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains('\n'), "pretty output expected");
    let records: Vec<ErrorRecord> = serde_json::from_str(&content).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].source, "tdx");
    assert!(records[0].resolved);
    assert_eq!(records[1].context["symbol"], "ABC");

    let raw: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(raw[0]["category"], "network");
    assert_eq!(raw[1]["severity"], "low");
}

#[tokio::test]
async fn test_export_json_lines() {
    let engine = engine_with_history().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("errors.jsonl");

    let format: ExportFormat = "jsonl".parse().unwrap();
    assert_eq!(engine.export(&path, format).unwrap(), 2);

    let file = std::fs::File::open(&path).unwrap();
    let records: Vec<ErrorRecord> = std::io::BufReader::new(file)
        .lines()
        .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
        .collect();
    assert_eq!(records, engine.list_errors(&Default::default()));
}

#[tokio::test]
async fn test_export_to_missing_directory_fails() {
    let engine = engine_with_history().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("errors.json");

    let err = engine.export(&path, ExportFormat::Json).unwrap_err();
    assert!(matches!(err, AppError::Io(_)));
}
