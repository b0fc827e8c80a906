//! Runs the orchestrator against a real `EngineHandle` over a loopback transport.

use chrono::{Duration, Utc};
use retainer_engine::transport::loopback;
use retainer_engine::{EngineError, EngineHandle, EngineSettings, RpcError};
use retainer_orchestrator::{
    DocListSource, FailureStage, OutcomeKind, RetentionPolicy, SkipReason, TruncationOrchestrator,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

type Methods = Arc<Mutex<Vec<String>>>;

/// Answers engine requests with `respond`; `None` leaves a request unanswered.
fn engine_with<F>(respond: F) -> (EngineHandle, Methods)
where
    F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
{
    let (session, mut peer) = loopback(None);
    let methods: Methods = Arc::default();
    let seen = methods.clone();
    tokio::spawn(async move {
        while let Some(request) = peer.recv_json().await {
            let method = request["method"].as_str().unwrap_or_default().to_string();
            seen.lock().unwrap().push(method.clone());
            if let Some(mut reply) = respond(&method, &request) {
                reply["jsonrpc"] = json!("2.0");
                reply["id"] = request["id"].clone();
                peer.send_json(&reply);
            }
        }
    });

    let settings = EngineSettings {
        call_timeout: StdDuration::from_millis(100),
        ..EngineSettings::default()
    };
    (EngineHandle::over(session, settings), methods)
}

fn days_ago(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339()
}

#[tokio::test]
async fn test_doc_list_run_truncates_idle_apps_only() {
    let stale = days_ago(400);
    let fresh = days_ago(5);
    let (engine, methods) = engine_with(move |method, _| match method {
        "EngineVersion" => Some(json!({"result": {"qVersion": {"qComponentVersion": "12.1477.4"}}})),
        "GetDocList" => Some(json!({"result": {"qDocList": [
            {"qDocName": "Old.qvf", "qDocId": "old", "qFileSize": 2048.0, "qLastReloadTime": stale},
            {"qDocName": "New.qvf", "qDocId": "new", "qFileSize": 2048.0, "qLastReloadTime": fresh}
        ]}})),
        "OpenDoc" => Some(json!({"result": {"qReturn": {"qType": "Doc", "qHandle": 1}}})),
        "DoSave" => Some(json!({"result": {}})),
        _ => None,
    });

    let orchestrator = TruncationOrchestrator::new(&engine, RetentionPolicy::idle_days(90));
    let report = orchestrator.run(&DocListSource::new(&engine)).await;

    assert!(matches!(report.outcome("old").unwrap().kind, OutcomeKind::Truncated));
    assert!(matches!(
        report.outcome("new").unwrap().kind,
        OutcomeKind::Skipped(SkipReason::NotIdle)
    ));
    assert_eq!(
        *methods.lock().unwrap(),
        vec!["EngineVersion", "GetDocList", "OpenDoc", "DoSave"]
    );
    assert!(engine.rpc().is_closed().await);
}

#[tokio::test]
async fn test_unanswered_open_times_out_as_open_error() {
    let (engine, methods) = engine_with(|method, _| match method {
        "EngineVersion" => Some(json!({"result": {"qVersion": {"qComponentVersion": "12.1477.4"}}})),
        _ => None,
    });

    let candidate = retainer_orchestrator::RetentionCandidate::new("slow", "Slow")
        .reloaded_at(Utc::now() - Duration::days(400));
    let report = TruncationOrchestrator::new(&engine, RetentionPolicy::idle_days(90))
        .run_candidates(vec![candidate])
        .await;

    let outcome = report.outcome("slow").unwrap();
    assert_eq!(outcome.kind.failure_stage(), Some(FailureStage::Open));
    assert!(matches!(
        outcome.kind.error(),
        Some(EngineError::Open { source: RpcError::Timeout { .. }, .. })
    ));
    assert!(report.aborted.is_none());
    assert_eq!(*methods.lock().unwrap(), vec!["EngineVersion", "OpenDoc"]);
}

#[tokio::test]
async fn test_peer_save_error_is_reported_as_save_failure() {
    let (engine, _) = engine_with(|method, _| match method {
        "EngineVersion" => Some(json!({"result": {"qVersion": {"qComponentVersion": "12.1477.4"}}})),
        "OpenDoc" => Some(json!({"result": {"qReturn": {"qType": "Doc", "qHandle": 3}}})),
        "DoSave" => Some(json!({"error": {"code": 1004, "message": "Save failed"}})),
        _ => None,
    });

    let candidate = retainer_orchestrator::RetentionCandidate::new("a", "A")
        .reloaded_at(Utc::now() - Duration::days(400));
    let report = TruncationOrchestrator::new(&engine, RetentionPolicy::idle_days(90))
        .run_candidates(vec![candidate])
        .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.kind.to_string(), "failed(SaveError)");
    assert!(matches!(
        outcome.kind.error().and_then(EngineError::rpc_error),
        Some(RpcError::Remote { code: 1004, .. })
    ));
}
