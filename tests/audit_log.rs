//! Audit Log Integration Tests
//!
//! Both persistent backends honour the same append-only contract and
//! survive being reopened.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dealscout::core::orchestrator::{record_feedback, restore};
use dealscout::core::{
    AuditSink, EvolutionSettings, JsonlAuditLog, SqliteAuditLog, WeightEvolutionTracker, WeightStore,
};
use dealscout::domain::weights::default_signal_weights;
use dealscout::domain::{DecisionRecord, SignalType, VerificationStatus, WeightMutation, WeightState};
use tempfile::TempDir;

fn at(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 2, 14, 30, second).unwrap()
}

fn decision(name: &str, score: f64, second: u32) -> DecisionRecord {
    DecisionRecord {
        candidate_name: name.to_string(),
        weight_version: 0,
        authenticity_score: score,
        status: if score > 0.0 {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Rejected
        },
        feedback_score: None,
        timestamp: at(second),
        signal_types: vec![SignalType::BatchMembership, SignalType::FundingRound],
        weights: default_signal_weights(),
    }
}

fn mutation(parameter: SignalType, old_value: f64, new_value: f64) -> WeightMutation {
    WeightMutation {
        parameter,
        old_value,
        new_value,
        trigger: "trend slope -0.0700 below -0.001, best-seen 0.3000, gap 0.0500".to_string(),
        version: 1,
        timestamp: at(59),
    }
}

/// Append-only semantics shared by every backend
async fn exercise(sink: &dyn AuditSink) {
    assert!(sink.decisions().await.unwrap().is_empty());
    assert!(sink.mutations().await.unwrap().is_empty());

    sink.append_decision(&decision("Acme", 0.91, 0)).await.unwrap();
    sink.append_decision(&decision("智聊AI客服", 0.0, 1)).await.unwrap();
    sink.append_decision(&decision("Acme", 0.88, 2)).await.unwrap();

    let tracker = WeightEvolutionTracker::new(Arc::new(WeightStore::default()), EvolutionSettings::default());
    let feedback = record_feedback(sink, &tracker, "Acme", 0.75, at(30)).await.unwrap();
    assert_eq!(feedback.authenticity_score, 0.88);
    assert_eq!(tracker.window_len(SignalType::FundingRound), 1);

    sink.append_mutation(&mutation(SignalType::FundingRound, 0.25, 0.2537)).await.unwrap();
    sink.append_mutation(&mutation(SignalType::Other, 0.08, 0.0796)).await.unwrap();

    let decisions = sink.decisions().await.unwrap();
    let names: Vec<&str> = decisions.iter().map(|d| d.candidate_name.as_str()).collect();
    assert_eq!(names, vec!["Acme", "智聊AI客服", "Acme", "Acme"]);
    assert_eq!(decisions[1].status, VerificationStatus::Rejected);
    assert_eq!(decisions[3].feedback_score, Some(0.75));
    assert_eq!(decisions[3].timestamp, at(30));
    // earlier rows are never rewritten
    assert_eq!(decisions[2].feedback_score, None);
    assert_eq!(decisions[0].weights, default_signal_weights());

    let mutations = sink.mutations().await.unwrap();
    assert_eq!(mutations.len(), 2);
    assert_eq!(mutations[0], mutation(SignalType::FundingRound, 0.25, 0.2537));
}

#[tokio::test]
async fn test_jsonl_contract_and_reopen() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("audit");

    exercise(&JsonlAuditLog::open(&dir).await.unwrap()).await;

    let reopened = JsonlAuditLog::open(&dir).await.unwrap();
    assert_eq!(reopened.decisions().await.unwrap().len(), 4);
    assert_eq!(reopened.mutations().await.unwrap().len(), 2);

    let contents = std::fs::read_to_string(reopened.decisions_path()).unwrap();
    assert_eq!(contents.lines().count(), 4);
    assert!(contents.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
}

#[tokio::test]
async fn test_interrupted_append_does_not_block_restart() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("audit");
    let log = JsonlAuditLog::open(&dir).await.unwrap();
    log.append_decision(&decision("Acme", 0.91, 0)).await.unwrap();
    log.append_mutation(&mutation(SignalType::FundingRound, 0.25, 0.2537)).await.unwrap();
    log.append_mutation(&mutation(SignalType::Other, 0.08, 0.0763)).await.unwrap();

    // process died halfway through writing each table
    for path in [log.decisions_path(), log.evolution_path()] {
        let mut raw = std::fs::read_to_string(path).unwrap();
        raw.push_str(r#"{"candidate_name":"B","weight_ver"#);
        std::fs::write(path, raw).unwrap();
    }

    let reopened = JsonlAuditLog::open(&dir).await.unwrap();
    let (store, tracker) = restore(&reopened, WeightState::default(), EvolutionSettings::default())
        .await
        .unwrap();
    assert_eq!(store.version(), 1);
    assert_eq!(tracker.window_len(SignalType::FundingRound), 0);

    reopened.append_decision(&decision("Globex", 0.5, 3)).await.unwrap();
    let names: Vec<String> = reopened.decisions().await.unwrap().into_iter().map(|d| d.candidate_name).collect();
    assert_eq!(names, vec!["Acme".to_string(), "Globex".to_string()]);
}

#[tokio::test]
async fn test_sqlite_contract_and_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("audit.db");

    exercise(&SqliteAuditLog::open(&path).unwrap()).await;

    let reopened = SqliteAuditLog::open(&path).unwrap();
    let decisions = reopened.decisions().await.unwrap();
    assert_eq!(decisions.len(), 4);
    assert_eq!(decisions[3].feedback_score, Some(0.75));
    assert_eq!(reopened.mutations().await.unwrap()[1].parameter, SignalType::Other);
}

#[tokio::test]
async fn test_backends_agree() {
    let temp = TempDir::new().unwrap();
    let jsonl = JsonlAuditLog::open(temp.path().join("audit")).await.unwrap();
    let sqlite = SqliteAuditLog::in_memory().unwrap();

    exercise(&jsonl).await;
    exercise(&sqlite).await;

    assert_eq!(jsonl.decisions().await.unwrap(), sqlite.decisions().await.unwrap());
    assert_eq!(jsonl.mutations().await.unwrap(), sqlite.mutations().await.unwrap());
}

#[tokio::test]
async fn test_replay_order_survives_interleaved_writers() {
    let temp = TempDir::new().unwrap();
    let sink: Arc<dyn AuditSink> = Arc::new(SqliteAuditLog::open(temp.path().join("audit.db")).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                for i in 0..10 {
                    sink.append_decision(&decision(&format!("w{}", w), 0.5, i)).await.unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let decisions = sink.decisions().await.unwrap();
    assert_eq!(decisions.len(), 40);

    // each writer's rows appear in the order it wrote them
    let mut per_writer: BTreeMap<String, Vec<DateTime<Utc>>> = BTreeMap::new();
    for d in decisions {
        per_writer.entry(d.candidate_name).or_default().push(d.timestamp);
    }
    for timestamps in per_writer.values() {
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    }
}
