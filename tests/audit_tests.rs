//! Audit export tests
//!
//! Runs a short session, writes its snapshot and prediction history as JSON lines
//! and reads it back.

mod common;

use std::io::Write;

use adaptive_learning_engine::engine::audit::{read_jsonl, write_jsonl, AuditRecord};
use adaptive_learning_engine::engine::{
    EngineError, EventInput, EventKind, EventPayload, Grade, InMemoryProblemRepository,
    LearnerProfile, Tier,
};

use common::harness;

fn tired_submit(id: usize) -> EventInput {
    EventInput {
        kind: EventKind::Submit,
        problem_id: Some(format!("p{id}")),
        payload: EventPayload {
            time_spent_ms: 45_000,
            hesitations: 3,
            mouse_moves: 120,
            is_correct: Some(id % 3 == 0),
            topic: Some("fractions".into()),
            ..Default::default()
        },
    }
}

#[test]
fn test_session_history_round_trips_through_jsonl() {
    let h = harness(InMemoryProblemRepository::default());
    let handle = h
        .services
        .open_session(LearnerProfile::new("kid-audit", Grade::Fifth, Tier::Advanced))
        .expect("session opens");

    for round in 0..4 {
        for i in 0..3 {
            h.clock.advance(1_500);
            handle.record(tired_submit(round * 3 + i));
        }
        handle.tick().expect("tick succeeds");
    }
    let records = handle.lock().audit_records();
    let snapshots = records
        .iter()
        .filter(|r| matches!(r, AuditRecord::Snapshot(_)))
        .count();
    let predictions = records.len() - snapshots;
    assert_eq!(snapshots, 4);
    assert!(predictions > 0);

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("audit").join("session.jsonl");
    let written = write_jsonl(&path, &records).expect("audit written");
    assert_eq!(written, records.len());

    let raw = std::fs::read_to_string(&path).expect("audit readable");
    assert_eq!(raw.lines().count(), records.len());
    let first: serde_json::Value =
        serde_json::from_str(raw.lines().next().expect("at least one line")).expect("valid json");
    assert!(first.get("record").is_some());
    assert!(first.get("timestamp").is_some());
    assert_eq!(first["session_id"], handle.id());

    let restored = read_jsonl(&path).expect("audit read back");
    assert_eq!(restored.len(), records.len());
    for (back, original) in restored.iter().zip(&records) {
        assert_eq!(back.timestamp(), original.timestamp());
        match (back, original) {
            (AuditRecord::Snapshot(a), AuditRecord::Snapshot(b)) => {
                assert_eq!(a.event_count, b.event_count);
                assert!((a.fatigue - b.fatigue).abs() < 1e-9);
                assert!((a.accuracy - b.accuracy).abs() < 1e-9);
            }
            (AuditRecord::Prediction(a), AuditRecord::Prediction(b)) => {
                assert_eq!(a.pattern_id, b.pattern_id);
                assert!((a.probability - b.probability).abs() < 1e-9);
            }
            _ => panic!("record kinds differ at {}", original.timestamp()),
        }
    }
}

#[test]
fn test_read_skips_blank_lines_and_rejects_garbage() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"{{"record":"prediction","timestamp":5,"session_id":"s","pattern_id":"cognitive_overload","error_type":"memory","method":"cognitive_load","probability":0.9,"confidence":0.85,"severity":0.7,"time_to_error_secs":54.0,"intervention_window_secs":90.0}}"#
    )
    .expect("write line");
    writeln!(file).expect("write blank");
    file.flush().expect("flush");

    let records = read_jsonl(file.path()).expect("valid file parses");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp(), 5);

    writeln!(file, "not json").expect("write garbage");
    file.flush().expect("flush");
    assert!(matches!(read_jsonl(file.path()), Err(EngineError::Serde(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let result = read_jsonl(dir.path().join("absent.jsonl"));
    assert!(matches!(result, Err(EngineError::Io(_))));
}
