//! Flat, timestamp-keyed JSON-lines export of snapshot and prediction history.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::engine::types::{DetectionMethod, ErrorPrediction, ErrorType, StateSnapshot, TrendState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: i64,
    pub session_id: String,
    pub processing_time_ms: f64,
    pub hesitation_rate: f64,
    pub error_frequency: f64,
    pub attention_fluctuation: f64,
    pub fatigue: f64,
    pub frustration: f64,
    pub confidence: f64,
    pub engagement: f64,
    pub motivation: f64,
    pub accuracy: f64,
    pub speed: f64,
    pub efficiency: f64,
    pub consistency: f64,
    pub trend: TrendState,
    pub event_count: usize,
    #[serde(default)]
    pub topic_mastery: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub timestamp: i64,
    pub session_id: String,
    pub pattern_id: String,
    pub error_type: ErrorType,
    pub method: DetectionMethod,
    pub probability: f64,
    pub confidence: f64,
    pub severity: f64,
    pub time_to_error_secs: f64,
    pub intervention_window_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    Snapshot(SnapshotRecord),
    Prediction(PredictionRecord),
}

impl AuditRecord {
    pub fn from_snapshot(session_id: &str, snapshot: &StateSnapshot) -> Self {
        let load = &snapshot.cognitive_load;
        let emotional = &snapshot.emotional;
        let performance = &snapshot.performance;
        AuditRecord::Snapshot(SnapshotRecord {
            timestamp: snapshot.timestamp,
            session_id: session_id.to_string(),
            processing_time_ms: load.processing_time_ms,
            hesitation_rate: load.hesitation_rate,
            error_frequency: load.error_frequency,
            attention_fluctuation: load.attention_fluctuation,
            fatigue: load.fatigue,
            frustration: emotional.frustration,
            confidence: emotional.confidence,
            engagement: emotional.engagement,
            motivation: emotional.motivation,
            accuracy: performance.accuracy,
            speed: performance.speed,
            efficiency: performance.efficiency,
            consistency: performance.consistency,
            trend: snapshot.trend,
            event_count: snapshot.event_count,
            topic_mastery: snapshot.topic_mastery.clone(),
        })
    }

    pub fn from_prediction(session_id: &str, prediction: &ErrorPrediction) -> Self {
        AuditRecord::Prediction(PredictionRecord {
            timestamp: prediction.created_at,
            session_id: session_id.to_string(),
            pattern_id: prediction.pattern_id.clone(),
            error_type: prediction.error_type,
            method: prediction.method,
            probability: prediction.probability,
            confidence: prediction.confidence,
            severity: prediction.severity,
            time_to_error_secs: prediction.time_to_error_secs,
            intervention_window_secs: prediction.intervention_window_secs,
        })
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            AuditRecord::Snapshot(r) => r.timestamp,
            AuditRecord::Prediction(r) => r.timestamp,
        }
    }
}

/// Merges both histories into one timestamp-ordered record list.
pub fn collect_records<'a>(
    session_id: &str,
    snapshots: impl IntoIterator<Item = &'a StateSnapshot>,
    predictions: impl IntoIterator<Item = &'a ErrorPrediction>,
) -> Vec<AuditRecord> {
    let mut records: Vec<AuditRecord> = snapshots
        .into_iter()
        .map(|s| AuditRecord::from_snapshot(session_id, s))
        .chain(
            predictions
                .into_iter()
                .map(|p| AuditRecord::from_prediction(session_id, p)),
        )
        .collect();
    records.sort_by_key(AuditRecord::timestamp);
    records
}

pub fn write_jsonl(path: impl AsRef<Path>, records: &[AuditRecord]) -> Result<usize, EngineError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    tracing::debug!(path = %path.display(), records = records.len(), "audit log written");
    Ok(records.len())
}

pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>, EngineError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
