use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::intervention::PhaseChange;
use crate::engine::types::{DifficultyRecommendation, ErrorPrediction, Intervention, TrendState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    #[serde(rename = "SNAPSHOT_COMPUTED")]
    SnapshotComputed {
        session_id: String,
        timestamp: i64,
        fatigue: f64,
        accuracy: f64,
        trend: TrendState,
        /// False when the window was empty and the previous snapshot was reused.
        fresh: bool,
    },

    #[serde(rename = "PREDICTIONS_UPDATED")]
    PredictionsUpdated {
        session_id: String,
        timestamp: i64,
        active: Vec<ErrorPrediction>,
    },

    #[serde(rename = "DIFFICULTY_RECOMMENDED")]
    DifficultyRecommended {
        session_id: String,
        timestamp: i64,
        recommendation: DifficultyRecommendation,
    },

    #[serde(rename = "INTERVENTION_FIRED")]
    InterventionFired {
        session_id: String,
        intervention: Intervention,
    },

    #[serde(rename = "PHASE_CHANGED")]
    PhaseChanged {
        session_id: String,
        change: PhaseChange,
    },

    #[serde(rename = "CONTENT_UNAVAILABLE")]
    ContentUnavailable {
        session_id: String,
        timestamp: i64,
        reason: String,
    },

    #[serde(rename = "STALE_TICK")]
    StaleTick { session_id: String, timestamp: i64 },

    #[serde(rename = "ANALYSIS_STOPPED")]
    AnalysisStopped {
        session_id: String,
        timestamp: i64,
        buffered_events: usize,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::SnapshotComputed { .. } => "SNAPSHOT_COMPUTED",
            EngineEvent::PredictionsUpdated { .. } => "PREDICTIONS_UPDATED",
            EngineEvent::DifficultyRecommended { .. } => "DIFFICULTY_RECOMMENDED",
            EngineEvent::InterventionFired { .. } => "INTERVENTION_FIRED",
            EngineEvent::PhaseChanged { .. } => "PHASE_CHANGED",
            EngineEvent::ContentUnavailable { .. } => "CONTENT_UNAVAILABLE",
            EngineEvent::StaleTick { .. } => "STALE_TICK",
            EngineEvent::AnalysisStopped { .. } => "ANALYSIS_STOPPED",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            EngineEvent::SnapshotComputed { session_id, .. }
            | EngineEvent::PredictionsUpdated { session_id, .. }
            | EngineEvent::DifficultyRecommended { session_id, .. }
            | EngineEvent::InterventionFired { session_id, .. }
            | EngineEvent::PhaseChanged { session_id, .. }
            | EngineEvent::ContentUnavailable { session_id, .. }
            | EngineEvent::StaleTick { session_id, .. }
            | EngineEvent::AnalysisStopped { session_id, .. } => session_id,
        }
    }
}

/// Structured output port for engine activity.
pub trait EngineEventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Writes every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EngineEventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::SnapshotComputed {
                session_id,
                fatigue,
                accuracy,
                trend,
                fresh,
                ..
            } => debug!(
                session_id = %session_id,
                fatigue,
                accuracy,
                trend = trend.as_str(),
                fresh,
                "snapshot computed"
            ),
            EngineEvent::PredictionsUpdated { session_id, active, .. } => debug!(
                session_id = %session_id,
                active = active.len(),
                top_pattern = active.first().map(|p| p.pattern_id.as_str()).unwrap_or("-"),
                "predictions updated"
            ),
            EngineEvent::DifficultyRecommended {
                session_id,
                recommendation,
                ..
            } => info!(
                session_id = %session_id,
                difficulty = recommendation.value,
                advisories = ?recommendation.advisories,
                "difficulty recommended"
            ),
            EngineEvent::InterventionFired {
                session_id,
                intervention,
            } => info!(
                session_id = %session_id,
                kind = intervention.kind.as_str(),
                pattern_id = intervention.pattern_id.as_deref().unwrap_or("-"),
                "intervention fired"
            ),
            EngineEvent::PhaseChanged { session_id, change } => info!(
                session_id = %session_id,
                from = %change.from,
                to = %change.to,
                forced = change.forced,
                "session phase changed"
            ),
            EngineEvent::ContentUnavailable {
                session_id, reason, ..
            } => warn!(session_id = %session_id, reason = %reason, "no content available"),
            EngineEvent::StaleTick { session_id, .. } => {
                debug!(session_id = %session_id, "tick on stopped session ignored")
            }
            EngineEvent::AnalysisStopped {
                session_id,
                buffered_events,
                ..
            } => info!(session_id = %session_id, buffered_events, "analysis stopped"),
        }
    }
}

/// Keeps the most recent events in memory, oldest dropped first.
pub struct MemorySink {
    events: Mutex<VecDeque<EngineEvent>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn drain(&self) -> Vec<EngineEvent> {
        self.events.lock().drain(..).collect()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EngineEventSink for MemorySink {
    fn emit(&self, event: &EngineEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale(n: i64) -> EngineEvent {
        EngineEvent::StaleTick {
            session_id: "s".into(),
            timestamp: n,
        }
    }

    #[test]
    fn memory_sink_is_bounded() {
        let sink = MemorySink::new(2);
        for n in 0..5 {
            sink.emit(&stale(n));
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], EngineEvent::StaleTick { timestamp: 3, .. }));
        assert_eq!(sink.count_of("STALE_TICK"), 2);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(stale(7)).unwrap();
        assert_eq!(json["type"], "STALE_TICK");
        assert_eq!(json["payload"]["timestamp"], 7);
    }
}
