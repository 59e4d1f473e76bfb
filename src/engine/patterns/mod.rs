pub mod catalog;
pub mod recognizer;

pub use catalog::{
    Comparison, ErrorPattern, EventSignal, MatchContext, PatternCatalog, StateMetric,
    TriggerCondition,
};
pub use recognizer::{PatternMatch, PatternRecognizer};
