use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::engine::types::{Grade, Tier};

pub const ELITE_FLOOR: f64 = 8.0;
pub const BASIC_CEILING: f64 = 4.0;
pub const SCALE_MIN: f64 = 1.0;
pub const SCALE_MAX: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyMatrixEntry {
    pub grade: Grade,
    pub tier: Tier,
    pub base: f64,
    pub min: f64,
    pub max: f64,
    pub time_allocation_secs: u32,
    #[serde(default)]
    pub allowed_topics: Vec<String>,
    #[serde(default)]
    pub forbidden_topics: Vec<String>,
}

impl DifficultyMatrixEntry {
    /// Whether a problem topic may be served for this grade and tier.
    pub fn permits_topic(&self, topic: &str) -> bool {
        if self.forbidden_topics.iter().any(|t| t == topic) {
            return false;
        }
        self.allowed_topics.is_empty() || self.allowed_topics.iter().any(|t| t == topic)
    }

    fn check(&self) -> Result<(), EngineError> {
        let fail = |reason: String| EngineError::InvalidGradeTierConfiguration {
            grade: self.grade,
            tier: self.tier,
            reason,
        };
        if !(self.min <= self.base && self.base <= self.max) {
            return Err(fail(format!(
                "expected min <= base <= max, got {} / {} / {}",
                self.min, self.base, self.max
            )));
        }
        if self.min < SCALE_MIN || self.max > SCALE_MAX {
            return Err(fail(format!(
                "range [{}, {}] leaves the {SCALE_MIN}-{SCALE_MAX} scale",
                self.min, self.max
            )));
        }
        if self.tier == Tier::Elite && self.min < ELITE_FLOOR {
            return Err(fail(format!("elite min {} is below {ELITE_FLOOR}", self.min)));
        }
        if self.tier == Tier::Basic && self.max > BASIC_CEILING {
            return Err(fail(format!("basic max {} is above {BASIC_CEILING}", self.max)));
        }
        if self.time_allocation_secs == 0 {
            return Err(fail("time allocation must be > 0".into()));
        }
        Ok(())
    }
}

/// Grade x tier difficulty table. Always holds all 12 combinations.
#[derive(Debug, Clone)]
pub struct DifficultyMatrix {
    entries: HashMap<(Grade, Tier), DifficultyMatrixEntry>,
}

impl DifficultyMatrix {
    pub fn from_entries(entries: Vec<DifficultyMatrixEntry>) -> Result<Self, EngineError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            entry.check()?;
            let key = (entry.grade, entry.tier);
            if map.insert(key, entry).is_some() {
                return Err(EngineError::InvalidGradeTierConfiguration {
                    grade: key.0,
                    tier: key.1,
                    reason: "duplicate entry".into(),
                });
            }
        }

        for grade in Grade::all() {
            for tier in Tier::all() {
                if !map.contains_key(&(*grade, *tier)) {
                    return Err(EngineError::InvalidGradeTierConfiguration {
                        grade: *grade,
                        tier: *tier,
                        reason: "missing from difficulty matrix".into(),
                    });
                }
            }
        }

        Ok(Self { entries: map })
    }

    pub fn builtin() -> Result<Self, EngineError> {
        Self::from_entries(builtin_entries())
    }

    /// Lookup for a validated matrix. Construction guarantees every key.
    pub fn get(&self, grade: Grade, tier: Tier) -> Result<&DifficultyMatrixEntry, EngineError> {
        self.entries
            .get(&(grade, tier))
            .ok_or_else(|| EngineError::InvalidGradeTierConfiguration {
                grade,
                tier,
                reason: "missing from difficulty matrix".into(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DifficultyMatrixEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn time_allocation(tier: Tier) -> u32 {
    match tier {
        Tier::Basic => 120,
        Tier::Standard => 180,
        Tier::Advanced => 240,
        Tier::Elite => 300,
    }
}

fn forbidden_topics(tier: Tier) -> Vec<String> {
    let topics: &[&str] = match tier {
        Tier::Basic => &["competition_combinatorics", "number_theory_proofs", "multi_step_algebra"],
        Tier::Standard => &["competition_combinatorics", "number_theory_proofs"],
        Tier::Advanced | Tier::Elite => &[],
    };
    topics.iter().map(|t| t.to_string()).collect()
}

fn builtin_entries() -> Vec<DifficultyMatrixEntry> {
    // (grade, tier, base, min, max)
    let table = [
        (Grade::Fourth, Tier::Basic, 2.5, 1.0, 3.5),
        (Grade::Fourth, Tier::Standard, 4.0, 3.0, 5.5),
        (Grade::Fourth, Tier::Advanced, 5.5, 4.5, 7.0),
        (Grade::Fourth, Tier::Elite, 8.0, 8.0, 9.0),
        (Grade::Fifth, Tier::Basic, 3.0, 1.5, 4.0),
        (Grade::Fifth, Tier::Standard, 4.5, 3.5, 6.0),
        (Grade::Fifth, Tier::Advanced, 6.5, 5.0, 8.0),
        (Grade::Fifth, Tier::Elite, 8.5, 8.0, 9.5),
        (Grade::Sixth, Tier::Basic, 3.5, 2.0, 4.0),
        (Grade::Sixth, Tier::Standard, 5.0, 4.0, 6.5),
        (Grade::Sixth, Tier::Advanced, 7.0, 5.5, 8.5),
        (Grade::Sixth, Tier::Elite, 9.0, 8.0, 10.0),
    ];

    table
        .into_iter()
        .map(|(grade, tier, base, min, max)| DifficultyMatrixEntry {
            grade,
            tier,
            base,
            min,
            max,
            time_allocation_secs: time_allocation(tier),
            allowed_topics: Vec::new(),
            forbidden_topics: forbidden_topics(tier),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_grade_and_tier() {
        let matrix = DifficultyMatrix::builtin().unwrap();
        assert_eq!(matrix.len(), 12);
        for grade in Grade::all() {
            for tier in Tier::all() {
                let entry = matrix.get(*grade, *tier).unwrap();
                assert!(entry.min <= entry.base && entry.base <= entry.max);
            }
        }
    }

    #[test]
    fn missing_entry_fails_fast() {
        let mut entries = builtin_entries();
        entries.retain(|e| !(e.grade == Grade::Fifth && e.tier == Tier::Advanced));
        match DifficultyMatrix::from_entries(entries) {
            Err(EngineError::InvalidGradeTierConfiguration { grade, tier, .. }) => {
                assert_eq!(grade, Grade::Fifth);
                assert_eq!(tier, Tier::Advanced);
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn elite_floor_is_enforced() {
        let mut entries = builtin_entries();
        for e in entries.iter_mut().filter(|e| e.tier == Tier::Elite) {
            e.min = 7.5;
        }
        assert!(DifficultyMatrix::from_entries(entries).is_err());
    }

    #[test]
    fn basic_ceiling_is_enforced() {
        let mut entries = builtin_entries();
        entries[0].max = 4.5;
        assert!(DifficultyMatrix::from_entries(entries).is_err());
    }

    #[test]
    fn topic_filter_honors_forbidden_and_allowed() {
        let matrix = DifficultyMatrix::builtin().unwrap();
        let basic = matrix.get(Grade::Fourth, Tier::Basic).unwrap();
        assert!(!basic.permits_topic("competition_combinatorics"));
        assert!(basic.permits_topic("fractions"));

        let mut narrowed = basic.clone();
        narrowed.allowed_topics = vec!["fractions".into()];
        assert!(narrowed.permits_topic("fractions"));
        assert!(!narrowed.permits_topic("geometry"));
    }
}
