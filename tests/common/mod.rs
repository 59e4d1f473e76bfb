#![allow(dead_code)]

use std::sync::Arc;

use adaptive_learning_engine::engine::{
    EngineConfig, EngineServices, InMemoryProblemRepository, ManualClock, MemorySink,
    ProblemDescriptor,
};
use adaptive_learning_engine::load_static_catalogs;

pub const START_MS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub services: EngineServices,
    pub clock: ManualClock,
    pub sink: Arc<MemorySink>,
}

pub fn harness_with(repository: InMemoryProblemRepository, config: EngineConfig) -> Harness {
    let catalogs = load_static_catalogs().expect("built-in catalogs load");
    let clock = ManualClock::new(START_MS);
    let sink = Arc::new(MemorySink::new(10_000));
    let services = EngineServices::new(
        config,
        catalogs.patterns.clone(),
        catalogs.matrix.clone(),
        Arc::new(repository),
        Arc::new(clock.clone()),
        sink.clone(),
    )
    .expect("engine services build");
    Harness {
        services,
        clock,
        sink,
    }
}

pub fn harness(repository: InMemoryProblemRepository) -> Harness {
    harness_with(repository, EngineConfig::default())
}

pub fn problem(id: &str, difficulty: f64, topic: &str) -> ProblemDescriptor {
    ProblemDescriptor {
        id: id.to_string(),
        difficulty,
        topic: topic.to_string(),
        subtopic: None,
        expected_time_secs: 120,
        required_skills: Vec::new(),
    }
}

/// Ten problems at every 0.1 step of the 1-10 scale.
pub fn dense_bank() -> InMemoryProblemRepository {
    let mut problems = Vec::new();
    for tenth in 10..=100 {
        let difficulty = tenth as f64 / 10.0;
        for n in 0..10 {
            problems.push(problem(&format!("q{tenth}-{n}"), difficulty, "fractions"));
        }
    }
    InMemoryProblemRepository::new(problems)
}
