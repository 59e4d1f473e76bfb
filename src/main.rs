use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use adaptive_learning_engine::config::Config;
use adaptive_learning_engine::engine::audit::write_jsonl;
use adaptive_learning_engine::engine::{
    Clock, EngineError, EngineServices, Grade, InMemoryProblemRepository, Intervention,
    LearnerProfile, LearningEvent, ManualClock, ProblemRepository, TickOutcome, Tier, TracingSink,
};
use adaptive_learning_engine::{load_static_catalogs, logging};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log);

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "replay failed");
        std::process::exit(1);
    }
}

fn read_events(path: &Path) -> Result<Vec<LearningEvent>, EngineError> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    events.sort_by_key(|e: &LearningEvent| e.timestamp);
    Ok(events)
}

async fn run(config: Config) -> Result<(), EngineError> {
    let catalogs = load_static_catalogs()?;

    let profile: LearnerProfile = match &config.profile_path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => LearnerProfile::new("demo-learner", Grade::Fifth, Tier::Standard),
    };
    let events = match &config.events_path {
        Some(path) => read_events(path)?,
        None => Vec::new(),
    };
    let repository: Arc<dyn ProblemRepository> = match &config.problems_path {
        Some(path) => Arc::new(InMemoryProblemRepository::from_json_file(path)?),
        None => Arc::new(InMemoryProblemRepository::default()),
    };

    let start = events.first().map(|e| e.timestamp).unwrap_or(0);
    let clock = ManualClock::new(start);
    let services = EngineServices::new(
        config.engine.clone(),
        catalogs.patterns.clone(),
        catalogs.matrix.clone(),
        repository,
        Arc::new(clock.clone()),
        Arc::new(TracingSink),
    )?;
    let handle = services.open_session(profile.clone())?;
    handle.lock().complete_step();

    tracing::info!(
        session_id = %handle.id(),
        events = events.len(),
        "replaying event log"
    );

    let tick_ms = config.engine.tick_interval_ms as i64;
    let mut next_tick = start + tick_ms;
    let mut interventions: Vec<Intervention> = Vec::new();
    let mut cycles = 0u64;

    let mut run_tick = |at: i64| -> Result<(), EngineError> {
        clock.set(at);
        if let TickOutcome::Completed(report) = handle.tick()? {
            cycles += 1;
            interventions.extend(report.interventions);
        }
        Ok(())
    };

    for event in events {
        while event.timestamp >= next_tick {
            run_tick(next_tick)?;
            next_tick += tick_ms;
        }
        clock.set(event.timestamp);
        handle.lock().replay(event);
    }
    run_tick(next_tick)?;

    let candidate_problems = match handle.next_problems(5).await {
        Ok(problems) => problems,
        Err(EngineError::NoAvailableContent { .. }) => Vec::new(),
        Err(err) => return Err(err),
    };
    let plan = services
        .path_orchestrator()
        .build(&profile, clock.now_ms())
        .await?;

    let (recommendation, active_predictions, records) = {
        let session = handle.lock();
        (
            session.recommendation()?,
            session.active_predictions().to_vec(),
            session.audit_records(),
        )
    };
    if let Some(path) = &config.audit_path {
        let written = write_jsonl(path, &records)?;
        tracing::info!(path = %path.display(), records = written, "audit log exported");
    }

    let report = serde_json::json!({
        "sessionId": handle.id(),
        "cycles": cycles,
        "recommendation": recommendation,
        "activePredictions": active_predictions,
        "interventions": interventions,
        "candidateProblems": candidate_problems,
        "plan": plan,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
