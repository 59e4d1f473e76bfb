use std::path::PathBuf;

use crate::engine::EngineConfig;
use crate::logging::LogSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogSettings,
    pub profile_path: Option<PathBuf>,
    pub events_path: Option<PathBuf>,
    pub problems_path: Option<PathBuf>,
    pub audit_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            log: LogSettings::from_env(log_level),
            profile_path: env_path("PROFILE_PATH"),
            events_path: env_path("EVENTS_PATH"),
            problems_path: env_path("PROBLEMS_PATH"),
            audit_path: env_path("AUDIT_PATH"),
            engine: EngineConfig::from_env(),
        }
    }
}
