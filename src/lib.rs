pub mod config;
pub mod engine;
pub mod logging;

use std::sync::{Arc, OnceLock};

use crate::engine::{DifficultyMatrix, EngineError, PatternCatalog};

/// Read-only catalogs shared by every session in the process.
#[derive(Debug, Clone)]
pub struct StaticCatalogs {
    pub patterns: Arc<PatternCatalog>,
    pub matrix: Arc<DifficultyMatrix>,
}

static CATALOGS: OnceLock<StaticCatalogs> = OnceLock::new();

/// Builds and validates the built-in catalogs once. A missing grade/tier entry
/// fails here, at startup, rather than at request time.
pub fn load_static_catalogs() -> Result<&'static StaticCatalogs, EngineError> {
    if let Some(catalogs) = CATALOGS.get() {
        return Ok(catalogs);
    }
    let built = StaticCatalogs {
        patterns: Arc::new(PatternCatalog::builtin()?),
        matrix: Arc::new(DifficultyMatrix::builtin()?),
    };
    Ok(CATALOGS.get_or_init(|| built))
}
