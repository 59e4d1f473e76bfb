pub mod cognitive_load;
pub mod emotion;
pub mod estimator;
pub mod performance;
pub mod trend;

pub use estimator::StateEstimator;
pub use trend::TrendAnalyzer;
