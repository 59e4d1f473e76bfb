pub mod controller;
pub mod matrix;

pub use controller::{DifficultyController, DifficultyRequest};
pub use matrix::{DifficultyMatrix, DifficultyMatrixEntry, ELITE_FLOOR};
