use std::collections::VecDeque;

use crate::engine::config::TrendParams;
use crate::engine::types::{StateSnapshot, TrendState};

const MS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Clone, Copy)]
struct GradedCycle {
    at_ms: i64,
    accuracy: f64,
    graded: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WeightedFit {
    slope_per_min: f64,
    mean: f64,
    variance: f64,
}

/// Accuracy trend across analysis cycles that contained graded work.
///
/// Each cycle is placed on a minutes axis from its snapshot timestamp and
/// weighted by how many submits were graded in it, decayed per cycle so the
/// latest cycles dominate. The weighted least-squares slope decides up/down;
/// a low-spread series below the plateau accuracy is `Stuck`.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    params: TrendParams,
    cycles: VecDeque<GradedCycle>,
    current: TrendState,
}

impl TrendAnalyzer {
    pub fn new(params: TrendParams) -> Self {
        let capacity = params.window_size.max(1);
        Self {
            params,
            cycles: VecDeque::with_capacity(capacity),
            current: TrendState::Flat,
        }
    }

    /// Folds a fresh snapshot in and returns the trend to stamp on it.
    /// Snapshots without graded submits keep the current trend.
    pub fn observe(&mut self, snapshot: &StateSnapshot) -> TrendState {
        let graded = snapshot.performance.graded_submits;
        if graded == 0 {
            return self.current;
        }
        self.cycles.push_back(GradedCycle {
            at_ms: snapshot.timestamp,
            accuracy: snapshot.performance.accuracy,
            graded,
        });
        while self.cycles.len() > self.params.window_size.max(1) {
            self.cycles.pop_front();
        }

        self.current = match self.fit() {
            Some(fit) if self.cycles.len() >= self.params.min_samples => self.classify(fit),
            _ => TrendState::Flat,
        };
        self.current
    }

    pub fn current(&self) -> TrendState {
        self.current
    }

    pub fn cycles(&self) -> usize {
        self.cycles.len()
    }

    fn classify(&self, fit: WeightedFit) -> TrendState {
        if fit.slope_per_min >= self.params.up_slope_per_min {
            TrendState::Up
        } else if fit.slope_per_min <= self.params.down_slope_per_min {
            TrendState::Down
        } else if fit.variance < self.params.stuck_variance_threshold
            && fit.mean < self.params.plateau_accuracy
        {
            TrendState::Stuck
        } else {
            TrendState::Flat
        }
    }

    fn fit(&self) -> Option<WeightedFit> {
        let origin = self.cycles.front()?.at_ms;
        let newest = self.cycles.len() - 1;
        let points: Vec<(f64, f64, f64)> = self
            .cycles
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let age = (newest - i) as i32;
                let weight = f64::from(c.graded).sqrt() * self.params.recency_decay.powi(age);
                let minutes = (c.at_ms - origin) as f64 / MS_PER_MINUTE;
                (minutes, c.accuracy, weight)
            })
            .collect();

        let total: f64 = points.iter().map(|(_, _, w)| w).sum();
        if total <= f64::EPSILON {
            return None;
        }
        let mean_x = points.iter().map(|(x, _, w)| w * x).sum::<f64>() / total;
        let mean_y = points.iter().map(|(_, y, w)| w * y).sum::<f64>() / total;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut syy = 0.0;
        for (x, y, w) in &points {
            let dx = x - mean_x;
            let dy = y - mean_y;
            sxx += w * dx * dx;
            sxy += w * dx * dy;
            syy += w * dy * dy;
        }

        // All cycles at one instant: no time axis to measure a slope on.
        let slope_per_min = if sxx < 1e-12 { 0.0 } else { sxy / sxx };
        Some(WeightedFit {
            slope_per_min,
            mean: mean_y,
            variance: syy / total,
        })
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendParams::default())
    }
}
