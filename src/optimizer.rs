//! Surrogate-model search over a [`SearchSpace`].
//!
//! The optimizer proposes raw coordinate vectors and learns from the losses it
//! is told; it never sees parameter names. Evaluations are strictly
//! sequential: one `ask`, one objective call, one `tell`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{TuneError, TuneResult};
use crate::model::{ParameterSet, RunStatus};
use crate::space::{Dimension, SearchSpace};
use crate::util::{now_utc_string, write_json_pretty};

pub const DEFAULT_INITIAL_POINTS: usize = 10;
const CANDIDATES_PER_ASK: usize = 2000;
const LENGTH_SCALE: f64 = 0.3;
const NOISE: f64 = 1e-6;
const EXPLORATION_XI: f64 = 0.01;

pub trait SurrogateOptimizer {
    /// Next point to evaluate, snapped to the dimensions.
    fn ask(&mut self) -> Vec<f64>;
    fn tell(&mut self, point: Vec<f64>, loss: f64);
}

/// Gaussian-process regression with an RBF kernel on unit-scaled
/// coordinates, choosing points by expected improvement.
pub struct GaussianProcessOptimizer {
    dimensions: Vec<Dimension>,
    rng: StdRng,
    n_initial_points: usize,
    observations: Vec<(Vec<f64>, f64)>,
}

impl GaussianProcessOptimizer {
    pub fn new(space: &SearchSpace, n_initial_points: usize, seed: u64) -> Self {
        Self {
            dimensions: space.dimensions().to_vec(),
            rng: StdRng::seed_from_u64(seed),
            n_initial_points: n_initial_points.max(1),
            observations: Vec::new(),
        }
    }

    /// Continue a previous search: every traced evaluation is told again and
    /// the generator skips the draws that produced it.
    pub fn from_trace(
        space: &SearchSpace,
        trace: &OptimizerTrace,
        n_initial_points: usize,
        seed: u64,
    ) -> TuneResult<Self> {
        if trace.dimensions != space.dimensions() {
            return Err(TuneError::config(
                "optimizer trace was recorded over a different search space",
            ));
        }
        let mut optimizer = Self::new(space, n_initial_points, seed);
        for point in &trace.points {
            optimizer.random_point();
            optimizer.tell(point.vector.clone(), point.loss);
        }
        Ok(optimizer)
    }

    pub fn observations(&self) -> usize {
        self.observations.len()
    }

    fn random_point(&mut self) -> Vec<f64> {
        let mut point = Vec::with_capacity(self.dimensions.len());
        for dimension in &self.dimensions {
            let (low, high) = dimension.bounds();
            let raw = if dimension.is_discrete() {
                // half-unit padding gives the end values a full bucket
                (low - 0.5) + self.rng.r#gen::<f64>() * (high - low + 1.0)
            } else {
                low + self.rng.r#gen::<f64>() * (high - low)
            };
            point.push(dimension.snap(raw));
        }
        point
    }

    /// Falls back to a repeated point once the draws are exhausted.
    fn unobserved_random_point(&mut self) -> Vec<f64> {
        let mut point = self.random_point();
        for _ in 0..CANDIDATES_PER_ASK {
            if !self.already_observed(&point) {
                break;
            }
            point = self.random_point();
        }
        point
    }

    fn unit_scaled(&self, point: &[f64]) -> Vec<f64> {
        self.dimensions
            .iter()
            .zip(point)
            .map(|(dimension, value)| {
                let (low, high) = dimension.bounds();
                if high > low {
                    (value - low) / (high - low)
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn already_observed(&self, point: &[f64]) -> bool {
        self.observations
            .iter()
            .any(|(observed, _)| observed.as_slice() == point)
    }
}

impl SurrogateOptimizer for GaussianProcessOptimizer {
    fn ask(&mut self) -> Vec<f64> {
        if self.dimensions.is_empty() {
            return Vec::new();
        }
        if self.observations.len() < self.n_initial_points {
            return self.unobserved_random_point();
        }

        let inputs = self
            .observations
            .iter()
            .map(|(point, _)| self.unit_scaled(point))
            .collect::<Vec<Vec<f64>>>();
        let losses = self
            .observations
            .iter()
            .map(|(_, loss)| *loss)
            .collect::<Vec<f64>>();
        let Some(model) = GaussianProcess::fit(inputs, &losses) else {
            return self.unobserved_random_point();
        };
        let best = model.standardize(losses.iter().copied().fold(f64::INFINITY, f64::min));

        let mut chosen: Option<(f64, Vec<f64>)> = None;
        for _ in 0..CANDIDATES_PER_ASK {
            let candidate = self.random_point();
            if self.already_observed(&candidate) {
                continue;
            }
            let (mean, variance) = model.predict(&self.unit_scaled(&candidate));
            let score = expected_improvement(mean, variance.sqrt(), best);
            if chosen
                .as_ref()
                .is_none_or(|(best_score, _)| score > *best_score)
            {
                chosen = Some((score, candidate));
            }
        }

        match chosen {
            Some((_, point)) => point,
            None => self.unobserved_random_point(),
        }
    }

    fn tell(&mut self, point: Vec<f64>, loss: f64) {
        let loss = if loss.is_finite() { loss } else { 1.0 };
        self.observations.push((point, loss));
    }
}

struct GaussianProcess {
    inputs: Vec<Vec<f64>>,
    lower: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    mean: f64,
    scale: f64,
}

impl GaussianProcess {
    fn fit(inputs: Vec<Vec<f64>>, losses: &[f64]) -> Option<Self> {
        let n = losses.len();
        let mean = losses.iter().sum::<f64>() / n as f64;
        let variance = losses.iter().map(|loss| (loss - mean).powi(2)).sum::<f64>() / n as f64;
        let scale = if variance > 1e-12 { variance.sqrt() } else { 1.0 };
        let targets = losses
            .iter()
            .map(|loss| (loss - mean) / scale)
            .collect::<Vec<f64>>();

        let mut jitter = NOISE;
        for _ in 0..6 {
            let mut gram = vec![vec![0.0; n]; n];
            for row in 0..n {
                for col in 0..n {
                    gram[row][col] = rbf(&inputs[row], &inputs[col]);
                }
                gram[row][row] += jitter;
            }
            if let Some(lower) = cholesky(&gram) {
                let alpha = solve_upper_transposed(&lower, &solve_lower(&lower, &targets));
                return Some(Self {
                    inputs,
                    lower,
                    alpha,
                    mean,
                    scale,
                });
            }
            jitter *= 10.0;
        }
        None
    }

    fn standardize(&self, loss: f64) -> f64 {
        (loss - self.mean) / self.scale
    }

    /// Posterior mean and variance in standardized units.
    fn predict(&self, point: &[f64]) -> (f64, f64) {
        let cross = self
            .inputs
            .iter()
            .map(|input| rbf(input, point))
            .collect::<Vec<f64>>();
        let mean = cross
            .iter()
            .zip(&self.alpha)
            .map(|(k, a)| k * a)
            .sum::<f64>();
        let v = solve_lower(&self.lower, &cross);
        let variance = (1.0 - v.iter().map(|value| value * value).sum::<f64>()).max(1e-12);
        (mean, variance)
    }
}

fn rbf(left: &[f64], right: &[f64]) -> f64 {
    let squared = left
        .iter()
        .zip(right)
        .map(|(l, r)| (l - r).powi(2))
        .sum::<f64>();
    (-squared / (2.0 * LENGTH_SCALE * LENGTH_SCALE)).exp()
}

fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];
    for row in 0..n {
        for col in 0..=row {
            let partial = (0..col)
                .map(|k| lower[row][k] * lower[col][k])
                .sum::<f64>();
            if row == col {
                let diagonal = matrix[row][row] - partial;
                if diagonal <= 0.0 || !diagonal.is_finite() {
                    return None;
                }
                lower[row][col] = diagonal.sqrt();
            } else {
                lower[row][col] = (matrix[row][col] - partial) / lower[col][col];
            }
        }
    }
    Some(lower)
}

fn solve_lower(lower: &[Vec<f64>], rhs: &[f64]) -> Vec<f64> {
    let n = rhs.len();
    let mut out = vec![0.0; n];
    for row in 0..n {
        let partial = (0..row).map(|k| lower[row][k] * out[k]).sum::<f64>();
        out[row] = (rhs[row] - partial) / lower[row][row];
    }
    out
}

fn solve_upper_transposed(lower: &[Vec<f64>], rhs: &[f64]) -> Vec<f64> {
    let n = rhs.len();
    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let partial = (row + 1..n).map(|k| lower[k][row] * out[k]).sum::<f64>();
        out[row] = (rhs[row] - partial) / lower[row][row];
    }
    out
}

/// Expected improvement below `best` for a minimization problem.
fn expected_improvement(mean: f64, sigma: f64, best: f64) -> f64 {
    let improvement = best - mean - EXPLORATION_XI;
    if sigma <= 1e-12 {
        return improvement.max(0.0);
    }
    let z = improvement / sigma;
    improvement * normal_cdf(z) + sigma * normal_pdf(z)
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26; absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// One evaluated point of an optimization sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub iteration: usize,
    pub vector: Vec<f64>,
    pub params: ParameterSet,
    pub run_id: String,
    pub status: RunStatus,
    pub loss: f64,
}

/// Serializable optimizer state, rewritten after every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerTrace {
    pub experiment: String,
    pub target_metric: String,
    pub seed: u64,
    pub created_at: String,
    pub updated_at: String,
    pub dimensions: Vec<Dimension>,
    pub points: Vec<TracePoint>,
    pub best: Option<TracePoint>,
}

impl OptimizerTrace {
    pub fn new(experiment: &str, target_metric: &str, seed: u64, space: &SearchSpace) -> Self {
        let now = now_utc_string();
        Self {
            experiment: experiment.to_string(),
            target_metric: target_metric.to_string(),
            seed,
            created_at: now.clone(),
            updated_at: now,
            dimensions: space.dimensions().to_vec(),
            points: Vec::new(),
            best: None,
        }
    }

    pub fn record(&mut self, point: TracePoint) {
        if self
            .best
            .as_ref()
            .is_none_or(|best| point.loss < best.loss)
        {
            self.best = Some(point.clone());
        }
        self.points.push(point);
        self.updated_at = now_utc_string();
    }

    pub fn next_iteration(&self) -> usize {
        self.points.len()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("failed to read optimizer trace {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse optimizer trace {}", path.display()))
    }
}
