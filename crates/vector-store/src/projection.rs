use crate::error::{Result, VectorStoreError};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const POWER_ITERATIONS: usize = 300;
const CONVERGENCE_TOLERANCE: f64 = 1e-9;
const DEGENERATE_NORM: f64 = 1e-12;

/// Linear map applied to every vector before it reaches the vector index.
///
/// The document store never sees projected vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    Identity,
    Linear(LinearProjection),
}

/// Principal-component projection `D -> n_components`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearProjection {
    input_dim: usize,
    n_components: usize,
    seed: u64,
    mean: Vec<f32>,
    /// Row-major `n_components x input_dim`, rows orthonormal
    components: Vec<f32>,
}

impl Projection {
    /// Fit a principal-component projection `input_dim -> n_components`.
    /// Same samples and seed give the same map; every sample must be `input_dim` long.
    pub fn fit(
        samples: &[Vec<f32>],
        input_dim: usize,
        n_components: usize,
        seed: u64,
    ) -> Result<Self> {
        LinearProjection::fit(samples, input_dim, n_components, seed).map(Self::Linear)
    }

    pub fn apply(&self, vector: &[f32]) -> Result<Vec<f32>> {
        match self {
            Self::Identity => Ok(vector.to_vec()),
            Self::Linear(linear) => linear.apply(vector),
        }
    }

    pub fn apply_batch(&self, vectors: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        vectors.iter().map(|v| self.apply(v)).collect()
    }

    /// Whether this projection was produced for the given settings
    #[must_use]
    pub fn matches(&self, input_dim: usize, n_components: Option<usize>, seed: u64) -> bool {
        match (self, n_components) {
            (Self::Identity, None) => true,
            (Self::Linear(linear), Some(n)) => {
                linear.input_dim == input_dim && linear.n_components == n && linear.seed == seed
            }
            _ => false,
        }
    }
}

impl LinearProjection {
    fn fit(
        samples: &[Vec<f32>],
        input_dim: usize,
        n_components: usize,
        seed: u64,
    ) -> Result<Self> {
        if samples.is_empty() {
            return Err(VectorStoreError::IndexError(
                "cannot fit a projection without sample vectors".to_string(),
            ));
        }
        if n_components == 0 || n_components >= input_dim {
            return Err(VectorStoreError::ConfigError(format!(
                "n_components ({n_components}) must be in 1..{input_dim}"
            )));
        }

        let mut data = Array2::<f64>::zeros((samples.len(), input_dim));
        for (mut row, sample) in data.axis_iter_mut(Axis(0)).zip(samples) {
            if sample.len() != input_dim {
                return Err(VectorStoreError::InvalidDimension {
                    expected: input_dim,
                    actual: sample.len(),
                });
            }
            for (dst, &src) in row.iter_mut().zip(sample) {
                *dst = f64::from(src);
            }
        }

        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(input_dim));
        data -= &mean;
        let denom = (samples.len().saturating_sub(1)).max(1) as f64;
        let covariance = data.t().dot(&data) / denom;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut basis: Vec<Array1<f64>> = Vec::with_capacity(n_components);
        for _ in 0..n_components {
            let component = leading_component(&covariance, &basis, &mut rng);
            basis.push(component);
        }

        let mut components = Vec::with_capacity(n_components * input_dim);
        for component in &basis {
            components.extend(component.iter().map(|&x| x as f32));
        }

        Ok(Self {
            input_dim,
            n_components,
            seed,
            mean: mean.iter().map(|&x| x as f32).collect(),
            components,
        })
    }

    fn apply(&self, vector: &[f32]) -> Result<Vec<f32>> {
        if vector.len() != self.input_dim {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.input_dim,
                actual: vector.len(),
            });
        }
        let components =
            ArrayView2::from_shape((self.n_components, self.input_dim), &self.components)
                .map_err(|e| VectorStoreError::IndexError(e.to_string()))?;
        let centered: Array1<f32> = vector
            .iter()
            .zip(&self.mean)
            .map(|(x, m)| x - m)
            .collect();
        Ok(components.dot(&centered).to_vec())
    }
}

/// Power iteration for the top eigenvector of `covariance` orthogonal to `basis`.
fn leading_component(
    covariance: &Array2<f64>,
    basis: &[Array1<f64>],
    rng: &mut StdRng,
) -> Array1<f64> {
    let dim = covariance.nrows();
    let mut v = random_unit_orthogonal(dim, basis, rng);

    for _ in 0..POWER_ITERATIONS {
        let mut w = covariance.dot(&v);
        orthogonalize(&mut w, basis);
        let norm = w.dot(&w).sqrt();
        if norm < DEGENERATE_NORM {
            // Remaining variance is zero; any orthogonal direction will do.
            break;
        }
        w /= norm;
        let delta = (&w - &v).mapv(f64::abs).sum();
        v = w;
        if delta < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    // Fix the sign so the largest coordinate is positive.
    let pivot = v
        .iter()
        .copied()
        .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
    v
}

fn random_unit_orthogonal(dim: usize, basis: &[Array1<f64>], rng: &mut StdRng) -> Array1<f64> {
    loop {
        let mut v: Array1<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        orthogonalize(&mut v, basis);
        let norm = v.dot(&v).sqrt();
        if norm > DEGENERATE_NORM {
            return v / norm;
        }
    }
}

fn orthogonalize(v: &mut Array1<f64>, basis: &[Array1<f64>]) {
    for b in basis {
        let proj = v.dot(b);
        v.scaled_add(-proj, b);
    }
}
