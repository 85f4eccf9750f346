//! 2D projections of the embedding matrix for plotting.
//!
//! Two deterministic reducers: PCA by power iteration and exact t-SNE over
//! cosine distances. Neither feeds the graphs.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use coursegraph_shared::{
    CourseGraphError, CourseRecord, ProjectionConfig, ProjectionMethod, Result, UNKNOWN_SCOPE,
};

const POWER_MAX_ITER: usize = 500;
const POWER_TOL: f64 = 1e-10;

const EARLY_EXAGGERATION: f64 = 12.0;
const EXAGGERATION_ITERS: usize = 250;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const PERPLEXITY_TOL: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;
const MIN_PROB: f64 = 1e-12;

/// One row of a projection table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRow {
    pub code: String,
    pub title: String,
    pub scope: String,
    pub x: f64,
    pub y: f64,
}

/// Reduces embeddings to 2D with one method.
#[derive(Debug, Clone)]
pub struct ProjectionReducer {
    method: ProjectionMethod,
    perplexity: f64,
    iterations: usize,
}

impl ProjectionReducer {
    pub fn new(method: ProjectionMethod, config: &ProjectionConfig) -> Self {
        Self {
            method,
            perplexity: config.perplexity,
            iterations: config.iterations,
        }
    }

    pub fn method(&self) -> ProjectionMethod {
        self.method
    }

    /// 2D coordinates, one per embedding row.
    #[instrument(skip_all, fields(method = self.method.as_str(), rows = embeddings.nrows()))]
    pub fn reduce(&self, embeddings: &Array2<f32>) -> Result<Vec<[f64; 2]>> {
        let coords = match self.method {
            ProjectionMethod::Pca => pca_2d(embeddings)?,
            ProjectionMethod::Tsne => tsne_2d(embeddings, self.perplexity, self.iterations)?,
        };
        info!(rows = coords.len(), "projection computed");
        Ok(coords)
    }

    /// Reduce and attach each record's identity.
    pub fn project(
        &self,
        embeddings: &Array2<f32>,
        records: &[CourseRecord],
    ) -> Result<Vec<ProjectionRow>> {
        if records.len() != embeddings.nrows() {
            return Err(CourseGraphError::dimension_mismatch(
                "projection records",
                embeddings.nrows(),
                records.len(),
            ));
        }
        let coords = self.reduce(embeddings)?;
        Ok(records
            .iter()
            .zip(coords)
            .map(|(record, [x, y])| ProjectionRow {
                code: record.code.clone(),
                title: record.label().to_string(),
                scope: record
                    .scope
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_SCOPE.to_string()),
                x,
                y,
            })
            .collect())
    }
}

fn to_f64(embeddings: &Array2<f32>) -> Result<Array2<f64>> {
    if embeddings.nrows() == 0 {
        return Err(CourseGraphError::empty_input("projection embeddings"));
    }
    if embeddings.ncols() == 0 {
        return Err(CourseGraphError::empty_input("embedding vectors have no dimensions"));
    }
    Ok(embeddings.mapv(f64::from))
}

// ---------------------------------------------------------------------------
// PCA
// ---------------------------------------------------------------------------

/// Scores on the top two principal components.
pub fn pca_2d(embeddings: &Array2<f32>) -> Result<Vec<[f64; 2]>> {
    let x = to_f64(embeddings)?;
    Ok(pca_scores(&x))
}

fn pca_scores(x: &Array2<f64>) -> Vec<[f64; 2]> {
    let n = x.nrows();
    if n == 1 {
        return vec![[0.0, 0.0]];
    }

    let Some(mean) = x.mean_axis(Axis(0)) else {
        return vec![[0.0, 0.0]; n];
    };
    let centered = x - &mean;
    let mut cov = centered.t().dot(&centered) / (n - 1) as f64;

    let first = top_eigenvector(&cov);
    if let Some((v, lambda)) = &first {
        let outer = outer(v, v) * *lambda;
        cov = cov - outer;
    }
    let second = top_eigenvector(&cov);

    let score = |component: &Option<(Array1<f64>, f64)>| -> Array1<f64> {
        match component {
            Some((v, _)) => centered.dot(v),
            None => Array1::zeros(n),
        }
    };
    let pc1 = score(&first);
    let pc2 = score(&second);
    pc1.iter().zip(pc2.iter()).map(|(&a, &b)| [a, b]).collect()
}

/// Dominant eigenpair of a symmetric PSD matrix, `None` when it has no
/// variance left.
fn top_eigenvector(matrix: &Array2<f64>) -> Option<(Array1<f64>, f64)> {
    let d = matrix.nrows();
    let mut v = Array1::from_shape_fn(d, |i| 1.0 + i as f64 / d as f64);
    let start_norm = v.dot(&v).sqrt();
    v /= start_norm;

    for _ in 0..POWER_MAX_ITER {
        let next = matrix.dot(&v);
        let norm = next.dot(&next).sqrt();
        if norm <= f64::EPSILON {
            return None;
        }
        let next = next / norm;
        let delta = (&next - &v).mapv(|e| e * e).sum().sqrt();
        v = next;
        if delta < POWER_TOL {
            break;
        }
    }

    let lambda = v.dot(&matrix.dot(&v));
    if lambda <= f64::EPSILON {
        return None;
    }

    // largest-magnitude loading positive
    let pivot = v
        .iter()
        .copied()
        .fold(0.0f64, |best, e| if e.abs() > best.abs() { e } else { best });
    if pivot < 0.0 {
        v.mapv_inplace(|e| -e);
    }
    Some((v, lambda))
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

// ---------------------------------------------------------------------------
// t-SNE
// ---------------------------------------------------------------------------

/// Exact t-SNE over cosine distances. Three or fewer rows fall back to PCA.
pub fn tsne_2d(embeddings: &Array2<f32>, perplexity: f64, iterations: usize) -> Result<Vec<[f64; 2]>> {
    let x = to_f64(embeddings)?;
    let n = x.nrows();
    if n <= 3 {
        debug!(rows = n, "too few rows for t-SNE, using PCA");
        return Ok(pca_scores(&x));
    }
    if !(perplexity > 0.0) {
        return Err(CourseGraphError::validation("perplexity must be positive"));
    }

    let perplexity = perplexity.min((n - 1) as f64 / 3.0);
    let distances = cosine_distances(&x);
    let p = joint_probabilities(&distances, perplexity);

    let mut y = initial_layout(&x);
    let learning_rate = tsne_learning_rate(n);
    let mut update = Array2::<f64>::zeros((n, 2));
    let mut gains = Array2::<f64>::ones((n, 2));

    for iter in 0..iterations {
        if iter == EXAGGERATION_ITERS {
            // second phase restarts the optimizer state
            update.fill(0.0);
            gains.fill(1.0);
        }
        let (exaggeration, momentum) = if iter < EXAGGERATION_ITERS {
            (EARLY_EXAGGERATION, INITIAL_MOMENTUM)
        } else {
            (1.0, FINAL_MOMENTUM)
        };

        let grad = gradient(&p, &y, exaggeration);
        for i in 0..n {
            for d in 0..2 {
                let g = grad[[i, d]];
                let u = update[[i, d]];
                let gain = if u * g < 0.0 {
                    gains[[i, d]] + 0.2
                } else {
                    gains[[i, d]] * 0.8
                };
                gains[[i, d]] = gain.max(MIN_GAIN);
                update[[i, d]] = momentum * u - learning_rate * gains[[i, d]] * g;
                y[[i, d]] += update[[i, d]];
            }
        }
    }

    debug!(rows = n, perplexity, iterations, "t-SNE finished");
    Ok(y.rows().into_iter().map(|r| [r[0], r[1]]).collect())
}

/// Step size `N / (4 * exaggeration)`, with no lower floor.
///
/// An exaggerated row is pulled with strength about `4 * exaggeration / N`,
/// so any larger step overshoots and small inputs oscillate outward.
fn tsne_learning_rate(n: usize) -> f64 {
    n as f64 / EARLY_EXAGGERATION / 4.0
}

fn cosine_distances(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    let norms: Vec<f64> = x.rows().into_iter().map(|r| r.dot(&r).sqrt()).collect();
    let mut out = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in i + 1..n {
            let sim = if norms[i] == 0.0 || norms[j] == 0.0 {
                0.0
            } else {
                x.row(i).dot(&x.row(j)) / (norms[i] * norms[j])
            };
            let dist = (1.0 - sim).max(0.0);
            out[[i, j]] = dist;
            out[[j, i]] = dist;
        }
    }
    out
}

/// Symmetrized joint probabilities with per-row precision found by binary
/// search on the target perplexity.
fn joint_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distances.nrows();
    let target_entropy = perplexity.ln();
    let mut conditional = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        let mut beta = 1.0;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        let mut row = vec![0.0; n];

        for _ in 0..PERPLEXITY_STEPS {
            let mut sum = 0.0;
            let mut weighted = 0.0;
            for j in (0..n).filter(|&j| j != i) {
                let pj = (-distances[[i, j]] * beta).exp();
                row[j] = pj;
                sum += pj;
                weighted += distances[[i, j]] * pj;
            }
            row[i] = 0.0;
            let sum = sum.max(MIN_PROB);
            let entropy = sum.ln() + beta * weighted / sum;
            for v in &mut row {
                *v /= sum;
            }

            let diff = entropy - target_entropy;
            if diff.abs() < PERPLEXITY_TOL {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
            } else {
                beta_max = beta;
                beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
            }
        }

        for (j, v) in row.into_iter().enumerate() {
            conditional[[i, j]] = v;
        }
    }

    let joint = (&conditional + &conditional.t()) / (2.0 * n as f64);
    joint.mapv(|v| v.max(MIN_PROB))
}

/// PCA layout scaled so the first coordinate has standard deviation 1e-4.
fn initial_layout(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    let scores = pca_scores(x);
    let mut y = Array2::from_shape_fn((n, 2), |(i, d)| scores[i][d]);

    let std = y.column(0).std(0.0);
    if std > 0.0 {
        y.mapv_inplace(|v| v / std * 1e-4);
    } else {
        // no variance to start from: spread rows on a small deterministic grid
        let side = (n as f64).sqrt().ceil() as usize;
        y = Array2::from_shape_fn((n, 2), |(i, d)| {
            let cell = if d == 0 { i % side } else { i / side };
            cell as f64 * 1e-4
        });
    }
    y
}

fn gradient(p: &Array2<f64>, y: &Array2<f64>, exaggeration: f64) -> Array2<f64> {
    let n = y.nrows();
    let mut num = Array2::<f64>::zeros((n, n));
    let mut sum = 0.0;
    for i in 0..n {
        for j in i + 1..n {
            let dx = y[[i, 0]] - y[[j, 0]];
            let dy = y[[i, 1]] - y[[j, 1]];
            let q = 1.0 / (1.0 + dx * dx + dy * dy);
            num[[i, j]] = q;
            num[[j, i]] = q;
            sum += 2.0 * q;
        }
    }
    let sum = sum.max(MIN_PROB);

    let mut grad = Array2::<f64>::zeros((n, 2));
    for i in 0..n {
        for j in (0..n).filter(|&j| j != i) {
            let q = (num[[i, j]] / sum).max(MIN_PROB);
            let coeff = 4.0 * (exaggeration * p[[i, j]] - q) * num[[i, j]];
            grad[[i, 0]] += coeff * (y[[i, 0]] - y[[j, 0]]);
            grad[[i, 1]] += coeff * (y[[i, 1]] - y[[j, 1]]);
        }
    }
    grad
}
