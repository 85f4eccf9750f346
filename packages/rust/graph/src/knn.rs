//! k-nearest-neighbor similarity graph.

use std::cmp::Ordering;
use std::path::Path;

use ndarray::{Array2, ArrayView1};
use tracing::{debug, info, instrument};

use coursegraph_artifacts::WriteOutcome;
use coursegraph_shared::{CourseGraphError, Result};

use crate::model::{Graph, NodeAttrs};

/// Builds an undirected kNN graph over row embeddings.
///
/// Edge (u, v) exists iff v is among u's k most cosine-similar rows or the
/// reverse. Node ids and labels are aligned with embedding rows.
#[derive(Debug)]
pub struct SimilarityGraphBuilder<'a> {
    embeddings: &'a Array2<f32>,
    node_ids: &'a [String],
    node_labels: &'a [String],
    k: usize,
}

impl<'a> SimilarityGraphBuilder<'a> {
    /// Validate shapes and `1 <= k < N`.
    pub fn new(
        embeddings: &'a Array2<f32>,
        node_ids: &'a [String],
        node_labels: &'a [String],
        k: usize,
    ) -> Result<Self> {
        let n = embeddings.nrows();
        if node_ids.len() != n {
            return Err(CourseGraphError::dimension_mismatch("node_ids", n, node_ids.len()));
        }
        if node_labels.len() != n {
            return Err(CourseGraphError::dimension_mismatch(
                "node_labels",
                n,
                node_labels.len(),
            ));
        }
        check_k(embeddings, k)?;

        Ok(Self {
            embeddings,
            node_ids,
            node_labels,
            k,
        })
    }

    #[instrument(skip_all, fields(nodes = self.node_ids.len(), k = self.k))]
    pub fn build(&self) -> Result<Graph> {
        let knn = neighbors(self.embeddings, self.k)?;

        let mut graph = Graph::new();
        for (id, label) in self.node_ids.iter().zip(self.node_labels) {
            graph.upsert_node(id.as_str(), NodeAttrs::labeled(label.as_str()));
        }
        for (i, row) in knn.iter().enumerate() {
            for &j in row {
                graph.add_edge(&self.node_ids[i], &self.node_ids[j]);
            }
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "similarity graph built"
        );
        Ok(graph)
    }

    /// Build and write the graph unless `path` exists; an existing file is
    /// left untouched and nothing is computed.
    pub fn to_file(&self, path: &Path) -> Result<WriteOutcome> {
        if path.exists() {
            debug!(path = %path.display(), "similarity graph exists, skipping build");
            return Ok(WriteOutcome::AlreadyPresent);
        }
        self.build()?.to_file(path)
    }
}

fn check_k(embeddings: &Array2<f32>, k: usize) -> Result<()> {
    let n = embeddings.nrows();
    if n == 0 {
        return Err(CourseGraphError::empty_input("similarity graph embeddings"));
    }
    if embeddings.ncols() == 0 {
        return Err(CourseGraphError::empty_input("embedding vectors have no dimensions"));
    }
    if k == 0 || k >= n {
        return Err(CourseGraphError::validation(format!(
            "k must satisfy 1 <= k < {n}, got {k}"
        )));
    }
    Ok(())
}

/// The k most cosine-similar rows of every row, most similar first.
///
/// A row is never its own neighbor. Zero-norm rows have similarity 0 with
/// everything. Ties go to the lower row index.
pub fn neighbors(embeddings: &Array2<f32>, k: usize) -> Result<Vec<Vec<usize>>> {
    check_k(embeddings, k)?;

    let n = embeddings.nrows();
    let norms: Vec<f64> = embeddings.rows().into_iter().map(norm).collect();

    let mut out = Vec::with_capacity(n);
    let mut scored: Vec<(f64, usize)> = Vec::with_capacity(n - 1);
    for i in 0..n {
        scored.clear();
        let row_i = embeddings.row(i);
        for j in (0..n).filter(|&j| j != i) {
            let sim = if norms[i] == 0.0 || norms[j] == 0.0 {
                0.0
            } else {
                dot(row_i, embeddings.row(j)) / (norms[i] * norms[j])
            };
            scored.push((sim, j));
        }
        scored.sort_by(|a, b| match b.0.total_cmp(&a.0) {
            Ordering::Equal => a.1.cmp(&b.1),
            other => other,
        });
        out.push(scored.iter().take(k).map(|&(_, j)| j).collect());
    }
    Ok(out)
}

fn dot(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum()
}

fn norm(row: ArrayView1<f32>) -> f64 {
    dot(row, row).sqrt()
}
