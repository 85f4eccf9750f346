//! Graph construction and community detection over course data.
//!
//! - [`Graph`]: undirected attributed graph, node-link JSON on disk
//! - [`SimilarityGraphBuilder`]: k-nearest-neighbor graph over embeddings
//! - [`BipartiteGraphBuilder`]: course/instructor graph
//! - [`CommunityDetector`]: seeded Louvain partition

pub mod bipartite;
pub mod community;
pub mod knn;
pub mod model;

pub use bipartite::{BipartiteGraphBuilder, split_instructors};
pub use community::{
    CommunityDetector, CommunityRow, DEFAULT_RESOLUTION, Partition, detect, modularity,
};
pub use knn::{SimilarityGraphBuilder, neighbors};
pub use model::{Graph, NodeAttrs, NodeKind, NO_COMMUNITY};
