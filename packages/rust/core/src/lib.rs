//! Core pipeline orchestration and domain logic for coursegraph.
//!
//! This crate ties together record preprocessing, embedding, projection,
//! graph construction, community detection, and artifact fusion into one
//! cached run (see [`pipeline::run_pipeline`]).

pub mod fusion;
pub mod pipeline;
pub mod projection;
pub mod records;
