//! coursegraph CLI: course-record artifact pipeline.
//!
//! Turns crawled course records into similarity and instructor graphs,
//! community partitions, projection tables, and scope-filtered fused
//! artifacts for the dashboard.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli)
}
