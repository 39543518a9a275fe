//! Dupeshred CLI: find byte-identical files with minimal reading.

use anyhow::Result;
use clap::Parser;
use dupeshred::engine::{Cli, handle_scan};
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    handle_scan(&cli)?;

    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
