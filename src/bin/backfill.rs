//! Re-ingest durable match logs into the document store.
//!
//! Usage:
//!   backfill <match-log.log> [more logs...]
//!
//! Turns are deduplicated by their compound key and match summaries are
//! upserts, so re-running over the same files is a no-op. Model aggregates
//! are not touched: they are incremented live, at finalize time only.

use anyhow::{bail, Result};
use std::path::Path;

use tourney::telemetry::backfill_log_file;
use tourney::telemetry::store::DocumentStore;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: backfill <match-log.log> [more logs...]");
    }
    let store = DocumentStore::connect_from_env();
    let handle = store.handle();
    if !handle.is_enabled() {
        bail!("TOURNEY_STORE_URI is not set; nothing to backfill into");
    }

    let mut total_turns = 0u64;
    let mut total_summaries = 0u64;
    for arg in &args {
        let (turns, summaries) = backfill_log_file(&handle, Path::new(arg))?;
        println!("{}: {} turns, {} summaries", arg, turns, summaries);
        total_turns += turns;
        total_summaries += summaries;
    }
    handle.flush();
    println!("backfilled {} turns and {} summaries from {} files", total_turns, total_summaries, args.len());
    Ok(())
}
