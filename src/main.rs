use anyhow::{Context, Result};
use serde_json::json;
use std::sync::atomic::Ordering;

use tourney::config::{RunSettings, TournamentConfig};
use tourney::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path = std::env::args().nth(1).context("usage: tourney <config.json>")?;
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("cannot read {}", path))?;
    let config = TournamentConfig::from_json_str(&text)?;
    let settings = RunSettings::from_env();

    let mut orchestrator = Orchestrator::new(config, settings)?;
    log::info!("schedule realized: {} matches", orchestrator.schedule().len());

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("cancellation requested, finalizing in-flight matches");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = orchestrator.run().await?;
    for outcome in &report.outcomes {
        println!(
            "{}",
            json!({
                "match_id": outcome.match_id,
                "event": outcome.event,
                "ruling": outcome.ruling,
                "winner": outcome.winner,
                "scores": outcome.scores,
            })
        );
    }
    println!(
        "{}",
        json!({
            "matches_played": report.matches_played,
            "match_forfeits": report.match_forfeits,
            "engine_errors": report.engine_errors,
        })
    );

    if report.engine_errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
