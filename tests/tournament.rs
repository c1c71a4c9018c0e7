//! End-to-end tournament scenarios: the gate between "code compiles" and
//! "the engine works."
//!
//! Every scenario runs offline agents through the full orchestrator and
//! asserts on the durable match log, the authoritative audit trail.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use tourney::adapter::{Adapter, AdapterError, AdapterResponse, Message, QueryContext};
use tourney::config::{RunSettings, TournamentConfig};
use tourney::orchestrator::{Orchestrator, RunReport};
use tourney::telemetry::file::MatchLog;

fn settings(dir: &Path) -> RunSettings {
    RunSettings { log_dir: dir.to_path_buf(), store_uri: None, max_parallel_matches: 1 }
}

async fn run(config_json: &str, dir: &Path) -> RunReport {
    let config = TournamentConfig::from_json_str(config_json).unwrap();
    let mut orchestrator = Orchestrator::new(config, settings(dir)).unwrap();
    orchestrator.run().await.unwrap()
}

fn log_records(dir: &Path, match_id: &str) -> Vec<Value> {
    MatchLog::read_records(&dir.join(format!("{}.log", match_id))).unwrap()
}

fn score_sum(summary: &Value) -> f64 {
    summary["final_scores"].as_object().unwrap().values().map(|v| v.as_f64().unwrap()).sum()
}

// ---------------------------------------------------------------------------
// Scenario 1: clean two-player heads-up match
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_clean_heads_up_match() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        r#"{
            "tournament": {"name": "clean", "seed": 42},
            "models": {
                "caller_one": {"provider": "offline", "strategy": "always_call"},
                "caller_two": {"provider": "offline", "strategy": "always_call"}
            },
            "events": {
                "highcard": {"game": "highcard",
                             "params": {"hands": 100, "ante": 2, "starting_stack": 200}}
            }
        }"#,
        dir.path(),
    )
    .await;

    assert_eq!(report.matches_played, 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.ruling, "completed");

    let records = log_records(dir.path(), &outcome.match_id);
    let summary = records.last().unwrap();
    assert_eq!(summary["record_type"], "match_summary");

    // Final scores conserve the two starting stacks.
    assert_eq!(score_sum(summary), 400.0);
    assert_eq!(summary["conservation_ok"], true);

    // One turn record per betting decision: two decisions per hand.
    let turns: Vec<&Value> =
        records.iter().filter(|r| r["record_type"] == "turn").collect();
    assert_eq!(turns.len(), 200);
    assert!(turns.iter().all(|t| t["parse_ok"] == true && t["violation"].is_null()));

    // Zero violations on either seat.
    for seat in ["player_a", "player_b"] {
        let fidelity = &summary["fidelity"][seat];
        assert_eq!(fidelity["total_severity"], 0, "seat {} had violations", seat);
        assert_eq!(fidelity["turn_forfeits"], 0);
    }

    // Turn numbers are strictly monotonic, hand numbers non-decreasing.
    let mut last_turn = 0;
    let mut last_hand = 0;
    for t in &turns {
        let n = t["turn_number"].as_u64().unwrap();
        let h = t["hand_number"].as_u64().unwrap();
        assert_eq!(n, last_turn + 1);
        assert!(h >= last_hand);
        last_turn = n;
        last_hand = h;
    }
}

// ---------------------------------------------------------------------------
// Scenario 2: adversarial garbage output (varying, so no stuck-loop)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_adversarial_garbage_runs_full_match() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        r#"{
            "tournament": {"name": "garbage", "seed": 7},
            "models": {
                "caller": {"provider": "offline", "strategy": "always_call"},
                "noisy": {"provider": "offline", "strategy": "garbage_echo"}
            },
            "events": {
                "highcard": {"game": "highcard",
                             "params": {"hands": 3, "ante": 2, "starting_stack": 200}}
            }
        }"#,
        dir.path(),
    )
    .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.ruling, "completed", "varying garbage must not end the match early");

    let records = log_records(dir.path(), &outcome.match_id);
    let summary = records.last().unwrap();
    assert_eq!(summary["record_type"], "match_summary");
    assert_eq!(score_sum(summary), 400.0);

    // Two malformed attempts per decision, one decision per hand.
    let noisy = &summary["fidelity"]["player_b"];
    assert_eq!(noisy["malformed_json"], 6);
    assert_eq!(noisy["turn_forfeits"], 3);
    assert_eq!(noisy["retries_consumed"], 3);
    assert_eq!(noisy["triggered_match_forfeit"], false);
    assert!(noisy["malformed_json"].as_u64().unwrap() >= 3);
}

// ---------------------------------------------------------------------------
// Scenario 3: injection flag without block
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_injection_flagged_but_match_identical_to_clean() {
    let clean_dir = tempfile::tempdir().unwrap();
    let injected_dir = tempfile::tempdir().unwrap();
    let clean = run(
        r#"{
            "tournament": {"name": "t", "seed": 11},
            "models": {
                "alpha": {"provider": "offline", "strategy": "always_call"},
                "bravo": {"provider": "offline", "strategy": "always_call"}
            },
            "events": {"highcard": {"game": "highcard", "params": {"hands": 5}}}
        }"#,
        clean_dir.path(),
    )
    .await;
    let injected = run(
        r#"{
            "tournament": {"name": "t", "seed": 11},
            "models": {
                "alpha": {"provider": "offline", "strategy": "injection_call"},
                "bravo": {"provider": "offline", "strategy": "always_call"}
            },
            "events": {"highcard": {"game": "highcard", "params": {"hands": 5}}}
        }"#,
        injected_dir.path(),
    )
    .await;

    let outcome = &injected.outcomes[0];
    assert_eq!(outcome.ruling, "completed");
    // Same seats, same seed, same legal actions: identical scores.
    assert_eq!(outcome.scores, clean.outcomes[0].scores);

    let records = log_records(injected_dir.path(), &outcome.match_id);
    let summary = records.last().unwrap();
    let alpha = &summary["fidelity"]["player_a"];
    // One decision per hand for the injecting seat.
    assert_eq!(alpha["injection_attempts"], 5);
    assert_eq!(alpha["malformed_json"], 0);
    assert_eq!(alpha["illegal_move"], 0);
    assert_eq!(alpha["turn_forfeits"], 0);

    let flagged: Vec<&Value> = records
        .iter()
        .filter(|r| r["record_type"] == "turn" && r["violation"] == "injection_attempt")
        .collect();
    assert_eq!(flagged.len(), 5);
    assert!(flagged.iter().all(|t| t["parse_ok"] == true && t["validation"] == "valid"));
}

// ---------------------------------------------------------------------------
// Scenario 4: shot-clock forfeit escalates to match forfeit
// ---------------------------------------------------------------------------

struct SlowAdapter;

#[async_trait::async_trait]
impl Adapter for SlowAdapter {
    async fn query(
        &self,
        _messages: &[Message],
        _max_tokens: u32,
        timeout_s: f64,
        _context: &QueryContext,
    ) -> Result<AdapterResponse, AdapterError> {
        // Would think for ten seconds; honors the caller's deadline.
        let wait = timeout_s.min(10.0);
        tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        if timeout_s < 10.0 {
            return Err(AdapterError::timeout(format!("request timed out after {:.1}s", timeout_s)));
        }
        Ok(AdapterResponse {
            raw_text: r#"{"action":"call"}"#.to_string(),
            reasoning_text: None,
            input_tokens: 0,
            output_tokens: 4,
            latency_ms: 10_000,
            model_id: "mock/slow".to_string(),
            model_version: "mock/slow".to_string(),
        })
    }

    fn model_id(&self) -> &str {
        "mock/slow"
    }
}

#[tokio::test]
async fn scenario_shot_clock_forfeit() {
    let dir = tempfile::tempdir().unwrap();
    let config = TournamentConfig::from_json_str(
        r#"{
            "tournament": {"name": "slowpoke", "seed": 5},
            "models": {
                "caller": {"provider": "offline", "strategy": "always_call"},
                "slow": {"provider": "offline", "strategy": "always_call", "timeout_s": 1.0}
            },
            "events": {
                "highcard": {"game": "highcard", "params": {"hands": 10}}
            }
        }"#,
    )
    .unwrap();
    let mut orchestrator = Orchestrator::new(config, settings(dir.path())).unwrap();
    orchestrator.insert_adapter("slow", Arc::new(SlowAdapter));
    let report = orchestrator.run().await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.ruling, "forfeited_by:player_b");
    assert_eq!(outcome.forfeited_by.as_deref(), Some("player_b"));
    assert_eq!(outcome.winner.as_deref(), Some("caller"));

    let records = log_records(dir.path(), &outcome.match_id);
    let summary = records.last().unwrap();
    let slow = &summary["fidelity"]["player_b"];
    // Default threshold of three strike-eligible turn forfeits.
    assert_eq!(slow["turn_forfeits"], 3);
    assert!(slow["timeout"].as_u64().unwrap() >= 3);
    assert_eq!(slow["triggered_match_forfeit"], true);
    assert_eq!(summary["_match_forfeited_by"], "player_b");

    // Scores still conserve the stakes.
    assert_eq!(score_sum(summary), 400.0);
}

// ---------------------------------------------------------------------------
// Scenario 5: engine crash mid-match, schedule continues
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_engine_error_finalizes_and_schedule_continues() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        r#"{
            "tournament": {"name": "crashy", "seed": 3},
            "models": {
                "caller_one": {"provider": "offline", "strategy": "always_call"},
                "caller_two": {"provider": "offline", "strategy": "always_call"}
            },
            "events": {
                "a_crash": {"game": "highcard",
                            "params": {"hands": 100, "fail_after_actions": 17}},
                "z_clean": {"game": "highcard", "params": {"hands": 5}}
            }
        }"#,
        dir.path(),
    )
    .await;

    assert_eq!(report.matches_played, 2);
    assert_eq!(report.engine_errors, 1);

    let crashed = report.outcomes.iter().find(|o| o.event == "a_crash").unwrap();
    assert!(crashed.engine_error);
    assert_eq!(crashed.ruling, "engine_error");

    let records = log_records(dir.path(), &crashed.match_id);
    // Seventeen decisions were logged before the engine gave out.
    let turns: Vec<&Value> = records.iter().filter(|r| r["record_type"] == "turn").collect();
    assert_eq!(turns.len(), 17);
    let summary = records.last().unwrap();
    assert_eq!(summary["record_type"], "match_summary");
    assert_eq!(summary["ruling"], "engine_error");
    assert!(summary["error"].as_str().unwrap().contains("injected engine fault"));

    // The later match in the schedule still executed cleanly.
    let clean = report.outcomes.iter().find(|o| o.event == "z_clean").unwrap();
    assert_eq!(clean.ruling, "completed");
}

// ---------------------------------------------------------------------------
// Scenario 6: stuck-loop detection ejects deterministically broken agents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_stuck_loop_ejects_identical_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        r#"{
            "tournament": {"name": "stuck", "seed": 9},
            "models": {
                "caller": {"provider": "offline", "strategy": "always_call"},
                "stuck": {"provider": "offline", "strategy": "garbage"}
            },
            "events": {
                "highcard": {"game": "highcard", "params": {"hands": 10}}
            }
        }"#,
        dir.path(),
    )
    .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.ruling, "forfeited_by:player_b");
    assert_eq!(outcome.winner.as_deref(), Some("caller"));

    let records = log_records(dir.path(), &outcome.match_id);
    let summary = records.last().unwrap();
    assert_eq!(summary["_match_forfeited_by"], "player_b");

    // Ejected on the third identical violation, well before any ordinary
    // threshold: exactly three malformed attempts were logged.
    let broken = &summary["fidelity"]["player_b"];
    assert_eq!(broken["malformed_json"], 3);
    assert!(broken["turn_forfeits"].as_u64().unwrap() > 0);
    assert_eq!(broken["triggered_match_forfeit"], true);

    let last_turn = records
        .iter()
        .filter(|r| r["record_type"] == "turn" && r["seat_id"] == "player_b")
        .last()
        .unwrap();
    assert_eq!(last_turn["ruling"], "forfeit_match");
}

// ---------------------------------------------------------------------------
// P4: every started match ends with exactly one summary line
// ---------------------------------------------------------------------------

#[tokio::test]
async fn telemetry_summary_is_always_the_final_line() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        r#"{
            "tournament": {"name": "p4", "seed": 1},
            "models": {
                "caller": {"provider": "offline", "strategy": "always_call"},
                "noisy": {"provider": "offline", "strategy": "garbage_echo"},
                "quiet": {"provider": "offline", "strategy": "always_call"}
            },
            "events": {"highcard": {"game": "highcard", "params": {"hands": 2}}}
        }"#,
        dir.path(),
    )
    .await;

    // Round robin over three agents: three matches.
    assert_eq!(report.matches_played, 3);
    for outcome in &report.outcomes {
        let records = log_records(dir.path(), &outcome.match_id);
        let summaries: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r["record_type"] == "match_summary")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(summaries, vec![records.len() - 1], "match {}", outcome.match_id);
    }
}

// ---------------------------------------------------------------------------
// Dice event runs end-to-end through the same machinery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dice_event_conserves_chips() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        r#"{
            "tournament": {"name": "dice", "seed": 21},
            "models": {
                "holder": {"provider": "offline", "strategy": "always_hold"},
                "roller": {"provider": "offline", "strategy": "one_roll"},
                "third": {"provider": "offline", "strategy": "always_hold"}
            },
            "events": {
                "bones": {"game": "dice", "format": "explicit",
                          "matchups": [["holder", "roller", "third"]],
                          "params": {"hands": 3, "ante": 1, "starting_chips": 10}}
            }
        }"#,
        dir.path(),
    )
    .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.ruling, "completed");
    let records = log_records(dir.path(), &outcome.match_id);
    let summary = records.last().unwrap();
    assert_eq!(score_sum(summary), 30.0);
    assert_eq!(summary["conservation_ok"], true);
    for seat in ["player_a", "player_b", "player_c"] {
        assert_eq!(summary["fidelity"][seat]["total_severity"], 0);
    }
}

// ---------------------------------------------------------------------------
// Bracket format resolves winners between rounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bracket_final_is_played_by_semifinal_winners() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        r#"{
            "tournament": {"name": "bracket", "seed": 13},
            "models": {
                "anna": {"provider": "offline", "strategy": "always_call"},
                "bert": {"provider": "offline", "strategy": "always_fold"},
                "cleo": {"provider": "offline", "strategy": "always_call"},
                "dora": {"provider": "offline", "strategy": "always_fold"}
            },
            "events": {
                "cup": {"game": "highcard", "format": "bracket",
                        "params": {"hands": 4}}
            }
        }"#,
        dir.path(),
    )
    .await;

    assert_eq!(report.matches_played, 3);
    // Folding every hand loses both semifinals, so the final is played by
    // the two callers.
    let semis: Vec<_> = report.outcomes.iter().take(2).collect();
    for semi in &semis {
        let winner = semi.winner.as_deref().unwrap();
        assert!(winner == "anna" || winner == "cleo", "unexpected winner {}", winner);
    }
}
