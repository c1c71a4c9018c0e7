//! Tournament orchestrator and per-match state machine.
//!
//! The orchestrator realizes the schedule eagerly, then drives matches in
//! waves (one wave per event round, so bracket seats can be resolved) with
//! bounded parallelism. Within a match the turn loop is strictly
//! sequential: prompt, query under the shot clock, parse, validate, hand
//! the ruling to the referee, apply or forfeit, log. Adapter, parser and
//! validator failures become violations and never propagate; only
//! engine-internal errors (fatal to the match) and file-sink failures
//! (fatal to the run) travel upward.

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapter::{build_adapter, Adapter, FailureKind, Message, QueryContext};
use crate::config::{AgentConfig, ComputeCaps, RunSettings, TournamentConfig, PROMPT_SCHEMA_VERSION};
use crate::game::{build_engine, seat_label, GameEngine, Seat};
use crate::parser::ActionValidator;
use crate::referee::{FidelityReferee, Ruling, ViolationKind};
use crate::sanitize::sanitize;
use crate::schedule::{build_schedule, ParticipantRef, ScheduledMatch};
use crate::telemetry::store::{DocumentStore, ModelDelta, StoreHandle, TournamentDoc};
use crate::telemetry::{now_rfc3339, MatchFinalize, TelemetryLogger, TurnRecord};

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub match_id: String,
    pub event: String,
    pub ruling: String,
    pub scores: BTreeMap<String, f64>,
    pub winner: Option<String>,
    pub draw: bool,
    pub forfeited_by: Option<String>,
    pub engine_error: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub matches_played: usize,
    pub match_forfeits: usize,
    pub engine_errors: usize,
    pub outcomes: Vec<MatchOutcome>,
}

pub struct Orchestrator {
    config: TournamentConfig,
    settings: RunSettings,
    adapters: HashMap<String, Arc<dyn Adapter>>,
    schedule: Vec<ScheduledMatch>,
    store: DocumentStore,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Builds every adapter, realizes the schedule and probes each event's
    /// engine, so that all configuration errors surface before any match
    /// starts.
    pub fn new(config: TournamentConfig, settings: RunSettings) -> Result<Self> {
        let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
        for (name, agent) in &config.models {
            adapters.insert(name.clone(), build_adapter(name, agent)?);
        }
        let schedule = build_schedule(&config)?;
        let mut probed = HashSet::new();
        for m in &schedule {
            if probed.insert(m.event.clone()) {
                build_engine(&m.game, m.participants.len(), &m.params)
                    .with_context(|| format!("event '{}'", m.event))?;
            }
        }
        let store = match &settings.store_uri {
            Some(uri) => DocumentStore::connect(uri),
            None => DocumentStore::disabled(),
        };
        Ok(Self {
            config,
            settings,
            adapters,
            schedule,
            store,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn schedule(&self) -> &[ScheduledMatch] {
        &self.schedule
    }

    pub fn store_handle(&self) -> StoreHandle {
        self.store.handle()
    }

    /// Override the adapter bound to an agent name. Lets tests and
    /// rehearsals wire mock back-ends behind a configured agent.
    pub fn insert_adapter(&mut self, name: &str, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(name.to_string(), adapter);
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        let store = self.store.handle();
        store.record_tournament(TournamentDoc {
            name: self.config.tournament.name.clone(),
            doc: json!({
                "name": self.config.tournament.name,
                "seed": self.config.tournament.seed,
                "version": self.config.tournament.version,
                "events": self.config.events.len(),
                "scheduled_matches": self.schedule.len(),
                "started_ts": now_rfc3339(),
            }),
        });

        let mut report = RunReport::default();
        let mut winners: HashMap<String, String> = HashMap::new();
        let waves = waves_of(&self.schedule);

        for wave in waves {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            let mut jobs = Vec::new();
            for sm in wave {
                let Some(agents) = resolve_participants(&sm.participants, &winners) else {
                    log::warn!("match {}: participants unresolved, skipping", sm.match_id);
                    continue;
                };
                let mut adapters = Vec::new();
                let mut agent_cfgs = Vec::new();
                for name in &agents {
                    adapters.push(
                        self.adapters
                            .get(name)
                            .cloned()
                            .ok_or_else(|| anyhow!("no adapter for agent '{}'", name))?,
                    );
                    agent_cfgs.push(
                        self.config
                            .models
                            .get(name)
                            .cloned()
                            .ok_or_else(|| anyhow!("no config for agent '{}'", name))?,
                    );
                }
                jobs.push(MatchJob { sm, agents, adapters, agent_cfgs });
            }

            let caps = self.config.compute_caps.clone();
            let log_dir = self.settings.log_dir.clone();
            let futures: Vec<_> = jobs
                .into_iter()
                .map(|job| {
                    run_match(job, caps.clone(), log_dir.clone(), store.clone(), self.cancel.clone())
                })
                .collect();
            let results: Vec<Result<MatchOutcome>> = stream::iter(futures)
                .buffer_unordered(self.settings.max_parallel_matches.max(1))
                .collect()
                .await;

            for result in results {
                let outcome = result?;
                if let Some(winner) = &outcome.winner {
                    winners.insert(outcome.match_id.clone(), winner.clone());
                }
                report.matches_played += 1;
                if outcome.engine_error {
                    report.engine_errors += 1;
                }
                if outcome.forfeited_by.is_some() {
                    report.match_forfeits += 1;
                }
                report.outcomes.push(outcome);
            }
        }

        store.flush();
        Ok(report)
    }
}

/// Consecutive `(event, round)` runs of the schedule. Waves are barriers:
/// a bracket round only starts once the previous round's winners exist.
fn waves_of(schedule: &[ScheduledMatch]) -> Vec<Vec<ScheduledMatch>> {
    let mut waves: Vec<Vec<ScheduledMatch>> = Vec::new();
    let mut key: Option<(String, u32)> = None;
    for m in schedule {
        let k = (m.event.clone(), m.round);
        if key.as_ref() != Some(&k) {
            waves.push(Vec::new());
            key = Some(k);
        }
        if let Some(wave) = waves.last_mut() {
            wave.push(m.clone());
        }
    }
    waves
}

fn resolve_participants(
    participants: &[ParticipantRef],
    winners: &HashMap<String, String>,
) -> Option<Vec<String>> {
    participants
        .iter()
        .map(|p| match p {
            ParticipantRef::Agent(name) => Some(name.clone()),
            ParticipantRef::WinnerOf(match_id) => winners.get(match_id).cloned(),
        })
        .collect()
}

struct MatchJob {
    sm: ScheduledMatch,
    agents: Vec<String>,
    adapters: Vec<Arc<dyn Adapter>>,
    agent_cfgs: Vec<AgentConfig>,
}

enum Disposition {
    Applied(Value),
    Forfeited,
}

struct Attempt {
    prompt: String,
    raw_output: String,
    reasoning: Option<String>,
    model_version: Option<String>,
    parsed_action: Option<Value>,
    parse_ok: bool,
    validation: String,
    violation: Option<(ViolationKind, String)>,
    ruling: Option<Ruling>,
    input_tokens: u64,
    output_tokens: u64,
    latency_ms: u64,
    shot_clock_exceeded: bool,
}

impl Attempt {
    fn new(prompt: String) -> Self {
        Self {
            prompt,
            raw_output: String::new(),
            reasoning: None,
            model_version: None,
            parsed_action: None,
            parse_ok: false,
            validation: "not_attempted".to_string(),
            violation: None,
            ruling: None,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
            shot_clock_exceeded: false,
        }
    }
}

struct TurnResult {
    disposition: Disposition,
    attempts: Vec<Attempt>,
}

async fn run_match(
    job: MatchJob,
    caps: ComputeCaps,
    log_dir: PathBuf,
    store: StoreHandle,
    cancel: Arc<AtomicBool>,
) -> Result<MatchOutcome> {
    let MatchJob { sm, agents, adapters, agent_cfgs } = job;
    let seat_count = agents.len();
    let mut logger = TelemetryLogger::open(
        &log_dir,
        &sm.match_id,
        &sm.event,
        store.clone(),
        caps.store_prompt_text,
    )?;

    let mut engine = match build_engine(&sm.game, seat_count, &sm.params) {
        Ok(engine) => engine,
        Err(e) => return abort_match(logger, &sm, &agents, &adapters, &store, e.to_string()),
    };
    engine.reset(sm.seed);
    let validator = match ActionValidator::new(&engine.action_schema()) {
        Ok(v) => v,
        Err(e) => return abort_match(logger, &sm, &agents, &adapters, &store, e.to_string()),
    };
    let mut referee = FidelityReferee::new(
        seat_count,
        caps.match_forfeit_threshold,
        caps.strike_violation_kinds.clone(),
    );
    let mut windows: Vec<VecDeque<(ViolationKind, String)>> = vec![VecDeque::new(); seat_count];
    let mut turn_number: u64 = 0;
    let mut game_turn: u64 = 0;
    let mut engine_error: Option<String> = None;
    let mut cancelled = false;

    while !engine.is_terminal() {
        game_turn += 1;
        referee.new_turn(game_turn);
        let seat = engine.current_player();
        let prompt = engine.prompt(seat);
        let max_tokens = caps.effective_max_tokens(&agent_cfgs[seat]);
        let timeout_s = caps.effective_timeout_s(&agent_cfgs[seat]);
        let ctx = QueryContext {
            match_id: sm.match_id.clone(),
            seat: seat_label(seat),
            turn_number: game_turn,
        };

        let turn = attempt_turn(
            adapters[seat].as_ref(),
            engine.as_ref(),
            &mut referee,
            &validator,
            &mut windows[seat],
            seat,
            prompt,
            max_tokens,
            timeout_s,
            &ctx,
        )
        .await;

        for attempt in &turn.attempts {
            turn_number += 1;
            let record = TurnRecord {
                ts: now_rfc3339(),
                record_type: "turn",
                match_id: sm.match_id.clone(),
                turn_number,
                hand_number: engine.hand_number(),
                street: engine.street(),
                seat_id: seat_label(seat),
                agent_id: agents[seat].clone(),
                agent_version: attempt
                    .model_version
                    .clone()
                    .unwrap_or_else(|| adapters[seat].model_id().to_string()),
                prompt: attempt.prompt.clone(),
                raw_output: attempt.raw_output.clone(),
                reasoning_text: attempt.reasoning.clone(),
                parsed_action: attempt.parsed_action.clone(),
                parse_ok: attempt.parse_ok,
                validation: attempt.validation.clone(),
                violation: attempt.violation.as_ref().map(|(kind, _)| *kind),
                ruling: attempt.ruling,
                state_snapshot: engine.state_snapshot(),
                input_tokens: attempt.input_tokens,
                output_tokens: attempt.output_tokens,
                latency_ms: attempt.latency_ms,
                shot_clock_ms: (timeout_s * 1000.0) as u64,
                shot_clock_exceeded: attempt.shot_clock_exceeded,
                strikes: referee.turn_forfeits(seat),
                strike_limit: referee.threshold(),
                engine_version: engine.engine_version().to_string(),
                prompt_schema_version: PROMPT_SCHEMA_VERSION,
            };
            logger.log_turn(&record)?;
        }

        match turn.disposition {
            Disposition::Applied(action) => {
                if let Err(e) = engine.apply_action(seat, &action) {
                    log::error!("match {}: {}", sm.match_id, e);
                    engine_error = Some(e.to_string());
                    break;
                }
            }
            Disposition::Forfeited => engine.forfeit_turn(seat),
        }

        if referee.match_forfeited_by().is_some() {
            break;
        }
        if cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }
    }

    // Finalization runs on every path from here on; the logger's drop
    // guard covers the paths above.
    let seat_scores = engine.scores();
    let scores: BTreeMap<String, f64> =
        seat_scores.iter().map(|(s, v)| (seat_label(*s), *v)).collect();
    let seat_reports = referee.fidelity_reports();
    let fidelity = seat_reports.iter().map(|(s, r)| (seat_label(*s), r.clone())).collect();
    let forfeit_seat = referee.match_forfeited_by();

    let ruling = if engine_error.is_some() {
        "engine_error".to_string()
    } else if let Some(seat) = forfeit_seat {
        format!("forfeited_by:{}", seat_label(seat))
    } else if cancelled {
        "cancelled".to_string()
    } else {
        "completed".to_string()
    };
    let conservation_ok = if engine_error.is_some() {
        None
    } else {
        let total: f64 = scores.values().sum();
        let ok = (total - engine.initial_stakes()).abs() < 1e-6;
        if !ok {
            log::warn!(
                "match {}: score conservation violated ({} != {})",
                sm.match_id,
                total,
                engine.initial_stakes()
            );
        }
        Some(ok)
    };

    logger.finalize_match(MatchFinalize {
        ruling: ruling.clone(),
        match_forfeited_by: forfeit_seat.map(seat_label),
        final_scores: scores.clone(),
        fidelity,
        highlights: engine.highlight_hands(),
        conservation_ok,
        error: engine_error.clone(),
    })?;

    let (winner_seat, draw, results) =
        seat_results(&seat_scores, forfeit_seat, engine_error.is_some());
    for seat in 0..agents.len() {
        let report = seat_reports.get(&seat).cloned().unwrap_or_default();
        store.increment_model(ModelDelta {
            model_id: adapters[seat].model_id().to_string(),
            event: sm.event.clone(),
            matches_played: 1,
            wins: (results[seat] == SeatResult::Win) as u32,
            losses: (results[seat] == SeatResult::Loss) as u32,
            draws: (results[seat] == SeatResult::Draw) as u32,
            malformed_json: report.malformed_json,
            illegal_move: report.illegal_move,
            timeouts: report.timeout,
            empty_responses: report.empty_response,
            injection_attempts: report.injection_attempts,
            last_played_ts: now_rfc3339(),
        });
    }

    Ok(MatchOutcome {
        match_id: sm.match_id.clone(),
        event: sm.event.clone(),
        ruling,
        scores,
        winner: winner_seat.map(|s| agents[s].clone()),
        draw,
        forfeited_by: forfeit_seat.map(seat_label),
        engine_error: engine_error.is_some(),
    })
}

/// The match cannot start or continue for engine-internal reasons; write
/// the summary and move on. The orchestrator keeps running the schedule.
fn abort_match(
    mut logger: TelemetryLogger,
    sm: &ScheduledMatch,
    agents: &[String],
    adapters: &[Arc<dyn Adapter>],
    store: &StoreHandle,
    message: String,
) -> Result<MatchOutcome> {
    log::error!("match {}: {}", sm.match_id, message);
    logger.finalize_match(MatchFinalize {
        ruling: "engine_error".to_string(),
        error: Some(message),
        ..MatchFinalize::default()
    })?;
    for seat in 0..agents.len() {
        store.increment_model(ModelDelta {
            model_id: adapters[seat].model_id().to_string(),
            event: sm.event.clone(),
            matches_played: 1,
            last_played_ts: now_rfc3339(),
            ..ModelDelta::default()
        });
    }
    Ok(MatchOutcome {
        match_id: sm.match_id.clone(),
        event: sm.event.clone(),
        ruling: "engine_error".to_string(),
        scores: BTreeMap::new(),
        winner: None,
        draw: false,
        forfeited_by: None,
        engine_error: true,
    })
}

/// One seat decision under a single shot-clock window: at most two adapter
/// queries, the second only after a retry ruling with budget remaining.
#[allow(clippy::too_many_arguments)]
async fn attempt_turn(
    adapter: &dyn Adapter,
    engine: &dyn GameEngine,
    referee: &mut FidelityReferee,
    validator: &ActionValidator,
    window: &mut VecDeque<(ViolationKind, String)>,
    seat: Seat,
    first_prompt: String,
    max_tokens: u32,
    timeout_s: f64,
    ctx: &QueryContext,
) -> TurnResult {
    let budget = Duration::from_secs_f64(timeout_s.max(0.0));
    let started = Instant::now();
    let mut attempts: Vec<Attempt> = Vec::new();
    let mut prompt = first_prompt;

    for attempt_idx in 0..2u32 {
        if started.elapsed() >= budget {
            // The window expired between attempts: skip the query, rule.
            let details = "shot clock expired before attempt".to_string();
            let (ruling, _) = rule(referee, window, seat, ViolationKind::Timeout, &details);
            let mut attempt = Attempt::new(prompt.clone());
            attempt.violation = Some((ViolationKind::Timeout, details));
            attempt.ruling = Some(ruling);
            attempt.shot_clock_exceeded = true;
            attempts.push(attempt);
            return TurnResult { disposition: Disposition::Forfeited, attempts };
        }
        let remaining = budget - started.elapsed();
        let attempt_started = Instant::now();
        let messages = [Message::user(prompt.clone())];

        match adapter.query(&messages, max_tokens, remaining.as_secs_f64(), ctx).await {
            Err(err) => {
                // Grouped with timeouts below because an errored back-end
                // is externally indistinguishable from an unresponsive
                // agent at this layer.
                let kind = if err.kind == FailureKind::Timeout {
                    ViolationKind::Timeout
                } else if err.empty_completion {
                    ViolationKind::EmptyResponse
                } else {
                    ViolationKind::Timeout
                };
                let details = err.to_string();
                let (ruling, stop) = rule(referee, window, seat, kind, &details);
                let mut attempt = Attempt::new(prompt.clone());
                attempt.latency_ms = attempt_started.elapsed().as_millis() as u64;
                attempt.violation = Some((kind, details));
                attempt.ruling = Some(ruling);
                attempt.shot_clock_exceeded = started.elapsed() >= budget;
                attempts.push(attempt);
                if stop || ruling != Ruling::Retry || attempt_idx == 1 {
                    return TurnResult { disposition: Disposition::Forfeited, attempts };
                }
                referee.consume_retry(seat);
                prompt = engine.retry_prompt(seat, "no usable response was received");
            }
            Ok(resp) => {
                let latency_ms = attempt_started.elapsed().as_millis() as u64;
                let clean = sanitize(&resp.raw_text);
                let parsed = validator.parse(&clean);

                if !parsed.success {
                    let error =
                        parsed.error.unwrap_or_else(|| "unparseable response".to_string());
                    let details = format!("{} [raw: {}]", error, head(&clean, 60));
                    let (ruling, stop) =
                        rule(referee, window, seat, ViolationKind::MalformedJson, &details);
                    let mut attempt = Attempt::new(prompt.clone());
                    attempt.raw_output = clean;
                    attempt.reasoning = resp.reasoning_text;
                    attempt.model_version = Some(resp.model_version);
                    attempt.input_tokens = resp.input_tokens;
                    attempt.output_tokens = resp.output_tokens;
                    attempt.latency_ms = latency_ms;
                    attempt.violation = Some((ViolationKind::MalformedJson, details));
                    attempt.ruling = Some(ruling);
                    attempt.shot_clock_exceeded = started.elapsed() >= budget;
                    attempts.push(attempt);
                    if stop || ruling != Ruling::Retry || attempt_idx == 1 {
                        return TurnResult { disposition: Disposition::Forfeited, attempts };
                    }
                    referee.consume_retry(seat);
                    prompt = engine.retry_prompt(seat, &error);
                    continue;
                }

                let action = parsed.action.unwrap_or(Value::Null);
                let check = engine.validate_action(seat, &action);
                if !check.legal {
                    let reason = check.reason.unwrap_or_else(|| "illegal move".to_string());
                    let (ruling, stop) =
                        rule(referee, window, seat, ViolationKind::IllegalMove, &reason);
                    let mut attempt = Attempt::new(prompt.clone());
                    attempt.raw_output = clean;
                    attempt.reasoning = resp.reasoning_text;
                    attempt.model_version = Some(resp.model_version);
                    attempt.parsed_action = Some(action);
                    attempt.parse_ok = true;
                    attempt.validation = format!("invalid: {}", reason);
                    attempt.input_tokens = resp.input_tokens;
                    attempt.output_tokens = resp.output_tokens;
                    attempt.latency_ms = latency_ms;
                    attempt.violation = Some((ViolationKind::IllegalMove, reason.clone()));
                    attempt.ruling = Some(ruling);
                    attempt.shot_clock_exceeded = started.elapsed() >= budget;
                    attempts.push(attempt);
                    if stop || ruling != Ruling::Retry || attempt_idx == 1 {
                        return TurnResult { disposition: Disposition::Forfeited, attempts };
                    }
                    referee.consume_retry(seat);
                    prompt = engine.retry_prompt(seat, &reason);
                    continue;
                }

                let mut violation = None;
                if parsed.injection_detected {
                    // Flag only: the legal, well-formed action still plays.
                    // Injection does not feed the stuck-loop window.
                    let details = "injection heuristics matched";
                    referee.record_violation(seat, ViolationKind::InjectionAttempt, details);
                    violation = Some((ViolationKind::InjectionAttempt, details.to_string()));
                }
                let mut attempt = Attempt::new(prompt.clone());
                attempt.raw_output = clean;
                attempt.reasoning = resp.reasoning_text;
                attempt.model_version = Some(resp.model_version);
                attempt.parsed_action = Some(action.clone());
                attempt.parse_ok = true;
                attempt.validation = "valid".to_string();
                attempt.input_tokens = resp.input_tokens;
                attempt.output_tokens = resp.output_tokens;
                attempt.latency_ms = latency_ms;
                attempt.violation = violation;
                attempt.shot_clock_exceeded = started.elapsed() >= budget;
                attempts.push(attempt);
                return TurnResult { disposition: Disposition::Applied(action), attempts };
            }
        }
    }
    TurnResult { disposition: Disposition::Forfeited, attempts }
}

/// Record a violation, feed the stuck-loop window, and escalate when the
/// last three violations of a seat are identical in kind and details. The
/// bool asks the caller to stop the turn immediately.
fn rule(
    referee: &mut FidelityReferee,
    window: &mut VecDeque<(ViolationKind, String)>,
    seat: Seat,
    kind: ViolationKind,
    details: &str,
) -> (Ruling, bool) {
    let ruling = referee.record_violation(seat, kind, details);
    let stuck = push_and_check_stuck(window, kind, details);
    if matches!(ruling, Ruling::EliminatePlayer | Ruling::ForfeitMatch) {
        return (ruling, true);
    }
    if stuck {
        return (referee.force_match_forfeit(seat), true);
    }
    (ruling, false)
}

fn push_and_check_stuck(
    window: &mut VecDeque<(ViolationKind, String)>,
    kind: ViolationKind,
    details: &str,
) -> bool {
    window.push_back((kind, details.to_string()));
    while window.len() > 3 {
        window.pop_front();
    }
    if window.len() < 3 {
        return false;
    }
    let first = &window[0];
    window.iter().all(|v| v == first)
}

fn head(text: &str, limit: usize) -> &str {
    let mut cut = limit.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeatResult {
    Win,
    Loss,
    Draw,
    Unscored,
}

fn seat_results(
    scores: &BTreeMap<Seat, f64>,
    forfeit_seat: Option<Seat>,
    engine_error: bool,
) -> (Option<Seat>, bool, Vec<SeatResult>) {
    let n = scores.len();
    if engine_error || n == 0 {
        return (None, false, vec![SeatResult::Unscored; n]);
    }
    let eligible: Vec<Seat> =
        scores.keys().copied().filter(|s| Some(*s) != forfeit_seat).collect();
    if eligible.is_empty() {
        return (None, false, vec![SeatResult::Loss; n]);
    }
    let top = eligible.iter().map(|s| scores[s]).fold(f64::MIN, f64::max);
    let tops: Vec<Seat> = eligible.iter().copied().filter(|s| scores[s] == top).collect();
    if forfeit_seat.is_some() || tops.len() == 1 {
        let winner = tops[0];
        let results = scores
            .keys()
            .map(|s| if *s == winner { SeatResult::Win } else { SeatResult::Loss })
            .collect();
        (Some(winner), false, results)
    } else {
        let results = scores
            .keys()
            .map(|s| if tops.contains(s) { SeatResult::Draw } else { SeatResult::Loss })
            .collect();
        (Some(tops[0]), true, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_check_stuck_requires_three_identical() {
        let mut w = VecDeque::new();
        assert!(!push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "same"));
        assert!(!push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "same"));
        assert!(push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "same"));
    }

    #[test]
    fn test_stuck_window_resets_on_different_details() {
        let mut w = VecDeque::new();
        push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "a");
        push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "b");
        assert!(!push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "a"));
        // A rolling window: three identical in a row still trips.
        push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "c");
        push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "c");
        assert!(push_and_check_stuck(&mut w, ViolationKind::MalformedJson, "c"));
    }

    #[test]
    fn test_different_kinds_do_not_trip() {
        let mut w = VecDeque::new();
        push_and_check_stuck(&mut w, ViolationKind::Timeout, "x");
        push_and_check_stuck(&mut w, ViolationKind::EmptyResponse, "x");
        assert!(!push_and_check_stuck(&mut w, ViolationKind::Timeout, "x"));
    }

    #[test]
    fn test_seat_results_plain_win() {
        let scores: BTreeMap<Seat, f64> = [(0, 52.0), (1, 48.0)].into();
        let (winner, draw, results) = seat_results(&scores, None, false);
        assert_eq!(winner, Some(0));
        assert!(!draw);
        assert_eq!(results, vec![SeatResult::Win, SeatResult::Loss]);
    }

    #[test]
    fn test_seat_results_draw() {
        let scores: BTreeMap<Seat, f64> = [(0, 50.0), (1, 50.0)].into();
        let (winner, draw, results) = seat_results(&scores, None, false);
        assert_eq!(winner, Some(0));
        assert!(draw);
        assert_eq!(results, vec![SeatResult::Draw, SeatResult::Draw]);
    }

    #[test]
    fn test_seat_results_forfeit_overrides_score() {
        // The forfeiting seat loses even with the higher score.
        let scores: BTreeMap<Seat, f64> = [(0, 60.0), (1, 40.0)].into();
        let (winner, draw, results) = seat_results(&scores, Some(0), false);
        assert_eq!(winner, Some(1));
        assert!(!draw);
        assert_eq!(results, vec![SeatResult::Loss, SeatResult::Win]);
    }

    #[test]
    fn test_seat_results_engine_error_unscored() {
        let scores: BTreeMap<Seat, f64> = [(0, 1.0), (1, 2.0)].into();
        let (winner, _, results) = seat_results(&scores, None, true);
        assert_eq!(winner, None);
        assert_eq!(results, vec![SeatResult::Unscored, SeatResult::Unscored]);
    }

    #[test]
    fn test_resolve_participants() {
        let mut winners = HashMap::new();
        winners.insert("m-1".to_string(), "alpha".to_string());
        let refs = vec![
            ParticipantRef::WinnerOf("m-1".to_string()),
            ParticipantRef::Agent("beta".to_string()),
        ];
        assert_eq!(
            resolve_participants(&refs, &winners),
            Some(vec!["alpha".to_string(), "beta".to_string()])
        );
        let unresolved = vec![ParticipantRef::WinnerOf("m-9".to_string())];
        assert_eq!(resolve_participants(&unresolved, &winners), None);
    }

    #[test]
    fn test_waves_group_by_event_round() {
        use crate::config::TournamentConfig;
        let cfg = TournamentConfig::from_json_str(
            r#"{
                "tournament": {"name": "t", "seed": 1},
                "models": {
                    "a": {"provider": "offline", "strategy": "always_call"},
                    "b": {"provider": "offline", "strategy": "always_call"},
                    "c": {"provider": "offline", "strategy": "always_call"},
                    "d": {"provider": "offline", "strategy": "always_call"}
                },
                "events": {"hc": {"game": "highcard", "format": "bracket"}}
            }"#,
        )
        .unwrap();
        let schedule = build_schedule(&cfg).unwrap();
        let waves = waves_of(&schedule);
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].len(), 2);
        assert_eq!(waves[1].len(), 1);
    }
}
