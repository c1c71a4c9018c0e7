//! Per-match violation accounting and penalty rulings.
//!
//! The referee is the single source of truth for what happens after
//! misbehavior, keeping that policy out of each game's rules. One referee
//! is owned by exactly one match-driving routine; its counters are never
//! shared across matches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MalformedJson,
    IllegalMove,
    Timeout,
    EmptyResponse,
    InjectionAttempt,
}

impl ViolationKind {
    pub fn severity(self) -> u32 {
        match self {
            ViolationKind::MalformedJson => 2,
            ViolationKind::IllegalMove => 1,
            ViolationKind::Timeout => 2,
            ViolationKind::EmptyResponse => 2,
            ViolationKind::InjectionAttempt => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::MalformedJson => "malformed_json",
            ViolationKind::IllegalMove => "illegal_move",
            ViolationKind::Timeout => "timeout",
            ViolationKind::EmptyResponse => "empty_response",
            ViolationKind::InjectionAttempt => "injection_attempt",
        }
    }
}

/// Default set of violation kinds counting toward match forfeiture.
pub fn default_strike_kinds() -> Vec<ViolationKind> {
    vec![ViolationKind::Timeout, ViolationKind::EmptyResponse]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ruling {
    Retry,
    ForfeitTurn,
    EliminatePlayer,
    ForfeitMatch,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: u32,
    pub details: String,
    pub turn: u64,
}

/// Per-seat aggregation of a match's violations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FidelityReport {
    pub malformed_json: u32,
    pub illegal_move: u32,
    pub timeout: u32,
    pub empty_response: u32,
    pub injection_attempts: u32,
    pub total_severity: u32,
    pub retries_consumed: u32,
    pub turn_forfeits: u32,
    pub triggered_match_forfeit: bool,
}

pub struct FidelityReferee {
    seat_count: usize,
    forfeit_threshold: u32,
    strike_kinds: Vec<ViolationKind>,
    violations: Vec<Vec<Violation>>,
    turn_violations: Vec<u32>,
    retry_consumed: Vec<bool>,
    retries_total: Vec<u32>,
    turn_forfeits: Vec<u32>,
    match_forfeited_by: Option<usize>,
    current_turn: u64,
}

impl FidelityReferee {
    /// The match-forfeit threshold scales with table size: larger tables
    /// produce more noise-driven forfeits, so the base grows by one per
    /// seat beyond six.
    pub fn new(seat_count: usize, base_threshold: u32, strike_kinds: Vec<ViolationKind>) -> Self {
        let forfeit_threshold = base_threshold + seat_count.saturating_sub(6) as u32;
        Self {
            seat_count,
            forfeit_threshold,
            strike_kinds,
            violations: vec![Vec::new(); seat_count],
            turn_violations: vec![0; seat_count],
            retry_consumed: vec![false; seat_count],
            retries_total: vec![0; seat_count],
            turn_forfeits: vec![0; seat_count],
            match_forfeited_by: None,
            current_turn: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.forfeit_threshold
    }

    /// Reset the per-turn state. Call once before each game turn.
    pub fn new_turn(&mut self, turn: u64) {
        self.current_turn = turn;
        for v in self.turn_violations.iter_mut() {
            *v = 0;
        }
        for r in self.retry_consumed.iter_mut() {
            *r = false;
        }
    }

    /// Record a violation and decide what happens next.
    ///
    /// The first violation of a turn earns a retry if the seat still has
    /// one; the caller must `consume_retry` before re-asking. Anything
    /// further forfeits the turn, and strike-eligible kinds escalate to a
    /// match forfeit once the seat's cumulative turn forfeits reach the
    /// threshold.
    pub fn record_violation(&mut self, seat: usize, kind: ViolationKind, details: &str) -> Ruling {
        self.violations[seat].push(Violation {
            kind,
            severity: kind.severity(),
            details: details.to_string(),
            turn: self.current_turn,
        });
        self.turn_violations[seat] += 1;

        if self.turn_violations[seat] == 1 && !self.retry_consumed[seat] {
            return Ruling::Retry;
        }

        self.turn_forfeits[seat] += 1;
        if self.strike_kinds.contains(&kind) && self.turn_forfeits[seat] >= self.forfeit_threshold {
            self.match_forfeited_by = Some(seat);
            return self.ejection_ruling();
        }
        Ruling::ForfeitTurn
    }

    pub fn consume_retry(&mut self, seat: usize) {
        self.retry_consumed[seat] = true;
        self.retries_total[seat] += 1;
    }

    /// Short-circuit ejection, used by stuck-loop detection. Counts as a
    /// turn forfeit for the seat and ends the match regardless of the
    /// ordinary threshold.
    pub fn force_match_forfeit(&mut self, seat: usize) -> Ruling {
        self.turn_forfeits[seat] += 1;
        self.match_forfeited_by = Some(seat);
        self.ejection_ruling()
    }

    fn ejection_ruling(&self) -> Ruling {
        if self.seat_count <= 2 {
            Ruling::ForfeitMatch
        } else {
            Ruling::EliminatePlayer
        }
    }

    pub fn match_forfeited_by(&self) -> Option<usize> {
        self.match_forfeited_by
    }

    pub fn turn_forfeits(&self, seat: usize) -> u32 {
        self.turn_forfeits[seat]
    }

    pub fn fidelity_reports(&self) -> BTreeMap<usize, FidelityReport> {
        (0..self.seat_count)
            .map(|seat| {
                let mut report = FidelityReport {
                    retries_consumed: self.retries_total[seat],
                    turn_forfeits: self.turn_forfeits[seat],
                    triggered_match_forfeit: self.match_forfeited_by == Some(seat),
                    ..FidelityReport::default()
                };
                for v in &self.violations[seat] {
                    report.total_severity += v.severity;
                    match v.kind {
                        ViolationKind::MalformedJson => report.malformed_json += 1,
                        ViolationKind::IllegalMove => report.illegal_move += 1,
                        ViolationKind::Timeout => report.timeout += 1,
                        ViolationKind::EmptyResponse => report.empty_response += 1,
                        ViolationKind::InjectionAttempt => report.injection_attempts += 1,
                    }
                }
                (seat, report)
            })
            .collect()
    }
}
