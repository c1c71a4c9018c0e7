//! High Card Showdown: a heads-up ante/bet/showdown card game.
//!
//! Each hand both seats post an ante and receive one card from the match
//! RNG. A single betting round follows: the opener may check (call with
//! nothing owed), raise once, or fold; the responder calls or folds. At
//! showdown the higher card takes the pot, ties split it. Chips are
//! conserved at all times; a match aborted mid-hand refunds each seat's
//! committed chips.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{seat_label, EngineError, GameEngine, Seat, Validation};

const ENGINE_VERSION: &str = "highcard-1.0";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HighCardParams {
    pub hands: u32,
    pub ante: i64,
    pub starting_stack: i64,
    /// Fault injection: error out of `apply_action` once this many actions
    /// have been applied.
    pub fail_after_actions: Option<u32>,
}

impl Default for HighCardParams {
    fn default() -> Self {
        Self { hands: 10, ante: 2, starting_stack: 200, fail_after_actions: None }
    }
}

pub struct HighCard {
    params: HighCardParams,
    rng: StdRng,
    stacks: [i64; 2],
    /// Chips each seat has put into the current hand's pot.
    committed: [i64; 2],
    pot: i64,
    hand_no: u32,
    cards: [u8; 2],
    to_act: Seat,
    acted: [bool; 2],
    /// Amount the seat to act must match.
    outstanding: i64,
    raised: bool,
    terminal: bool,
    actions_seen: u32,
    highlights: Vec<String>,
}

enum HandResult {
    Winner(Seat),
    Split,
}

impl HighCard {
    pub fn from_params(seats: usize, params: &Value) -> Result<Self> {
        if seats != 2 {
            bail!("highcard is heads-up only, got {} seats", seats);
        }
        let params: HighCardParams = if params.is_null() {
            HighCardParams::default()
        } else {
            serde_json::from_value(params.clone()).context("invalid highcard params")?
        };
        if params.ante < 1 || params.starting_stack < params.ante {
            bail!("highcard requires ante >= 1 and starting_stack >= ante");
        }
        Ok(Self {
            params,
            rng: StdRng::seed_from_u64(0),
            stacks: [0; 2],
            committed: [0; 2],
            pot: 0,
            hand_no: 0,
            cards: [0; 2],
            to_act: 0,
            acted: [false; 2],
            outstanding: 0,
            raised: false,
            terminal: false,
            actions_seen: 0,
            highlights: Vec::new(),
        })
    }

    fn start_hand(&mut self) {
        if self.hand_no >= self.params.hands
            || self.stacks.iter().any(|&s| s < self.params.ante)
        {
            self.terminal = true;
            return;
        }
        self.hand_no += 1;
        for seat in 0..2 {
            self.stacks[seat] -= self.params.ante;
            self.committed[seat] = self.params.ante;
        }
        self.pot = 2 * self.params.ante;
        self.cards[0] = self.rng.gen_range(2..=14);
        self.cards[1] = self.rng.gen_range(2..=14);
        self.to_act = ((self.hand_no - 1) % 2) as Seat;
        self.acted = [false; 2];
        self.outstanding = 0;
        self.raised = false;
    }

    fn end_hand(&mut self, result: HandResult) {
        if self.pot >= 4 * self.params.ante {
            self.highlights.push(format!("hand-{}", self.hand_no));
        }
        match result {
            HandResult::Winner(w) => self.stacks[w] += self.pot,
            HandResult::Split => {
                let half = self.pot / 2;
                self.stacks[0] += half;
                self.stacks[1] += self.pot - half;
            }
        }
        self.pot = 0;
        self.committed = [0; 2];
        self.start_hand();
    }

    fn showdown(&mut self) {
        if self.cards[0] == self.cards[1] {
            self.end_hand(HandResult::Split);
        } else {
            let winner = if self.cards[0] > self.cards[1] { 0 } else { 1 };
            self.end_hand(HandResult::Winner(winner));
        }
    }

    fn do_call(&mut self, seat: Seat) {
        let owe = self.outstanding.min(self.stacks[seat]);
        self.stacks[seat] -= owe;
        self.committed[seat] += owe;
        self.pot += owe;
        self.outstanding = 0;
        self.acted[seat] = true;
        if self.acted[0] && self.acted[1] {
            self.showdown();
        } else {
            self.to_act = 1 - seat;
        }
    }

    fn do_fold(&mut self, seat: Seat) {
        self.end_hand(HandResult::Winner(1 - seat));
    }
}

impl GameEngine for HighCard {
    fn event_kind(&self) -> &'static str {
        "highcard"
    }

    fn engine_version(&self) -> &'static str {
        ENGINE_VERSION
    }

    fn seat_count(&self) -> usize {
        2
    }

    fn reset(&mut self, seed: i64) {
        self.rng = StdRng::seed_from_u64(seed as u64);
        self.stacks = [self.params.starting_stack; 2];
        self.committed = [0; 2];
        self.pot = 0;
        self.hand_no = 0;
        self.terminal = false;
        self.actions_seen = 0;
        self.highlights.clear();
        self.start_hand();
    }

    fn current_player(&self) -> Seat {
        self.to_act
    }

    fn prompt(&self, seat: Seat) -> String {
        format!(
            "High Card Showdown: hand {} of {}. You are {}.\n\
             Your card: {} (2-14, ace high).\n\
             Stacks: you {}, opponent {}. Pot: {}. To call: {}.\n\
             Reply with exactly one JSON object: {{\"action\":\"call\"}}, \
             {{\"action\":\"raise\",\"amount\":N}} or {{\"action\":\"fold\"}}.",
            self.hand_no,
            self.params.hands,
            seat_label(seat),
            self.cards[seat],
            self.stacks[seat],
            self.stacks[1 - seat],
            self.pot,
            self.outstanding,
        )
    }

    fn retry_prompt(&self, seat: Seat, reason: &str) -> String {
        format!("Your previous reply was rejected: {}.\n{}", reason, self.prompt(seat))
    }

    fn action_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["action"],
            "properties": {
                "action": {"type": "string", "enum": ["call", "raise", "fold"]},
                "amount": {"type": "integer", "minimum": 1}
            },
            "additionalProperties": false
        })
    }

    fn validate_action(&self, seat: Seat, action: &Value) -> Validation {
        if self.terminal {
            return Validation::illegal("match is over");
        }
        if seat != self.to_act {
            return Validation::illegal("not this seat's turn");
        }
        match action["action"].as_str() {
            Some("call") | Some("fold") => Validation::legal(),
            Some("raise") => {
                if self.raised {
                    return Validation::illegal("no re-raise allowed");
                }
                let amount = match action["amount"].as_i64() {
                    Some(a) if a >= 1 => a,
                    _ => return Validation::illegal("raise requires a positive integer amount"),
                };
                let cap = self.stacks[seat].min(self.stacks[1 - seat]);
                if amount > cap {
                    return Validation::illegal(format!(
                        "raise of {} exceeds the {} chips both stacks can cover",
                        amount, cap
                    ));
                }
                Validation::legal()
            }
            _ => Validation::illegal("unknown action"),
        }
    }

    fn apply_action(&mut self, seat: Seat, action: &Value) -> Result<(), EngineError> {
        self.actions_seen += 1;
        if let Some(n) = self.params.fail_after_actions {
            if self.actions_seen >= n {
                return Err(EngineError::new(format!(
                    "injected engine fault after {} actions",
                    n
                )));
            }
        }
        let check = self.validate_action(seat, action);
        if !check.legal {
            return Err(EngineError::new(format!(
                "apply of invalid action: {}",
                check.reason.unwrap_or_default()
            )));
        }
        match action["action"].as_str() {
            Some("call") => self.do_call(seat),
            Some("fold") => self.do_fold(seat),
            Some("raise") => {
                let amount = action["amount"].as_i64().unwrap_or(0);
                self.stacks[seat] -= amount;
                self.committed[seat] += amount;
                self.pot += amount;
                self.outstanding = amount;
                self.raised = true;
                self.acted[seat] = true;
                self.acted[1 - seat] = false;
                self.to_act = 1 - seat;
            }
            _ => unreachable!("validated above"),
        }
        Ok(())
    }

    fn forfeit_turn(&mut self, seat: Seat) {
        if self.terminal || seat != self.to_act {
            return;
        }
        // Check if nothing is owed, otherwise fold.
        if self.outstanding == 0 {
            self.do_call(seat);
        } else {
            self.do_fold(seat);
        }
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn scores(&self) -> BTreeMap<Seat, f64> {
        // Committed chips of an unresolved hand are refunded so that an
        // aborted match still conserves the initial stakes.
        (0..2)
            .map(|seat| (seat, (self.stacks[seat] + self.committed[seat]) as f64))
            .collect()
    }

    fn state_snapshot(&self) -> Value {
        json!({
            "hand": self.hand_no,
            "stacks": self.stacks,
            "pot": self.pot,
            "to_call": self.outstanding,
            "to_act": seat_label(self.to_act),
            "phase": self.street(),
        })
    }

    fn highlight_hands(&self) -> Vec<String> {
        self.highlights.clone()
    }

    fn hand_number(&self) -> u32 {
        self.hand_no
    }

    fn street(&self) -> String {
        if self.outstanding > 0 { "respond".to_string() } else { "open".to_string() }
    }

    fn initial_stakes(&self) -> f64 {
        (2 * self.params.starting_stack) as f64
    }
}
