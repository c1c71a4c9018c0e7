//! The game-engine contract consumed by the match loop.
//!
//! Engines are deterministic under a fixed seed and any sequence of
//! validated actions. `forfeit_turn` must always succeed, conserve score
//! and advance the state so the current player eventually moves on.

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod dice;
pub mod highcard;

pub type Seat = usize;

/// Seat labels are stable: `player_a`, `player_b`, ... up to nine seats.
pub fn seat_label(seat: Seat) -> String {
    let letter = (b'a' + (seat as u8 % 26)) as char;
    format!("player_{}", letter)
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("engine error: {message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone)]
pub struct Validation {
    pub legal: bool,
    pub reason: Option<String>,
}

impl Validation {
    pub fn legal() -> Self {
        Self { legal: true, reason: None }
    }

    pub fn illegal(reason: impl Into<String>) -> Self {
        Self { legal: false, reason: Some(reason.into()) }
    }
}

pub trait GameEngine: Send {
    fn event_kind(&self) -> &'static str;
    fn engine_version(&self) -> &'static str;
    fn seat_count(&self) -> usize;

    fn reset(&mut self, seed: i64);
    fn current_player(&self) -> Seat;
    fn prompt(&self, seat: Seat) -> String;
    fn retry_prompt(&self, seat: Seat, reason: &str) -> String;
    fn action_schema(&self) -> Value;
    fn validate_action(&self, seat: Seat, action: &Value) -> Validation;
    fn apply_action(&mut self, seat: Seat, action: &Value) -> Result<(), EngineError>;
    fn forfeit_turn(&mut self, seat: Seat);
    fn is_terminal(&self) -> bool;
    fn scores(&self) -> BTreeMap<Seat, f64>;
    fn state_snapshot(&self) -> Value;
    fn highlight_hands(&self) -> Vec<String>;

    /// Non-decreasing across the match.
    fn hand_number(&self) -> u32;
    /// Phase label recorded on each turn.
    fn street(&self) -> String;
    /// Sum the final seat scores must conserve.
    fn initial_stakes(&self) -> f64;
}

/// Construct a fresh, un-reset engine for an event.
pub fn build_engine(game: &str, seats: usize, params: &Value) -> Result<Box<dyn GameEngine>> {
    match game {
        "highcard" => Ok(Box::new(highcard::HighCard::from_params(seats, params)?)),
        "dice" => Ok(Box::new(dice::DiceDuel::from_params(seats, params)?)),
        other => bail!("unknown game kind '{}'", other),
    }
}
