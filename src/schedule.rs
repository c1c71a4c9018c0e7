//! Eager schedule realization.
//!
//! The full match list is built up front so the seed-isolation invariant
//! is inspectable: every match's seed and ID depend only on its
//! `(event, round, match_index)` coordinates and its participant tokens,
//! never on what else is in the schedule.

use anyhow::{bail, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::{MatchFormat, TournamentConfig};
use crate::seed::SeedManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantRef {
    Agent(String),
    /// Bracket seat filled by the winner of an earlier match, resolved at
    /// execution time. The token keeps seeds and IDs fixed up front.
    WinnerOf(String),
}

impl ParticipantRef {
    pub fn token(&self) -> String {
        match self {
            ParticipantRef::Agent(name) => name.clone(),
            ParticipantRef::WinnerOf(match_id) => format!("winner_of:{}", match_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledMatch {
    pub event: String,
    pub game: String,
    pub round: u32,
    pub match_index: u32,
    pub match_id: String,
    pub seed: i64,
    pub participants: Vec<ParticipantRef>,
    pub params: Value,
}

/// Stable match ID: a short hash of event, coordinates and participants.
pub fn match_id(event: &str, round: u32, index: u32, participants: &[ParticipantRef]) -> String {
    let tokens: Vec<String> = participants.iter().map(|p| p.token()).collect();
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:{}", event, round, index, tokens.join(",")).as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("m-{}", &digest[..12])
}

pub fn build_schedule(cfg: &TournamentConfig) -> Result<Vec<ScheduledMatch>> {
    let seeds = SeedManager::new(cfg.tournament.seed);
    let mut out = Vec::new();
    for (event_name, event) in &cfg.events {
        match event.format {
            MatchFormat::RoundRobin => {
                let agents: Vec<&String> = cfg.models.keys().collect();
                if agents.len() < 2 {
                    bail!("event '{}': round_robin needs at least two agents", event_name);
                }
                for round in 0..event.rounds {
                    let mut index = 0u32;
                    for i in 0..agents.len() {
                        for j in (i + 1)..agents.len() {
                            let participants = vec![
                                ParticipantRef::Agent(agents[i].clone()),
                                ParticipantRef::Agent(agents[j].clone()),
                            ];
                            out.push(realize(&seeds, event_name, event, round, index, participants));
                            index += 1;
                        }
                    }
                }
            }
            MatchFormat::Explicit => {
                if event.matchups.is_empty() {
                    bail!("event '{}': explicit format needs a matchups list", event_name);
                }
                for seats in &event.matchups {
                    if !(2..=9).contains(&seats.len()) {
                        bail!("event '{}': matchups need 2 to 9 seats", event_name);
                    }
                    for name in seats {
                        if !cfg.models.contains_key(name) {
                            bail!("event '{}': unknown agent '{}' in matchup", event_name, name);
                        }
                    }
                }
                for round in 0..event.rounds {
                    for (index, seats) in event.matchups.iter().enumerate() {
                        let participants =
                            seats.iter().map(|n| ParticipantRef::Agent(n.clone())).collect();
                        out.push(realize(&seeds, event_name, event, round, index as u32, participants));
                    }
                }
            }
            MatchFormat::Bracket => {
                let mut current: Vec<ParticipantRef> =
                    cfg.models.keys().map(|n| ParticipantRef::Agent(n.clone())).collect();
                if current.len() < 2 {
                    bail!("event '{}': bracket needs at least two agents", event_name);
                }
                let mut round = 0u32;
                while current.len() > 1 {
                    let mut next = Vec::new();
                    let mut index = 0u32;
                    for chunk in current.chunks(2) {
                        if chunk.len() == 1 {
                            // Odd entrant gets a bye into the next round.
                            next.push(chunk[0].clone());
                            continue;
                        }
                        let participants = vec![chunk[0].clone(), chunk[1].clone()];
                        let m = realize(&seeds, event_name, event, round, index, participants);
                        next.push(ParticipantRef::WinnerOf(m.match_id.clone()));
                        out.push(m);
                        index += 1;
                    }
                    current = next;
                    round += 1;
                }
            }
        }
    }
    Ok(out)
}

fn realize(
    seeds: &SeedManager,
    event_name: &str,
    event: &crate::config::EventConfig,
    round: u32,
    index: u32,
    participants: Vec<ParticipantRef>,
) -> ScheduledMatch {
    ScheduledMatch {
        event: event_name.to_string(),
        game: event.game.clone(),
        round,
        match_index: index,
        match_id: match_id(event_name, round, index, &participants),
        seed: seeds.match_seed(event_name, round, index),
        participants,
        params: event.params.clone(),
    }
}
