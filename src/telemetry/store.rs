//! Asynchronous document sink.
//!
//! A bounded queue feeds a dedicated writer thread that owns the SQLite
//! connection and drains batches inside one transaction. Store errors are
//! warned and dropped, never propagated: the file sink is the audit trail,
//! this sink exists for queries and aggregation. When the store URI is
//! absent or the open fails, the sink is disabled and every operation is a
//! no-op.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

/// Queue capacity; on overflow the newest records are dropped with a
/// warning rather than blocking the match loop.
pub const QUEUE_CAPACITY: usize = 10_000;
/// Records drained per batch.
pub const BATCH_MAX: usize = 50;

#[derive(Debug, Clone)]
pub struct TurnDoc {
    pub match_id: String,
    pub turn_number: u64,
    pub hand_number: u32,
    pub seat_id: String,
    pub agent_id: String,
    pub doc: Value,
}

#[derive(Debug, Clone)]
pub struct MatchDoc {
    pub match_id: String,
    pub doc: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ModelDelta {
    pub model_id: String,
    pub event: String,
    pub matches_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub malformed_json: u32,
    pub illegal_move: u32,
    pub timeouts: u32,
    pub empty_responses: u32,
    pub injection_attempts: u32,
    pub last_played_ts: String,
}

#[derive(Debug, Clone)]
pub struct TournamentDoc {
    pub name: String,
    pub doc: Value,
}

enum StoreJob {
    Turn(TurnDoc),
    Match(MatchDoc),
    Model(ModelDelta),
    Tournament(TournamentDoc),
    Flush(mpsc::Sender<()>),
}

/// Cheap cloneable producer handle. A disabled handle swallows everything.
#[derive(Clone)]
pub struct StoreHandle {
    tx: Option<SyncSender<StoreJob>>,
}

impl StoreHandle {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    fn send(&self, job: StoreJob) {
        if let Some(tx) = &self.tx {
            match tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("document sink queue full, dropping record");
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("document sink writer gone, dropping record");
                }
            }
        }
    }

    pub fn enqueue_turn(&self, doc: TurnDoc) {
        self.send(StoreJob::Turn(doc));
    }

    pub fn upsert_match(&self, doc: MatchDoc) {
        self.send(StoreJob::Match(doc));
    }

    pub fn increment_model(&self, delta: ModelDelta) {
        self.send(StoreJob::Model(delta));
    }

    pub fn record_tournament(&self, doc: TournamentDoc) {
        self.send(StoreJob::Tournament(doc));
    }

    /// Block until everything enqueued before this call has been written.
    pub fn flush(&self) {
        if let Some(tx) = &self.tx {
            let (ack_tx, ack_rx) = mpsc::channel();
            if tx.send(StoreJob::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.recv_timeout(Duration::from_secs(30));
            }
        }
    }
}

/// Owns the writer thread. Dropping the store closes the queue and joins
/// the writer, so everything already enqueued still lands.
pub struct DocumentStore {
    handle: StoreHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl DocumentStore {
    /// `TOURNEY_STORE_URI` names the SQLite database; absence disables the
    /// sink entirely.
    pub fn connect_from_env() -> Self {
        match std::env::var("TOURNEY_STORE_URI") {
            Ok(uri) => Self::connect(&uri),
            Err(_) => Self::disabled(),
        }
    }

    pub fn connect(uri: &str) -> Self {
        Self::connect_with_capacity(uri, QUEUE_CAPACITY)
    }

    pub fn connect_with_capacity(uri: &str, capacity: usize) -> Self {
        let writer = match Writer::open(uri) {
            Ok(w) => w,
            Err(e) => {
                log::warn!("document store disabled: {}", e);
                return Self::disabled();
            }
        };
        let (tx, rx) = mpsc::sync_channel(capacity);
        match thread::Builder::new()
            .name("tourney-store".to_string())
            .spawn(move || writer.run(rx))
        {
            Ok(join) => Self { handle: StoreHandle { tx: Some(tx) }, join: Some(join) },
            Err(e) => {
                log::warn!("document store disabled, writer thread failed: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { handle: StoreHandle::disabled(), join: None }
    }

    pub fn handle(&self) -> StoreHandle {
        self.handle.clone()
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        self.handle.tx = None;
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct Writer {
    conn: Connection,
}

impl Writer {
    fn open(uri: &str) -> Result<Self> {
        let conn = Connection::open(uri).with_context(|| format!("cannot open store at {}", uri))?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS turns (
                match_id TEXT NOT NULL,
                turn_number INTEGER NOT NULL,
                hand_number INTEGER NOT NULL,
                seat_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                doc TEXT NOT NULL,
                UNIQUE (match_id, turn_number, hand_number, seat_id)
            );
            CREATE TABLE IF NOT EXISTS matches (
                match_id TEXT PRIMARY KEY,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS models (
                model_id TEXT PRIMARY KEY,
                matches_played INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                malformed_json INTEGER NOT NULL DEFAULT 0,
                illegal_move INTEGER NOT NULL DEFAULT 0,
                timeouts INTEGER NOT NULL DEFAULT 0,
                empty_responses INTEGER NOT NULL DEFAULT 0,
                injection_attempts INTEGER NOT NULL DEFAULT 0,
                last_played_ts TEXT
            );
            CREATE TABLE IF NOT EXISTS model_events (
                model_id TEXT NOT NULL,
                event TEXT NOT NULL,
                played INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (model_id, event)
            );
            CREATE TABLE IF NOT EXISTS tournaments (
                name TEXT PRIMARY KEY,
                doc TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(Self { conn })
    }

    fn run(mut self, rx: Receiver<StoreJob>) {
        loop {
            let first = match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            };
            let mut batch = vec![first];
            while batch.len() < BATCH_MAX {
                match rx.try_recv() {
                    Ok(job) => batch.push(job),
                    Err(_) => break,
                }
            }
            let mut acks = Vec::new();
            let jobs: Vec<StoreJob> = batch
                .into_iter()
                .filter_map(|job| match job {
                    StoreJob::Flush(ack) => {
                        acks.push(ack);
                        None
                    }
                    other => Some(other),
                })
                .collect();
            if let Err(e) = self.write_batch(jobs) {
                log::warn!("document sink batch failed: {}", e);
            }
            for ack in acks {
                let _ = ack.send(());
            }
        }
    }

    fn write_batch(&mut self, jobs: Vec<StoreJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for job in jobs {
            match job {
                StoreJob::Turn(d) => {
                    tx.execute(
                        "INSERT OR IGNORE INTO turns
                         (match_id, turn_number, hand_number, seat_id, agent_id, doc)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            d.match_id,
                            d.turn_number as i64,
                            d.hand_number as i64,
                            d.seat_id,
                            d.agent_id,
                            d.doc.to_string()
                        ],
                    )?;
                }
                StoreJob::Match(d) => {
                    tx.execute(
                        "INSERT INTO matches (match_id, doc) VALUES (?1, ?2)
                         ON CONFLICT(match_id) DO UPDATE SET doc = excluded.doc",
                        params![d.match_id, d.doc.to_string()],
                    )?;
                }
                StoreJob::Model(d) => {
                    tx.execute(
                        "INSERT INTO models
                         (model_id, matches_played, wins, losses, draws,
                          malformed_json, illegal_move, timeouts, empty_responses,
                          injection_attempts, last_played_ts)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                         ON CONFLICT(model_id) DO UPDATE SET
                           matches_played = matches_played + excluded.matches_played,
                           wins = wins + excluded.wins,
                           losses = losses + excluded.losses,
                           draws = draws + excluded.draws,
                           malformed_json = malformed_json + excluded.malformed_json,
                           illegal_move = illegal_move + excluded.illegal_move,
                           timeouts = timeouts + excluded.timeouts,
                           empty_responses = empty_responses + excluded.empty_responses,
                           injection_attempts = injection_attempts + excluded.injection_attempts,
                           last_played_ts = excluded.last_played_ts",
                        params![
                            d.model_id,
                            d.matches_played,
                            d.wins,
                            d.losses,
                            d.draws,
                            d.malformed_json,
                            d.illegal_move,
                            d.timeouts,
                            d.empty_responses,
                            d.injection_attempts,
                            d.last_played_ts
                        ],
                    )?;
                    tx.execute(
                        "INSERT INTO model_events (model_id, event, played, wins, losses, draws)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(model_id, event) DO UPDATE SET
                           played = played + excluded.played,
                           wins = wins + excluded.wins,
                           losses = losses + excluded.losses,
                           draws = draws + excluded.draws",
                        params![d.model_id, d.event, d.matches_played, d.wins, d.losses, d.draws],
                    )?;
                }
                StoreJob::Tournament(d) => {
                    tx.execute(
                        "INSERT INTO tournaments (name, doc) VALUES (?1, ?2)
                         ON CONFLICT(name) DO UPDATE SET doc = excluded.doc",
                        params![d.name, d.doc.to_string()],
                    )?;
                }
                StoreJob::Flush(_) => {}
            }
        }
        tx.commit()?;
        Ok(())
    }
}
