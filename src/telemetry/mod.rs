//! Telemetry pipeline: two sinks behind one per-match façade.
//!
//! Every write goes through a `TelemetryLogger` bound to one match. Turn
//! records hit the durable file sink synchronously and are enqueued for
//! the document sink; the summary is written exactly once per match, on
//! every exit path: when the driver never reaches its own finalize call,
//! the logger's drop emits a stub summary instead of losing the match.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use crate::referee::{FidelityReport, Ruling, ViolationKind};

pub mod file;
pub mod store;

use file::MatchLog;
use store::{MatchDoc, StoreHandle, TurnDoc};

/// RFC3339 timestamp with milliseconds.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Salted prompt digest for the document sink's hash-only mode.
pub fn prompt_digest(match_id: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(match_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

/// One record per model decision attempt, retries and forfeits included.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub ts: String,
    pub record_type: &'static str,
    pub match_id: String,
    pub turn_number: u64,
    pub hand_number: u32,
    pub street: String,
    pub seat_id: String,
    pub agent_id: String,
    pub agent_version: String,
    pub prompt: String,
    pub raw_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<String>,
    pub parsed_action: Option<Value>,
    pub parse_ok: bool,
    pub validation: String,
    pub violation: Option<ViolationKind>,
    pub ruling: Option<Ruling>,
    pub state_snapshot: Value,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub shot_clock_ms: u64,
    pub shot_clock_exceeded: bool,
    pub strikes: u32,
    pub strike_limit: u32,
    pub engine_version: String,
    pub prompt_schema_version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchSummaryRecord {
    pub ts: String,
    pub record_type: &'static str,
    pub match_id: String,
    pub event: String,
    pub ruling: String,
    #[serde(rename = "_match_forfeited_by", skip_serializing_if = "Option::is_none")]
    pub match_forfeited_by: Option<String>,
    pub final_scores: BTreeMap<String, f64>,
    pub fidelity: BTreeMap<String, FidelityReport>,
    pub highlights: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conservation_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub turns: u64,
    pub duration_ms: u64,
}

/// Everything the driver hands over at match end.
#[derive(Debug, Clone, Default)]
pub struct MatchFinalize {
    pub ruling: String,
    pub match_forfeited_by: Option<String>,
    pub final_scores: BTreeMap<String, f64>,
    pub fidelity: BTreeMap<String, FidelityReport>,
    pub highlights: Vec<String>,
    pub conservation_ok: Option<bool>,
    pub error: Option<String>,
}

pub struct TelemetryLogger {
    match_id: String,
    event: String,
    log: MatchLog,
    store: StoreHandle,
    store_prompt_text: bool,
    finalized: bool,
    started: Instant,
    turns: u64,
}

impl TelemetryLogger {
    pub fn open(
        dir: &Path,
        match_id: &str,
        event: &str,
        store: StoreHandle,
        store_prompt_text: bool,
    ) -> Result<Self> {
        let log = MatchLog::open(dir, match_id)
            .with_context(|| format!("cannot open match log for {}", match_id))?;
        Ok(Self {
            match_id: match_id.to_string(),
            event: event.to_string(),
            log,
            store,
            store_prompt_text,
            finalized: false,
            started: Instant::now(),
            turns: 0,
        })
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Synchronous write to the file sink, then enqueue for the document
    /// sink. A file-sink failure is fatal: the audit trail is
    /// non-negotiable.
    pub fn log_turn(&mut self, record: &TurnRecord) -> Result<()> {
        self.log.append(record).context("telemetry file sink write failed")?;
        self.store.enqueue_turn(turn_doc(record, self.store_prompt_text));
        self.turns += 1;
        Ok(())
    }

    pub fn finalize_match(&mut self, fin: MatchFinalize) -> Result<()> {
        let record = MatchSummaryRecord {
            ts: now_rfc3339(),
            record_type: "match_summary",
            match_id: self.match_id.clone(),
            event: self.event.clone(),
            ruling: fin.ruling,
            match_forfeited_by: fin.match_forfeited_by,
            final_scores: fin.final_scores,
            fidelity: fin.fidelity,
            highlights: fin.highlights,
            conservation_ok: fin.conservation_ok,
            error: fin.error,
            turns: self.turns,
            duration_ms: self.started.elapsed().as_millis() as u64,
        };
        self.log.append(&record).context("telemetry file sink write failed")?;
        self.store.upsert_match(MatchDoc {
            match_id: self.match_id.clone(),
            doc: serde_json::to_value(&record).unwrap_or(Value::Null),
        });
        self.finalized = true;
        Ok(())
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        // The driver unwound before finalizing; a stub summary beats
        // silent loss.
        let stub = MatchFinalize {
            ruling: "aborted".to_string(),
            ..MatchFinalize::default()
        };
        if let Err(e) = self.finalize_match(stub) {
            log::error!("failed to write stub summary for {}: {}", self.match_id, e);
        }
    }
}

fn redact_prompt(doc: &mut Value, match_id: &str) {
    if let Some(prompt) = doc.get("prompt").and_then(|p| p.as_str()).map(str::to_string) {
        doc["prompt"] = json!({
            "sha256": prompt_digest(match_id, &prompt),
            "chars": prompt.len(),
            "tokens_approx": prompt.len() / 4,
        });
    }
}

fn turn_doc(record: &TurnRecord, store_prompt_text: bool) -> TurnDoc {
    let mut doc = serde_json::to_value(record).unwrap_or(Value::Null);
    if !store_prompt_text {
        redact_prompt(&mut doc, &record.match_id);
    }
    TurnDoc {
        match_id: record.match_id.clone(),
        turn_number: record.turn_number,
        hand_number: record.hand_number,
        seat_id: record.seat_id.clone(),
        agent_id: record.agent_id.clone(),
        doc,
    }
}

/// Re-ingest one durable match log into the document store. Turns are
/// deduplicated by the compound key and matches are upserts, so running
/// this twice is a no-op; model aggregates are deliberately not
/// re-incremented here. Returns (turns, summaries) enqueued.
pub fn backfill_log_file(store: &StoreHandle, path: &Path) -> Result<(u64, u64)> {
    let mut turns = 0u64;
    let mut summaries = 0u64;
    for mut value in MatchLog::read_records(path)? {
        match value["record_type"].as_str() {
            Some("turn") => {
                let match_id = value["match_id"].as_str().unwrap_or_default().to_string();
                redact_prompt(&mut value, &match_id);
                store.enqueue_turn(TurnDoc {
                    match_id,
                    turn_number: value["turn_number"].as_u64().unwrap_or(0),
                    hand_number: value["hand_number"].as_u64().unwrap_or(0) as u32,
                    seat_id: value["seat_id"].as_str().unwrap_or_default().to_string(),
                    agent_id: value["agent_id"].as_str().unwrap_or_default().to_string(),
                    doc: value,
                });
                turns += 1;
            }
            Some("match_summary") => {
                store.upsert_match(MatchDoc {
                    match_id: value["match_id"].as_str().unwrap_or_default().to_string(),
                    doc: value,
                });
                summaries += 1;
            }
            _ => {}
        }
    }
    Ok((turns, summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROMPT_SCHEMA_VERSION;

    fn sample_turn(match_id: &str, turn_number: u64) -> TurnRecord {
        TurnRecord {
            ts: now_rfc3339(),
            record_type: "turn",
            match_id: match_id.to_string(),
            turn_number,
            hand_number: 1,
            street: "open".to_string(),
            seat_id: "player_a".to_string(),
            agent_id: "caller".to_string(),
            agent_version: "offline/always_call".to_string(),
            prompt: "your move".to_string(),
            raw_output: r#"{"action":"call"}"#.to_string(),
            reasoning_text: None,
            parsed_action: Some(json!({"action": "call"})),
            parse_ok: true,
            validation: "valid".to_string(),
            violation: None,
            ruling: None,
            state_snapshot: json!({"pot": 4}),
            input_tokens: 0,
            output_tokens: 4,
            latency_ms: 0,
            shot_clock_ms: 30_000,
            shot_clock_exceeded: false,
            strikes: 0,
            strike_limit: 3,
            engine_version: "highcard-1.0".to_string(),
            prompt_schema_version: PROMPT_SCHEMA_VERSION,
        }
    }

    #[test]
    fn test_log_turn_then_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger =
            TelemetryLogger::open(dir.path(), "m-1", "highcard", StoreHandle::disabled(), false)
                .unwrap();
        logger.log_turn(&sample_turn("m-1", 1)).unwrap();
        logger
            .finalize_match(MatchFinalize {
                ruling: "completed".to_string(),
                conservation_ok: Some(true),
                ..MatchFinalize::default()
            })
            .unwrap();
        let path = dir.path().join("m-1.log");
        let records = MatchLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.last().unwrap()["record_type"], "match_summary");
        assert_eq!(records.last().unwrap()["turns"], 1);
    }

    #[test]
    fn test_drop_without_finalize_writes_stub() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut logger =
                TelemetryLogger::open(dir.path(), "m-2", "highcard", StoreHandle::disabled(), false)
                    .unwrap();
            logger.log_turn(&sample_turn("m-2", 1)).unwrap();
            // No finalize: simulates a panicking driver.
        }
        let records = MatchLog::read_records(&dir.path().join("m-2.log")).unwrap();
        let last = records.last().unwrap();
        assert_eq!(last["record_type"], "match_summary");
        assert_eq!(last["ruling"], "aborted");
    }

    #[test]
    fn test_prompt_hashed_for_document_sink_by_default() {
        let rec = sample_turn("m-3", 1);
        let doc = turn_doc(&rec, false);
        assert!(doc.doc["prompt"]["sha256"].is_string());
        assert_eq!(doc.doc["prompt"]["chars"], rec.prompt.len());
        // Verbatim mode keeps the text.
        let doc = turn_doc(&rec, true);
        assert_eq!(doc.doc["prompt"], "your move");
    }

    #[test]
    fn test_prompt_digest_is_salted_by_match() {
        assert_ne!(prompt_digest("m-1", "p"), prompt_digest("m-2", "p"));
        assert_eq!(prompt_digest("m-1", "p"), prompt_digest("m-1", "p"));
    }

    #[test]
    fn test_backfill_counts_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger =
            TelemetryLogger::open(dir.path(), "m-4", "highcard", StoreHandle::disabled(), false)
                .unwrap();
        logger.log_turn(&sample_turn("m-4", 1)).unwrap();
        logger.log_turn(&sample_turn("m-4", 2)).unwrap();
        logger.finalize_match(MatchFinalize::default()).unwrap();

        let (turns, summaries) =
            backfill_log_file(&StoreHandle::disabled(), &dir.path().join("m-4.log")).unwrap();
        assert_eq!((turns, summaries), (2, 1));
    }
}
