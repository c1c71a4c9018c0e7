//! Reproducible, auditable tournament engine for language-model agents.
//!
//! Given a declarative tournament configuration, the orchestrator schedules
//! matches, drives each match turn-by-turn against agent back-ends, enforces
//! legality and a per-turn shot clock, and records every decision to a
//! durable append-only log plus an optional asynchronous document store.

pub mod adapter;
pub mod config;
pub mod game;
pub mod orchestrator;
pub mod parser;
pub mod referee;
pub mod sanitize;
pub mod schedule;
pub mod seed;
pub mod telemetry;
