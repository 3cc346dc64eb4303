//! Core triage pipeline for device telemetry: intake, context tracking,
//! rule-based and LLM-assisted filtering, durable logging, periodic pattern
//! analysis, and proactive insight delivery. See `SPEC_FULL.md` for the
//! full component design.

pub mod cli;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod event_log;
pub mod judgment;
pub mod model;
pub mod patterns;
pub mod pipeline;
pub mod proactive;
pub mod rpc;
pub mod rules;
pub mod time_util;

pub use error::{BetterClawError, Result};
