//! Broadcast automation runtime: per-channel playout orchestration over
//! MPEG-TS.
//!
//! Module layout mirrors a typical layered service: transport-agnostic
//! domain logic (`clock`, `schedule`, `producer`, `director`,
//! `orchestrator`, `router`) underneath the process-wide `registry`, with
//! `config`, `database`, `errors`, `metrics` and `web` as the ambient
//! stack wiring it all to a process.

pub mod clock;
pub mod config;
pub mod database;
pub mod director;
pub mod errors;
pub mod metrics;
pub mod orchestrator;
pub mod producer;
pub mod registry;
pub mod router;
pub mod schedule;
pub mod web;
