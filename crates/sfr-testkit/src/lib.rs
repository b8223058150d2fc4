//! Deterministic doubles for the engine's ports, plus fixtures.
//!
//! Everything here is in-process: no database, no network.

pub mod fixtures;
mod memory_ledger;
mod recording_sender;
mod scripted_gateway;

pub use fixtures::{pending_order, seed_order, Harness, Line, SeededOrder};
pub use memory_ledger::{FailPoint, InMemoryLedger, OutboxRow};
pub use recording_sender::{RecordingSender, SentNotification};
pub use scripted_gateway::ScriptedGateway;
