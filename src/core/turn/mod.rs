//! Per-call turn taking.
//!
//! - `machine` - the turn-taking state machine that owns all per-call state
//! - `flow_control` - the delivery acknowledgment queue used to measure playback

pub mod flow_control;
pub mod machine;

pub use flow_control::{MarkQueue, RESPONSE_MARK};
pub use machine::{Action, DEFAULT_MAX_UTTERANCE, TurnConfig, TurnMachine, TurnPhase};
