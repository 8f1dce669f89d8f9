//! # dm-protocol
//!
//! Shared data models for diagmon.
//!
//! This crate defines all serializable data structures used for:
//! - Collection rule definitions (trigger, actions, limits, filters)
//! - Global settings from `.diagmon/config.toml`
//! - Egress operation status as reported to API callers
//! - Public collection rule state
//! - Events published by the engine to its host
//!
//! ## Modules
//!
//! - [`rule_models`]: Collection rule options
//! - [`config_models`]: Global configuration (limits, egress providers, rule defaults)
//! - [`process_models`]: Target process identity and filtering keys
//! - [`operation_models`]: Egress operation state and summaries
//! - [`rule_state_models`]: Public collection rule state projection
//! - [`ipc`]: Events sent from the engine to the host
//!
//! ## Design Principles
//!
//! - Minimal dependencies: Only serde, ts-rs, uuid and chrono
//! - TypeScript generation: All types derive `TS` for client compatibility
//! - Independent compilation: No dependencies on other diagmon crates

pub mod config_models;
pub mod ipc;
pub mod operation_models;
pub mod process_models;
pub mod rule_models;
pub mod rule_state_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use ipc::*;
pub use operation_models::*;
pub use process_models::*;
pub use rule_models::*;
pub use rule_state_models::*;
