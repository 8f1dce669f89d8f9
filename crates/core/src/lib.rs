//! # dm-core
//!
//! Collection rule execution engine and artifact egress for diagmon.
//!
//! This crate provides:
//! - Configuration loading from the `.diagmon/` directory
//! - The target process capability diagnostics are collected through
//! - Artifact operations and the providers that egress them
//! - An admission-controlled store of egress operations
//! - Collection rules: actions, the action list executor, the rule state
//!   machine, and the service that runs rules against a target
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`target`]: Target process abstraction and a simulated target
//! - [`operation`]: Artifact producers
//! - [`egress`]: Egress providers, operations and the operation store
//! - [`rules`]: Collection rule execution

pub mod config;
pub mod egress;
pub mod operation;
pub mod rules;
pub mod target;
