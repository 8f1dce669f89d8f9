//! Common test utilities shared by the integration tests.
//!
//! - Test fixtures (config directories, rules, stores, contexts)
//! - Event assertions
//! - Mock artifact producers and sinks

pub mod assertions;
pub mod fixtures;
pub mod mock_sinks;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use mock_sinks::*;
