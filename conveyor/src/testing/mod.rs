//! Testing utilities for conveyor orchestrators.
//!
//! This module provides:
//! - Tree fixtures and a launched in-memory store
//! - Assertions over pipeline trees
//! - Recording and failing worker transports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_action_status, assert_no_running_actions, assert_pipeline_status, assert_tree_terminal,
};
pub use fixtures::{find_action, held_failure_tree, launched_store, linear_tree, parallel_tree};
pub use mocks::{FailingTransport, RecordingTransport};
