//! Test module organization.
//!
//! This module organizes all integration tests for the core runtime.

/// Lifecycle rewiring through host commands and the boot path.
mod boot_tests;





/// Batching and transport retry tests.
mod relay_tests;
