//! Shared test doubles for papersync integration tests.
//!
//! This module provides:
//! - Scripted fakes for the processing and billing APIs that replay queued
//!   responses with call counting
//! - Fixture helpers for snapshots, chunks, and poll configurations

pub mod scripted;

pub use scripted::*;
