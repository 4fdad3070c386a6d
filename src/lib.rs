//! Local, single-host control plane for browser-automation infrastructure.

#![warn(unused_crate_dependencies)]
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use predicates as _;
#[cfg(test)]
use tempfile as _;

/// External-Binary Activity Layer.
pub mod activities;

/// Boot Sequencer.
pub mod boot;

/// CLI parsing.
pub mod cli;

/// Config loading.
pub mod config;

/// Constants.
pub mod constants;

/// Log Correlator.
pub mod correlator;

/// Errors.
pub mod error;

/// Health Checker.
pub mod health;

/// Profile Lifecycle state machine.
pub mod profile;

/// Runtime paths and modes.
pub mod runtime;

/// Process Supervisor.
pub mod supervisor;

/// Telemetry Index.
pub mod telemetry;
