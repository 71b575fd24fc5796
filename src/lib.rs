//! Language model coordination for a Chinese phonetic input method.
//!
//! [`coordinator::ModelCoordinator`] owns one composite model per script
//! variant, schedules factory dictionary loads on background workers and
//! keeps the user overlays and override learning data in sync with the
//! user's data folder. The [`api`] module exposes it to host apps.

uniffi::setup_scaffolding!();

pub mod api;
pub mod coordinator;
pub mod loader;
pub mod trace_init;

pub use lm_core;
