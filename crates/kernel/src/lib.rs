//! Datacat kernel library.
//!
//! Plugin lifecycle and hook dispatch, background jobs with per-run
//! logging, and job-log retention. The `datacat` binary wraps this crate.

pub mod builtin;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod joblog;
pub mod lock;
pub mod plugin;
pub mod reference;
pub mod runtime;
pub mod store;

pub use runtime::{Runtime, RuntimeBuilder};
