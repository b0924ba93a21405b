//! Shared types, error definitions, and utilities used across all homegw crates.

pub mod error;
pub mod trace;
pub mod types;

pub use {
    error::{Error, Result},
    trace::{constant_time_eq, new_trace_id},
    types::{MessageChannel, NormalizedMessage, RawData},
};
