//! # graft
//!
//! Command-line front end of the graft upsert planner.
//!
//! - `cli` - clap command definitions and implementations
//! - `config` - TOML schema files
//! - `error` - application error type

pub mod cli;
pub mod config;
pub mod error;

pub use error::AppError;
