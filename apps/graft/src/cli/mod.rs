//! # graft CLI Module
//!
//! This module implements the CLI interface for graft.
//!
//! ## Available Commands
//!
//! - `plan` - Classify a desired graph against persisted state
//! - `fetch-request` - Show what must be loaded before planning
//! - `check-schema` - Validate a schema file and list its relations

mod commands;

use crate::error::AppError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// graft - nested graph upsert planner
///
/// Decides which entities of a desired object graph must be inserted,
/// updated, related, unrelated or deleted to make persisted state match it.
#[derive(Parser, Debug)]
#[command(name = "graft")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML schema file
    #[arg(short = 'S', long, global = true, default_value = "graft.toml")]
    pub schema: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan an upsert of a desired graph
    Plan {
        /// Root model of the graph
        #[arg(short, long)]
        model: String,

        /// JSON file holding the desired graph
        #[arg(short, long)]
        desired: PathBuf,

        /// JSON file holding the persisted state (omit for an empty store)
        #[arg(short, long)]
        current: Option<PathBuf>,

        /// JSON file holding upsert options
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// Relation expression the graph must stay within
        #[arg(short, long)]
        allow: Option<String>,
    },

    /// Show the persisted state a plan needs
    FetchRequest {
        /// Root model of the graph
        #[arg(short, long)]
        model: String,

        /// JSON file holding the desired graph
        #[arg(short, long)]
        desired: PathBuf,

        /// Relation expression the graph must stay within
        #[arg(short, long)]
        allow: Option<String>,
    },

    /// Validate the schema file
    CheckSchema,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let json_mode = cli.json_mode;

    let output = match cli.command {
        Some(Commands::Plan {
            model,
            desired,
            current,
            options,
            allow,
        }) => {
            let request = PlanRequest {
                model,
                desired,
                current,
                options,
                allow,
            };
            cmd_plan(&cli.schema, &request, json_mode).await?
        }
        Some(Commands::FetchRequest {
            model,
            desired,
            allow,
        }) => cmd_fetch_request(&cli.schema, &model, &desired, allow.as_deref(), json_mode).await?,
        Some(Commands::CheckSchema) | None => cmd_check_schema(&cli.schema, json_mode).await?,
    };

    println!("{}", output);
    Ok(())
}
