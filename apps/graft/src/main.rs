//! # graft - Graph Upsert Planner
//!
//! The main binary for the graft differencing engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                 apps/graft (THE BINARY)               │
//! │                                                       │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────┐   │
//! │  │    CLI      │   │ Schema files │   │ JSON I/O  │   │
//! │  │   (clap)    │   │    (toml)    │   │  (tokio)  │   │
//! │  └──────┬──────┘   └──────┬───────┘   └─────┬─────┘   │
//! │         └─────────────────┼─────────────────┘         │
//! │                           ▼                           │
//! │                   ┌───────────────┐                   │
//! │                   │  graft-core   │                   │
//! │                   │  (THE LOGIC)  │                   │
//! │                   └───────────────┘                   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! graft check-schema -S graft.toml
//! graft fetch-request -m Person -d desired.json
//! graft plan -m Person -d desired.json -c current.json -o options.json
//! ```

use clap::Parser;
use graft::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing: GRAFT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("GRAFT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "graft=debug,graft_core=debug"
    } else {
        "graft=info,graft_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Display startup banner
    if !cli.quiet && !cli.json_mode {
        eprintln!("graft v{} - graph upsert planner", env!("CARGO_PKG_VERSION"));
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
