//! Strata CLI: command-line interface for the layered memory store.
//!
//! Every command boots an in-process kernel from config. `start` keeps it
//! alive behind the HTTP API until Ctrl+C.

mod cli;
mod cmd;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;
use strata_kernel::config::load_config;

/// Log to stderr so `--json` output on stdout stays parseable. `RUST_LOG`
/// wins over the configured level.
fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    // One-shot commands only surface warnings unless asked otherwise.
    if matches!(cli.command, Commands::Start) {
        init_tracing(&config.log_level);
    } else {
        init_tracing("warn");
    }

    match cli.command {
        Commands::Start => cmd::server::cmd_start(config),
        Commands::Store {
            content,
            agent,
            scope,
            subject,
            tags,
            no_extract,
        } => cmd::memory::cmd_store(
            config,
            cli.json,
            cmd::memory::StoreArgs {
                content,
                agent,
                scope,
                subject,
                tags,
                no_extract,
            },
        ),
        Commands::Search {
            query,
            agent,
            limit,
            strategy,
            scopes,
            cross_agent,
        } => cmd::memory::cmd_search(
            config,
            cli.json,
            cmd::memory::SearchArgs {
                query,
                agent,
                limit,
                strategy,
                scopes,
                cross_agent,
            },
        ),
        Commands::Get { id } => cmd::memory::cmd_get(config, cli.json, &id),
        Commands::Delete { id } => cmd::memory::cmd_delete(config, cli.json, &id),
        Commands::Status => cmd::system::cmd_status(config, cli.json),
        Commands::Sync => cmd::system::cmd_sync(config, cli.json),
        Commands::Migrate {
            paths,
            agent,
            dry_run,
        } => cmd::system::cmd_migrate(config, cli.json, paths, agent, dry_run),
        Commands::Config => cmd::system::cmd_config(&config, cli.config.as_deref(), cli.json),
    }
}
