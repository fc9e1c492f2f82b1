//! Clap CLI definitions for Strata.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_types::memory::MemoryScope;
use strata_types::search::SearchStrategy;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  strata start                          Serve the HTTP API until Ctrl+C
  strata store -a coder \"Deploys run on Fridays\"
  strata search -a coder deploy         Search an agent's memories
  strata status                         Layer health and store counts
  strata migrate -a coder MEMORY.md --dry-run";

/// Strata: layered memory for AI agents.
#[derive(Parser)]
#[command(name = "strata", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of formatted text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot the kernel and serve the HTTP API until Ctrl+C.
    Start,
    /// Store a memory.
    Store {
        /// Memory text.
        content: String,
        /// Owning agent.
        #[arg(long, short)]
        agent: String,
        /// Visibility scope (user, agent, global, project, session).
        #[arg(long, default_value = "agent")]
        scope: MemoryScope,
        /// Person or thing the memory is about.
        #[arg(long)]
        subject: Option<String>,
        /// Tag (repeatable).
        #[arg(long = "tag", short)]
        tags: Vec<String>,
        /// Skip entity extraction.
        #[arg(long)]
        no_extract: bool,
    },
    /// Search memories across all enabled layers.
    Search {
        /// Query text.
        query: String,
        /// Requesting agent.
        #[arg(long, short)]
        agent: Option<String>,
        /// Maximum results.
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
        /// auto, fulltext, semantic, graph, all, fulltext+graph, semantic+graph.
        #[arg(long)]
        strategy: Option<SearchStrategy>,
        /// Scope to include (repeatable). Defaults to user, agent and global.
        #[arg(long = "scope")]
        scopes: Vec<MemoryScope>,
        /// Search every agent's memories.
        #[arg(long)]
        cross_agent: bool,
    },
    /// Show one memory.
    Get {
        /// Memory id.
        id: String,
    },
    /// Delete a memory from every layer.
    Delete {
        /// Memory id.
        id: String,
    },
    /// Layer health and store counts.
    Status,
    /// Run one sync queue drain cycle.
    Sync,
    /// Import markdown notes as memories.
    Migrate {
        /// Markdown files to import.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Agent that will own the imported memories.
        #[arg(long, short)]
        agent: String,
        /// Report what would be imported without writing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective configuration with secrets redacted.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_store_with_tags() {
        let cli = Cli::try_parse_from([
            "strata", "store", "-a", "coder", "--scope", "global", "-t", "ops", "-t", "ci",
            "Builds are cached",
        ])
        .unwrap();
        match cli.command {
            Commands::Store {
                agent, scope, tags, content, no_extract, ..
            } => {
                assert_eq!(agent, "coder");
                assert_eq!(scope, MemoryScope::Global);
                assert_eq!(tags, vec!["ops", "ci"]);
                assert_eq!(content, "Builds are cached");
                assert!(!no_extract);
            }
            _ => panic!("expected store"),
        }
    }

    #[test]
    fn test_parse_search_strategy_and_global_flags() {
        let cli = Cli::try_parse_from([
            "strata", "search", "deploy", "--strategy", "fulltext+graph", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Search { strategy, limit, .. } => {
                assert_eq!(strategy, Some(SearchStrategy::FulltextGraph));
                assert_eq!(limit, 10);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_migrate_requires_paths() {
        assert!(Cli::try_parse_from(["strata", "migrate", "-a", "coder"]).is_err());
    }
}
