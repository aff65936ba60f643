use clap::{Parser, Subcommand};

/// lunacron: run jobs relative to the phases of the moon.
#[derive(Debug, Parser)]
#[command(name = "lunacron", version, about)]
pub struct Cli {
    /// Config file (defaults to $LUNACRON_CONFIG, then ~/.lunacron/lunacron.toml).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register the configured jobs and dispatch them until Ctrl-C (default).
    Run,
    /// Print upcoming lunar phases.
    Phases {
        /// Start instant (RFC3339). Defaults to now.
        #[arg(long)]
        from: Option<String>,
        /// Number of phase events to print.
        #[arg(long, default_value_t = 8)]
        count: usize,
    },
    /// Print the computed schedule of the configured jobs without running them.
    List {
        /// Output JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}
