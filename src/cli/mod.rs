use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "./config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the sync-and-download daemon (scheduler, worker, watchdog, HTTP control surface).
    Run,

    /// Load and validate the config file without starting anything.
    ValidateConfig,
}
