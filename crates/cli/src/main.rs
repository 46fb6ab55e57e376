//! snak CLI, the main entry point.
//!
//! Commands:
//! - `run`       Run the configured agent on one message
//! - `resume`    Answer a hybrid run waiting for human input
//! - `workflow`  Route a message through the supervisor and its agents
//! - `config`    Print the default configuration

use clap::{Parser, Subcommand};
use snak_core::agent::AgentMode;

mod commands;

#[derive(Parser)]
#[command(
    name = "snak",
    about = "snak: LLM agent orchestration runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a single message
    Run {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// Override the configured agent mode (interactive, autonomous, hybrid)
        #[arg(long)]
        mode: Option<AgentMode>,

        /// Plan the work in steps instead of reacting turn by turn
        #[arg(long)]
        planning: bool,
    },

    /// Resume a hybrid run that is waiting for human input
    Resume {
        /// Thread id printed when the run was interrupted
        #[arg(short, long)]
        thread: String,

        /// The answer to the agent's question
        #[arg(short, long)]
        input: String,
    },

    /// Send a message through the multi-agent workflow
    Workflow {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// Continue an earlier workflow conversation
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            message,
            mode,
            planning,
        } => commands::run::run(&message, mode, planning).await?,
        Commands::Resume { thread, input } => commands::resume::run(&thread, &input).await?,
        Commands::Workflow { message, thread } => {
            commands::workflow::run(&message, thread.as_deref()).await?
        }
        Commands::Config => commands::config_cmd::show(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_mode_and_planning() {
        let cli = Cli::try_parse_from(["snak", "run", "-m", "hi", "--mode", "hybrid", "--planning"])
            .unwrap();
        let Commands::Run {
            message,
            mode,
            planning,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(message, "hi");
        assert_eq!(mode, Some(AgentMode::Hybrid));
        assert!(planning);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["snak", "run", "-m", "hi", "--mode", "turbo"]).is_err());
    }

    #[test]
    fn resume_requires_thread_and_input() {
        assert!(Cli::try_parse_from(["snak", "resume", "--thread", "t-1"]).is_err());
        let cli = Cli::try_parse_from(["snak", "-v", "resume", "-t", "t-1", "-i", "yes"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Resume { .. }));
    }
}
