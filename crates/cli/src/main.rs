//! relaymind CLI: the main entry point.
//!
//! Commands:
//! - `init`      - Write a default config and create the workspace
//! - `serve`     - Start the HTTP/SSE/WebSocket gateway
//! - `chat`      - Interactive or single-message chat in the terminal
//! - `analyze`   - Score a text with the complexity analyzer
//! - `commands`  - List the commands an agent may call

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "relaymind",
    about = "relaymind: streaming agent orchestration runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the workspace
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Start the gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with an agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Agent profile to talk to
        #[arg(short, long, default_value = "default")]
        agent: String,

        /// Print thinking, execution and review activity to stderr
        #[arg(long)]
        show_activity: bool,
    },

    /// Score a text and show its tier and reasoning budget
    Analyze {
        /// Text to score
        text: String,
    },

    /// List the commands enabled for an agent
    Commands {
        /// Agent profile whose overlay to apply
        #[arg(short, long, default_value = "default")]
        agent: String,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            message,
            agent,
            show_activity,
        } => commands::chat::run(message, agent, show_activity).await?,
        Commands::Analyze { text } => commands::analyze::run(&text),
        Commands::Commands { agent } => commands::catalog::run(&agent).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn chat_flags_parse() {
        let cli = Cli::parse_from([
            "relaymind",
            "--log-json",
            "chat",
            "-m",
            "hello",
            "--agent",
            "math",
            "--show-activity",
        ]);
        assert!(cli.log_json);
        match cli.command {
            Commands::Chat {
                message,
                agent,
                show_activity,
            } => {
                assert_eq!(message.as_deref(), Some("hello"));
                assert_eq!(agent, "math");
                assert!(show_activity);
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn commands_agent_defaults() {
        let cli = Cli::parse_from(["relaymind", "commands"]);
        assert!(matches!(cli.command, Commands::Commands { agent } if agent == "default"));
    }
}
