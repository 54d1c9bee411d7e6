//! iVBScript Control - console client for the ivbsd kernel daemon
//!
//! Without a subcommand starts the interactive console.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ivbs_common::config::IvbsConfig;
use ivbs_shared::completeness::Completeness;
use ivbsctl::repl;
use ivbsctl::rpc_client::RpcClient;
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ivbsctl")]
#[command(about = "iVBScript console", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: $IVBS_CONFIG or <config dir>/ivbscript/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon socket (overrides $IVBSD_SOCKET and daemon.socket_path)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one snippet and print its output
    Run {
        /// VBScript source
        code: String,
    },

    /// Report whether a snippet is complete
    IsComplete {
        /// VBScript source
        code: String,
    },

    /// Show recorded history across sessions
    History {
        /// Number of records
        #[arg(short, default_value_t = 20)]
        n: u32,
    },

    /// Stop the daemon, or restart its interpreter session
    Shutdown {
        #[arg(long)]
        restart: bool,
    },

    /// Show kernel and language information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = IvbsConfig::load(cli.config.as_deref())?;
    let socket = RpcClient::discover_socket_path(
        cli.socket.as_deref(),
        config.daemon.effective_socket_path(),
    );
    let mut client = RpcClient::connect(&socket).await?;

    match cli.command {
        None => repl::run_repl(&mut client).await,
        Some(Commands::Run { code }) => {
            let result = client.execute(&code).await?;
            repl::print_result(&result);
            Ok(())
        }
        Some(Commands::IsComplete { code }) => {
            match client.is_complete(&code).await? {
                Completeness::Complete => println!("complete"),
                Completeness::Incomplete { indent: Some(indent) } => {
                    println!("incomplete (indent {:?})", indent)
                }
                Completeness::Incomplete { indent: None } => println!("incomplete"),
            }
            Ok(())
        }
        Some(Commands::History { n }) => {
            let result = client.history(n).await?;
            if result.history.is_empty() {
                println!("No history recorded");
            }
            for (session, line, source) in result.history {
                let short = session.get(..8).unwrap_or(&session);
                println!("{} {:>4}  {}", short.dimmed(), line.cyan(), source);
            }
            Ok(())
        }
        Some(Commands::Shutdown { restart }) => {
            let result = client.shutdown(restart).await?;
            if result.restarted {
                println!("{}", "Interpreter session restarted".green());
            } else {
                println!("{}", "Daemon stopped".green());
            }
            Ok(())
        }
        Some(Commands::Info) => {
            let info = client.kernel_info().await?;
            println!("{}", info.banner);
            println!(
                "language: {} ({})",
                info.language_info.name, info.language_info.file_extension
            );
            Ok(())
        }
    }
}
