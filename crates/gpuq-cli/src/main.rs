//! gpuq CLI
//!
//! Command-line interface for interacting with the gpuqd daemon.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpuq - single-host GPU job scheduler client
#[derive(Parser, Debug)]
#[command(name = "gpuq")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:8095", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a command to the queue
    Submit {
        /// GPU model name the task needs (as shown by `gpuq gpus`)
        #[arg(long)]
        gpu_type: String,

        /// Number of GPUs of that model
        #[arg(long, default_value_t = 1)]
        gpus: u32,

        /// Task label (defaults to the first word of the command)
        #[arg(long)]
        name: Option<String>,

        /// Shell command to run
        command: String,
    },

    /// List all tasks
    Ps,

    /// Show one task in full
    Status {
        /// Task id
        id: i64,
    },

    /// Tail a task's log
    Logs {
        /// Task id
        id: i64,

        /// Number of lines from the end
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Cancel a queued or running task
    Cancel {
        /// Task id
        id: i64,
    },

    /// Show GPU inventory and occupancy
    Gpus,

    /// Check daemon health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Submit {
            gpu_type,
            gpus,
            name,
            command,
        } => {
            commands::submit(&client, gpu_type, gpus, name, command).await?;
        }
        Commands::Ps => {
            commands::ps(&client).await?;
        }
        Commands::Status { id } => {
            commands::status(&client, id).await?;
        }
        Commands::Logs { id, tail } => {
            commands::logs(&client, id, tail).await?;
        }
        Commands::Cancel { id } => {
            commands::cancel(&client, id).await?;
        }
        Commands::Gpus => {
            commands::gpus(&client).await?;
        }
        Commands::Health => {
            commands::health(&client).await?;
        }
    }

    Ok(())
}
