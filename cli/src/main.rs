use clap::{Parser, Subcommand};
use uuid::Uuid;

mod commands;
mod util;

#[derive(Parser)]
#[command(name = "scolaris", version, about = "Scolaris CLI: talk to the school assistant gateway")]
struct Cli {
    /// API base URL
    #[arg(long, env = "SCOLARIS_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Print compact JSON instead of pretty-printed
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Ask the assistant a question
    Ask {
        /// The message to send
        message: String,
        /// Talk to a specific persona you hold (e.g. "enseignant", "parent")
        #[arg(long)]
        role: Option<String>,
    },
    /// Arm explain mode for your next reply (administrators only)
    Explain,
    /// API key operations
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a new API key and its hash
    Generate {
        /// Emit the INSERT registering the key for this user
        #[arg(long)]
        user_id: Option<Uuid>,
        /// Human-readable label stored with the key
        #[arg(long)]
        label: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Ask { message, role } => {
            commands::assistant::ask(&cli.api_url, &message, role.as_deref(), cli.raw).await
        }
        Commands::Explain => commands::assistant::explain(&cli.api_url, cli.raw).await,
        Commands::Key { command } => match command {
            KeyCommands::Generate { user_id, label } => {
                commands::key::generate(user_id, label.as_deref())
            }
        },
    };

    std::process::exit(code);
}
