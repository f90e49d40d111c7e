use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teller::config::Config;

#[derive(Parser)]
#[command(name = "teller")]
#[command(author, version, about = "Teller - domain chat service for financial insights and customer support", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Hash a password for provisioning accounts out of band
    HashPassword {
        password: String,

        /// bcrypt cost factor
        #[arg(long)]
        cost: Option<u32>,
    },

    /// Write the default configuration to the config path
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "teller=debug,tower_http=debug"
    } else {
        "teller=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Serve { port, host } => {
            let mut config = Config::load()?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            tracing::info!(
                "Starting teller on {}:{} with provider {}",
                config.server.host,
                config.server.port,
                config.llm.default_provider
            );
            teller::server::run(config).await?;
        }
        Commands::HashPassword { password, cost } => {
            let config = Config::load()?;
            let hashed =
                teller::auth::hash_password(&password, cost.unwrap_or(config.auth.bcrypt_cost))?;
            println!("{hashed}");
        }
        Commands::InitConfig => {
            let config = Config::default();
            config.save()?;
            println!("Wrote default config to {}", Config::config_path()?.display());
        }
    }

    Ok(())
}
