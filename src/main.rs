//! promptrelay - resilient prompt execution gateway
//!
//! Executes stored prompt versions against interchangeable LLM providers
//! with caching, failover, and usage limits.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promptrelay::config::Config;

#[derive(Parser)]
#[command(name = "promptrelay")]
#[command(about = "Resilient prompt execution gateway with provider failover")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file and report key sources
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers and tier rates
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptrelay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let (mut cfg, key_sources) = Config::from_file_with_env(&config)?;

            for (provider, source) in &key_sources {
                tracing::info!(provider = %provider, source = %source, "Resolved provider API key");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            promptrelay::api::run_server(cfg).await
        }

        Commands::Check { config } => {
            tracing::info!(config = %config, "Checking configuration");
            let (cfg, key_sources) = Config::from_file_with_env(&config)?;

            println!("Configuration OK: {} provider(s)", cfg.providers.len());
            for (provider, source) in &key_sources {
                println!("  {} - api key: {}", provider, source);
            }
            Ok(())
        }

        Commands::Providers { config } => {
            let (cfg, _) = Config::from_file_with_env(&config)?;

            for p in &cfg.providers {
                println!("{}", p.name);
                println!("  url:        {}", p.url);
                println!(
                    "  fast model: {}",
                    p.fast_model.as_deref().unwrap_or("(backend default)")
                );
                println!(
                    "  deep model: {}",
                    p.deep_model.as_deref().unwrap_or("(backend default)")
                );
            }
            println!(
                "rates (micro-USD/token): fast in={} out={}, deep in={} out={}",
                cfg.routing.fast_input_rate,
                cfg.routing.fast_output_rate,
                cfg.routing.deep_input_rate,
                cfg.routing.deep_output_rate,
            );
            Ok(())
        }
    }
}
