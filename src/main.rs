use clap::Parser;
use memq::config::{DEFAULT_CACHE_CAPACITY, DEFAULT_HOST, DEFAULT_PORT};
use memq::{BrokerConfig, BrokerServer, Result};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "memq")]
#[command(about = "A lightweight in-memory pub/sub message broker")]
struct Args {
    /// TCP port to listen on
    #[arg(value_name = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Replay cache capacity per topic
    #[arg(value_name = "cache_size", default_value_t = DEFAULT_CACHE_CAPACITY)]
    cache_size: usize,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            err.exit()
        }
        Err(err) => {
            // Invalid arguments: usage goes to stderr, exit status 1.
            let _ = err.print();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    let config = BrokerConfig {
        host: args.host,
        port: args.port,
        cache_capacity: args.cache_size,
    };

    info!("Starting memq broker on {}", config.listen_addr());
    info!(
        "Replay cache capacity: {} messages per topic",
        config.cache_capacity
    );

    let server = BrokerServer::bind(&config).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        _ = server_handle => {
            info!("Server task completed");
        }
    }

    info!("memq shut down successfully");
    Ok(())
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("Invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
