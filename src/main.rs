//! echoserv: a single-connection TCP echo server
//!
//! Accepts TCP connections one at a time, reads up to 1024 bytes from each,
//! writes the same bytes back, and closes the connection.
//!
//! Features:
//! - Strictly sequential accept loop with per-connection error isolation
//! - Single bounded receive/send exchange per connection
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod server;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        address = %config.listen,
        backlog = config.backlog,
        "Starting echoserv"
    );

    let server = Server::bind(&config)?;
    info!(address = %server.local_addr(), "Server listening");

    server.run().await?;
    Ok(())
}
