//! muxserve: an echo server on a single-threaded event loop
//!
//! Serves one of the built-in protocols:
//! - `echo`: raw byte echo
//! - `line`: trimmed line echo
//!
//! Configuration via CLI arguments or TOML file.

use muxserve::config::{Config, ProtocolType};
use muxserve::protocols::echo::Echo;
use muxserve::protocols::line::LineEcho;
use muxserve::{Handler, PeerInfo, Server};
use tracing::{info, Dispatch};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let logger = Dispatch::new(subscriber);

    tracing::dispatcher::with_default(&logger, || {
        info!(
            host = %config.host,
            port = config.port,
            protocol = ?config.protocol,
            dual_stack = config.dual_stack,
            max_connections = config.max_connections,
            "Starting muxserve"
        );
    });

    let mut options = config.server_options();
    options.logger = Some(logger);

    let protocol = config.protocol;
    let factory = move |_: &PeerInfo| -> Box<dyn Handler> {
        match protocol {
            ProtocolType::Echo => Box::new(Echo),
            ProtocolType::Line => Box::new(LineEcho::new()),
        }
    };

    let mut server = Server::bind((config.host.as_str(), config.port), factory, options)?;
    server.run()?;
    Ok(())
}
