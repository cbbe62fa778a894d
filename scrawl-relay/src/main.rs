//! Standalone relay process.
//!
//! Binds a WebSocket relay and fans every inbound frame out to all
//! connected clients. Bind address comes from the first argument,
//! defaulting to `0.0.0.0:8080`. Logging is configured through
//! `RUST_LOG` (e.g. `RUST_LOG=scrawl_collab=debug`).

use log::info;
use scrawl_collab::relay::{Relay, RelayConfig, RelayError};

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    env_logger::init();

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:8080".to_string());

    info!("starting scrawl relay on {bind_addr}");
    let relay = Relay::new(RelayConfig { bind_addr });
    relay.run().await
}
