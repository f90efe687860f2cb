//! Standalone relay for canvas collaboration rooms.
//!
//! `CANVAS_RELAY_ADDR` overrides the bind address; `RUST_LOG` the log level.

use canvas_collab::relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = RelayConfig::default();
    if let Ok(addr) = std::env::var("CANVAS_RELAY_ADDR") {
        config.bind_addr = addr;
    }

    RelayServer::new(config).run().await
}
