//! Simon Says server binary
//!
//! Binds the WebSocket listener, connects to the store and spawns one
//! session task per accepted connection.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use server::session;
use server::store::RedisStore;
use server::stream;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TCP port to serve the Game RPC on
    #[arg(long, env = "PORT", default_value_t = 50051)]
    port: u16,

    /// host:port of the Redis store and pub/sub bus
    #[arg(long, env = "REDIS_ADDRESS", default_value = ":6379")]
    redis_address: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("starting simon says server {}", server::VERSION);

    let store = RedisStore::connect_with_backoff(&args.redis_address)
        .await
        .with_context(|| format!("could not connect to redis at {}", args.redis_address))?;
    let store = Arc::new(store);
    info!("connected to redis at {}", args.redis_address);

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("could not listen on port {}", args.port))?;
    info!("listening on port {}", args.port);

    loop {
        let (socket, addr) = listener.accept().await?;
        let store = Arc::clone(&store);

        tokio::spawn(async move {
            let ws = match accept_async(socket).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("websocket handshake failed for {addr}: {e}");
                    return;
                }
            };

            let (responses, requests) = stream::split(ws);
            match session::serve(store, responses, requests).await {
                Ok(()) => info!("session for {addr} finished"),
                Err(e) => error!("session for {addr} ended with error: {e}"),
            }
        });
    }
}
