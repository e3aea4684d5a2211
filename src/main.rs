mod client;
mod config;
mod conversation;
mod dispatcher;
mod errors;
mod health;
mod logging;
mod mcp;
mod readiness;
mod server;
mod tools;

#[cfg(test)]
mod tests;

use crate::{config::Config, readiness::Readiness, server::AppState};
use anyhow::Context;
use std::{path::PathBuf, time::Duration};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("switchyard.toml");
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = PathBuf::from(&args[i]);
            }
            _ => {}
        }
        i += 1;
    }

    let mut cfg = Config::load(&config_path).context("loading config")?;
    logging::init(&cfg.logging);
    cfg.validate().context("validating config")?;

    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);
    let host = cfg.server.bind_addr.trim_start_matches('[').trim_end_matches(']');
    let listener = tokio::net::TcpListener::bind((host, cfg.server.port))
        .await
        .with_context(|| format!("binding {addr}"))?;
    // hosted endpoints must point at the port actually bound
    cfg.server.port = listener.local_addr()?.port();

    let (ready, readiness) = Readiness::new();
    let state = AppState::build(&cfg, readiness).context("building capability registry")?;
    let servers = state.dispatcher.registry().list_names();

    state
        .dispatcher
        .conversations()
        .clone()
        .spawn_sweeper(Duration::from_secs(cfg.conversation.sweep_interval_s));

    let app = server::build_router(state);
    ready.mark_ready();

    info!(addr = %addr, port = cfg.server.port, base_path = %cfg.server.base_path, servers = ?servers, "switchyard ready");
    println!(
        "switchyard ready addr={} port={} base_path={} servers=[{}]",
        addr,
        cfg.server.port,
        cfg.server.base_path,
        servers.join(",")
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
