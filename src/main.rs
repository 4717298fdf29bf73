//! Playback CLI

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use playback::config::Config;
use playback::network::ProxyListener;
use playback::proxy::PlaybackServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 2 {
        print_usage();
        process::exit(1);
    }
    if matches!(args.get(1).map(String::as_str), Some("-h" | "--help")) {
        print_usage();
        process::exit(0);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = args.get(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("loading config from {}", path.display()),
        None => "validating default config".to_string(),
    })?;

    let server = PlaybackServer::new(&config)
        .await
        .context("starting playback server")?;

    let status = server.status().await;
    info!(
        "Playback v{} in {} mode, cassettes under {}",
        env!("CARGO_PKG_VERSION"),
        status.mode,
        status.cassette_dir.display()
    );
    info!("Forwarding API traffic to {}", config.remote_url);
    info!("Forwarding webhooks to {}", config.webhook_url);

    ProxyListener::new(Arc::new(server))
        .run(&config.address)
        .await
        .with_context(|| format!("serving on {}", config.address))?;

    Ok(())
}

fn print_usage() {
    eprintln!("Playback v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: playback [config.toml]");
    eprintln!();
    eprintln!("Without a config file the proxy listens on localhost:13111, forwards to");
    eprintln!("https://api.stripe.com and loads default_cassette.yaml in auto mode.");
    eprintln!();
    eprintln!("Records API traffic into YAML cassettes and replays it offline.");
    eprintln!();
    eprintln!("Control endpoints (GET or POST):");
    eprintln!("  /playback/mode/{{record|replay|auto}}         Switch mode, unloads the cassette");
    eprintln!("  /playback/cassette/setroot?dir=<path>        Set the cassette root directory");
    eprintln!("  /playback/cassette/load?filepath=<file.yaml> Load a cassette relative to the root");
    eprintln!("  /playback/cassette/eject                     Save (when recording) and unload");
    eprintln!();
    eprintln!("Webhooks (POST):");
    eprintln!("  /playback/webhooks                           Recorded and forwarded to webhook_url");
    eprintln!();
    eprintln!("Every other path is recorded or replayed from the loaded cassette.");
    eprintln!("Set RUST_LOG to change the log level (default: info).");
}
