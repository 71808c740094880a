//! What If Store bridge - desktop-side RPC server for the storefront renderer.
//!
//! Prints `BRIDGE_PORT=<port>` on stdout once listening so the desktop shell
//! can discover an OS-assigned port. Logs go to stderr.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use whatif_bridge::{desktop_router, BridgeServer, ServerState};
use whatif_core::{BridgeDefaults, ServerOptions};

#[derive(Parser, Debug)]
#[command(name = "whatif-bridge")]
#[command(about = "Desktop bridge server for What If Store")]
struct Args {
    /// Port to listen on (0 = auto-assign, default 3232)
    #[arg(short, long, allow_negative_numbers = true)]
    port: Option<i64>,

    /// Host to bind to (default 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// JSON config file; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application directory to scan instead of the platform defaults (repeatable)
    #[arg(long = "app-dir")]
    app_dirs: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn cli_options(&self) -> ServerOptions {
        ServerOptions {
            host: self.host.clone(),
            port: self.port,
            shutdown_timeout_ms: None,
            app_dirs: (!self.app_dirs.is_empty()).then(|| self.app_dirs.clone()),
        }
    }
}

fn init_logging(debug: bool) {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact();

    if std::env::var_os("RUST_LOG").is_some() {
        builder.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        let log_level = if debug { Level::DEBUG } else { Level::INFO };
        builder.with_max_level(log_level).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    info!("Starting {} bridge", BridgeDefaults::APP_NAME);

    let file_options = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            ServerOptions::from_file(path)?
        }
        None => ServerOptions::default(),
    };
    let options = file_options.merge(args.cli_options());
    let config = options.validate()?;

    let router = desktop_router(config.resolved_app_dirs())?;
    let server = BridgeServer::new(router);
    let addr = server.start(&options).await?;

    // Read by the desktop shell; must stay a single line on stdout
    println!("{}{}", BridgeDefaults::PORT_ANNOUNCE_PREFIX, addr.port());
    info!("Bridge running on {}", addr);

    let mut state = server.watch_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
            server.stop().await;
        }
        _ = state.wait_for(|s| *s == ServerState::Stopped) => {
            error!("Bridge server stopped unexpectedly");
            anyhow::bail!("bridge transport fault");
        }
    }

    Ok(())
}
