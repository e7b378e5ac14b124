use anyhow::Result;
use tracing::{error, info};

use kc_bootstrap::config::{Command, Config};
use kc_bootstrap::health::HealthServer;
use kc_bootstrap::{logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args();

    match &config.command {
        Some(Command::Version) => {
            println!(
                "kc-bootstrap {}, commit: {}, build_date: {}, rustc: {}",
                env!("CARGO_PKG_VERSION"),
                env!("VERGEN_GIT_SHA"),
                env!("VERGEN_BUILD_TIMESTAMP"),
                env!("VERGEN_RUSTC_SEMVER"),
            );
            return Ok(());
        }
        Some(Command::LogoutUrl) => {
            if let Err(e) = config.validate_logout() {
                eprintln!("error: {e}");
                std::process::exit(2);
            }
            println!("{}", config.logout_config().logout_url());
            return Ok(());
        }
        None => {}
    }

    logging::init(&config.log_format, &config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("VERGEN_GIT_SHA"),
        build_date = env!("VERGEN_BUILD_TIMESTAMP"),
        realm = %config.get_realm(),
        response_mode = %config.response_mode,
        "kc-bootstrap starting"
    );

    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration validation failed");
        std::process::exit(1);
    }

    let health_port = config.health_port;
    let health_server = HealthServer::new();
    let health_server_clone = health_server.clone();

    let (health_ready_tx, health_ready_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = health_server_clone
            .serve(health_port, health_ready_tx)
            .await
        {
            error!(error = %e, "Health check server failed");
        }
    });

    health_ready_rx.await.ok();
    info!(port = health_port, "Health check server started");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let server_port = config.server_port;
    let mut app = tokio::spawn(server::run(config, health_server, shutdown_rx));

    let result = tokio::select! {
        joined = &mut app => joined.map_err(anyhow::Error::from).and_then(|r| r),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            app.await.map_err(anyhow::Error::from).and_then(|r| r)
        }
    };

    if let Err(e) = result {
        error!(error = format!("{e:#}"), port = server_port, "Application error");
        std::process::exit(1);
    }

    info!("Shutdown complete");
    Ok(())
}
