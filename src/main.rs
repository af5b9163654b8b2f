use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ivalora::api::auth::ensure_super_admin;
use ivalora::api::rate_limit::spawn_cleanup_task;
use ivalora::cli::{cmd_config_check, Cli, Commands, ConfigCommands};
use ivalora::config::Config;
use ivalora::identity;
use ivalora::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Config(ConfigCommands::Check)) = &cli.command {
        return cmd_config_check(&cli.config);
    }

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    match cli.command {
        Some(Commands::Bootstrap {
            email,
            password,
            name,
        }) => bootstrap(config, &email, &password, &name).await,
        Some(Commands::Serve) | None => serve(config).await,
        Some(Commands::Config(_)) => Ok(()),
    }
}

async fn bootstrap(config: Config, email: &str, password: &str, name: &str) -> Result<()> {
    let backends = identity::connect(&config).await?;
    let created = ensure_super_admin(
        backends.identity.as_ref(),
        backends.store.as_ref(),
        email,
        password,
        name,
    )
    .await?;

    if created {
        println!("Created super admin {}", email);
    } else {
        println!("Account {} already exists, nothing to do", email);
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting Ivalora v{}", env!("CARGO_PKG_VERSION"));

    let backends = identity::connect(&config).await?;

    // Ensure the configured super admin exists
    if let (Some(email), Some(password)) = (
        config.auth.bootstrap_email.as_deref(),
        config.auth.bootstrap_password.as_deref(),
    ) {
        let created = ensure_super_admin(
            backends.identity.as_ref(),
            backends.store.as_ref(),
            email,
            password,
            &config.auth.bootstrap_name,
        )
        .await?;
        if created {
            tracing::info!(email = %email, "Bootstrapped super admin");
        }
    }

    let state = Arc::new(AppState::new(config.clone(), backends));

    if config.rate_limit.enabled {
        spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    }

    let app = ivalora::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
