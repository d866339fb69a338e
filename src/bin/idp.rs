//! Identity provider server binary.
//!
//! Wires storage, cache, scope authority, and the token repository together,
//! then serves the token endpoint with graceful shutdown.

use anyhow::Result;
use idp::{
    cache::create_cache,
    config::Config,
    http::{AppState, build_router},
    oauth::{
        AuthorizationServer, RoleCache, RoleService, ScopeAuthority, SessionGuard,
        create_token_repository, roles::spawn_refresh_task,
    },
    storage::{create_storage_backend, parse_storage_backend, spawn_cleanup_task},
};
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "idp=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = idp::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing::info!(?version, "Starting identity provider");

    let config = Config::new()?;
    let lifetimes = config.token_lifetimes();
    let use_cache = *config.can_use_cache.as_ref();

    let storage_backend =
        parse_storage_backend(&config.storage_backend, config.database_url.as_deref())?;
    let store = create_storage_backend(storage_backend).await?;
    let cache = create_cache(config.redis_url.as_deref()).await?;

    let guard = Arc::new(SessionGuard::new(
        store.clone(),
        use_cache.then(|| cache.clone()),
        lifetimes.refresh_token.to_std()?,
    ));

    let roles = Arc::new(RoleCache::new(store.clone()));
    let seeded = RoleService::new(store.clone(), roles.clone(), guard.clone())
        .seed_system_roles()
        .await?;
    tracing::info!(seeded, "System roles ready");

    let scopes = Arc::new(ScopeAuthority::new(
        roles.clone(),
        config.default_scope.as_ref().clone(),
    ));
    let repository = create_token_repository(
        use_cache,
        store.clone(),
        cache.clone(),
        guard.clone(),
        lifetimes,
    );
    let auth_server = Arc::new(AuthorizationServer::new(
        repository.clone(),
        scopes.clone(),
        store.clone(),
        lifetimes,
    ));

    let app = build_router(AppState {
        auth_server,
        repository,
        scopes,
        guard,
    });

    // Setup graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    tracing::error!("failed to install signal handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    spawn_refresh_task(
        roles,
        *config.role_cache_refresh_interval.as_ref(),
        &tracker,
        token.clone(),
    );

    spawn_cleanup_task(
        store,
        cache,
        *config.cleanup_interval.as_ref(),
        &tracker,
        token.clone(),
    );

    // Start HTTP server
    {
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let bind_address = format!("0.0.0.0:{http_port}");
            tracing::info!("Starting server on {bind_address}");
            let listener = match TcpListener::bind(&bind_address).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!("failed to bind {bind_address}: {}", err);
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    tokio::select! {
                        () = shutdown_token.cancelled() => { }
                    }
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
