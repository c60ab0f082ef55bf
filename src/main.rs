use anyhow::anyhow;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearth::config::AppConfig;
use hearth::infra::{cache::RedisCache, db::Db, realtime::RealtimeHub};
use hearth::{http, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config).await?;

    match config.app_mode.as_str() {
        "api" => {
            let cache = RedisCache::connect(&config.redis_url).await?;
            let realtime = RealtimeHub::new(config.realtime_channel_capacity);

            let listener_task = tokio::spawn(realtime.clone().run_listener(db.clone()));

            let state = AppState {
                db,
                cache,
                realtime,
                admin_token: config.admin_token.clone(),
                paseto_access_key: config.paseto_access_key,
                access_ttl_minutes: config.access_ttl_minutes,
                feed: config.feed,
            };

            let app: Router = http::router(state).layer(TraceLayer::new_for_http());
            let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
            tracing::info!("listening on {}", config.http_addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            listener_task.abort();
        }
        "worker" => {
            tracing::info!("starting worker mode");
            tokio::select! {
                result = jobs::count_reconciler::run(
                    db,
                    config.reconcile_interval_seconds,
                    config.reconcile_batch_size,
                ) => {
                    result?;
                }
                _ = shutdown_signal() => {}
            }
        }
        other => return Err(anyhow!("unknown APP_MODE: {}", other)),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
