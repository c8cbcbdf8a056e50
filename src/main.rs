use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinepair_api::{
    config::Config,
    db::{create_redis_client, Cache, MemorySnapshotStore, RedisSnapshotStore, SnapshotStore},
    routes::{create_router, AppState},
    services::{
        buckets::{default_buckets, fallback_buckets},
        providers::TmdbResolver,
        CatalogueCache, GenreAffinityRecommender, RecommendationService, SessionEngine,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinepair_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client.clone());

    let snapshots: Arc<dyn SnapshotStore> = match redis_client
        .get_multiplexed_async_connection()
        .await
    {
        Ok(_) => Arc::new(RedisSnapshotStore::new(cache.clone())),
        Err(e) => {
            tracing::warn!(
                error = %e,
                redis_url = %config.redis_url,
                "Redis unavailable, catalogue snapshots will not survive a restart"
            );
            Arc::new(MemorySnapshotStore::new())
        }
    };

    let resolver = TmdbResolver::new(
        cache,
        config.tmdb_api_key.clone(),
        config.tmdb_api_url.clone(),
        config.pages_per_bucket,
    );

    let catalogue = Arc::new(
        CatalogueCache::new(
            Arc::new(resolver),
            snapshots,
            default_buckets(config.seed_titles()),
            config.catalogue_settings(),
        )
        .with_fallback_buckets(fallback_buckets()),
    );

    let sessions = Arc::new(SessionEngine::in_memory(config.session_settings()));
    let recommender = Arc::new(GenreAffinityRecommender::new(
        Arc::clone(&catalogue),
        config.recommendation_count,
    ));

    // Startup never waits on the catalogue; routes answer NotReady until it loads
    {
        let catalogue = Arc::clone(&catalogue);
        tokio::spawn(async move { catalogue.initialize().await });
    }
    catalogue.spawn_refresh_loop(Duration::from_secs(
        config.catalogue_refresh_minutes.max(1) * 60,
    ));
    sessions.spawn_sweeper(Duration::from_secs(config.session_sweep_secs.max(1)));

    let state = Arc::new(AppState {
        catalogue,
        recommendations: RecommendationService::new(Arc::clone(&sessions), recommender),
        sessions,
    });
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        addr = %addr,
        rounds = config.total_rounds,
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cache_writer.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
