use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_control_plane::audit::AuditLogger;
use api_control_plane::auth::JwtManager;
use api_control_plane::breaker::CircuitBreaker;
use api_control_plane::config::Config;
use api_control_plane::context::AppContext;
use api_control_plane::keys::ApiKeyService;
use api_control_plane::limiter::TokenBucketLimiter;
use api_control_plane::metrics::MetricsCollector;
use api_control_plane::policy::{seed_policies, PolicyEngine};
use api_control_plane::repository::memory::MemoryRepository;
use api_control_plane::repository::postgres::{create_pool, PostgresRepository};
use api_control_plane::repository::{ApiKeyRepository, UserRepository};
use api_control_plane::routes;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "api_control_plane=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    // Shared store: limiter buckets and breaker state live here.
    let redis_client =
        redis::Client::open(config.redis_addr.as_str()).context("invalid REDIS_ADDR")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("failed to connect to Redis")?;
    tracing::info!(addr = %config.redis_addr, "connected to Redis");

    // Repository: Postgres when configured, in-memory otherwise.
    let (users, api_key_repo): (Arc<dyn UserRepository>, Arc<dyn ApiKeyRepository>) =
        if config.database_url.is_empty() {
            tracing::warn!("DATABASE_URL not set; using the in-memory repository");
            let repo = Arc::new(MemoryRepository::new());
            (repo.clone(), repo)
        } else {
            let pool = create_pool(&config.database_url)
                .await
                .context("failed to connect to Postgres")?;
            tracing::info!("connected to database");
            let repo = Arc::new(PostgresRepository::new(pool));
            (repo.clone(), repo)
        };

    let jwt = Arc::new(JwtManager::new(
        &config.jwt_secret,
        chrono::Duration::hours(1),
    ));
    let api_keys = Arc::new(ApiKeyService::new(api_key_repo.clone(), config.cache_ttl));

    let policy_engine = Arc::new(PolicyEngine::new());
    policy_engine
        .load_policies(seed_policies())
        .context("failed to load seed policies")?;

    let ctx = Arc::new(AppContext {
        config: config.clone(),
        policy_engine,
        jwt,
        api_keys,
        limiter: Arc::new(TokenBucketLimiter::new(redis_conn.clone())),
        breaker: Arc::new(CircuitBreaker::new(
            redis_conn.clone(),
            config.breaker.clone(),
        )),
        metrics: Arc::new(MetricsCollector::new(config.metrics_window)),
        audit: Arc::new(AuditLogger::stdout()),
        users,
        api_key_repo,
        redis: Some(redis_conn),
    });

    let app = routes::build_router(ctx);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server_port)
        .parse()
        .context("failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, "server starting");

    // Force the process down if draining outlives the deadline. Not a clean
    // shutdown, so the exit code says so.
    let drain = config.shutdown_drain;
    tokio::spawn(async move {
        shutdown_signal().await;
        tokio::time::sleep(drain).await;
        tracing::error!("drain deadline exceeded, forcing exit");
        std::process::exit(1);
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, draining");
    })
    .await
    .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
