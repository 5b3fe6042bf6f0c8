use anyhow::Result;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use trustgate::{
    abuse::AbuseLog,
    api::{create_router, EngineState},
    checkin::CheckinVerifier,
    config::EngineConfig,
    database::DatabasePool,
    fingerprint::DeviceRegistry,
    ledger::{CoinLedger, NullLedger},
    notify::{Notifier, NullNotifier},
    rate_limit::{ActionKind, RateLimiter},
    reward::AttemptValidator,
    session::SessionEnforcer,
    store::{MemoryStore, TrustStore},
    trust::TrustAggregator,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all policy settings
    let config = EngineConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting trustgate trust & abuse mitigation engine");

    // Select the backing store: Postgres when enabled, in-memory otherwise
    let store: Arc<dyn TrustStore> = if config.database.postgres_enabled {
        let pool = DatabasePool::new(&config.database.postgres_url).await?;
        pool.init_schema().await?;
        Arc::new(pool)
    } else {
        warn!("PostgreSQL disabled - using in-memory store, state is lost on restart");
        Arc::new(MemoryStore::new())
    };

    // External collaborators. The null implementations log and drop; swap in
    // real clients when the ledger/push services are wired up.
    let ledger: Arc<dyn CoinLedger> = Arc::new(NullLedger);
    let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);

    let abuse_log = AbuseLog::new(store.clone());
    let registry = Arc::new(DeviceRegistry::new(store.clone(), abuse_log.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        store.clone(),
        abuse_log.clone(),
        config.rate_limits.clone(),
    ));
    let attempt_validator = Arc::new(AttemptValidator::new(
        store.clone(),
        abuse_log.clone(),
        config.rate_limits.policy(ActionKind::RewardClaim),
    ));
    let checkin_verifier = Arc::new(CheckinVerifier::new(
        store.clone(),
        ledger,
        notifier.clone(),
        config.checkin.max_distance_meters,
    ));
    let trust = Arc::new(TrustAggregator::new(store.clone()));
    let sessions = Arc::new(SessionEnforcer::new(
        store.clone(),
        abuse_log.clone(),
        notifier,
        config.session.clone(),
    ));

    info!(
        failed_login_threshold = config.session.failed_login_threshold,
        account_lock_threshold = config.session.account_lock_threshold,
        checkin_max_distance_m = config.checkin.max_distance_meters,
        "engine components initialized"
    );

    let app = create_router(EngineState {
        registry,
        rate_limiter,
        attempt_validator,
        checkin_verifier,
        trust,
        sessions,
        abuse_log,
    })
    .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("trustgate listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging(config: &EngineConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.logging.level)
        .map_err(|e| anyhow::anyhow!("Invalid log level {}: {}", config.logging.level, e))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
