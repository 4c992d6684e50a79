use std::net::SocketAddr;
use std::sync::Arc;

use platea_api::{app, AppState};
use platea_domain::LockBackend;
use platea_store::app_config::{BackendKind, Config};
use platea_store::{
    ChangeFeed, EventProducer, LockDb, LockService, MemoryLockBackend, PgLockBackend,
    RedisLockBackend,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "platea_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Platea API on port {}", config.server.port);

    let primary: Arc<dyn LockBackend> = match config.backend.primary {
        BackendKind::Postgres => {
            let db = LockDb::connect(&config.database.url)
                .await
                .expect("Failed to connect to Postgres");
            db.run_migrations().await.expect("Failed to run migrations");
            Arc::new(PgLockBackend::new(db.pool().clone()))
        }
        BackendKind::Redis => Arc::new(
            RedisLockBackend::new(&config.redis.url).expect("Failed to connect to Redis"),
        ),
        BackendKind::Memory => {
            tracing::warn!("Using the in-memory lock backend; state will not survive restarts");
            Arc::new(MemoryLockBackend::new())
        }
    };

    let feed = ChangeFeed::default();
    let mut service = LockService::new(
        primary,
        feed,
        config.business_rules.reservation_ttl_seconds,
    );

    // Mirror mode: the relational store stays authoritative, Redis gets
    // best-effort copies of every write.
    if config.backend.mirror_to_redis && config.backend.primary != BackendKind::Redis {
        let mirror =
            RedisLockBackend::new(&config.redis.url).expect("Failed to connect to Redis mirror");
        service = service.with_mirror(Arc::new(mirror));
    }

    if config.kafka.enabled {
        let kafka = EventProducer::new(&config.kafka.brokers)
            .expect("Failed to create Kafka producer");
        service = service.with_kafka(Arc::new(kafka));
    }

    let locks = Arc::new(service);

    tokio::spawn(platea_api::worker::start_sweeper(
        Arc::clone(&locks),
        config.business_rules.sweep_interval_seconds,
    ));

    let app = app(AppState { locks });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
