use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Postgres pool for the lock table. Every statement the engine runs
/// is a single short write or read, so a small pool with a tight
/// acquire timeout is enough; a saturated pool should fail fast and
/// surface as a transient error rather than queue.
#[derive(Clone)]
pub struct LockDb {
    pool: PgPool,
}

impl LockDb {
    pub async fn connect(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("applying seat_locks migrations");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("migrations up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
