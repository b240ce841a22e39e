//! Shared test infrastructure: one PostgreSQL server per test binary with
//! a throwaway database per test, plus a redis container for queue tests.
//!
//! Throwaway databases are created through [`pool::bootstrap`] -- the same
//! create-if-missing + migrate path production uses -- so every
//! integration test also exercises the bootstrap itself.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use uuid::Uuid;

use chaintask_db::config::DbConfig;
use chaintask_db::pool;

/// One PostgreSQL server per test binary.
///
/// `CHAINTASK_TEST_PG_URL` points tests at an externally managed server
/// (e.g. a nextest setup script); otherwise a container is started on
/// first use and held alive until the binary exits.
struct PgServer {
    base_url: String,
    _keepalive: Option<ContainerAsync<Postgres>>,
}

static PG_SERVER: OnceCell<PgServer> = OnceCell::const_new();

async fn start_pg() -> PgServer {
    if let Ok(base_url) = std::env::var("CHAINTASK_TEST_PG_URL") {
        return PgServer {
            base_url,
            _keepalive: None,
        };
    }

    let container = Postgres::default()
        .with_tag("18")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    PgServer {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _keepalive: Some(container),
    }
}

/// Base URL of the shared server (no database name appended).
pub async fn pg_url() -> &'static str {
    &PG_SERVER.get_or_init(start_pg).await.base_url
}

/// Config pointing a uniquely-named database within the shared server.
fn test_db_config(base_url: &str, db_name: &str) -> DbConfig {
    DbConfig::new(format!("{base_url}/{db_name}"))
        .with_acquire_timeout(Duration::from_secs(30))
}

/// A migrated throwaway database named after a fresh UUID.
///
/// Returns `(pool, db_name)`; pass `db_name` to [`drop_test_db`] when the
/// test is done.
pub async fn create_test_db() -> (PgPool, String) {
    let db_name = format!("chaintask_test_{}", Uuid::new_v4().simple());
    let config = test_db_config(pg_url().await, &db_name);

    let pool = pool::bootstrap(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to bootstrap test database {db_name}: {e}"));
    (pool, db_name)
}

/// Kick every remaining connection off a throwaway database and drop it.
/// Safe to call for a database that is already gone.
pub async fn drop_test_db(db_name: &str) {
    let config = test_db_config(pg_url().await, db_name);

    let maint = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.maintenance_url())
        .await
        .expect("failed to connect to maintenance database for cleanup");

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint.execute(terminate.as_str()).await;
    let _ = maint
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    maint.close().await;
}

/// Start a redis container and return `(container, url)`.
///
/// The container handle must be kept alive for the duration of the test.
pub async fn start_redis() -> (ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start redis container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get mapped port");

    let url = format!("redis://{host}:{port}");
    (container, url)
}
