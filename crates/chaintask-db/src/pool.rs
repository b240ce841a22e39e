//! Pool construction and schema bootstrap.
//!
//! [`bootstrap`] is the one-call entrypoint shared by `SqlTaskStore`, the
//! CLI's `db-init`, and the integration-test harness: create the database
//! when missing, open a pool sized by the config, apply pending
//! migrations. Idempotent, safe to run on every start.

use std::path::Path;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::config::DbConfig;
use crate::error::{ErrorCode, Result, TaskError};

/// Open a pool sized by the config.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            TaskError::new(
                ErrorCode::InitializationFailure,
                format!("failed to connect to database at {}", config.database_url),
            )
            .with_source(e)
        })
}

/// The migrations directory shipped with this crate.
pub fn default_migrations_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}

/// Apply pending migrations from `migrations_dir`.
///
/// Migrations are loaded at runtime so building the workspace never needs
/// a reachable database.
pub async fn run_migrations(pool: &PgPool, migrations_dir: &Path) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .map_err(|e| {
            TaskError::new(
                ErrorCode::InitializationFailure,
                format!(
                    "failed to load migrations from {}",
                    migrations_dir.display()
                ),
            )
            .with_source(e)
        })?;

    migrator.run(pool).await.map_err(|e| {
        TaskError::new(
            ErrorCode::InitializationFailure,
            "failed to run database migrations",
        )
        .with_source(e)
    })?;

    info!("migrations applied");
    Ok(())
}

/// Create the target database when missing, then return a migrated pool.
pub async fn bootstrap(config: &DbConfig) -> Result<PgPool> {
    ensure_database_exists(config).await?;
    let pool = create_pool(config).await?;
    run_migrations(&pool, default_migrations_path()).await?;
    Ok(pool)
}

/// `CREATE DATABASE` cannot take a bind parameter, so the name is
/// interpolated; this check is what keeps that safe.
fn is_safe_database_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Issue `CREATE DATABASE` through the maintenance database when the
/// configured database does not exist yet.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config.database_name().ok_or_else(|| {
        TaskError::new(
            ErrorCode::InvalidArgument,
            format!("database URL {} names no database", config.database_url),
        )
    })?;
    if !is_safe_database_name(db_name) {
        return Err(TaskError::new(
            ErrorCode::InvalidArgument,
            format!("unusable database name {db_name:?}"),
        ));
    }

    let maintenance_url = config.maintenance_url();
    let maint = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect(&maintenance_url)
        .await
        .map_err(|e| {
            TaskError::new(
                ErrorCode::InitializationFailure,
                format!("failed to connect to maintenance database at {maintenance_url}"),
            )
            .with_source(e)
        })?;

    let present = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(db_name)
        .fetch_optional(&maint)
        .await?;

    if present.is_none() {
        maint
            .execute(format!("CREATE DATABASE {db_name}").as_str())
            .await
            .map_err(|e| {
                TaskError::new(
                    ErrorCode::InitializationFailure,
                    format!("failed to create database {db_name}"),
                )
                .with_source(e)
            })?;
        info!(db = db_name, "database created");
    } else {
        debug!(db = db_name, "database already present");
    }

    maint.close().await;
    Ok(())
}
