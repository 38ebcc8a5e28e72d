use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Schema scripts in application order
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_incidents", include_str!("sql/001_incidents.sql")),
    ("002_audit_append_only", include_str!("sql/002_audit_append_only.sql")),
    ("003_add_indexes", include_str!("sql/003_add_indexes.sql")),
];

pub async fn run_migrations(pool: &PgPool) -> Result<usize> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .await
    .map_err(|e| Error::Database(format!("Failed to create migrations table: {}", e)))?;

    let mut applied = 0;
    for (name, sql) in MIGRATIONS {
        if is_applied(pool, name).await? {
            debug!("Migration {} already applied", name);
            continue;
        }
        apply(pool, name, sql).await?;
        info!("Applied migration: {}", name);
        applied += 1;
    }

    Ok(applied)
}

async fn is_applied(pool: &PgPool, name: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations WHERE name = $1")
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read migration state: {}", e)))?;
    Ok(count > 0)
}

async fn apply(pool: &PgPool, name: &str, sql: &str) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::Database(format!("Failed to start migration {}: {}", name, e)))?;

    sqlx::raw_sql(sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Migration {} failed: {}", name, e)))?;
    sqlx::query("INSERT INTO schema_migrations (name) VALUES ($1)")
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to record migration {}: {}", name, e)))?;

    tx.commit()
        .await
        .map_err(|e| Error::Database(format!("Failed to commit migration {}: {}", name, e)))
}
