use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{SourceFilter, SourceRow, SourceStore};

pub enum DatabaseBackend {
    MySql(MySqlPool),
    Postgres(PgPool),
}

/// `login_source` table access over MySQL or Postgres.
pub struct SqlSourceStore {
    backend: DatabaseBackend,
}

const COLUMNS: &str =
    "id, type, name, is_activated, is_default, cfg, created_unix, updated_unix";

// Runs `$body` against whichever pool is configured, with `$sql` rewritten
// to the placeholder style of that database.
macro_rules! on_backend {
    ($backend:expr, $query:expr, |$sql:ident, $pool:ident| $body:expr) => {
        match $backend {
            DatabaseBackend::MySql($pool) => {
                let $sql: String = $query.to_string();
                $body
            }
            DatabaseBackend::Postgres($pool) => {
                let $sql: String = numbered_placeholders(&$query);
                $body
            }
        }
    };
}

impl SqlSourceStore {
    pub async fn connect(db_type: &str, url: &str, max_connections: u32) -> Result<Self> {
        let backend = match db_type.to_lowercase().as_str() {
            "mysql" => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(url)
                    .await
                    .map_err(|e| anyhow!("Failed to connect to MySQL database: {}", e))?;
                DatabaseBackend::MySql(pool)
            }
            "postgres" | "pgsql" | "postgresql" => {
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(url)
                    .await
                    .map_err(|e| anyhow!("Failed to connect to Postgres database: {}", e))?;
                DatabaseBackend::Postgres(pool)
            }
            _ => return Err(anyhow!("Unsupported database type: {}", db_type)),
        };

        info!("Connected to {} login source store", db_type);
        Ok(Self { backend })
    }

    pub fn from_backend(backend: DatabaseBackend) -> Self {
        Self { backend }
    }

    /// Creates the `login_source` table when it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        match &self.backend {
            DatabaseBackend::MySql(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS login_source (
                        id BIGINT AUTO_INCREMENT PRIMARY KEY,
                        type INT NOT NULL,
                        name VARCHAR(255) NOT NULL UNIQUE,
                        is_activated BOOLEAN NOT NULL DEFAULT FALSE,
                        is_default BOOLEAN NOT NULL DEFAULT FALSE,
                        cfg TEXT NOT NULL,
                        created_unix BIGINT NOT NULL,
                        updated_unix BIGINT NOT NULL
                    )",
                )
                .execute(pool)
                .await?;
            }
            DatabaseBackend::Postgres(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS login_source (
                        id BIGSERIAL PRIMARY KEY,
                        type INTEGER NOT NULL,
                        name VARCHAR(255) NOT NULL UNIQUE,
                        is_activated BOOLEAN NOT NULL DEFAULT FALSE,
                        is_default BOOLEAN NOT NULL DEFAULT FALSE,
                        cfg TEXT NOT NULL,
                        created_unix BIGINT NOT NULL,
                        updated_unix BIGINT NOT NULL
                    )",
                )
                .execute(pool)
                .await?;
            }
        }
        debug!("login_source table is in place");
        Ok(())
    }
}

/// Rewrites `?` markers into Postgres' `$1, $2, ...`.
fn numbered_placeholders(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 8);
    let mut n = 0;
    for c in query.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl SourceStore for SqlSourceStore {
    async fn insert(&self, row: &SourceRow) -> Result<i64> {
        match &self.backend {
            DatabaseBackend::MySql(pool) => {
                let result = sqlx::query(
                    "INSERT INTO login_source (type, name, is_activated, is_default, cfg, created_unix, updated_unix) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(row.kind)
                .bind(&row.name)
                .bind(row.is_activated)
                .bind(row.is_default)
                .bind(&row.cfg)
                .bind(row.created_unix)
                .bind(row.updated_unix)
                .execute(pool)
                .await?;
                Ok(result.last_insert_id() as i64)
            }
            DatabaseBackend::Postgres(pool) => {
                let id: i64 = sqlx::query_scalar(
                    "INSERT INTO login_source (type, name, is_activated, is_default, cfg, created_unix, updated_unix) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
                )
                .bind(row.kind)
                .bind(&row.name)
                .bind(row.is_activated)
                .bind(row.is_default)
                .bind(&row.cfg)
                .bind(row.created_unix)
                .bind(row.updated_unix)
                .fetch_one(pool)
                .await?;
                Ok(id)
            }
        }
    }

    async fn update(&self, row: &SourceRow) -> Result<()> {
        let query = "UPDATE login_source SET type = ?, name = ?, is_activated = ?, is_default = ?, \
                     cfg = ?, created_unix = ?, updated_unix = ? WHERE id = ?";
        on_backend!(&self.backend, query, |sql, pool| {
            sqlx::query(&sql)
                .bind(row.kind)
                .bind(&row.name)
                .bind(row.is_activated)
                .bind(row.is_default)
                .bind(&row.cfg)
                .bind(row.created_unix)
                .bind(row.updated_unix)
                .bind(row.id)
                .execute(pool)
                .await?;
        });
        Ok(())
    }

    async fn find(&self, filter: SourceFilter<'_>) -> Result<Vec<SourceRow>> {
        let query = match filter {
            SourceFilter::All => format!("SELECT {COLUMNS} FROM login_source ORDER BY id"),
            SourceFilter::Activated => {
                format!("SELECT {COLUMNS} FROM login_source WHERE is_activated = ? ORDER BY id")
            }
            SourceFilter::Name(_) => format!("SELECT {COLUMNS} FROM login_source WHERE name = ?"),
            SourceFilter::Id(_) => format!("SELECT {COLUMNS} FROM login_source WHERE id = ?"),
        };

        let rows = on_backend!(&self.backend, query, |sql, pool| {
            let q = sqlx::query_as::<_, SourceRow>(&sql);
            let q = match filter {
                SourceFilter::All => q,
                SourceFilter::Activated => q.bind(true),
                SourceFilter::Name(name) => q.bind(name),
                SourceFilter::Id(id) => q.bind(id),
            };
            q.fetch_all(pool).await?
        });
        Ok(rows)
    }

    async fn count(&self) -> Result<i64> {
        let count = on_backend!(&self.backend, "SELECT COUNT(*) FROM login_source", |sql, pool| {
            sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await?
        });
        Ok(count)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_backend!(&self.backend, "DELETE FROM login_source WHERE id = ?", |sql, pool| {
            sqlx::query(&sql).bind(id).execute(pool).await?;
        });
        Ok(())
    }

    async fn clear_default_except(&self, keep: i64) -> Result<()> {
        let query = "UPDATE login_source SET is_default = ? WHERE id <> ?";
        on_backend!(&self.backend, query, |sql, pool| {
            sqlx::query(&sql).bind(false).bind(keep).execute(pool).await?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_placeholders_are_numbered() {
        assert_eq!(
            numbered_placeholders("UPDATE t SET a = ? WHERE id <> ?"),
            "UPDATE t SET a = $1 WHERE id <> $2"
        );
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }
}
