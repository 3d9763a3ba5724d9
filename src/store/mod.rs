//! Persistence collaborators.
//!
//! The relational store only ever sees flat [`SourceRow`]s; turning a row
//! into an [`AuthSource`](crate::source::AuthSource) happens in the core so
//! that an unknown type code is reported rather than trusted.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::source::LoginType;

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::{DatabaseBackend, SqlSourceStore};

/// One row of the `login_source` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SourceRow {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub kind: i32,
    pub name: String,
    pub is_activated: bool,
    pub is_default: bool,
    pub cfg: String,
    pub created_unix: i64,
    pub updated_unix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter<'a> {
    All,
    Activated,
    Name(&'a str),
    Id(i64),
}

impl SourceFilter<'_> {
    pub fn matches(&self, row: &SourceRow) -> bool {
        match self {
            Self::All => true,
            Self::Activated => row.is_activated,
            Self::Name(name) => row.name == *name,
            Self::Id(id) => row.id == *id,
        }
    }
}

/// Generic relational operations over login source rows.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Inserts the row and returns the id the store assigned to it.
    async fn insert(&self, row: &SourceRow) -> Result<i64>;
    async fn update(&self, row: &SourceRow) -> Result<()>;
    async fn find(&self, filter: SourceFilter<'_>) -> Result<Vec<SourceRow>>;
    async fn count(&self) -> Result<i64>;
    async fn delete(&self, id: i64) -> Result<()>;
    /// Sets `is_default = false` on every row but `keep`.
    async fn clear_default_except(&self, keep: i64) -> Result<()>;
}

/// A local account, owned by the surrounding service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub lower_name: String,
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub website: String,
    pub location: String,
    pub login_type: Option<LoginType>,
    /// Id of the login source the account authenticates against.
    pub login_source: i64,
    /// Identifier used upstream, may differ from `name`.
    pub login_name: String,
    pub is_active: bool,
    pub is_admin: bool,
}

/// Idempotent user persistence consumed by auto-registration and deletion
/// checks.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn update_user(&self, user: &User) -> Result<()>;
    /// `uid` excludes one account from the check; 0 excludes none.
    async fn is_user_exist(&self, uid: i64, name: &str) -> Result<bool>;
    async fn count_by_login_source(&self, source_id: i64) -> Result<i64>;
}
