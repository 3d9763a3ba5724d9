use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{SourceFilter, SourceRow, SourceStore, User, UserStore};

#[derive(Debug, Default)]
struct Tables {
    sources: Vec<SourceRow>,
    users: Vec<User>,
    next_source_id: i64,
    next_user_id: i64,
}

/// Process-local store holding both login source rows and users.
///
/// Used by the admin binary when no database is configured and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn users(&self) -> Vec<User> {
        self.tables().users.clone()
    }

    pub fn rows(&self) -> Vec<SourceRow> {
        self.tables().sources.clone()
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn insert(&self, row: &SourceRow) -> Result<i64> {
        let mut tables = self.tables();
        if tables.sources.iter().any(|r| r.name == row.name) {
            return Err(anyhow!("UNIQUE constraint failed: login_source.name"));
        }

        tables.next_source_id += 1;
        let mut row = row.clone();
        row.id = tables.next_source_id;
        tables.sources.push(row);
        Ok(tables.next_source_id)
    }

    async fn update(&self, row: &SourceRow) -> Result<()> {
        let mut tables = self.tables();
        if tables.sources.iter().any(|r| r.id != row.id && r.name == row.name) {
            return Err(anyhow!("UNIQUE constraint failed: login_source.name"));
        }
        match tables.sources.iter_mut().find(|r| r.id == row.id) {
            Some(existing) => {
                *existing = row.clone();
                Ok(())
            }
            None => Err(anyhow!("no login source row with id {}", row.id)),
        }
    }

    async fn find(&self, filter: SourceFilter<'_>) -> Result<Vec<SourceRow>> {
        Ok(self
            .tables()
            .sources
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.tables().sources.len() as i64)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.tables().sources.retain(|r| r.id != id);
        Ok(())
    }

    async fn clear_default_except(&self, keep: i64) -> Result<()> {
        for row in self.tables().sources.iter_mut().filter(|r| r.id != keep) {
            row.is_default = false;
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables();
        if tables.users.iter().any(|u| u.lower_name == user.lower_name) {
            return Err(anyhow!("user already exists [name: {}]", user.name));
        }

        tables.next_user_id += 1;
        let mut user = user.clone();
        user.id = tables.next_user_id;
        tables.users.push(user);
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables();
        let existing = tables
            .users
            .iter_mut()
            .find(|u| u.lower_name == user.lower_name)
            .ok_or_else(|| anyhow!("user does not exist [name: {}]", user.name))?;

        let id = existing.id;
        *existing = user.clone();
        existing.id = id;
        Ok(())
    }

    async fn is_user_exist(&self, uid: i64, name: &str) -> Result<bool> {
        let lower = name.to_lowercase();
        Ok(self
            .tables()
            .users
            .iter()
            .any(|u| u.id != uid && u.lower_name == lower))
    }

    async fn count_by_login_source(&self, source_id: i64) -> Result<i64> {
        Ok(self
            .tables()
            .users
            .iter()
            .filter(|u| u.login_source == source_id)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> SourceRow {
        SourceRow {
            id: 0,
            kind: 4,
            name: name.to_string(),
            is_activated: true,
            is_default: true,
            cfg: r#"{"ServiceName":"login"}"#.to_string(),
            created_unix: 0,
            updated_unix: 0,
        }
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = MemoryStore::new();
        assert_eq!(store.insert(&row("a")).await.unwrap(), 1);
        assert_eq!(store.insert(&row("b")).await.unwrap(), 2);
        assert!(store.insert(&row("a")).await.is_err());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_keeps_names_unique() {
        let store = MemoryStore::new();
        store.insert(&row("a")).await.unwrap();
        let id = store.insert(&row("b")).await.unwrap();

        let mut renamed = row("a");
        renamed.id = id;
        assert!(store.update(&renamed).await.is_err());

        renamed.name = "c".into();
        store.update(&renamed).await.unwrap();
    }

    #[tokio::test]
    async fn clear_default_keeps_one_row() {
        let store = MemoryStore::new();
        store.insert(&row("a")).await.unwrap();
        store.insert(&row("b")).await.unwrap();

        store.clear_default_except(2).await.unwrap();

        let defaults: Vec<i64> = store
            .rows()
            .into_iter()
            .filter(|r| r.is_default)
            .map(|r| r.id)
            .collect();
        assert_eq!(defaults, vec![2]);
    }

    #[tokio::test]
    async fn is_user_exist_ignores_given_uid() {
        let store = MemoryStore::new();
        let user = User {
            name: "Alice".into(),
            lower_name: "alice".into(),
            ..Default::default()
        };
        store.create_user(&user).await.unwrap();

        assert!(store.is_user_exist(0, "ALICE").await.unwrap());
        assert!(!store.is_user_exist(1, "alice").await.unwrap());
    }
}
