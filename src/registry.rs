//! The login source catalog: database rows and file sources seen as one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::local::LocalSources;
use crate::source::{AuthSource, Origin, SourceConfig};
use crate::store::{SourceFilter, SourceStore, UserStore};

/// Read side shared by both storage origins.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn list(&self) -> Result<Vec<AuthSource>>;
    async fn activated_list(&self) -> Result<Vec<AuthSource>>;
    async fn count(&self) -> Result<i64>;
    /// `Ok(None)` when this provider has no source with `id`.
    async fn find_by_id(&self, id: i64) -> Result<Option<AuthSource>>;
}

/// Database-backed sources.
pub struct DatabaseSources {
    store: Arc<dyn SourceStore>,
}

impl DatabaseSources {
    pub fn new(store: Arc<dyn SourceStore>) -> Self {
        Self { store }
    }

    async fn find(&self, filter: SourceFilter<'_>, context: &'static str) -> Result<Vec<AuthSource>> {
        self.store
            .find(filter)
            .await
            .map_err(|e| Error::persistence(context, e))?
            .into_iter()
            .map(AuthSource::from_row)
            .collect()
    }
}

#[async_trait]
impl SourceProvider for DatabaseSources {
    async fn list(&self) -> Result<Vec<AuthSource>> {
        self.find(SourceFilter::All, "find login sources").await
    }

    async fn activated_list(&self) -> Result<Vec<AuthSource>> {
        self.find(SourceFilter::Activated, "find activated login sources")
            .await
    }

    async fn count(&self) -> Result<i64> {
        self.store
            .count()
            .await
            .map_err(|e| Error::persistence("count login sources", e))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<AuthSource>> {
        Ok(self
            .find(SourceFilter::Id(id), "get login source")
            .await?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl SourceProvider for LocalSources {
    async fn list(&self) -> Result<Vec<AuthSource>> {
        Ok(LocalSources::list(self))
    }

    async fn activated_list(&self) -> Result<Vec<AuthSource>> {
        Ok(LocalSources::activated_list(self))
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.len() as i64)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<AuthSource>> {
        match self.get_by_id(id) {
            Ok(source) => Ok(Some(source)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub struct Registry {
    database: DatabaseSources,
    store: Arc<dyn SourceStore>,
    users: Arc<dyn UserStore>,
    local: Arc<LocalSources>,
    mirror_default_config: bool,
}

impl Registry {
    pub fn new(
        store: Arc<dyn SourceStore>,
        users: Arc<dyn UserStore>,
        local: Arc<LocalSources>,
    ) -> Self {
        Self {
            database: DatabaseSources::new(Arc::clone(&store)),
            store,
            users,
            local,
            mirror_default_config: false,
        }
    }

    /// When set, demoting a file source also copies the new default's
    /// settings into that file's `config` section.
    pub fn with_mirror_default_config(mut self, mirror: bool) -> Self {
        self.mirror_default_config = mirror;
        self
    }

    pub fn local(&self) -> &Arc<LocalSources> {
        &self.local
    }

    fn providers(&self) -> [&dyn SourceProvider; 2] {
        [&self.database, self.local.as_ref()]
    }

    /// Persists a new database source and assigns its id.
    pub async fn create(&self, source: &mut AuthSource) -> Result<()> {
        if !source.kind().accepts(&source.config) {
            return Err(Error::InvalidSourceType(format!(
                "{} cannot be configured with {} settings",
                source.kind(),
                source.config.variant_name()
            )));
        }

        source.origin = Origin::Database;
        source.id = 0;
        self.ensure_unique_name(source).await?;

        let now = Utc::now();
        source.created = now;
        source.updated = now;

        source.id = self
            .store
            .insert(&source.to_row()?)
            .await
            .map_err(|e| Error::persistence("insert login source", e))?;
        info!("Created login source '{}' [id: {}]", source.name, source.id);

        if source.is_default {
            self.reset_non_default(source).await?;
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<AuthSource>> {
        let mut sources = Vec::new();
        for provider in self.providers() {
            sources.extend(provider.list().await?);
        }
        Ok(sources)
    }

    pub async fn activated_list(&self) -> Result<Vec<AuthSource>> {
        let mut sources = Vec::new();
        for provider in self.providers() {
            sources.extend(provider.activated_list().await?);
        }
        Ok(sources)
    }

    pub async fn count(&self) -> Result<i64> {
        let mut total = 0;
        for provider in self.providers() {
            total += provider.count().await?;
        }
        Ok(total)
    }

    /// Looks in the database first, then in the file sources.
    pub async fn get_by_id(&self, id: i64) -> Result<AuthSource> {
        for provider in self.providers() {
            if let Some(source) = provider.find_by_id(id).await? {
                return Ok(source);
            }
        }
        Err(Error::NotFound { id })
    }

    /// Writes `source` back to where it came from.
    pub async fn update(&self, source: &mut AuthSource) -> Result<()> {
        if !source.kind().accepts(&source.config) {
            return Err(Error::InvalidSourceType(format!(
                "{} cannot be configured with {} settings",
                source.kind(),
                source.config.variant_name()
            )));
        }
        self.ensure_unique_name(source).await?;
        source.updated = Utc::now();

        match &mut source.origin {
            Origin::Database => {
                let row = source.to_row()?;
                self.store
                    .update(&row)
                    .await
                    .map_err(|e| Error::persistence("update login source", e))?;
            }
            Origin::File(file) => {
                file.set_general("name", source.name.clone());
                file.set_general("is_activated", source.is_activated.to_string());
                file.set_general("is_default", source.is_default.to_string());
                file.set_config(&source.config);
                file.save()?;
                self.local.update_in_memory(source);
            }
        }
        info!("Updated login source '{}' [id: {}]", source.name, source.id);

        if source.is_default {
            self.reset_non_default(source).await?;
        }
        Ok(())
    }

    /// Removes a database source no user signs in with.
    pub async fn delete(&self, source: &AuthSource) -> Result<()> {
        if source.origin.is_file() {
            return Err(Error::ReadOnlySource { id: source.id });
        }

        let count = self
            .users
            .count_by_login_source(source.id)
            .await
            .map_err(|e| Error::persistence("count users by login source", e))?;
        if count > 0 {
            return Err(Error::InUse { id: source.id });
        }

        self.store
            .delete(source.id)
            .await
            .map_err(|e| Error::persistence("delete login source", e))?;
        info!("Deleted login source '{}' [id: {}]", source.name, source.id);
        Ok(())
    }

    /// Fails with `AlreadyExists` when any other source, in the database or
    /// on disk, already carries `source.name`.
    async fn ensure_unique_name(&self, source: &AuthSource) -> Result<()> {
        let rows = self
            .store
            .find(SourceFilter::Name(&source.name))
            .await
            .map_err(|e| Error::persistence("get login source by name", e))?;
        let in_database = rows
            .iter()
            .any(|row| source.origin.is_file() || row.id != source.id);
        let in_files = self
            .local
            .list()
            .iter()
            .any(|s| s.name == source.name && !s.same_entry(source));

        if in_database || in_files {
            return Err(Error::AlreadyExists {
                name: source.name.clone(),
            });
        }
        Ok(())
    }

    /// Makes `source` the only default across both origins.
    ///
    /// Files are rewritten one after another; a failure leaves the files
    /// before it updated and is returned so the caller can run the update
    /// again.
    async fn reset_non_default(&self, source: &AuthSource) -> Result<()> {
        let keep = match source.origin {
            Origin::Database => source.id,
            // No database row can be the new default.
            Origin::File(_) => 0,
        };
        self.store
            .clear_default_except(keep)
            .await
            .map_err(|e| Error::persistence("reset default login sources", e))?;

        let mirror = self.mirror_default_config.then_some(&source.config);
        self.local.for_each_other(source, |entry| {
            let kind = entry.kind();
            let Origin::File(file) = &mut entry.origin else {
                return Ok(());
            };

            file.set_general("is_default", "false");
            if let Some(config) = mirror {
                file.set_config(config);
            }
            file.save()?;

            if mirror.is_some() {
                match SourceConfig::from_section(kind, file.config_section()) {
                    Ok(config) => entry.config = config,
                    Err(e) => warn!(
                        "Authentication source '{}' no longer parses after mirroring: {}",
                        entry.name, e
                    ),
                }
            }
            entry.is_default = false;
            debug!("Cleared default flag of file source '{}'", entry.name);
            Ok(())
        })?;

        self.local.update_in_memory(source);
        Ok(())
    }
}
