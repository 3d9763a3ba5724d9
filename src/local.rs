//! Login sources defined by files in the `auth.d` directory.

use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::source::{AuthSource, LoginType, SourceFile};

/// In-memory copy of every file-backed source.
///
/// Readers always get clones; nothing outside this type ever holds a
/// reference into the collection. The cache never writes files itself,
/// see [`Registry`](crate::Registry) for write-back.
#[derive(Debug, Default)]
pub struct LocalSources {
    sources: RwLock<Vec<AuthSource>>,
}

impl LocalSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(sources: Vec<AuthSource>) -> Self {
        Self {
            sources: RwLock::new(sources),
        }
    }

    /// Loads every `*<suffix>` file under `dir`. A missing directory is an
    /// empty cache; any unreadable or mistyped file fails the whole load.
    pub fn load<P: AsRef<Path>>(dir: P, suffix: &str) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!("No authentication source directory at {}", dir.display());
            return Ok(Self::new());
        }

        let entries = std::fs::read_dir(dir).map_err(|e| Error::SourceFile {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::SourceFile {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix));
            if matches && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let file = SourceFile::load(&path)?;
            let id = file.general_int("id")?;
            let tag = file.general("type").unwrap_or_default().to_string();
            let kind = LoginType::from_tag(&tag).map_err(|e| Error::SourceFile {
                path: path.clone(),
                source: e.into(),
            })?;

            let source = AuthSource::from_file(id, kind, file)?;
            info!(
                "Loaded authentication source '{}' ({}) from {}",
                source.name,
                kind,
                path.display()
            );
            sources.push(source);
        }

        Ok(Self::from_sources(sources))
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<AuthSource>> {
        self.sources.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<AuthSource>> {
        self.sources.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn list(&self) -> Vec<AuthSource> {
        self.read().clone()
    }

    pub fn activated_list(&self) -> Vec<AuthSource> {
        self.read()
            .iter()
            .filter(|s| s.is_activated)
            .cloned()
            .collect()
    }

    pub fn get_by_id(&self, id: i64) -> Result<AuthSource> {
        self.read()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(Error::NotFound { id })
    }

    /// Replaces the cached entry matching `source`. When `source` is the
    /// default, every other entry loses its default flag.
    pub fn update_in_memory(&self, source: &AuthSource) {
        let mut updated = source.clone();
        updated.updated = Utc::now();

        for entry in self.write().iter_mut() {
            if entry.same_entry(&updated) {
                *entry = updated.clone();
            } else if updated.is_default {
                entry.is_default = false;
            }
        }
    }

    /// Applies `f` to every cached entry except `keep`, under one write
    /// lock. Stops at the first error.
    pub(crate) fn for_each_other<F>(&self, keep: &AuthSource, mut f: F) -> Result<()>
    where
        F: FnMut(&mut AuthSource) -> Result<()>,
    {
        for entry in self.write().iter_mut() {
            if !entry.same_entry(keep) {
                f(entry)?;
            }
        }
        Ok(())
    }
}
