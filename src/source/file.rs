use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ini::{Ini, Properties};

use super::settings::{parse_bool, SourceConfig};
use crate::error::{Error, Result};

const CONFIG_SECTION: &str = "config";

/// An authentication source file: the parsed document plus the path it is
/// written back to.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    document: Ini,
}

impl SourceFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = Ini::load_from_file(&path).map_err(|e| Error::SourceFile {
            path: path.clone(),
            source: e.into(),
        })?;
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of `key` in the general (unnamed) section.
    pub fn general(&self, key: &str) -> Option<&str> {
        self.document.general_section().get(key)
    }

    pub fn general_bool(&self, key: &str) -> Result<bool> {
        match self.general(key) {
            None => Ok(false),
            Some(v) => parse_bool(v).ok_or_else(|| Error::SourceFile {
                path: self.path.clone(),
                source: anyhow::anyhow!("key '{}': '{}' is not a boolean", key, v),
            }),
        }
    }

    pub fn general_int(&self, key: &str) -> Result<i64> {
        match self.general(key).map(str::trim) {
            None | Some("") => Ok(0),
            Some(v) => v.parse().map_err(|_| Error::SourceFile {
                path: self.path.clone(),
                source: anyhow::anyhow!("key '{}': '{}' is not a number", key, v),
            }),
        }
    }

    pub fn set_general(&mut self, key: &str, value: impl Into<String>) {
        self.document.set_to(None::<String>, key.to_string(), value.into());
    }

    pub fn config_section(&self) -> Option<&Properties> {
        self.document.section(Some(CONFIG_SECTION))
    }

    /// Writes every field of `config` into the `config` section. Empty
    /// fields are removed from the file; keys the config does not know
    /// about are kept.
    pub fn set_config(&mut self, config: &SourceConfig) {
        for (key, value) in config.to_section() {
            if value.is_empty() {
                self.document.delete_from(Some(CONFIG_SECTION), key);
            } else {
                self.document.set_to(Some(CONFIG_SECTION), key.to_string(), value);
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.document
            .write_to_file(&self.path)
            .map_err(|e| Error::SourceFile {
                path: self.path.clone(),
                source: e.into(),
            })
    }

    pub(crate) fn modified(&self) -> Result<DateTime<Utc>> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::SourceFile {
                path: self.path.clone(),
                source: e.into(),
            })?;
        Ok(modified.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LoginType, PamConfig};
    use tempfile::TempDir;

    #[test]
    fn edits_survive_a_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pam.conf");
        std::fs::write(
            &path,
            "id = 4\nname = system\ntype = pam\nis_activated = true\n\n[config]\nservice_name = login\nlegacy = kept\n",
        )
        .unwrap();

        let mut file = SourceFile::load(&path).unwrap();
        assert_eq!(file.general_int("id").unwrap(), 4);
        assert!(file.general_bool("is_activated").unwrap());
        assert!(!file.general_bool("is_default").unwrap());

        file.set_general("is_default", "true");
        file.set_config(&SourceConfig::Pam(PamConfig {
            service_name: "system-auth".into(),
        }));
        file.save().unwrap();

        let file = SourceFile::load(&path).unwrap();
        assert!(file.general_bool("is_default").unwrap());
        let cfg = SourceConfig::from_section(LoginType::Pam, file.config_section()).unwrap();
        assert_eq!(
            cfg,
            SourceConfig::Pam(PamConfig {
                service_name: "system-auth".into()
            })
        );
        assert_eq!(file.config_section().unwrap().get("legacy"), Some("kept"));
    }

    #[test]
    fn cleared_ldap_credentials_leave_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ldap.conf");
        std::fs::write(
            &path,
            "id = 5\nname = corp\ntype = ldap_bind_dn\n\n[config]\nhost = ldap.corp\nport = 389\n\
             bind_dn = cn=svc\nbind_password = hunter2\nuser_base = ou=people\n",
        )
        .unwrap();

        let mut file = SourceFile::load(&path).unwrap();
        let SourceConfig::Ldap(mut cfg) =
            SourceConfig::from_section(LoginType::Ldap, file.config_section()).unwrap()
        else {
            panic!("expected LDAP settings");
        };
        assert_eq!(cfg.bind_password, "hunter2");

        cfg.bind_dn.clear();
        cfg.bind_password.clear();
        file.set_config(&SourceConfig::Ldap(cfg));
        file.save().unwrap();

        let file = SourceFile::load(&path).unwrap();
        let section = file.config_section().unwrap();
        assert_eq!(section.get("bind_dn"), None);
        assert_eq!(section.get("bind_password"), None);
        assert_eq!(section.get("user_base"), Some("ou=people"));
        assert!(!std::fs::read_to_string(&path).unwrap().contains("hunter2"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SourceFile::load("/nonexistent/auth.d/x.conf").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/auth.d/x.conf"));
    }
}
