//! Login sources: identity, type and storage origin of each configured
//! authentication backend.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::SourceRow;

pub mod file;
pub mod settings;

pub use file::SourceFile;
pub use settings::{
    GitHubConfig, LdapConfig, PamConfig, SecurityProtocol, SmtpConfig, SourceConfig,
};

/// Kind of external backend. The discriminants are the values stored in the
/// `type` column and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoginType {
    Ldap = 2,
    Smtp = 3,
    Pam = 4,
    /// LDAP via direct bind ("simple auth").
    Dldap = 5,
    GitHub = 6,
}

impl LoginType {
    pub const ALL: [LoginType; 5] = [
        LoginType::Ldap,
        LoginType::Dldap,
        LoginType::Smtp,
        LoginType::Pam,
        LoginType::GitHub,
    ];

    pub fn from_code(code: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| Error::InvalidSourceType(code.to_string()))
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Parses the `type` key of an authentication source file.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "ldap_bind_dn" => Ok(Self::Ldap),
            "ldap_simple_auth" => Ok(Self::Dldap),
            "smtp" => Ok(Self::Smtp),
            "pam" => Ok(Self::Pam),
            "github" => Ok(Self::GitHub),
            _ => Err(Error::InvalidSourceType(format!("'{tag}'"))),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Ldap => "ldap_bind_dn",
            Self::Dldap => "ldap_simple_auth",
            Self::Smtp => "smtp",
            Self::Pam => "pam",
            Self::GitHub => "github",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ldap => "LDAP (via BindDN)",
            Self::Dldap => "LDAP (simple auth)",
            Self::Smtp => "SMTP",
            Self::Pam => "PAM",
            Self::GitHub => "GitHub",
        }
    }

    /// Whether `config` is the variant this type is configured with.
    pub fn accepts(self, config: &SourceConfig) -> bool {
        matches!(
            (self, config),
            (Self::Ldap | Self::Dldap, SourceConfig::Ldap(_))
                | (Self::Smtp, SourceConfig::Smtp(_))
                | (Self::Pam, SourceConfig::Pam(_))
                | (Self::GitHub, SourceConfig::GitHub(_))
        )
    }
}

impl fmt::Display for LoginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a source lives, and so where writes to it must go.
#[derive(Debug, Clone)]
pub enum Origin {
    Database,
    File(SourceFile),
}

impl Origin {
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

#[derive(Debug, Clone)]
pub struct AuthSource {
    pub id: i64,
    kind: LoginType,
    pub name: String,
    pub is_activated: bool,
    pub is_default: bool,
    pub config: SourceConfig,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub origin: Origin,
}

impl AuthSource {
    /// A new database-backed source, not yet persisted.
    pub fn new(kind: LoginType, name: impl Into<String>, config: SourceConfig) -> Result<Self> {
        if !kind.accepts(&config) {
            return Err(Error::InvalidSourceType(format!(
                "{} cannot be configured with {} settings",
                kind,
                config.variant_name()
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: 0,
            kind,
            name: name.into(),
            is_activated: false,
            is_default: false,
            config,
            created: now,
            updated: now,
            origin: Origin::Database,
        })
    }

    /// Hydrates a database row, rejecting unknown type codes.
    pub fn from_row(row: SourceRow) -> Result<Self> {
        let kind = LoginType::from_code(row.kind)?;
        let config = SourceConfig::from_db(kind, &row.cfg)?;

        Ok(Self {
            id: row.id,
            kind,
            name: row.name,
            is_activated: row.is_activated,
            is_default: row.is_default,
            config,
            created: from_unix(row.created_unix),
            updated: from_unix(row.updated_unix),
            origin: Origin::Database,
        })
    }

    pub fn to_row(&self) -> Result<SourceRow> {
        Ok(SourceRow {
            id: self.id,
            kind: self.kind.code(),
            name: self.name.clone(),
            is_activated: self.is_activated,
            is_default: self.is_default,
            cfg: self.config.to_db()?,
            created_unix: self.created.timestamp(),
            updated_unix: self.updated.timestamp(),
        })
    }

    pub(crate) fn from_file(id: i64, kind: LoginType, file: SourceFile) -> Result<Self> {
        let config = SourceConfig::from_section(kind, file.config_section())?;
        let updated = file.modified()?;

        Ok(Self {
            id,
            kind,
            name: file.general("name").unwrap_or_default().to_string(),
            is_activated: file.general_bool("is_activated")?,
            is_default: file.general_bool("is_default")?,
            config,
            created: updated,
            updated,
            origin: Origin::File(file),
        })
    }

    pub fn kind(&self) -> LoginType {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Same id and same storage origin.
    pub fn same_entry(&self, other: &AuthSource) -> bool {
        self.id == other.id && self.origin.is_file() == other.origin.is_file()
    }

    pub fn is_ldap(&self) -> bool {
        self.kind == LoginType::Ldap
    }

    pub fn is_dldap(&self) -> bool {
        self.kind == LoginType::Dldap
    }

    pub fn is_smtp(&self) -> bool {
        self.kind == LoginType::Smtp
    }

    pub fn is_pam(&self) -> bool {
        self.kind == LoginType::Pam
    }

    pub fn is_github(&self) -> bool {
        self.kind == LoginType::GitHub
    }

    /// Whether the backend can be configured to use TLS at all.
    pub fn has_tls(&self) -> bool {
        match &self.config {
            SourceConfig::Ldap(cfg) => cfg.security_protocol != SecurityProtocol::Unencrypted,
            SourceConfig::Smtp(_) => true,
            _ => false,
        }
    }

    pub fn use_tls(&self) -> bool {
        match &self.config {
            SourceConfig::Ldap(cfg) => cfg.security_protocol != SecurityProtocol::Unencrypted,
            SourceConfig::Smtp(cfg) => cfg.tls,
            _ => false,
        }
    }

    pub fn skip_verify(&self) -> bool {
        match &self.config {
            SourceConfig::Ldap(cfg) => cfg.skip_verify,
            SourceConfig::Smtp(cfg) => cfg.skip_verify,
            _ => false,
        }
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for kind in LoginType::ALL {
            assert_eq!(LoginType::from_code(kind.code()).unwrap(), kind);
            assert_eq!(LoginType::from_tag(kind.tag()).unwrap(), kind);
        }
        assert!(matches!(
            LoginType::from_code(1),
            Err(Error::InvalidSourceType(_))
        ));
        assert!(LoginType::from_tag("kerberos").is_err());
    }

    #[test]
    fn unknown_row_type_is_an_error() {
        let row = SourceRow {
            id: 7,
            kind: 42,
            name: "mystery".into(),
            is_activated: true,
            is_default: false,
            cfg: "{}".into(),
            created_unix: 0,
            updated_unix: 0,
        };
        assert!(matches!(
            AuthSource::from_row(row),
            Err(Error::InvalidSourceType(_))
        ));
    }

    #[test]
    fn type_and_config_must_agree() {
        let pam = SourceConfig::Pam(PamConfig {
            service_name: "login".into(),
        });
        assert!(AuthSource::new(LoginType::Smtp, "mail", pam.clone()).is_err());

        let source = AuthSource::new(LoginType::Pam, "system", pam).unwrap();
        assert!(source.is_pam());
        assert!(!source.has_tls());
        assert_eq!(source.type_name(), "PAM");
    }

    #[test]
    fn row_round_trip_keeps_fields() {
        let mut source = AuthSource::new(
            LoginType::GitHub,
            "github",
            SourceConfig::GitHub(GitHubConfig {
                api_endpoint: "https://api.github.com/".into(),
            }),
        )
        .unwrap();
        source.id = 3;
        source.is_activated = true;

        let back = AuthSource::from_row(source.to_row().unwrap()).unwrap();
        assert_eq!(back.id, 3);
        assert_eq!(back.kind(), LoginType::GitHub);
        assert!(back.is_activated);
        assert_eq!(back.config, source.config);
        assert_eq!(back.created.timestamp(), source.created.timestamp());
    }
}
