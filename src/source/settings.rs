//! Backend-specific settings of a login source.
//!
//! Every variant has two projections: a JSON document stored in the `cfg`
//! column, and the key/value pairs of the `config` section of an
//! authentication source file.

use std::fmt;

use ini::Properties;
use serde::{Deserialize, Serialize};

use super::LoginType;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Ldap(LdapConfig),
    Smtp(SmtpConfig),
    Pam(PamConfig),
    GitHub(GitHubConfig),
}

impl SourceConfig {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Ldap(_) => "LDAP",
            Self::Smtp(_) => "SMTP",
            Self::Pam(_) => "PAM",
            Self::GitHub(_) => "GitHub",
        }
    }

    pub fn to_db(&self) -> Result<String> {
        let encoded = match self {
            Self::Ldap(cfg) => serde_json::to_string(cfg),
            Self::Smtp(cfg) => serde_json::to_string(cfg),
            Self::Pam(cfg) => serde_json::to_string(cfg),
            Self::GitHub(cfg) => serde_json::to_string(cfg),
        };
        encoded.map_err(|e| Error::InvalidConfig(format!("encode {}: {}", self.variant_name(), e)))
    }

    pub fn from_db(kind: LoginType, raw: &str) -> Result<Self> {
        let decoded = match kind {
            LoginType::Ldap | LoginType::Dldap => serde_json::from_str(raw).map(Self::Ldap),
            LoginType::Smtp => serde_json::from_str(raw).map(Self::Smtp),
            LoginType::Pam => serde_json::from_str(raw).map(Self::Pam),
            LoginType::GitHub => serde_json::from_str(raw).map(Self::GitHub),
        };
        decoded.map_err(|e| Error::InvalidConfig(format!("decode {}: {}", kind, e)))
    }

    /// Reads the `config` section of a source file for a source of `kind`.
    pub fn from_section(kind: LoginType, section: Option<&Properties>) -> Result<Self> {
        let section = SectionReader { section };
        Ok(match kind {
            LoginType::Ldap | LoginType::Dldap => Self::Ldap(LdapConfig::read(&section)?),
            LoginType::Smtp => Self::Smtp(SmtpConfig::read(&section)?),
            LoginType::Pam => Self::Pam(PamConfig::read(&section)?),
            LoginType::GitHub => Self::GitHub(GitHubConfig::read(&section)?),
        })
    }

    /// Key/value pairs written into the `config` section of a source file.
    /// Every field is listed; an empty value means the key is unset.
    pub fn to_section(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Ldap(cfg) => cfg.write(),
            Self::Smtp(cfg) => cfg.write(),
            Self::Pam(cfg) => cfg.write(),
            Self::GitHub(cfg) => cfg.write(),
        }
    }
}

trait FileSection: Sized {
    fn read(section: &SectionReader<'_>) -> Result<Self>;
    fn write(&self) -> Vec<(&'static str, String)>;
}

struct SectionReader<'a> {
    section: Option<&'a Properties>,
}

impl SectionReader<'_> {
    fn string(&self, key: &str) -> String {
        self.section
            .and_then(|s| s.get(key))
            .unwrap_or_default()
            .to_string()
    }

    fn int<T: std::str::FromStr>(&self, key: &str) -> Result<T>
    where
        T: Default,
    {
        match self.section.and_then(|s| s.get(key)) {
            None => Ok(T::default()),
            Some(v) if v.trim().is_empty() => Ok(T::default()),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("key '{key}': '{v}' is not a number"))),
        }
    }

    fn bool(&self, key: &str) -> Result<bool> {
        match self.section.and_then(|s| s.get(key)) {
            None => Ok(false),
            Some(v) => parse_bool(v)
                .ok_or_else(|| Error::InvalidConfig(format!("key '{key}': '{v}' is not a boolean"))),
        }
    }
}

/// Accepts the usual INI spellings of a boolean; empty means false.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "" | "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SecurityProtocol {
    #[default]
    Unencrypted,
    Ldaps,
    StartTls,
}

impl SecurityProtocol {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unencrypted => "Unencrypted",
            Self::Ldaps => "LDAPS",
            Self::StartTls => "StartTLS",
        }
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for SecurityProtocol {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unencrypted),
            1 => Ok(Self::Ldaps),
            2 => Ok(Self::StartTls),
            _ => Err(format!("unknown security protocol {value}")),
        }
    }
}

impl From<SecurityProtocol> for u8 {
    fn from(value: SecurityProtocol) -> Self {
        match value {
            SecurityProtocol::Unencrypted => 0,
            SecurityProtocol::Ldaps => 1,
            SecurityProtocol::StartTls => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LdapConfig {
    pub host: String,
    pub port: u16,
    pub security_protocol: SecurityProtocol,
    pub skip_verify: bool,
    /// DN used for the search bind; `%s` is replaced by the login.
    #[serde(rename = "BindDN")]
    pub bind_dn: String,
    pub bind_password: String,
    /// Search base for users.
    pub user_base: String,
    /// DN template for simple auth; `%s` is replaced by the login.
    #[serde(rename = "UserDN")]
    pub user_dn: String,
    pub attribute_username: String,
    pub attribute_name: String,
    pub attribute_surname: String,
    pub attribute_mail: String,
    /// Fetch attributes while still bound as the search account.
    pub attributes_in_bind: bool,
    pub filter: String,
    pub admin_filter: String,
    pub group_enabled: bool,
    #[serde(rename = "GroupDN")]
    pub group_dn: String,
    pub group_filter: String,
    #[serde(rename = "GroupMemberUID")]
    pub group_member_uid: String,
    #[serde(rename = "UserUID")]
    pub user_uid: String,
}

impl LdapConfig {
    pub fn security_protocol_name(&self) -> &'static str {
        self.security_protocol.name()
    }
}

impl FileSection for LdapConfig {
    fn read(s: &SectionReader<'_>) -> Result<Self> {
        let protocol: u8 = s.int("security_protocol")?;
        Ok(Self {
            host: s.string("host"),
            port: s.int("port")?,
            security_protocol: SecurityProtocol::try_from(protocol).map_err(Error::InvalidConfig)?,
            skip_verify: s.bool("skip_verify")?,
            bind_dn: s.string("bind_dn"),
            bind_password: s.string("bind_password"),
            user_base: s.string("user_base"),
            user_dn: s.string("user_dn"),
            attribute_username: s.string("attribute_username"),
            attribute_name: s.string("attribute_name"),
            attribute_surname: s.string("attribute_surname"),
            attribute_mail: s.string("attribute_mail"),
            attributes_in_bind: s.bool("attributes_in_bind")?,
            filter: s.string("filter"),
            admin_filter: s.string("admin_filter"),
            group_enabled: s.bool("group_enabled")?,
            group_dn: s.string("group_search_base_dn"),
            group_filter: s.string("group_filter"),
            group_member_uid: s.string("group_member_uid"),
            user_uid: s.string("user_uid"),
        })
    }

    fn write(&self) -> Vec<(&'static str, String)> {
        vec![
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("security_protocol", u8::from(self.security_protocol).to_string()),
            ("skip_verify", self.skip_verify.to_string()),
            ("bind_dn", self.bind_dn.clone()),
            ("bind_password", self.bind_password.clone()),
            ("user_base", self.user_base.clone()),
            ("user_dn", self.user_dn.clone()),
            ("attribute_username", self.attribute_username.clone()),
            ("attribute_name", self.attribute_name.clone()),
            ("attribute_surname", self.attribute_surname.clone()),
            ("attribute_mail", self.attribute_mail.clone()),
            ("attributes_in_bind", self.attributes_in_bind.to_string()),
            ("filter", self.filter.clone()),
            ("admin_filter", self.admin_filter.clone()),
            ("group_enabled", self.group_enabled.to_string()),
            ("group_search_base_dn", self.group_dn.clone()),
            ("group_filter", self.group_filter.clone()),
            ("group_member_uid", self.group_member_uid.clone()),
            ("user_uid", self.user_uid.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SmtpConfig {
    /// SASL mechanism, `PLAIN` or `LOGIN`.
    pub auth: String,
    pub host: String,
    pub port: u16,
    /// Comma separated; empty allows every domain.
    pub allowed_domains: String,
    #[serde(rename = "TLS")]
    pub tls: bool,
    pub skip_verify: bool,
}

impl SmtpConfig {
    pub fn allowed_domains(&self) -> Vec<&str> {
        self.allowed_domains
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .collect()
    }
}

impl FileSection for SmtpConfig {
    fn read(s: &SectionReader<'_>) -> Result<Self> {
        Ok(Self {
            auth: s.string("auth"),
            host: s.string("host"),
            port: s.int("port")?,
            allowed_domains: s.string("allowed_domains"),
            tls: s.bool("tls")?,
            skip_verify: s.bool("skip_verify")?,
        })
    }

    fn write(&self) -> Vec<(&'static str, String)> {
        vec![
            ("auth", self.auth.clone()),
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("allowed_domains", self.allowed_domains.clone()),
            ("tls", self.tls.to_string()),
            ("skip_verify", self.skip_verify.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PamConfig {
    /// PAM service, e.g. `system-auth`.
    pub service_name: String,
}

impl FileSection for PamConfig {
    fn read(s: &SectionReader<'_>) -> Result<Self> {
        Ok(Self {
            service_name: s.string("service_name"),
        })
    }

    fn write(&self) -> Vec<(&'static str, String)> {
        vec![("service_name", self.service_name.clone())]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// e.g. `https://api.github.com/`
    #[serde(rename = "APIEndpoint")]
    pub api_endpoint: String,
}

impl FileSection for GitHubConfig {
    fn read(s: &SectionReader<'_>) -> Result<Self> {
        Ok(Self {
            api_endpoint: s.string("api_endpoint"),
        })
    }

    fn write(&self) -> Vec<(&'static str, String)> {
        vec![("api_endpoint", self.api_endpoint.clone())]
    }
}
