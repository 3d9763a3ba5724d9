//! Credential verification against external backends and auto-registration
//! of local accounts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::source::{AuthSource, LoginType, SourceConfig};
use crate::store::{User, UserStore};

pub mod github;
pub mod ldap;
pub mod pam;
pub mod smtp;

pub use github::GitHubBackend;
pub use ldap::LdapBackend;
pub use pam::PamBackend;
pub use smtp::{LettreClient, SmtpBackend, SmtpClient, SmtpFailure, SmtpMechanism};

/// What a backend knows about the person after a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    /// Upstream username, may be empty.
    pub username: String,
    pub first_name: String,
    pub surname: String,
    pub full_name: String,
    pub email: String,
    pub website: String,
    pub location: String,
    pub is_admin: bool,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Verifies a login/password pair.
    ///
    /// Bad credentials are [`Error::CredentialRejected`]; anything that kept
    /// the backend from answering is [`Error::BackendUnavailable`].
    async fn authenticate(&self, login: &str, password: &str) -> Result<Profile>;
}

impl SourceConfig {
    /// Builds the network backend for a source of `kind`.
    pub fn backend(&self, kind: LoginType) -> Result<Box<dyn Backend>> {
        let backend: Box<dyn Backend> = match (kind, self) {
            (LoginType::Ldap, SourceConfig::Ldap(cfg)) => Box::new(LdapBackend::new(cfg.clone(), false)),
            (LoginType::Dldap, SourceConfig::Ldap(cfg)) => Box::new(LdapBackend::new(cfg.clone(), true)),
            (LoginType::Smtp, SourceConfig::Smtp(cfg)) => Box::new(SmtpBackend::new(cfg.clone())),
            (LoginType::Pam, SourceConfig::Pam(cfg)) => Box::new(PamBackend::new(&cfg.service_name)),
            (LoginType::GitHub, SourceConfig::GitHub(cfg)) => {
                Box::new(GitHubBackend::new(&cfg.api_endpoint)?)
            }
            (kind, cfg) => {
                return Err(Error::InvalidSourceType(format!(
                    "{} cannot be configured with {} settings",
                    kind,
                    cfg.variant_name()
                )))
            }
        };
        Ok(backend)
    }
}

/// Picks the backend for a source.
pub trait BackendFactory: Send + Sync {
    fn backend(&self, source: &AuthSource) -> Result<Box<dyn Backend>>;
}

/// Real network backends built from each source's settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBackends;

impl BackendFactory for DefaultBackends {
    fn backend(&self, source: &AuthSource) -> Result<Box<dyn Backend>> {
        source.config.backend(source.kind())
    }
}

pub struct Authenticator {
    users: Arc<dyn UserStore>,
    backends: Arc<dyn BackendFactory>,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self::with_backends(users, Arc::new(DefaultBackends))
    }

    pub fn with_backends(users: Arc<dyn UserStore>, backends: Arc<dyn BackendFactory>) -> Self {
        Self { users, backends }
    }

    /// Verifies `login`/`password` against `source`.
    ///
    /// With `auto_register` the matching local account is created or
    /// refreshed and returned; without it a successful verification returns
    /// `Ok(None)` and nothing is written.
    pub async fn authenticate(
        &self,
        source: &AuthSource,
        login: &str,
        password: &str,
        auto_register: bool,
    ) -> Result<Option<User>> {
        if !source.is_activated {
            return Err(Error::SourceNotActivated { id: source.id });
        }

        let backend = self.backends.backend(source)?;
        let profile = match backend.authenticate(login, password).await {
            Ok(profile) => profile,
            Err(e) if e.is_rejection() => {
                debug!("Login '{}' rejected by source '{}'", login, source.name);
                return Err(e);
            }
            Err(e) => {
                warn!("Source '{}' failed to verify '{}': {}", source.name, login, e);
                return Err(e);
            }
        };

        if !auto_register {
            return Ok(None);
        }

        let user = local_account(source, login, profile)?;
        self.provision(user).await.map(Some)
    }

    async fn provision(&self, user: User) -> Result<User> {
        let exists = match self.users.is_user_exist(0, &user.name).await {
            Ok(exists) => exists,
            Err(source) => {
                return Err(Error::ProvisionFailed {
                    user: Box::new(user),
                    source,
                })
            }
        };

        let written = if exists {
            self.users.update_user(&user).await
        } else {
            self.users.create_user(&user).await
        };
        if let Err(source) = written {
            return Err(Error::ProvisionFailed {
                user: Box::new(user),
                source,
            });
        }

        info!(
            "{} local user '{}' from login source {}",
            if exists { "Updated" } else { "Registered" },
            user.name,
            user.login_source
        );
        Ok(user)
    }
}

/// Maps a verified login onto the local account it belongs to.
fn local_account(source: &AuthSource, login: &str, profile: Profile) -> Result<User> {
    let mut user = User {
        login_type: Some(source.kind()),
        login_source: source.id,
        login_name: login.to_string(),
        is_active: true,
        ..Default::default()
    };

    match source.kind() {
        LoginType::Ldap | LoginType::Dldap => {
            let username = if profile.username.is_empty() {
                login.to_string()
            } else {
                profile.username
            };
            if !is_valid_username(&username) {
                return Err(Error::InvalidUsernamePattern(username));
            }

            user.email = if profile.email.is_empty() {
                format!("{username}@localhost")
            } else {
                profile.email
            };
            user.full_name = compose_full_name(&profile.first_name, &profile.surname, &username);
            user.is_admin = profile.is_admin;
            user.lower_name = username.to_lowercase();
            user.name = username;
        }
        LoginType::Smtp => {
            let local_part = login.split_once('@').map_or(login, |(local, _)| local);
            user.name = local_part.to_lowercase();
            user.lower_name = user.name.clone();
            user.email = login.to_string();
        }
        LoginType::Pam => {
            user.name = login.to_lowercase();
            user.lower_name = user.name.clone();
            user.email = login.to_string();
        }
        LoginType::GitHub => {
            user.name = login.to_lowercase();
            user.lower_name = user.name.clone();
            user.email = if profile.email.is_empty() {
                login.to_string()
            } else {
                profile.email
            };
            user.full_name = profile.full_name;
            user.website = profile.website;
            user.location = profile.location;
        }
    }
    Ok(user)
}

/// Letters, digits, `-`, `_` and `.` only.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub fn compose_full_name(first_name: &str, surname: &str, username: &str) -> String {
    match (first_name.is_empty(), surname.is_empty()) {
        (true, true) => username.to_string(),
        (true, false) => surname.to_string(),
        (false, true) => first_name.to_string(),
        (false, false) => format!("{first_name} {surname}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{GitHubConfig, LdapConfig, PamConfig, SmtpConfig};

    fn source(kind: LoginType) -> AuthSource {
        let config = match kind {
            LoginType::Ldap | LoginType::Dldap => SourceConfig::Ldap(LdapConfig::default()),
            LoginType::Smtp => SourceConfig::Smtp(SmtpConfig::default()),
            LoginType::Pam => SourceConfig::Pam(PamConfig::default()),
            LoginType::GitHub => SourceConfig::GitHub(GitHubConfig::default()),
        };
        let mut source = AuthSource::new(kind, "src", config).unwrap();
        source.id = 9;
        source
    }

    #[test]
    fn full_name_composition() {
        assert_eq!(compose_full_name("", "", "jdoe"), "jdoe");
        assert_eq!(compose_full_name("", "Doe", "jdoe"), "Doe");
        assert_eq!(compose_full_name("John", "", "jdoe"), "John");
        assert_eq!(compose_full_name("John", "Doe", "jdoe"), "John Doe");
    }

    #[test]
    fn username_pattern() {
        assert!(is_valid_username("j.doe-1_x"));
        assert!(is_valid_username("JDoe"));
        assert!(!is_valid_username("j doe"));
        assert!(!is_valid_username("jdoe@corp"));
        assert!(!is_valid_username(""));
    }

    #[test]
    fn ldap_account_falls_back_to_login_and_localhost() {
        let user = local_account(&source(LoginType::Ldap), "jdoe", Profile::default()).unwrap();
        assert_eq!(user.name, "jdoe");
        assert_eq!(user.email, "jdoe@localhost");
        assert_eq!(user.full_name, "jdoe");
        assert_eq!(user.login_type, Some(LoginType::Ldap));
        assert_eq!(user.login_source, 9);
    }

    #[test]
    fn ldap_account_keeps_upstream_login() {
        let profile = Profile {
            username: "John.Doe".into(),
            first_name: "John".into(),
            surname: "Doe".into(),
            email: "john@corp.example".into(),
            is_admin: true,
            ..Default::default()
        };
        let user = local_account(&source(LoginType::Dldap), "jdoe@corp", profile).unwrap();
        assert_eq!(user.name, "John.Doe");
        assert_eq!(user.lower_name, "john.doe");
        assert_eq!(user.login_name, "jdoe@corp");
        assert_eq!(user.full_name, "John Doe");
        assert!(user.is_admin);
    }

    #[test]
    fn smtp_account_uses_local_part() {
        let user =
            local_account(&source(LoginType::Smtp), "Alice@Example.com", Profile::default()).unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.email, "Alice@Example.com");
        assert_eq!(user.login_name, "Alice@Example.com");
    }

    #[test]
    fn github_account_prefers_profile_email() {
        let profile = Profile {
            full_name: "The Octocat".into(),
            email: "octo@github.example".into(),
            website: "https://github.com/octocat".into(),
            location: "San Francisco".into(),
            ..Default::default()
        };
        let user = local_account(&source(LoginType::GitHub), "Octocat", profile).unwrap();
        assert_eq!(user.name, "octocat");
        assert_eq!(user.email, "octo@github.example");
        assert_eq!(user.location, "San Francisco");
    }

    #[test]
    fn mismatched_config_has_no_backend() {
        let cfg = SourceConfig::Pam(PamConfig::default());
        assert!(matches!(
            cfg.backend(LoginType::Smtp),
            Err(Error::InvalidSourceType(_))
        ));
    }
}
