use anyhow::anyhow;
use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, error, trace};

use super::{Backend, Profile};
use crate::error::{Error, Result};
use crate::source::{LdapConfig, SecurityProtocol};

/// LDAP directory lookup, either via a search bind (`simple_auth == false`)
/// or by binding directly as the user DN.
#[derive(Clone)]
pub struct LdapBackend {
    cfg: LdapConfig,
    simple_auth: bool,
}

impl LdapBackend {
    pub fn new(cfg: LdapConfig, simple_auth: bool) -> Self {
        Self { cfg, simple_auth }
    }

    fn url(&self) -> String {
        let scheme = match self.cfg.security_protocol {
            SecurityProtocol::Ldaps => "ldaps",
            _ => "ldap",
        };
        format!("{}://{}:{}", scheme, self.cfg.host, self.cfg.port)
    }

    async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new()
            .set_starttls(self.cfg.security_protocol == SecurityProtocol::StartTls)
            .set_no_tls_verify(self.cfg.skip_verify);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.url())
            .await
            .map_err(|e| {
                error!("LDAP connect failed for '{}': {}", self.cfg.host, e);
                Error::unavailable(anyhow!("LDAP connect to '{}' failed: {}", self.cfg.host, e))
            })?;
        ldap3::drive!(conn);
        Ok(ldap)
    }

    /// Resolves the DN of `login` with the search account.
    async fn find_user_dn(&self, ldap: &mut Ldap, login: &str) -> Result<String> {
        if !self.cfg.bind_dn.is_empty() && !self.cfg.bind_password.is_empty() {
            let bind_dn = sanitized_dn(&self.cfg.bind_dn, login).ok_or_else(|| Error::rejected(login))?;
            ldap.simple_bind(&bind_dn, &self.cfg.bind_password)
                .await
                .and_then(|r| r.success())
                .map_err(|e| {
                    error!("LDAP search bind as '{}' failed: {}", bind_dn, e);
                    Error::unavailable(anyhow!("LDAP bind as '{}' failed: {}", bind_dn, e))
                })?;
        } else {
            trace!("LDAP will search anonymously");
        }

        let filter = sanitized_user_query(&self.cfg.filter, login).ok_or_else(|| Error::rejected(login))?;
        let (entries, _) = ldap
            .search(&self.cfg.user_base, Scope::Subtree, &filter, Vec::<&str>::new())
            .await
            .and_then(|r| r.success())
            .map_err(|e| {
                debug!("LDAP user search for '{}' failed: {}", login, e);
                Error::rejected(login)
            })?;

        match entries.len() {
            0 => {
                debug!("LDAP user not found: {}", login);
                Err(Error::rejected(login))
            }
            1 => Ok(SearchEntry::construct(entries[0].clone()).dn),
            _ => {
                debug!("LDAP user ambiguous (multiple matches): {}", login);
                Err(Error::rejected(login))
            }
        }
    }

    async fn search_entry(&self, ldap: &mut Ldap, login: &str, password: &str) -> Result<Profile> {
        let user_dn = if self.simple_auth {
            let dn = sanitized_dn(&self.cfg.user_dn, login).ok_or_else(|| Error::rejected(login))?;
            bind_user(ldap, &dn, password, login).await?;
            dn
        } else {
            let dn = self.find_user_dn(ldap, login).await?;
            if !self.cfg.attributes_in_bind {
                bind_user(ldap, &dn, password, login).await?;
            }
            dn
        };

        let filter = sanitized_user_query(&self.cfg.filter, login).ok_or_else(|| Error::rejected(login))?;
        let attrs: Vec<&str> = [
            self.cfg.attribute_username.as_str(),
            self.cfg.attribute_name.as_str(),
            self.cfg.attribute_surname.as_str(),
            self.cfg.attribute_mail.as_str(),
        ]
        .into_iter()
        .filter(|a| !a.is_empty())
        .collect();

        let (entries, _) = ldap
            .search(&user_dn, Scope::Subtree, &filter, attrs)
            .await
            .and_then(|r| r.success())
            .map_err(|e| {
                debug!("LDAP attribute search for '{}' failed: {}", user_dn, e);
                Error::rejected(login)
            })?;
        let Some(entry) = entries.into_iter().next().map(SearchEntry::construct) else {
            debug!("LDAP user filter inhibited login of '{}'", login);
            return Err(Error::rejected(login));
        };

        let mut profile = Profile {
            username: first_value(&entry, &self.cfg.attribute_username),
            first_name: first_value(&entry, &self.cfg.attribute_name),
            surname: first_value(&entry, &self.cfg.attribute_surname),
            email: first_value(&entry, &self.cfg.attribute_mail),
            ..Default::default()
        };

        if !self.cfg.admin_filter.is_empty() {
            profile.is_admin = match ldap
                .search(&user_dn, Scope::Subtree, &self.cfg.admin_filter, vec![self.cfg.attribute_name.as_str()])
                .await
                .and_then(|r| r.success())
            {
                Ok((entries, _)) => !entries.is_empty(),
                Err(e) => {
                    error!("LDAP admin search for '{}' failed: {}", user_dn, e);
                    false
                }
            };
        }

        if self.cfg.group_enabled {
            self.check_group(ldap, &entry, login).await?;
        }

        if !self.simple_auth && self.cfg.attributes_in_bind {
            bind_user(ldap, &user_dn, password, login).await?;
        }

        Ok(profile)
    }

    async fn check_group(&self, ldap: &mut Ldap, entry: &SearchEntry, login: &str) -> Result<()> {
        let group_dn = sanitized_group_dn(&self.cfg.group_dn).ok_or_else(|| {
            error!("LDAP group search base '{}' is invalid", self.cfg.group_dn);
            Error::rejected(login)
        })?;

        let uid = if self.cfg.user_uid.eq_ignore_ascii_case("dn") {
            entry.dn.clone()
        } else {
            first_value(entry, &self.cfg.user_uid)
        };
        let filter = format!(
            "(&{}({}={}))",
            self.cfg.group_filter,
            self.cfg.group_member_uid,
            ldap_escape(&uid)
        );

        let (groups, _) = ldap
            .search(&group_dn, Scope::Subtree, &filter, Vec::<&str>::new())
            .await
            .and_then(|r| r.success())
            .map_err(|e| {
                error!("LDAP group search for '{}' failed: {}", login, e);
                Error::rejected(login)
            })?;
        if groups.is_empty() {
            debug!("LDAP group filter inhibited login of '{}'", login);
            return Err(Error::rejected(login));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for LdapBackend {
    async fn authenticate(&self, login: &str, password: &str) -> Result<Profile> {
        if password.is_empty() {
            debug!("LDAP authentication of '{}' with empty password refused", login);
            return Err(Error::rejected(login));
        }

        let mut ldap = self.connect().await?;
        let result = self.search_entry(&mut ldap, login, password).await;
        let _ = ldap.unbind().await;
        result
    }
}

async fn bind_user(ldap: &mut Ldap, dn: &str, password: &str, login: &str) -> Result<()> {
    ldap.simple_bind(dn, password)
        .await
        .and_then(|r| r.success())
        .map(|_| ())
        .map_err(|e| {
            debug!("LDAP password verification failed for {}: {}", login, e);
            Error::rejected(login)
        })
}

fn first_value(entry: &SearchEntry, attr: &str) -> String {
    if attr.is_empty() {
        return String::new();
    }
    entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .and_then(|(_, values)| values.first())
        .cloned()
        .unwrap_or_default()
}

/// Substitutes `login` into a search filter; `None` if the login carries
/// filter metacharacters.
fn sanitized_user_query(filter: &str, login: &str) -> Option<String> {
    const BAD: &[char] = &['\0', '(', ')', '*', '\\'];
    if login.contains(BAD) {
        debug!("'{}' contains invalid query characters, aborting", login);
        return None;
    }
    Some(filter.replace("%s", login))
}

/// Substitutes `login` into a DN template; `None` if the login carries DN
/// metacharacters.
fn sanitized_dn(template: &str, login: &str) -> Option<String> {
    const BAD: &[char] = &['\0', '(', ')', '*', '\\', ',', '=', '\'', '"', '#', '+', ';', '<', '>'];
    if login.contains(BAD) {
        debug!("'{}' contains invalid DN characters, aborting", login);
        return None;
    }
    Some(template.replace("%s", login))
}

fn sanitized_group_dn(group_dn: &str) -> Option<String> {
    const BAD: &[char] = &['\0', '(', ')', '*', '\\', '\'', '"', '#', '+', ';', '<', '>'];
    let group_dn = group_dn.trim();
    if group_dn.is_empty() || group_dn.contains(BAD) {
        return None;
    }
    Some(group_dn.to_string())
}
