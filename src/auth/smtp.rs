use std::fmt;

use anyhow::anyhow;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use tracing::debug;

use super::{Backend, Profile};
use crate::error::{Error, Result};
use crate::source::SmtpConfig;

const HELLO_NAME: &str = "login-sources";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpMechanism {
    Plain,
    Login,
}

impl SmtpMechanism {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }
}

impl From<SmtpMechanism> for Mechanism {
    fn from(value: SmtpMechanism) -> Self {
        match value {
            SmtpMechanism::Plain => Mechanism::Plain,
            SmtpMechanism::Login => Mechanism::Login,
        }
    }
}

/// Why an SMTP exchange did not end in a successful AUTH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpFailure {
    /// Reply code, when the server sent one.
    pub code: Option<u16>,
    pub message: String,
}

impl fmt::Display for SmtpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for SmtpFailure {}

impl From<lettre::transport::smtp::Error> for SmtpFailure {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        Self {
            code: e.status().and_then(|code| code.to_string().parse().ok()),
            message: e.to_string(),
        }
    }
}

impl SmtpFailure {
    /// 535, or Gmail's wording of it, means the credentials were refused.
    pub fn is_rejection(&self) -> bool {
        self.code == Some(535) || self.message.contains("Username and Password not accepted")
    }
}

/// Performs greeting, optional STARTTLS and SASL authentication.
#[async_trait]
pub trait SmtpClient: Send + Sync {
    async fn authenticate(
        &self,
        cfg: &SmtpConfig,
        mechanism: SmtpMechanism,
        login: &str,
        password: &str,
    ) -> std::result::Result<(), SmtpFailure>;
}

/// [`SmtpClient`] on top of lettre's tokio transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LettreClient;

#[async_trait]
impl SmtpClient for LettreClient {
    async fn authenticate(
        &self,
        cfg: &SmtpConfig,
        mechanism: SmtpMechanism,
        login: &str,
        password: &str,
    ) -> std::result::Result<(), SmtpFailure> {
        // STARTTLS is mandatory when configured; a server that does not
        // offer it fails the attempt.
        let tls = if cfg.tls {
            let params = TlsParameters::builder(cfg.host.clone())
                .dangerous_accept_invalid_certs(cfg.skip_verify)
                .build()?;
            Tls::Required(params)
        } else {
            Tls::None
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(cfg.host.as_str())
            .port(cfg.port)
            .tls(tls)
            .hello_name(ClientId::Domain(HELLO_NAME.to_string()))
            .credentials(Credentials::new(login.to_string(), password.to_string()))
            .authentication(vec![mechanism.into()])
            .timeout(None)
            .build::<Tokio1Executor>();

        transport.test_connection().await?;
        Ok(())
    }
}

pub struct SmtpBackend<C = LettreClient> {
    cfg: SmtpConfig,
    client: C,
}

impl SmtpBackend {
    pub fn new(cfg: SmtpConfig) -> Self {
        Self::with_client(cfg, LettreClient)
    }
}

impl<C: SmtpClient> SmtpBackend<C> {
    pub fn with_client(cfg: SmtpConfig, client: C) -> Self {
        Self { cfg, client }
    }

    /// The domain allow-list is checked before any connection is made.
    /// Domains compare case-insensitively.
    fn domain_allowed(&self, login: &str) -> bool {
        let allowed = self.cfg.allowed_domains();
        if allowed.is_empty() {
            return true;
        }
        match login.split_once('@') {
            Some((_, domain)) => allowed.iter().any(|d| d.eq_ignore_ascii_case(domain)),
            None => false,
        }
    }
}

#[async_trait]
impl<C: SmtpClient> Backend for SmtpBackend<C> {
    async fn authenticate(&self, login: &str, password: &str) -> Result<Profile> {
        if !self.domain_allowed(login) {
            debug!("SMTP login '{}' is outside the allowed domains", login);
            return Err(Error::rejected(login));
        }

        let mechanism = SmtpMechanism::parse(&self.cfg.auth).ok_or_else(|| {
            Error::unavailable(anyhow!(
                "unsupported SMTP authentication type '{}'",
                self.cfg.auth
            ))
        })?;

        match self.client.authenticate(&self.cfg, mechanism, login, password).await {
            Ok(()) => Ok(Profile::default()),
            Err(failure) if failure.is_rejection() => Err(Error::rejected(login)),
            Err(failure) => Err(Error::unavailable(anyhow!(
                "SMTP authentication against {}:{} failed: {}",
                self.cfg.host,
                self.cfg.port,
                failure
            ))),
        }
    }
}
