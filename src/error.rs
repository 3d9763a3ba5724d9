use std::path::PathBuf;

use thiserror::Error;

use crate::store::User;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("login source already exists [name: {name}]")]
    AlreadyExists { name: String },

    #[error("login source does not exist [id: {id}]")]
    NotFound { id: i64 },

    #[error("login source is still used by at least one user [id: {id}]")]
    InUse { id: i64 },

    #[error("login source is not activated [id: {id}]")]
    SourceNotActivated { id: i64 },

    #[error("invalid login source type: {0}")]
    InvalidSourceType(String),

    /// Bad login or password. Deliberately does not say which.
    #[error("user does not exist [login: {login}]")]
    CredentialRejected { login: String },

    #[error("authentication backend unavailable: {0:#}")]
    BackendUnavailable(#[source] anyhow::Error),

    #[error("invalid pattern for attribute 'username' [{0}]: must be valid alpha or numeric or dash(-_) or dot characters")]
    InvalidUsernamePattern(String),

    #[error("{context}: {source:#}")]
    Persistence {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Persisting an auto-registered user failed; the record that was being
    /// written is handed back so the caller may retry.
    #[error("provision user '{}': {source:#}", user.name)]
    ProvisionFailed {
        user: Box<User>,
        #[source]
        source: anyhow::Error,
    },

    #[error("login source is file-backed and cannot be deleted [id: {id}]")]
    ReadOnlySource { id: i64 },

    #[error("invalid login source config: {0}")]
    InvalidConfig(String),

    #[error("authentication source file {}: {source}", path.display())]
    SourceFile {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub(crate) fn persistence(context: &'static str, source: anyhow::Error) -> Self {
        Self::Persistence { context, source }
    }

    pub(crate) fn rejected(login: &str) -> Self {
        Self::CredentialRejected {
            login: login.to_string(),
        }
    }

    pub(crate) fn unavailable<E>(source: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::BackendUnavailable(source.into())
    }

    /// True when the backend answered and refused the credentials.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CredentialRejected { .. })
    }

    /// Message safe to show to the person trying to sign in.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CredentialRejected { .. } => "invalid credentials",
            Self::SourceNotActivated { .. } => "authentication source is not activated",
            Self::InvalidUsernamePattern(_) => "username returned by the directory is not allowed",
            _ => "authentication service error",
        }
    }
}
