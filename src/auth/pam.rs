use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use super::{Backend, Profile};
use crate::error::{Error, Result};

pub struct PamBackend {
    service: String,
}

impl PamBackend {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

/// Maps a PAM error message onto the error taxonomy.
pub fn classify(login: &str, message: &str) -> Error {
    let lower = message.to_lowercase();
    if message.contains("Authentication failure") || lower.contains("auth_err") {
        Error::rejected(login)
    } else {
        Error::unavailable(anyhow!("PAM: {}", message))
    }
}

#[async_trait]
impl Backend for PamBackend {
    async fn authenticate(&self, login: &str, password: &str) -> Result<Profile> {
        let service = self.service.clone();
        let username = login.to_string();
        let password = password.to_string();

        let result = tokio::task::spawn_blocking(move || pam_authenticate(&service, &username, &password))
            .await
            .map_err(|join_err| Error::unavailable(anyhow!("PAM task panicked: {}", join_err)))?;

        match result {
            Ok(()) => Ok(Profile::default()),
            Err(message) => {
                debug!("PAM refused '{}': {}", login, message);
                Err(classify(login, &message))
            }
        }
    }
}

#[cfg(feature = "pam-auth")]
fn pam_authenticate(service: &str, login: &str, password: &str) -> std::result::Result<(), String> {
    use pam::Authenticator as PamAuth;

    let mut auth = PamAuth::with_password(service)
        .map_err(|e| format!("Failed to initialize PAM for service '{}': {:?}", service, e))?;
    auth.get_handler().set_credentials(login, password);
    auth.authenticate().map_err(|e| format!("{:?}", e))
}

#[cfg(not(feature = "pam-auth"))]
fn pam_authenticate(_service: &str, _login: &str, _password: &str) -> std::result::Result<(), String> {
    Err("PAM support is not compiled in".to_string())
}
