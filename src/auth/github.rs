use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{Backend, Profile};
use crate::error::{Error, Result};

const DEFAULT_ENDPOINT: &str = "https://api.github.com/";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    #[serde(default)]
    login: String,
    name: Option<String>,
    email: Option<String>,
    html_url: Option<String>,
    location: Option<String>,
}

/// Verifies credentials with HTTP basic auth against `GET /user`.
pub struct GitHubBackend {
    endpoint: String,
    client: Client,
}

impl GitHubBackend {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = if endpoint.trim().is_empty() {
            DEFAULT_ENDPOINT
        } else {
            endpoint.trim()
        };
        let client = Client::builder()
            .user_agent(concat!("login-sources/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::unavailable)?;

        Ok(Self::with_client(endpoint, client))
    }

    pub fn with_client(endpoint: &str, client: Client) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn user_url(&self) -> String {
        format!("{}/user", self.endpoint)
    }
}

#[async_trait]
impl Backend for GitHubBackend {
    async fn authenticate(&self, login: &str, password: &str) -> Result<Profile> {
        let url = self.user_url();
        let response = self
            .client
            .get(&url)
            .basic_auth(login, Some(password))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(Error::unavailable)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            debug!("GitHub refused '{}' at {}", login, url);
            return Err(Error::rejected(login));
        }
        if !status.is_success() {
            return Err(Error::unavailable(anyhow!("GET {}: {}", url, status)));
        }

        let user: GitHubUser = response.json().await.map_err(Error::unavailable)?;
        Ok(Profile {
            username: user.login,
            full_name: user.name.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            website: user.html_url.unwrap_or_default(),
            location: user.location.unwrap_or_default(),
            ..Default::default()
        })
    }
}
