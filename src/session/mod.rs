//! Authenticated transport sessions.
//!
//! The dispatcher never builds HTTP clients itself. It asks a
//! [`SessionProvider`] for a [`Session`] on every call, mounts its retry
//! adapter on it, and sends exactly one request through it.

mod retry;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{
    Client, Request, Response,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};

pub use retry::{RetryAdapter, is_transient};

use crate::config::DEFAULT_USER_AGENT;

/// Supplies an authenticated session on demand.
///
/// Implementations own credential handling (token refresh and so on); a
/// failure here is reported to callers as a transport error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_session(&self) -> Result<Session>;
}

/// An HTTP client plus retry adapters mounted by URL prefix.
///
/// A session verifies TLS certificates exactly as its `Client` does.
/// Sessions from [`TokenProvider`] always verify; nothing in this crate
/// builds a client that skips verification.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    adapters: Vec<(String, RetryAdapter)>,
}

impl Session {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            adapters: Vec::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Mounts `adapter` for URLs starting with `prefix`, replacing any
    /// adapter already mounted for the same prefix.
    pub fn mount(&mut self, prefix: impl Into<String>, adapter: RetryAdapter) {
        let prefix = prefix.into().to_ascii_lowercase();
        self.adapters.retain(|(existing, _)| *existing != prefix);
        self.adapters.push((prefix, adapter));
    }

    /// The adapter with the longest prefix matching `url`.
    pub fn adapter_for(&self, url: &str) -> Option<&RetryAdapter> {
        let url = url.to_ascii_lowercase();
        self.adapters
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, adapter)| adapter)
    }

    /// Sends one request through the adapter mounted for its URL, if any.
    pub async fn send(&self, request: Request) -> Result<Response, reqwest::Error> {
        match self.adapter_for(request.url().as_str()) {
            Some(adapter) => adapter.execute(&self.client, request).await,
            None => self.client.execute(request).await,
        }
    }
}

/// Session provider for a fixed bearer token, or for anonymous access.
///
/// The underlying client is built once, so every session shares its
/// connection pool.
#[derive(Debug, Clone)]
pub struct TokenProvider {
    client: Client,
}

impl TokenProvider {
    pub fn new(token: Option<&str>) -> Result<Self> {
        Self::with_user_agent(token, DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(token: Option<&str>, user_agent: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Bearer token contains invalid header characters")?;
            auth_value.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_value);
            debug!("Using bearer token for authentication: {}", mask_token(token));
        }

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SessionProvider for TokenProvider {
    async fn get_session(&self) -> Result<Session> {
        Ok(Session::new(self.client.clone()))
    }
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*********".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}
