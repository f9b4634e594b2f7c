//! Session-wide configuration for the chat sync core.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::presence::PresencePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid chat configuration: {0}")]
    Invalid(String),
}

/// Tunables shared by every component of a [`crate::session::ChatSession`].
///
/// Built from the marketplace REST base URL; the websocket endpoint is
/// derived from it (`http` becomes `ws`, path `/chat`) unless overridden.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    rest_base_url: Url,
    socket_url: Url,
    pub conversations_page_size: u32,
    pub messages_page_size: u32,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub unread_fresh_for: Duration,
    pub unread_refresh_interval: Duration,
    pub presence_policy: PresencePolicy,
}

impl ChatConfig {
    pub fn new(rest_base_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        let mut base = rest_base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(ConfigError::Invalid("rest base url cannot be empty".into()));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{}", base);
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let rest_base_url = Url::parse(&base)
            .map_err(|err| ConfigError::Invalid(format!("invalid rest base url: {err}")))?;
        let socket_url = derive_socket_url(&rest_base_url)?;
        Ok(Self {
            rest_base_url,
            socket_url,
            conversations_page_size: 20,
            messages_page_size: 50,
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            unread_fresh_for: Duration::from_secs(15),
            unread_refresh_interval: Duration::from_secs(30),
            presence_policy: PresencePolicy::default(),
        })
    }

    /// Point the websocket at an explicit endpoint instead of the derived one.
    pub fn with_socket_url(mut self, url: impl AsRef<str>) -> Result<Self, ConfigError> {
        self.socket_url = Url::parse(url.as_ref())
            .map_err(|err| ConfigError::Invalid(format!("invalid socket url: {err}")))?;
        Ok(self)
    }

    pub fn with_presence_policy(mut self, policy: PresencePolicy) -> Self {
        self.presence_policy = policy;
        self
    }

    pub fn with_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay = delay;
        self
    }

    pub fn with_unread_cache(mut self, fresh_for: Duration, refresh_interval: Duration) -> Self {
        self.unread_fresh_for = fresh_for;
        self.unread_refresh_interval = refresh_interval;
        self
    }

    pub fn rest_base_url(&self) -> &Url {
        &self.rest_base_url
    }

    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }
}

fn derive_socket_url(base: &Url) -> Result<Url, ConfigError> {
    let mut ws = base.clone();
    ws.set_scheme(if base.scheme() == "https" { "wss" } else { "ws" })
        .map_err(|_| ConfigError::Invalid("invalid websocket scheme".into()))?;
    ws.set_path("chat");
    ws.set_query(None);
    ws.set_fragment(None);
    Ok(ws)
}
