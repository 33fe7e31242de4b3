use std::time::Duration;

use crate::hooks::{DEFAULT_SETTLE_DELAY, MAX_SETTLE_DELAY};

/// Tracker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Socket.IO endpoint; the path names the namespace.
    pub socket_url: String,
    /// Base URL of the record-mutation API.
    pub api_url: String,
    /// Bearer token sent on the REST call and the socket handshake.
    pub access_token: Option<String>,
    /// Pause after `completed` before the job is dismissed.
    pub settle_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            socket_url: "http://localhost:3000/poem".into(),
            api_url: "http://localhost:3000".into(),
            access_token: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                      |
    /// |-------------------------|------------------------------|
    /// | `VERSE_SOCKET_URL`      | `http://localhost:3000/poem` |
    /// | `VERSE_API_URL`         | `http://localhost:3000`      |
    /// | `VERSE_ACCESS_TOKEN`    | unset                        |
    /// | `VERSE_SETTLE_DELAY_MS` | `2000`, at most one day      |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading values from
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let socket_url = lookup("VERSE_SOCKET_URL").unwrap_or(defaults.socket_url);
        let api_url = lookup("VERSE_API_URL").unwrap_or(defaults.api_url);
        let access_token = lookup("VERSE_ACCESS_TOKEN").filter(|t| !t.trim().is_empty());

        let settle_delay = match lookup("VERSE_SETTLE_DELAY_MS") {
            None => defaults.settle_delay,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if Duration::from_millis(ms) <= MAX_SETTLE_DELAY => Duration::from_millis(ms),
                Ok(_) => {
                    tracing::warn!(
                        value = %raw,
                        "VERSE_SETTLE_DELAY_MS exceeds one day, using default",
                    );
                    defaults.settle_delay
                }
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        "VERSE_SETTLE_DELAY_MS is not a valid millisecond count, using default",
                    );
                    defaults.settle_delay
                }
            },
        };

        Self {
            socket_url,
            api_url,
            access_token,
            settle_delay,
        }
    }
}
