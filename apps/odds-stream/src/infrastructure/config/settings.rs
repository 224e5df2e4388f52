//! Odds Stream Configuration Settings
//!
//! Configuration types loaded from environment variables. Every value is
//! optional; unparsable numbers fall back to their defaults.

use std::time::Duration;

use crate::application::services::{CrawlerConfig, KeepaliveConfig, SubscriptionConfig};
use crate::domain::channel::{ChannelTemplate, Granularity};

/// Desktop browser user agent sent on API requests and socket handshakes.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Default Pusher endpoint for the sportsbook's push feed.
pub const DEFAULT_PUSHER_URL: &str = "wss://ws-draftkingseu.pusher.com/app/490c3809b82ef97880f2?protocol=7&client=js&version=4.2.2&flash=false";

/// Sportsbook REST API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SportsbookSettings {
    /// Scheme and host of the API.
    pub api_base: String,
    /// Path prefix every API path is appended to.
    pub api_prefix: String,
    /// User agent header.
    pub user_agent: String,
    /// Per-request timeout.
    pub http_timeout: Duration,
}

impl Default for SportsbookSettings {
    fn default() -> Self {
        Self {
            api_base: "https://sportsbook.draftkings.com".to_string(),
            api_prefix: "/sites/US-SB/api/v4/".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Crawler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    /// Maximum concurrent fetches (0 = unbounded).
    pub max_in_flight: usize,
    /// Leaf stream buffer size.
    pub leaf_buffer: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        let defaults = CrawlerConfig::default();
        Self {
            max_in_flight: defaults.max_in_flight,
            leaf_buffer: defaults.leaf_buffer,
        }
    }
}

impl CrawlSettings {
    /// Crawler configuration for these settings.
    #[must_use]
    pub const fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig {
            max_in_flight: self.max_in_flight,
            leaf_buffer: self.leaf_buffer,
        }
    }
}

/// Push stream settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Pusher WebSocket URL.
    pub pusher_url: String,
    /// Channel name template.
    pub channel_template: ChannelTemplate,
    /// Catalog level channels are derived from.
    pub granularity: Granularity,
    /// Quiet period before a keepalive ping.
    pub keepalive_interval: Duration,
    /// Keepalive check period.
    pub keepalive_check: Duration,
    /// Bounded wait for a close acknowledgement.
    pub close_timeout: Duration,
    /// Shared inbound frame buffer size.
    pub inbound_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            pusher_url: DEFAULT_PUSHER_URL.to_string(),
            channel_template: ChannelTemplate::default(),
            granularity: Granularity::default(),
            keepalive_interval: Duration::from_secs(6),
            keepalive_check: Duration::from_millis(1000),
            close_timeout: Duration::from_millis(1000),
            inbound_buffer: 1024,
        }
    }
}

impl StreamSettings {
    /// Subscription configuration for these settings.
    #[must_use]
    pub fn subscription_config(&self, user_agent: &str) -> SubscriptionConfig {
        let mut config = SubscriptionConfig::new(self.pusher_url.clone());
        config.headers = vec![("User-Agent".to_string(), user_agent.to_string())];
        config.keepalive = KeepaliveConfig::new(self.keepalive_interval, self.keepalive_check);
        config.close_timeout = self.close_timeout;
        config
    }
}

/// Server port settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OddsStreamConfig {
    /// Sportsbook API settings.
    pub sportsbook: SportsbookSettings,
    /// Crawler settings.
    pub crawl: CrawlSettings,
    /// Push stream settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl OddsStreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `PUSHER_URL` is not a WebSocket URL or
    /// `CHANNEL_TEMPLATE` lacks an `{id}` placeholder.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let sportsbook_defaults = SportsbookSettings::default();
        let crawl_defaults = CrawlSettings::default();
        let stream_defaults = StreamSettings::default();

        let sportsbook = SportsbookSettings {
            api_base: env
                .string("SPORTSBOOK_API_BASE")
                .map_or(sportsbook_defaults.api_base, |s| s.trim_end_matches('/').to_string()),
            api_prefix: env
                .string("SPORTSBOOK_API_PREFIX")
                .unwrap_or(sportsbook_defaults.api_prefix),
            user_agent: env
                .string("SPORTSBOOK_USER_AGENT")
                .unwrap_or(sportsbook_defaults.user_agent),
            http_timeout: env.secs("SPORTSBOOK_HTTP_TIMEOUT_SECS", sportsbook_defaults.http_timeout),
        };

        let crawl = CrawlSettings {
            max_in_flight: env.parse("CRAWL_MAX_IN_FLIGHT", crawl_defaults.max_in_flight),
            leaf_buffer: env.parse("CRAWL_LEAF_BUFFER", crawl_defaults.leaf_buffer),
        };

        let pusher_url = env
            .string("PUSHER_URL")
            .unwrap_or(stream_defaults.pusher_url);
        if !(pusher_url.starts_with("ws://") || pusher_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "PUSHER_URL".to_string(),
                reason: format!("{pusher_url:?} is not a ws:// or wss:// URL"),
            });
        }

        let channel_template = match env.string("CHANNEL_TEMPLATE") {
            None => stream_defaults.channel_template,
            Some(value) => parse_template(&value)?,
        };

        let stream = StreamSettings {
            pusher_url,
            channel_template,
            granularity: env
                .string("CHANNEL_GRANULARITY")
                .map_or(stream_defaults.granularity, |s| {
                    Granularity::from_str_case_insensitive(&s)
                }),
            keepalive_interval: env.secs("KEEPALIVE_INTERVAL_SECS", stream_defaults.keepalive_interval),
            keepalive_check: env.millis("KEEPALIVE_CHECK_MS", stream_defaults.keepalive_check),
            close_timeout: env.millis("CLOSE_TIMEOUT_MS", stream_defaults.close_timeout),
            inbound_buffer: env.parse("INBOUND_BUFFER", stream_defaults.inbound_buffer),
        };

        let server = ServerSettings {
            metrics_port: env.parse("METRICS_PORT", ServerSettings::default().metrics_port),
        };

        Ok(Self {
            sportsbook,
            crawl,
            stream,
            server,
        })
    }
}

fn parse_template(value: &str) -> Result<ChannelTemplate, ConfigError> {
    match value.to_lowercase().as_str() {
        "eventgroup" => Ok(ChannelTemplate::event_group()),
        "eventgroupv2" => Ok(ChannelTemplate::event_group_v2()),
        _ => ChannelTemplate::new(value).map_err(|e| ConfigError::InvalidValue {
            key: "CHANNEL_TEMPLATE".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Typed access over a key lookup. Blank values count as unset.
struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
