//! Configuration Module
//!
//! Environment-driven settings for the crawler and the push subscriber.

mod settings;

pub use settings::{
    ConfigError, CrawlSettings, DEFAULT_PUSHER_URL, DEFAULT_USER_AGENT, OddsStreamConfig,
    ServerSettings, SportsbookSettings, StreamSettings,
};
