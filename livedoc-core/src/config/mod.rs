//! Configuration management for livedoc
//!
//! Defaults suit an interactive session. Every section can be overridden
//! from a TOML file or from `LIVEDOC_<SECTION>_<KEY>` environment variables.

use crate::core_crypto::KdfParams;
use crate::core_transport::BackoffPolicy;
use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub presence: PresenceConfig,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
}

/// Session actor and polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pending guest polls its own status
    #[serde(with = "humantime_serde")]
    pub approval_poll_interval: Duration,

    /// Host polls the pending-participant queue
    #[serde(with = "humantime_serde")]
    pub queue_poll_interval: Duration,

    /// Every session refreshes room record, participants and grants
    #[serde(with = "humantime_serde")]
    pub room_poll_interval: Duration,

    /// Consecutive undecryptable frames before the session reports itself
    /// desynchronized
    pub desync_threshold: u32,

    /// Queued commands per session handle
    pub command_buffer: usize,

    /// Time a fresh link has to present its Hello frame
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Largest sealed frame accepted or sent, in bytes
    pub max_frame_size: usize,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    pub backoff: BackoffPolicy,
}

/// Cursor, typing, heartbeat and chat behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Minimum gap between two cursor broadcasts
    #[serde(with = "humantime_serde")]
    pub cursor_throttle: Duration,

    /// Remote cursors not refreshed within this window are dropped
    #[serde(with = "humantime_serde")]
    pub cursor_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub typing_throttle: Duration,

    #[serde(with = "humantime_serde")]
    pub typing_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// A peer with no heartbeat within this window leaves the presence set
    #[serde(with = "humantime_serde")]
    pub presence_ttl: Duration,

    /// Housekeeping tick: throttled flushes and expiry
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    pub chat_history: usize,

    /// Longest accepted chat message, in characters
    pub max_chat_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub kdf: KdfParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            approval_poll_interval: Duration::from_millis(2500),
            queue_poll_interval: Duration::from_millis(2500),
            room_poll_interval: Duration::from_millis(2500),
            desync_threshold: 5,
            command_buffer: 64,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024, // 1 MiB
            connect_timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            cursor_throttle: Duration::from_millis(50),
            cursor_ttl: Duration::from_secs(5),
            typing_throttle: Duration::from_secs(1),
            typing_ttl: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(1),
            presence_ttl: Duration::from_secs(5),
            tick_interval: Duration::from_millis(100),
            chat_history: 100,
            max_chat_length: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig::new(self.level)
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target)
            .json_format(self.json_format)
    }
}

fn env_parse<T>(key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = env::var(key) {
        *target = raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))?;
    }
    Ok(())
}

fn env_duration(key: &str, target: &mut Duration) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(key) {
        *target = humantime_serde::re::humantime::parse_duration(&raw)
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))?;
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `LIVEDOC_<SECTION>_<KEY>`, durations in
    /// humantime form. Example: `LIVEDOC_SESSION_ROOM_POLL_INTERVAL=1s`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let session = &mut config.session;
        env_duration("LIVEDOC_SESSION_APPROVAL_POLL_INTERVAL", &mut session.approval_poll_interval)?;
        env_duration("LIVEDOC_SESSION_QUEUE_POLL_INTERVAL", &mut session.queue_poll_interval)?;
        env_duration("LIVEDOC_SESSION_ROOM_POLL_INTERVAL", &mut session.room_poll_interval)?;
        env_parse("LIVEDOC_SESSION_DESYNC_THRESHOLD", &mut session.desync_threshold)?;
        env_parse("LIVEDOC_SESSION_COMMAND_BUFFER", &mut session.command_buffer)?;
        env_duration("LIVEDOC_SESSION_HANDSHAKE_TIMEOUT", &mut session.handshake_timeout)?;

        let transport = &mut config.transport;
        env_parse("LIVEDOC_TRANSPORT_MAX_FRAME_SIZE", &mut transport.max_frame_size)?;
        env_duration("LIVEDOC_TRANSPORT_CONNECT_TIMEOUT", &mut transport.connect_timeout)?;
        env_parse("LIVEDOC_TRANSPORT_MAX_ATTEMPTS", &mut transport.backoff.max_attempts)?;

        let presence = &mut config.presence;
        env_duration("LIVEDOC_PRESENCE_CURSOR_THROTTLE", &mut presence.cursor_throttle)?;
        env_duration("LIVEDOC_PRESENCE_CURSOR_TTL", &mut presence.cursor_ttl)?;
        env_duration("LIVEDOC_PRESENCE_TICK_INTERVAL", &mut presence.tick_interval)?;
        env_parse("LIVEDOC_PRESENCE_CHAT_HISTORY", &mut presence.chat_history)?;

        env_parse("LIVEDOC_CRYPTO_KDF_MEMORY_KIB", &mut config.crypto.kdf.memory_kib)?;
        env_parse("LIVEDOC_CRYPTO_KDF_ITERATIONS", &mut config.crypto.kdf.iterations)?;

        let logging = &mut config.logging;
        env_parse("LIVEDOC_LOG_LEVEL", &mut logging.level)?;
        env_parse("LIVEDOC_LOG_JSON", &mut logging.json_format)?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("approval_poll_interval", self.session.approval_poll_interval),
            ("queue_poll_interval", self.session.queue_poll_interval),
            ("room_poll_interval", self.session.room_poll_interval),
            ("handshake_timeout", self.session.handshake_timeout),
            ("connect_timeout", self.transport.connect_timeout),
            ("heartbeat_interval", self.presence.heartbeat_interval),
            ("tick_interval", self.presence.tick_interval),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ValidationFailed(format!(
                "{} must be greater than 0",
                name
            )));
        }

        if self.session.desync_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "desync_threshold must be greater than 0".to_string(),
            ));
        }
        if self.session.command_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "command_buffer must be greater than 0".to_string(),
            ));
        }

        // Room state for 8 peers must always fit in one frame
        if self.transport.max_frame_size < 4096 {
            return Err(ConfigError::ValidationFailed(
                "max_frame_size must be at least 4096 bytes".to_string(),
            ));
        }
        let backoff = &self.transport.backoff;
        if backoff.multiplier < 1.0 || backoff.initial_delay > backoff.max_delay {
            return Err(ConfigError::ValidationFailed(
                "backoff must not shrink and initial_delay must not exceed max_delay".to_string(),
            ));
        }

        if self.presence.presence_ttl <= self.presence.heartbeat_interval {
            return Err(ConfigError::ValidationFailed(
                "presence_ttl must exceed heartbeat_interval".to_string(),
            ));
        }
        if self.presence.chat_history == 0 || self.presence.max_chat_length == 0 {
            return Err(ConfigError::ValidationFailed(
                "chat_history and max_chat_length must be greater than 0".to_string(),
            ));
        }

        if self.crypto.kdf.iterations == 0 || self.crypto.kdf.parallelism == 0 {
            return Err(ConfigError::ValidationFailed(
                "kdf iterations and parallelism must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
