//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tablewatch_core::config::{
    DEFAULT_DELIVERY_TIMEOUT_MS, DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_SOURCE_BUFFER,
};
use tablewatch_core::HubConfig;

/// Default number of logging sessions.
pub const DEFAULT_SESSIONS: usize = 1;

/// Default per-session update buffer.
pub const DEFAULT_SESSION_BUFFER: usize = 64;

/// tablewatch server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// JSON-lines change feed. `None` reads standard input.
    pub input: Option<PathBuf>,

    /// Number of sessions subscribed at startup.
    pub sessions: usize,

    /// Update buffer per session.
    pub session_buffer: usize,

    /// Print the final snapshot as JSON on exit.
    pub print_snapshot: bool,

    /// Hub settings.
    pub hub: HubConfig,
}

impl ServerConfig {
    /// Create a configuration reading from standard input.
    pub fn new() -> Self {
        Self {
            input: None,
            sessions: DEFAULT_SESSIONS,
            session_buffer: DEFAULT_SESSION_BUFFER,
            print_snapshot: false,
            hub: HubConfig::default(),
        }
    }

    /// Read the feed from a file.
    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    /// Set the number of sessions.
    pub fn with_sessions(mut self, sessions: usize) -> Self {
        self.sessions = sessions;
        self
    }

    /// Set the hub configuration.
    pub fn with_hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// Name of the feed for logs.
    pub fn input_name(&self) -> String {
        match &self.input {
            Some(path) => path.display().to_string(),
            None => "stdin".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "tablewatch")]
#[command(version, about = "Fan table change notifications out to sessions", long_about = None)]
pub struct Args {
    /// JSON-lines change feed (defaults to stdin).
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Sessions to subscribe at startup.
    #[arg(long, default_value_t = DEFAULT_SESSIONS)]
    pub sessions: usize,

    /// Update buffer per session.
    #[arg(long, default_value_t = DEFAULT_SESSION_BUFFER)]
    pub session_buffer: usize,

    /// Delivery attempts before a session is dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_DELIVERY_ATTEMPTS)]
    pub max_attempts: u32,

    /// Per-attempt delivery timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_DELIVERY_TIMEOUT_MS)]
    pub delivery_timeout_ms: u64,

    /// Change feed buffer size.
    #[arg(long, default_value_t = DEFAULT_SOURCE_BUFFER)]
    pub buffer: usize,

    /// Print the final snapshot as JSON on exit.
    #[arg(long)]
    pub print_snapshot: bool,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        let hub = HubConfig::new()
            .with_max_delivery_attempts(self.max_attempts)
            .with_delivery_timeout(Duration::from_millis(self.delivery_timeout_ms))
            .with_source_buffer(self.buffer);

        ServerConfig {
            input: self.input,
            sessions: self.sessions,
            session_buffer: self.session_buffer.max(1),
            print_snapshot: self.print_snapshot,
            hub,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.input.is_none());
        assert_eq!(config.sessions, DEFAULT_SESSIONS);
        assert_eq!(config.input_name(), "stdin");
        assert_eq!(config.hub, HubConfig::default());
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "tablewatch",
            "--input",
            "/tmp/weather.jsonl",
            "--sessions",
            "3",
            "--max-attempts",
            "5",
            "--delivery-timeout-ms",
            "250",
            "--session-buffer",
            "0",
            "--print-snapshot",
        ]);
        let config = args.into_config();

        assert_eq!(config.input, Some(PathBuf::from("/tmp/weather.jsonl")));
        assert_eq!(config.sessions, 3);
        assert_eq!(config.session_buffer, 1);
        assert!(config.print_snapshot);
        assert_eq!(config.hub.max_delivery_attempts, 5);
        assert_eq!(config.hub.delivery_timeout, Duration::from_millis(250));
        assert_eq!(config.hub.source_buffer, DEFAULT_SOURCE_BUFFER);
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .with_input("feed.jsonl")
            .with_sessions(2)
            .with_hub(HubConfig::new().with_max_delivery_attempts(1));

        assert_eq!(config.input_name(), "feed.jsonl");
        assert_eq!(config.sessions, 2);
        assert_eq!(config.hub.max_delivery_attempts, 1);
    }
}
