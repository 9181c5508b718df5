//! Server configuration, parsed from the command line.

use clap::Parser;

use crate::protocol::parser::MAX_BULK_SIZE;
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Room for the array header, command name and key around one bulk value
const FRAME_SLACK: usize = 64 * 1024;

/// Default cap on a connection's unparsed input: one bulk string of the
/// largest accepted size plus its surrounding frame.
pub const DEFAULT_MAX_BUFFER: usize = MAX_BULK_SIZE + FRAME_SLACK;

/// quickkv server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "quickkv")]
#[command(about = "A minimal in-memory key-value server speaking the Redis protocol")]
#[command(version)]
pub struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log filter used when RUST_LOG is not set (e.g. "debug", "quickkv=trace")
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Maximum bytes buffered for a single client before it is disconnected
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFER)]
    pub max_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_parser() {
        let parsed = Config::try_parse_from(["quickkv"]).unwrap();
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.bind_address(), "127.0.0.1:6379");
    }

    #[test]
    fn test_default_buffer_fits_largest_bulk() {
        assert!(DEFAULT_MAX_BUFFER > MAX_BULK_SIZE);
    }

    #[test]
    fn test_overrides() {
        let parsed = Config::try_parse_from([
            "quickkv",
            "-H",
            "0.0.0.0",
            "--port",
            "6380",
            "--log-level",
            "debug",
            "--max-buffer",
            "1024",
        ])
        .unwrap();

        assert_eq!(parsed.bind_address(), "0.0.0.0:6380");
        assert_eq!(parsed.log_level, "debug");
        assert_eq!(parsed.max_buffer, 1024);
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Config::try_parse_from(["quickkv", "--port", "70000"]).is_err());
    }
}
