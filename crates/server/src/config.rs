// crates/server/src/config.rs
//! Command-line and environment configuration for the server binary.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use jobtrack_jobs::SweeperConfig;
use jobtrack_observability::LogFormat;
use thiserror::Error;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47900;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--cleanup-interval-secs must be greater than zero")]
    ZeroCleanupInterval,

    #[error("--max-age-secs must be greater than zero")]
    ZeroMaxAge,
}

/// Server configuration. Every flag also reads a `JOBTRACK_*` variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "jobtrack", version, about = "Background job tracker with an HTTP status API")]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1", env = "JOBTRACK_HOST")]
    pub host: IpAddr,

    /// Port to bind.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "JOBTRACK_PORT")]
    pub port: u16,

    /// Seconds between sweeps of finished jobs.
    #[arg(long, default_value_t = SweeperConfig::default().interval.as_secs(), env = "JOBTRACK_CLEANUP_INTERVAL_SECS")]
    pub cleanup_interval_secs: u64,

    /// Finished jobs older than this many seconds are evicted.
    #[arg(long, default_value_t = SweeperConfig::default().max_age.as_secs(), env = "JOBTRACK_MAX_AGE_SECS")]
    pub max_age_secs: u64,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, env = "JOBTRACK_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::ZeroCleanupInterval);
        }
        if self.max_age_secs == 0 {
            return Err(ConfigError::ZeroMaxAge);
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.cleanup_interval_secs),
            max_age: self.max_age(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        ServerConfig::try_parse_from(std::iter::once("jobtrack").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults_follow_sweeper_defaults() {
        let config = parse(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.sweeper().interval, Duration::from_secs(60 * 60));
        assert_eq!(config.max_age(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.sweeper().max_age, SweeperConfig::default().max_age);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--cleanup-interval-secs",
            "30",
            "--max-age-secs",
            "120",
            "--log-format",
            "json",
        ]);

        assert_eq!(config.addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        let sweeper = config.sweeper();
        assert_eq!(sweeper.interval, Duration::from_secs(30));
        assert_eq!(sweeper.max_age, Duration::from_secs(120));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        let config = parse(&["--cleanup-interval-secs", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCleanupInterval));

        let config = parse(&["--max-age-secs", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxAge));
    }

    #[test]
    fn test_bad_host_fails_to_parse() {
        let result = ServerConfig::try_parse_from(["jobtrack", "--host", "not-an-ip"]);
        assert!(result.is_err());
    }
}
