use std::time::Duration;

use anyhow::Context;
use clap::Args;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Base URL of the prediction backend
    #[arg(
        long,
        global = true,
        env = "COURSE_MONITOR_API_URL",
        default_value = DEFAULT_API_URL
    )]
    pub api_url: String,

    /// Per-request timeout in seconds
    #[arg(
        long,
        global = true,
        env = "COURSE_MONITOR_TIMEOUT_SECS",
        default_value_t = 30
    )]
    pub timeout_secs: u64,

    /// Postgres connection string for the snapshot archive
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub timeout: Duration,
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_args(args: &ConfigArgs) -> anyhow::Result<Self> {
        let api_url = args.api_url.trim().trim_end_matches('/').to_string();
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            anyhow::bail!("api url must start with http:// or https://, got `{api_url}`");
        }
        if args.timeout_secs == 0 {
            anyhow::bail!("timeout must be at least one second");
        }

        Ok(Self {
            api_url,
            timeout: Duration::from_secs(args.timeout_secs),
            database_url: args.database_url.clone().filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(api_url: &str, timeout_secs: u64) -> ConfigArgs {
        ConfigArgs {
            api_url: api_url.to_string(),
            timeout_secs,
            database_url: None,
        }
    }

    #[test]
    fn trims_trailing_slash() {
        let config = Config::from_args(&args("https://monitor.example.com/", 5)).unwrap();
        assert_eq!(config.api_url, "https://monitor.example.com");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_bad_url_and_zero_timeout() {
        assert!(Config::from_args(&args("monitor.example.com", 5)).is_err());
        assert!(Config::from_args(&args(DEFAULT_API_URL, 0)).is_err());
    }

    #[test]
    fn database_url_is_only_required_on_demand() {
        let config = Config::from_args(&args(DEFAULT_API_URL, 5)).unwrap();
        assert!(config.require_database_url().is_err());

        let mut with_db = args(DEFAULT_API_URL, 5);
        with_db.database_url = Some("postgres://localhost/monitor".to_string());
        let config = Config::from_args(&with_db).unwrap();
        assert_eq!(
            config.require_database_url().unwrap(),
            "postgres://localhost/monitor"
        );
    }
}
