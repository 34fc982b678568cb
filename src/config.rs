// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;
use std::time::Duration;

/// Default lifetime of cached global stats and leaderboards.
pub const DEFAULT_STATS_CACHE_TTL_SECS: u64 = 900;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// JSON file holding operator stat snapshots.
    pub operator_stats_path: PathBuf,
    /// Lifetime of cached aggregate responses. Zero disables the cache.
    pub stats_cache_ttl: Duration,
    /// Whether per-user rate limits are enforced.
    pub rate_limits_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:zerosanity.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `OPERATOR_STATS_PATH` - Operator stat table (default: `data/operator_stats.json`)
    /// - `STATS_CACHE_TTL_SECS` - Aggregate cache lifetime (default: 900)
    /// - `DISABLE_RATE_LIMITS` - Set to `true` to turn rate limiting off
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    /// - `--no-rate-limit` - Same as `DISABLE_RATE_LIMITS=true`
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_parts(&args, |key| std::env::var(key).ok())
    }

    fn from_parts(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let database_url =
            env("DATABASE_URL").unwrap_or_else(|| "sqlite:zerosanity.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let operator_stats_path = env("OPERATOR_STATS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/operator_stats.json"));

        let stats_cache_ttl = Duration::from_secs(
            env("STATS_CACHE_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_STATS_CACHE_TTL_SECS),
        );

        let rate_limits_disabled = args.iter().any(|a| a == "--no-rate-limit")
            || env("DISABLE_RATE_LIMITS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        Config {
            database_url,
            port,
            operator_stats_path,
            stats_cache_ttl,
            rate_limits_enabled: !rate_limits_disabled,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
