use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Content source
    pub news_api_key: String,
    pub news_api_base_url: String,

    // Sentiment enrichment (unset = articles pass through unenriched)
    pub sentiment_url: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    pub stream: StreamSettings,
}

/// Timing knobs for the session/stream actors.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    /// Upper bound on one content-source call before it counts as a network failure.
    pub fetch_timeout: Duration,
    pub enrichment_timeout: Duration,
    pub history_timeout: Duration,
    pub history_cache_ttl: Duration,
    /// How long a replaced stream gets to exit before its successor registers.
    pub stop_grace: Duration,
    pub restart_initial_backoff: Duration,
    pub restart_max_backoff: Duration,
    pub restart_max_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            fetch_timeout: Duration::from_secs(30),
            enrichment_timeout: Duration::from_secs(5),
            history_timeout: Duration::from_secs(5),
            history_cache_ttl: Duration::from_secs(24 * 60 * 60),
            stop_grace: Duration::from_secs(2),
            restart_initial_backoff: Duration::from_millis(1000),
            restart_max_backoff: Duration::from_millis(30_000),
            restart_max_attempts: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        let defaults = StreamSettings::default();
        Self {
            news_api_key: required_env("NEWS_API_KEY"),
            news_api_base_url: env::var("NEWS_API_BASE_URL")
                .unwrap_or_else(|_| "https://newsapi.org/v2".to_string()),
            sentiment_url: env::var("SENTIMENT_URL").ok().filter(|v| !v.trim().is_empty()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parsed_env("API_PORT", 3000),
            stream: StreamSettings {
                poll_interval: positive_secs_env("POLL_INTERVAL_SECS", 20),
                fetch_timeout: positive_secs_env("FETCH_TIMEOUT_SECS", 30),
                enrichment_timeout: positive_secs_env("ENRICHMENT_TIMEOUT_SECS", 5),
                history_timeout: positive_secs_env("HISTORY_TIMEOUT_SECS", 5),
                history_cache_ttl: Duration::from_secs(parsed_env(
                    "HISTORY_CACHE_TTL_SECS",
                    24 * 60 * 60,
                )),
                restart_initial_backoff: Duration::from_millis(parsed_env(
                    "RESTART_BACKOFF_INITIAL_MS",
                    1000,
                )),
                restart_max_backoff: Duration::from_millis(parsed_env(
                    "RESTART_BACKOFF_MAX_MS",
                    30_000,
                )),
                restart_max_attempts: parsed_env("RESTART_MAX_ATTEMPTS", 10),
                ..defaults
            },
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}

/// A whole number of seconds that must be at least 1.
fn positive_secs_env(key: &str, default: u64) -> Duration {
    Duration::from_secs(positive_secs(key, env::var(key).ok().as_deref(), default))
}

fn positive_secs(key: &str, raw: Option<&str>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => panic!("{key} must be at least 1"),
        Ok(secs) => secs,
        Err(_) => panic!("{key} must be a number"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_secs_uses_default_when_unset() {
        assert_eq!(positive_secs("POLL_INTERVAL_SECS", None, 20), 20);
        assert_eq!(positive_secs("POLL_INTERVAL_SECS", Some(" 45 "), 20), 45);
    }

    #[test]
    #[should_panic(expected = "POLL_INTERVAL_SECS must be at least 1")]
    fn zero_seconds_is_rejected() {
        positive_secs("POLL_INTERVAL_SECS", Some("0"), 20);
    }

    #[test]
    #[should_panic(expected = "must be a number")]
    fn non_numeric_seconds_are_rejected() {
        positive_secs("FETCH_TIMEOUT_SECS", Some("soon"), 30);
    }
}
