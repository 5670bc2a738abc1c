//! Configuration for the depth recorder.
//!
//! This module provides the [`Config`] struct, built either in code with the
//! `with_*` setters or from `DEPTH_RECORDER_*` environment variables, and the
//! [`ReconnectConfig`] backoff policy shared by the feed and bootstrap retry.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;

use crate::error::Error;

/// Exchange environment (production or testnet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production environment
    #[default]
    Production,
    /// Spot testnet
    Testnet,
}

impl Environment {
    /// Get the base URL for REST API
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.binance.com",
            Environment::Testnet => "https://testnet.binance.vision",
        }
    }

    /// Get the WebSocket base URL
    pub fn websocket_url(&self) -> &'static str {
        match self {
            Environment::Production => "wss://stream.binance.com:9443",
            Environment::Testnet => "wss://testnet.binance.vision",
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "" => Ok(Environment::Production),
            "testnet" | "test" => Ok(Environment::Testnet),
            other => Err(Error::Config(format!("unknown environment '{other}'"))),
        }
    }
}

/// When the flush scheduler fetches reference snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Only on the first flush of a run
    #[default]
    FirstFlush,
    /// On every bucket flush, keyed by the new bucket
    EveryBucket,
}

impl FromStr for SnapshotPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-flush" | "first_flush" => Ok(SnapshotPolicy::FirstFlush),
            "every-bucket" | "every_bucket" => Ok(SnapshotPolicy::EveryBucket),
            other => Err(Error::Config(format!("unknown snapshot policy '{other}'"))),
        }
    }
}

/// Configuration for reconnection behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (0 = infinite)
    pub max_retries: u32,
    /// Initial delay between reconnection attempts
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries (0 = infinite)
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    #[must_use]
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt < self.max_retries
    }

    /// Calculate delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Environment variable names read by [`Config::from_env`]
pub mod env {
    /// Comma separated symbols, required
    pub const SYMBOLS: &str = "DEPTH_RECORDER_SYMBOLS";
    /// Output root directory
    pub const DATA_DIR: &str = "DEPTH_RECORDER_DATA_DIR";
    /// `production` or `testnet`
    pub const ENV: &str = "DEPTH_RECORDER_ENV";
    /// Save bucket length in seconds
    pub const SAVE_PERIOD_SECS: &str = "DEPTH_RECORDER_SAVE_PERIOD_SECS";
    /// Scheduler wake interval in seconds
    pub const FLUSH_INTERVAL_SECS: &str = "DEPTH_RECORDER_FLUSH_INTERVAL_SECS";
    /// Daily cutoff as `HH:MM:SS`, or `off`
    pub const STOP_TIME: &str = "DEPTH_RECORDER_STOP_TIME";
    /// `first-flush` or `every-bucket`
    pub const SNAPSHOT_POLICY: &str = "DEPTH_RECORDER_SNAPSHOT_POLICY";
}

/// Configuration for the recorder
///
/// # Example
///
/// ```rust
/// use depth_recorder::Config;
/// use depth_recorder::config::{Environment, SnapshotPolicy};
/// use std::time::Duration;
///
/// let config = Config::new(["btcusdt", "ethusdt"])
///     .with_environment(Environment::Testnet)
///     .with_data_dir("/var/lib/depth")
///     .with_flush_interval(Duration::from_secs(5))
///     .with_snapshot_policy(SnapshotPolicy::EveryBucket);
///
/// assert_eq!(config.symbols(), ["BTCUSDT", "ETHUSDT"]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper-case symbols to record
    symbols: Vec<String>,

    /// Exchange environment
    environment: Environment,

    /// Root of the `L2/<symbol>/` tree
    data_dir: PathBuf,

    /// HTTP request timeout
    timeout: Duration,

    /// Length of one save bucket
    save_period: Duration,

    /// Scheduler wake interval
    flush_interval: Duration,

    /// Local time of the daily cutoff, `None` to run until shutdown
    stop_time: Option<NaiveTime>,

    /// Snapshot depth used to bootstrap a book
    depth_limit: u32,

    /// Snapshot depth of flushed reference snapshots
    snapshot_limit: u32,

    /// When reference snapshots are written
    snapshot_policy: SnapshotPolicy,

    /// Bound on diffs buffered per symbol while bootstrapping
    max_pending_diffs: usize,

    /// Backoff for feed reconnects and snapshot retries
    reconnect: ReconnectConfig,

    /// Capacity of each feed channel
    channel_capacity: usize,
}

impl Config {
    /// Create a configuration for the given symbols with default settings
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: normalize_symbols(symbols),
            environment: Environment::default(),
            data_dir: PathBuf::from("data"),
            timeout: Duration::from_secs(10),
            save_period: Duration::from_secs(3600),
            flush_interval: Duration::from_secs(10),
            stop_time: NaiveTime::from_hms_opt(23, 58, 30),
            depth_limit: 5000,
            snapshot_limit: 1000,
            snapshot_policy: SnapshotPolicy::default(),
            max_pending_diffs: 10_000,
            reconnect: ReconnectConfig::default(),
            channel_capacity: 4096,
        }
    }

    /// Build a configuration from `DEPTH_RECORDER_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is missing or malformed, or if
    /// the result fails [`Config::validate`].
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// [`Config::from_env`] uses the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let symbols = lookup(env::SYMBOLS)
            .ok_or_else(|| Error::Config(format!("{} is not set", env::SYMBOLS)))?;
        let mut config = Self::new(symbols.split(','));

        if let Some(dir) = lookup(env::DATA_DIR) {
            config = config.with_data_dir(dir);
        }
        if let Some(environment) = lookup(env::ENV) {
            config = config.with_environment(environment.parse()?);
        }
        if let Some(secs) = lookup(env::SAVE_PERIOD_SECS) {
            config = config.with_save_period(parse_secs(env::SAVE_PERIOD_SECS, &secs)?);
        }
        if let Some(secs) = lookup(env::FLUSH_INTERVAL_SECS) {
            config = config.with_flush_interval(parse_secs(env::FLUSH_INTERVAL_SECS, &secs)?);
        }
        if let Some(time) = lookup(env::STOP_TIME) {
            config = config.with_stop_time(parse_stop_time(&time)?);
        }
        if let Some(policy) = lookup(env::SNAPSHOT_POLICY) {
            config = config.with_snapshot_policy(policy.parse()?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the recorder cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.symbols.is_empty() {
            return Err(Error::Config("no symbols configured".to_string()));
        }
        let flush = self.flush_interval.as_millis();
        let save = self.save_period.as_millis();
        if flush == 0 || save == 0 {
            return Err(Error::Config(
                "save period and flush interval must be positive".to_string(),
            ));
        }
        if self.flush_interval.subsec_nanos() != 0 || self.save_period.subsec_nanos() != 0 {
            return Err(Error::Config(format!(
                "save period ({}s) and flush interval ({}s) must be whole seconds",
                self.save_period.as_secs_f64(),
                self.flush_interval.as_secs_f64()
            )));
        }
        if save % flush != 0 {
            return Err(Error::Config(format!(
                "save period ({}s) must be a multiple of the flush interval ({}s)",
                self.save_period.as_secs_f64(),
                self.flush_interval.as_secs_f64()
            )));
        }
        if self.depth_limit == 0 || self.snapshot_limit == 0 {
            return Err(Error::Config("depth limits must be non-zero".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Set the exchange environment
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the output root directory
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the save bucket length
    #[must_use]
    pub fn with_save_period(mut self, period: Duration) -> Self {
        self.save_period = period;
        self
    }

    /// Set the scheduler wake interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the daily cutoff (`None` disables it)
    #[must_use]
    pub fn with_stop_time(mut self, stop_time: Option<NaiveTime>) -> Self {
        self.stop_time = stop_time;
        self
    }

    /// Set the bootstrap snapshot depth
    #[must_use]
    pub fn with_depth_limit(mut self, limit: u32) -> Self {
        self.depth_limit = limit;
        self
    }

    /// Set the reference snapshot depth
    #[must_use]
    pub fn with_snapshot_limit(mut self, limit: u32) -> Self {
        self.snapshot_limit = limit;
        self
    }

    /// Set when reference snapshots are written
    #[must_use]
    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Set the bootstrap buffer bound
    #[must_use]
    pub fn with_max_pending_diffs(mut self, max: usize) -> Self {
        self.max_pending_diffs = max;
        self
    }

    /// Set the reconnect and retry backoff
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the capacity of each feed channel
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Get the symbols
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Get the environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Get the REST API base URL
    pub fn rest_base_url(&self) -> &'static str {
        self.environment.rest_base_url()
    }

    /// Get the WebSocket base URL
    pub fn websocket_url(&self) -> &'static str {
        self.environment.websocket_url()
    }

    /// Get the output root directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the save bucket length
    pub fn save_period(&self) -> Duration {
        self.save_period
    }

    /// Get the scheduler wake interval
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Get the daily cutoff
    pub fn stop_time(&self) -> Option<NaiveTime> {
        self.stop_time
    }

    /// Get the bootstrap snapshot depth
    pub fn depth_limit(&self) -> u32 {
        self.depth_limit
    }

    /// Get the reference snapshot depth
    pub fn snapshot_limit(&self) -> u32 {
        self.snapshot_limit
    }

    /// Get the snapshot policy
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        self.snapshot_policy
    }

    /// Get the bootstrap buffer bound
    pub fn max_pending_diffs(&self) -> usize {
        self.max_pending_diffs
    }

    /// Get the reconnect and retry backoff
    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    /// Get the feed channel capacity
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }
}

fn normalize_symbols<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for symbol in symbols {
        let symbol = symbol.as_ref().trim().to_ascii_uppercase();
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, Error> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::Config(format!("{key}: invalid seconds '{value}': {e}")))
}

fn parse_stop_time(value: &str) -> Result<Option<NaiveTime>, Error> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("off") || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .map(Some)
        .map_err(|e| Error::Config(format!("{}: invalid time '{value}': {e}", env::STOP_TIME)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::new(["btcusdt"]);
        assert_eq!(config.symbols(), ["BTCUSDT"]);
        assert_eq!(config.environment(), Environment::Production);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.save_period(), Duration::from_secs(3600));
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.stop_time(), NaiveTime::from_hms_opt(23, 58, 30));
        assert_eq!(config.depth_limit(), 5000);
        assert_eq!(config.snapshot_limit(), 1000);
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::FirstFlush);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testnet_environment() {
        let config = Config::new(["btcusdt"]).with_environment(Environment::Testnet);
        assert!(config.rest_base_url().contains("testnet"));
        assert!(config.websocket_url().contains("testnet"));
    }

    #[test]
    fn test_symbols_are_normalized_and_deduplicated() {
        let config = Config::new([" btcusdt", "ETHUSDT", "", "BTCUSDT"]);
        assert_eq!(config.symbols(), ["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            (env::SYMBOLS, "btcusdt,ethusdt"),
            (env::DATA_DIR, "/tmp/depth"),
            (env::ENV, "testnet"),
            (env::SAVE_PERIOD_SECS, "60"),
            (env::FLUSH_INTERVAL_SECS, "5"),
            (env::STOP_TIME, "off"),
            (env::SNAPSHOT_POLICY, "every-bucket"),
        ]))
        .unwrap();

        assert_eq!(config.symbols(), ["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.data_dir(), Path::new("/tmp/depth"));
        assert_eq!(config.environment(), Environment::Testnet);
        assert_eq!(config.save_period(), Duration::from_secs(60));
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.stop_time(), None);
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::EveryBucket);
    }

    #[test]
    fn test_from_lookup_requires_symbols() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[
            (env::SYMBOLS, "btcusdt"),
            (env::STOP_TIME, "25:00"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup(&[
            (env::SYMBOLS, "btcusdt"),
            (env::SAVE_PERIOD_SECS, "soon"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup(&[(env::SYMBOLS, "btcusdt"), (env::ENV, "mainnet")])).is_err());
    }

    #[test]
    fn test_stop_time_parses() {
        let config = Config::from_lookup(lookup(&[
            (env::SYMBOLS, "btcusdt"),
            (env::STOP_TIME, "06:30:00"),
        ]))
        .unwrap();
        assert_eq!(config.stop_time(), NaiveTime::from_hms_opt(6, 30, 0));
    }

    #[test]
    fn test_validate() {
        assert!(Config::new(Vec::<String>::new()).validate().is_err());
        assert!(Config::new(["btcusdt"])
            .with_flush_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(Config::new(["btcusdt"])
            .with_save_period(Duration::from_secs(25))
            .validate()
            .is_err());
        assert!(Config::new(["btcusdt"]).with_depth_limit(0).validate().is_err());
    }

    #[test]
    fn test_validate_requires_whole_seconds() {
        let err = Config::new(["btcusdt"])
            .with_flush_interval(Duration::from_millis(500))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("whole seconds"));
        assert!(Config::new(["btcusdt"])
            .with_flush_interval(Duration::from_secs(1))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_reconnect_backoff() {
        let reconnect = ReconnectConfig::new()
            .initial_delay_ms(100)
            .backoff_multiplier(2.0)
            .max_delay_ms(1_000)
            .max_retries(3);

        assert_eq!(reconnect.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(reconnect.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(reconnect.delay_for_attempt(10), Duration::from_millis(1_000));
        assert!(reconnect.allows_attempt(2));
        assert!(!reconnect.allows_attempt(3));
        assert!(ReconnectConfig::new().max_retries(0).allows_attempt(u32::MAX));
    }
}
