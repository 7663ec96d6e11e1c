//! Configuration for the bridge observer fleet.
//!
//! Configuration is a JSON file (`--config`, default `config.json`) with
//! four sections: the observer fleet, engine thresholds, concurrency
//! limits, and store connections. String fields support environment
//! references (`$VAR` / `${VAR}`), and every tunable has a serde default so
//! a minimal file only needs the `observers` list.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::chain::Chain;
use crate::protocol::BridgeProtocol;

/// CLI arguments for the bridgewatch binary.
#[derive(Parser, Debug)]
#[command(name = "bridgewatch")]
#[command(about = "Cross-chain bridge event observer and correlation engine")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// One entry per monitored (protocol, chain, contract) tuple.
    #[serde(default)]
    observers: Vec<ObserverConfig>,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    limits: LimitsConfig,
    #[serde(default)]
    relational: RelationalConfig,
    #[serde(default)]
    graph: GraphConfig,
}

impl Config {
    pub fn observers(&self) -> &[ObserverConfig] {
        &self.observers
    }
    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }
    pub fn relational(&self) -> &RelationalConfig {
        &self.relational
    }
    pub fn graph(&self) -> &GraphConfig {
        &self.graph
    }

    /// Load configuration from CLI arguments and the JSON file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// One monitored (protocol, chain, contract) tuple.
///
/// `contract_address` is kept as a string here: a malformed or zero address
/// must fail that observer at fleet construction, not the whole config
/// parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    pub protocol: BridgeProtocol,
    pub chain: Chain,
    pub contract_address: String,
    pub rpc_primary: LiteralOrEnv<Url>,
    #[serde(default)]
    pub rpc_fallbacks: Vec<LiteralOrEnv<Url>>,
}

impl ObserverConfig {
    /// All endpoints in selection order: primary first, then fallbacks.
    pub fn endpoints(&self) -> Vec<Url> {
        std::iter::once(self.rpc_primary.inner().clone())
            .chain(self.rpc_fallbacks.iter().map(|u| u.inner().clone()))
            .collect()
    }
}

/// Risk, correlation and sweep thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Amount (token units) above which HIGH_VALUE_TRANSFER fires.
    #[serde(default = "engine_defaults::high_value_threshold")]
    pub high_value_threshold: rust_decimal::Decimal,
    /// 24h transfer count above which FREQUENT_BRIDGE_USAGE fires.
    #[serde(default = "engine_defaults::frequent_bridge_count")]
    pub frequent_bridge_count: u64,
    /// Correlation match window, seconds either side of the subject.
    #[serde(default = "engine_defaults::correlation_window_secs")]
    pub correlation_window_secs: u64,
    /// Rescoring sweep interval.
    #[serde(default = "engine_defaults::rescore_interval_secs")]
    pub rescore_interval_secs: u64,
    /// Bounded batch size for the rescoring sweep.
    #[serde(default = "engine_defaults::rescore_batch_size")]
    pub rescore_batch_size: i64,
    /// Correlation sweep interval.
    #[serde(default = "engine_defaults::correlation_sweep_interval_secs")]
    pub correlation_sweep_interval_secs: u64,
    /// PENDING age before the sweep retries late counterparts.
    #[serde(default = "engine_defaults::stale_pending_secs")]
    pub stale_pending_secs: u64,
    /// PENDING age after which CORRELATION_TIMEOUT is flagged.
    #[serde(default = "engine_defaults::correlation_timeout_secs")]
    pub correlation_timeout_secs: u64,
    /// Bounded catch-up window after reconnect, in blocks.
    #[serde(default = "engine_defaults::backfill_blocks")]
    pub backfill_blocks: u64,
}

mod engine_defaults {
    use rust_decimal::Decimal;

    pub fn high_value_threshold() -> Decimal {
        Decimal::from(100_000u64)
    }
    pub fn frequent_bridge_count() -> u64 {
        10
    }
    pub fn correlation_window_secs() -> u64 {
        30 * 60
    }
    pub fn rescore_interval_secs() -> u64 {
        15 * 60
    }
    pub fn rescore_batch_size() -> i64 {
        500
    }
    pub fn correlation_sweep_interval_secs() -> u64 {
        5 * 60
    }
    pub fn stale_pending_secs() -> u64 {
        60 * 60
    }
    pub fn correlation_timeout_secs() -> u64 {
        24 * 60 * 60
    }
    pub fn backfill_blocks() -> u64 {
        1000
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

/// Concurrency, pool and deadline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Downstream worker pool size (risk→correlate→persist).
    #[serde(default = "limits_defaults::worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "limits_defaults::relational_pool_size")]
    pub relational_pool_size: u32,
    #[serde(default = "limits_defaults::graph_pool_size")]
    pub graph_pool_size: usize,
    #[serde(default = "limits_defaults::rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "limits_defaults::db_timeout_secs")]
    pub db_timeout_secs: u64,
    #[serde(default = "limits_defaults::shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Base delay for observer reconnect backoff.
    #[serde(default = "limits_defaults::reconnect_base_secs")]
    pub reconnect_base_secs: u64,
    #[serde(default = "limits_defaults::reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    /// Starting `eth_getLogs` chunk; halved on oversize errors.
    #[serde(default = "limits_defaults::log_chunk_blocks")]
    pub log_chunk_blocks: u64,
    /// Live-tail poll interval.
    #[serde(default = "limits_defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Block-timestamp LRU cache capacity (process-wide).
    #[serde(default = "limits_defaults::timestamp_cache_size")]
    pub timestamp_cache_size: usize,
}

mod limits_defaults {
    pub fn worker_concurrency() -> usize {
        5
    }
    pub fn relational_pool_size() -> u32 {
        10
    }
    pub fn graph_pool_size() -> usize {
        10
    }
    pub fn rpc_timeout_secs() -> u64 {
        30
    }
    pub fn db_timeout_secs() -> u64 {
        10
    }
    pub fn shutdown_timeout_secs() -> u64 {
        10
    }
    pub fn reconnect_base_secs() -> u64 {
        5
    }
    pub fn reconnect_max_attempts() -> u32 {
        5
    }
    pub fn log_chunk_blocks() -> u64 {
        500
    }
    pub fn poll_interval_secs() -> u64 {
        5
    }
    pub fn timestamp_cache_size() -> usize {
        4096
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl LimitsConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Relational store connection. The sanctions watchlist is read from the
/// same database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalConfig {
    #[serde(default = "store_defaults::database_url")]
    pub url: LiteralOrEnv<String>,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            url: store_defaults::database_url(),
        }
    }
}

/// Graph store connection (Neo4j HTTP transaction API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "store_defaults::graph_url")]
    pub url: LiteralOrEnv<Url>,
    #[serde(default = "store_defaults::graph_database")]
    pub database: String,
    #[serde(default = "store_defaults::graph_user")]
    pub user: LiteralOrEnv<String>,
    #[serde(default = "store_defaults::graph_password")]
    pub password: LiteralOrEnv<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: store_defaults::graph_url(),
            database: store_defaults::graph_database(),
            user: store_defaults::graph_user(),
            password: store_defaults::graph_password(),
        }
    }
}

mod store_defaults {
    use super::LiteralOrEnv;
    use std::env;
    use url::Url;

    pub fn database_url() -> LiteralOrEnv<String> {
        LiteralOrEnv(
            env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/bridgewatch".to_string()),
        )
    }
    pub fn graph_url() -> LiteralOrEnv<Url> {
        let raw = env::var("GRAPH_URL").unwrap_or_else(|_| "http://localhost:7474".to_string());
        LiteralOrEnv(
            Url::parse(&raw)
                .unwrap_or_else(|_| Url::parse("http://localhost:7474").expect("static url")),
        )
    }
    pub fn graph_database() -> String {
        env::var("GRAPH_DATABASE").unwrap_or_else(|_| "neo4j".to_string())
    }
    pub fn graph_user() -> LiteralOrEnv<String> {
        LiteralOrEnv(env::var("GRAPH_USER").unwrap_or_else(|_| "neo4j".to_string()))
    }
    pub fn graph_password() -> LiteralOrEnv<String> {
        LiteralOrEnv(env::var("GRAPH_PASSWORD").unwrap_or_default())
    }
}

/// A transparent wrapper that resolves environment variables during
/// deserialization.
///
/// Supports both literal values and environment references:
/// - Literal: `"postgres://localhost/bridgewatch"`
/// - Simple env var: `"$DATABASE_URL"`
/// - Braced env var: `"${DATABASE_URL}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if s.starts_with("${") && s.ends_with('}') {
            Some(s[2..s.len() - 1].to_string())
        } else if let Some(var_name) = s.strip_prefix('$') {
            if !var_name.is_empty() && var_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(var_name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };

        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))?;

        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "observers": [{
                    "protocol": "stargate",
                    "chain": "ethereum",
                    "contract_address": "0x8731d54E9D02c286767d56ac03e8037C07e01e98",
                    "rpc_primary": "https://eth.example.com"
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.observers().len(), 1);
        assert_eq!(config.engine().frequent_bridge_count, 10);
        assert_eq!(
            config.engine().high_value_threshold,
            rust_decimal::Decimal::from(100_000u64)
        );
        assert_eq!(config.limits().worker_concurrency, 5);
        assert_eq!(config.limits().relational_pool_size, 10);
        assert_eq!(config.limits().log_chunk_blocks, 500);
    }

    #[test]
    fn observer_endpoints_keep_selection_order() {
        let observer: ObserverConfig = serde_json::from_str(
            r#"{
                "protocol": "hop",
                "chain": "polygon",
                "contract_address": "0x0000000000000000000000000000000000000000",
                "rpc_primary": "https://primary.example.com",
                "rpc_fallbacks": ["https://fb1.example.com", "https://fb2.example.com"]
            }"#,
        )
        .unwrap();
        let endpoints = observer.endpoints();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[0].host_str(), Some("primary.example.com"));
        assert_eq!(endpoints[2].host_str(), Some("fb2.example.com"));
    }

    #[test]
    fn literal_or_env_resolves_braced_reference() {
        // Safety: test-local variable name, nothing else reads it.
        unsafe { std::env::set_var("BRIDGEWATCH_TEST_RPC", "https://env.example.com") };
        let url: LiteralOrEnv<Url> = serde_json::from_str("\"${BRIDGEWATCH_TEST_RPC}\"").unwrap();
        assert_eq!(url.inner().host_str(), Some("env.example.com"));
    }

    #[test]
    fn literal_or_env_missing_variable_fails() {
        let result: Result<LiteralOrEnv<String>, _> =
            serde_json::from_str("\"$BRIDGEWATCH_TEST_MISSING\"");
        assert!(result.is_err());
    }
}
