/*!
 * Configuration types for bcfetch
 *
 * One file per organisation and environment, normally
 * `config/{org}-{env}-config.json`. TOML files with the same layout are
 * accepted when the path ends in `.toml`.
 */

use bcfetch_core_resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::BreakerScope;
use crate::error::{FetchError, Result};
use crate::results::EmptyPolicy;

/// Environment variable holding the OAuth client secret
pub const CLIENT_SECRET_ENV: &str = "BC_CLIENT_SECRET";

/// Environment variable holding a ready-made bearer token
pub const ACCESS_TOKEN_ENV: &str = "BC_ACCESS_TOKEN";

/// Root of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchConfig {
    pub global: GlobalConfig,

    pub business_central: BusinessCentralConfig,

    #[serde(default)]
    pub script_behavior: ScriptBehavior,
}

/// Connection settings shared by every call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalConfig {
    /// e.g. `https://api.businesscentral.dynamics.com`
    pub api_base_url: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    pub tenant_id: String,

    /// OAuth application id, required unless a static token is supplied
    #[serde(default)]
    pub client_id: Option<String>,

    /// Token endpoint; derived from the tenant when absent
    #[serde(default)]
    pub token_url: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

/// What to fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BusinessCentralConfig {
    #[serde(default)]
    pub environments: Vec<String>,

    /// Single-environment form used by older configuration files
    #[serde(default)]
    pub environment_name: Option<String>,

    pub companies: Vec<String>,

    pub apis: Vec<String>,
}

impl BusinessCentralConfig {
    /// Environments in configured order
    ///
    /// `environments` wins over `environment-name` when both are present.
    pub fn environments(&self) -> Vec<String> {
        if !self.environments.is_empty() {
            return self.environments.clone();
        }
        self.environment_name.iter().cloned().collect()
    }
}

/// Resilience and output tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScriptBehavior {
    #[serde(default)]
    pub retry_strategy: RetryStrategy,

    #[serde(default)]
    pub jitter: JitterSettings,

    #[serde(default)]
    pub rate_limiting: RateLimitSettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub api_timeouts: ApiTimeouts,

    #[serde(default)]
    pub empty_result_policy: EmptyPolicy,

    /// 1 runs contexts strictly one after another
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Workbook name override
    #[serde(default)]
    pub excel_output_filename: Option<String>,
}

impl Default for ScriptBehavior {
    fn default() -> Self {
        Self {
            retry_strategy: RetryStrategy::default(),
            jitter: JitterSettings::default(),
            rate_limiting: RateLimitSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            api_timeouts: ApiTimeouts::default(),
            empty_result_policy: EmptyPolicy::default(),
            max_concurrent_calls: default_max_concurrent_calls(),
            excel_output_filename: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryStrategy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JitterSettings {
    #[serde(default = "default_jitter_min")]
    pub min_factor: f64,

    #[serde(default = "default_jitter_max")]
    pub max_factor: f64,
}

impl Default for JitterSettings {
    fn default() -> Self {
        Self {
            min_factor: default_jitter_min(),
            max_factor: default_jitter_max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_calls_per_second")]
    pub calls_per_second: f64,

    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            calls_per_second: default_calls_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    #[serde(default = "default_breaker_timeout")]
    pub timeout_seconds: u64,

    /// Which calls share a breaker
    #[serde(default)]
    pub scope: BreakerScope,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            timeout_seconds: default_breaker_timeout(),
            scope: BreakerScope::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiTimeouts {
    #[serde(default = "default_rest_timeout")]
    pub rest_timeout_seconds: u64,
}

impl Default for ApiTimeouts {
    fn default() -> Self {
        Self {
            rest_timeout_seconds: default_rest_timeout(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_api_version() -> String {
    "v2.0".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_min() -> f64 {
    0.8
}

fn default_jitter_max() -> f64 {
    1.2
}

fn default_calls_per_second() -> f64 {
    10.0
}

fn default_burst_size() -> u32 {
    1
}

fn default_failure_threshold() -> usize {
    5
}

fn default_breaker_timeout() -> u64 {
    60
}

fn default_rest_timeout() -> u64 {
    60
}

fn default_max_concurrent_calls() -> usize {
    1
}

impl FetchConfig {
    /// Parse a configuration file without validating it
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FetchError::ConfigNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config = if is_toml {
            toml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };
        Ok(config)
    }

    /// Parse and validate
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.global.api_base_url.trim().is_empty() {
            return Err(FetchError::MissingConfig("global.api-base-url".to_string()));
        }
        if self.global.tenant_id.trim().is_empty() {
            return Err(FetchError::MissingConfig("global.tenant-id".to_string()));
        }

        let bc = &self.business_central;
        if bc.environments().is_empty() {
            return Err(FetchError::MissingConfig(
                "business-central.environments".to_string(),
            ));
        }
        if bc.companies.is_empty() || bc.apis.is_empty() {
            return Err(FetchError::Config(
                "No companies or APIs defined. Fill 'business-central.companies' and \
                 'business-central.apis' in your org-env config"
                    .to_string(),
            ));
        }

        let behavior = &self.script_behavior;
        self.retry_config()
            .validate()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        if behavior.api_timeouts.rest_timeout_seconds == 0 {
            return Err(FetchError::Config(
                "api-timeouts.rest-timeout-seconds must be > 0".to_string(),
            ));
        }
        if behavior.circuit_breaker.enabled && behavior.circuit_breaker.failure_threshold == 0 {
            return Err(FetchError::Config(
                "circuit-breaker.failure-threshold must be > 0".to_string(),
            ));
        }
        if behavior.max_concurrent_calls == 0 {
            return Err(FetchError::Config(
                "max-concurrent-calls must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        let behavior = &self.script_behavior;
        RetryConfig {
            max_retries: behavior.retry_strategy.max_retries,
            backoff_factor: behavior.retry_strategy.backoff_factor,
            jitter_min: behavior.jitter.min_factor,
            jitter_max: behavior.jitter.max_factor,
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let limits = &self.script_behavior.rate_limiting;
        RateLimitConfig {
            enabled: limits.enabled,
            calls_per_second: limits.calls_per_second,
            burst_size: limits.burst_size,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        let breaker = &self.script_behavior.circuit_breaker;
        CircuitBreakerConfig {
            enabled: breaker.enabled,
            failure_threshold: breaker.failure_threshold,
            timeout: Duration::from_secs(breaker.timeout_seconds),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.script_behavior.api_timeouts.rest_timeout_seconds)
    }
}

/// Locations of the configuration and secrets files for one org/env pair
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigPaths {
    pub config: PathBuf,
    pub secrets: PathBuf,
}

impl ConfigPaths {
    pub fn resolve(config_dir: &Path, org: &str, env: &str) -> Self {
        Self {
            config: config_dir.join(format!("{}-{}-config.json", org, env)),
            secrets: config_dir.join(format!("{}-{}-config-secrets.json", org, env)),
        }
    }
}

/// Contents of the optional secrets file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Secrets {
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl Secrets {
    /// Read the secrets file if it exists, then let the environment override it
    pub fn load(path: &Path) -> Result<Self> {
        let mut secrets = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            Secrets::default()
        };
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            if !secret.is_empty() {
                secrets.client_secret = Some(secret);
            }
        }
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"{
        "global": {
            "api-base-url": "https://api.businesscentral.dynamics.com",
            "tenant-id": "contoso-tenant"
        },
        "business-central": {
            "environment-name": "Production",
            "companies": ["CRONUS"],
            "apis": ["IntercompanyPartner"]
        }
    }"#;

    fn parse(json: &str) -> Result<FetchConfig> {
        Ok(serde_json::from_str(json)?)
    }

    #[test]
    fn test_defaults() {
        let config = parse(MINIMAL).unwrap();
        let behavior = &config.script_behavior;
        assert_eq!(config.global.api_version, "v2.0");
        assert_eq!(behavior.retry_strategy.max_retries, 3);
        assert_eq!(behavior.retry_strategy.backoff_factor, 2.0);
        assert_eq!(behavior.jitter, JitterSettings { min_factor: 0.8, max_factor: 1.2 });
        assert!(behavior.rate_limiting.enabled);
        assert_eq!(behavior.rate_limiting.burst_size, 1);
        assert_eq!(behavior.circuit_breaker.failure_threshold, 5);
        assert_eq!(behavior.circuit_breaker.scope, BreakerScope::Environment);
        assert_eq!(behavior.empty_result_policy, EmptyPolicy::Warning);
        assert_eq!(behavior.max_concurrent_calls, 1);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_name_fallback() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.business_central.environments(), vec!["Production"]);

        let bc = BusinessCentralConfig {
            environments: vec!["Test".into(), "Production".into()],
            environment_name: Some("Sandbox".into()),
            companies: vec![],
            apis: vec![],
        };
        assert_eq!(bc.environments(), vec!["Test", "Production"]);
    }

    #[test]
    fn test_missing_apis_is_parse_error() {
        let json = r#"{
            "global": {"api-base-url": "https://x", "tenant-id": "t"},
            "business-central": {"environment-name": "Test", "companies": ["TXO"]}
        }"#;
        let err = parse(json).unwrap_err();
        assert!(err.to_string().contains("apis"), "{}", err);
    }

    #[test]
    fn test_empty_lists_fail_validation() {
        let mut config = parse(MINIMAL).unwrap();
        config.business_central.apis.clear();
        assert!(matches!(config.validate(), Err(FetchError::Config(_))));

        let mut config = parse(MINIMAL).unwrap();
        config.business_central.environment_name = None;
        assert!(matches!(
            config.validate(),
            Err(FetchError::MissingConfig(key)) if key == "business-central.environments"
        ));
    }

    #[test]
    fn test_invalid_behavior_fails_validation() {
        let mut config = parse(MINIMAL).unwrap();
        config.script_behavior.jitter = JitterSettings {
            min_factor: 1.5,
            max_factor: 1.2,
        };
        assert!(config.validate().is_err());

        let mut config = parse(MINIMAL).unwrap();
        config.script_behavior.api_timeouts.rest_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = parse(MINIMAL).unwrap();
        config.script_behavior.max_concurrent_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limiter_misconfiguration_is_not_fatal() {
        let mut config = parse(MINIMAL).unwrap();
        config.script_behavior.rate_limiting.calls_per_second = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resilience_conversions() {
        let json = r#"{
            "global": {"api-base-url": "https://x", "tenant-id": "t"},
            "business-central": {"environments": ["Test"], "companies": ["A"], "apis": ["B"]},
            "script-behavior": {
                "retry-strategy": {"max-retries": 5, "backoff-factor": 1.5},
                "jitter": {"min-factor": 1.0, "max-factor": 1.0},
                "rate-limiting": {"enabled": false, "calls-per-second": 2, "burst-size": 4},
                "circuit-breaker": {"enabled": true, "failure-threshold": 3, "timeout-seconds": 30, "scope": "endpoint"},
                "api-timeouts": {"rest-timeout-seconds": 15},
                "empty-result-policy": "failure",
                "max-concurrent-calls": 4
            }
        }"#;
        let config = parse(json).unwrap();
        assert!(config.validate().is_ok());

        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.backoff_factor, 1.5);
        assert_eq!(retry.jitter_min, 1.0);

        let limits = config.rate_limit_config();
        assert!(!limits.enabled);
        assert_eq!(limits.calls_per_second, 2.0);
        assert_eq!(limits.burst_size, 4);

        let breaker = config.circuit_breaker_config();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.timeout, Duration::from_secs(30));
        assert_eq!(config.script_behavior.circuit_breaker.scope, BreakerScope::Endpoint);
        assert_eq!(config.script_behavior.empty_result_policy, EmptyPolicy::Failure);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_from_file_json_and_toml() {
        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json_file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = FetchConfig::load(json_file.path()).unwrap();
        assert_eq!(config.business_central.companies, vec!["CRONUS"]);

        let toml_str = r#"
[global]
api-base-url = "https://api.businesscentral.dynamics.com"
tenant-id = "contoso-tenant"

[business-central]
environments = ["Test", "Production"]
companies = ["CRONUS", "TXO"]
apis = ["Items"]

[script-behavior]
max-concurrent-calls = 2
"#;
        let mut toml_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        toml_file.write_all(toml_str.as_bytes()).unwrap();
        let config = FetchConfig::load(toml_file.path()).unwrap();
        assert_eq!(config.business_central.environments().len(), 2);
        assert_eq!(config.script_behavior.max_concurrent_calls, 2);
    }

    #[test]
    fn test_missing_file() {
        let err =
            FetchConfig::from_file(Path::new("/nonexistent/acme-test-config.json")).unwrap_err();
        assert!(matches!(err, FetchError::ConfigNotFound(_)));
    }

    #[test]
    fn test_config_paths() {
        let paths = ConfigPaths::resolve(Path::new("config"), "acme", "test");
        assert_eq!(paths.config, PathBuf::from("config/acme-test-config.json"));
        assert_eq!(
            paths.secrets,
            PathBuf::from("config/acme-test-config-secrets.json")
        );
    }

    #[test]
    fn test_secrets_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"client-secret": "s3cret"}"#).unwrap();
        let secrets = Secrets::load(file.path()).unwrap();
        assert!(secrets.client_secret.is_some());
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
