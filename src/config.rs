//! Layered configuration, figment-backed.
//!
//! Precedence (highest to lowest):
//! 1. Environment variables (prefix `LIFT_`)
//! 2. Current working directory: `./config.toml`
//! 3. XDG config directory: `~/.config/lift/{service_name}/config.toml`
//! 4. System directory: `/etc/lift/{service_name}/config.toml`
//! 5. Defaults below

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub bulkhead: BulkheadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub load_shed: LoadShedConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,
    #[serde(default)]
    pub request_tracking: RequestTrackingConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `header:Name`, `query:Name`, or `cookie:Name`.
    #[serde(default = "default_token_lookup")]
    pub token_lookup: String,
    /// Algorithm family: HS256/384/512 or RS256/384/512.
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    /// HMAC secret (for HS*) or PEM-encoded RSA public key (for RS*).
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    /// Claim name that populates `Context::tenant_id`.
    #[serde(default = "default_tenant_claim")]
    pub tenant_claim: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_lookup: default_token_lookup(),
            algorithm: default_jwt_algorithm(),
            public_key_path: None,
            issuer: None,
            audience: None,
            tenant_claim: default_tenant_claim(),
        }
    }
}

/// An override applied before the default limit, keyed by tenant or user id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitOverride {
    pub key: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit")]
    pub default_limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_limit_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub tenant_overrides: Vec<RateLimitOverride>,
    #[serde(default)]
    pub user_overrides: Vec<RateLimitOverride>,
    /// `fixed`, `sliding`, or `token_bucket`.
    #[serde(default = "default_rate_limit_strategy")]
    pub strategy: String,
    #[serde(default = "default_rate_limit_ttl_secs")]
    pub entry_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: default_rate_limit(),
            window_secs: default_window_secs(),
            key_prefix: default_rate_limit_prefix(),
            tenant_overrides: Vec::new(),
            user_overrides: Vec::new(),
            strategy: default_rate_limit_strategy(),
            entry_ttl_secs: default_rate_limit_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_idempotency_header")]
    pub header: String,
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,
    #[serde(default = "default_idempotency_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header: default_idempotency_header(),
            processing_timeout_secs: default_processing_timeout_secs(),
            ttl_secs: default_idempotency_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_min_request_threshold")]
    pub min_request_threshold: u32,
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: usize,
    #[serde(default = "default_circuit_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            min_request_threshold: default_min_request_threshold(),
            error_rate_threshold: default_error_rate_threshold(),
            success_threshold: default_success_threshold(),
            max_retry_attempts: default_max_retry_attempts(),
            sliding_window_size: default_sliding_window_size(),
            timeout_secs: default_circuit_timeout_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_global_limit")]
    pub global_limit: usize,
    #[serde(default)]
    pub tenant_limit: Option<usize>,
    #[serde(default)]
    pub operation_limit: Option<usize>,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_limit: default_global_limit(),
            tenant_limit: None,
            operation_limit: None,
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl BulkheadConfig {
    pub fn max_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// `fixed`, `linear`, or `exponential`.
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: String,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter_range")]
    pub jitter_range: f64,
    #[serde(default)]
    pub per_attempt_timeout_ms: Option<u64>,
    #[serde(default)]
    pub total_timeout_ms: Option<u64>,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
    #[serde(default = "default_non_retryable_status_codes")]
    pub non_retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff_strategy: default_backoff_strategy(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_range: default_jitter_range(),
            per_attempt_timeout_ms: None,
            total_timeout_ms: None,
            retryable_status_codes: default_retryable_status_codes(),
            non_retryable_status_codes: default_non_retryable_status_codes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadShedConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `random`, `priority`, `adaptive`, or `circuit`.
    #[serde(default = "default_load_shed_strategy")]
    pub strategy: String,
    #[serde(default = "default_target_latency_ms")]
    pub target_latency_ms: u64,
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
    #[serde(default = "default_adaptation_rate")]
    pub adaptation_rate: f64,
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,
}

impl Default for LoadShedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: default_load_shed_strategy(),
            target_latency_ms: default_target_latency_ms(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            adaptation_rate: default_adaptation_rate(),
            sample_window: default_sample_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub tenant_overrides: Vec<RateLimitOverride>,
    #[serde(default)]
    pub operation_overrides: Vec<RateLimitOverride>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_ms: default_timeout_ms(),
            tenant_overrides: Vec::new(),
            operation_overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHeadersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub hsts: bool,
    #[serde(default = "default_hsts_max_age_secs")]
    pub hsts_max_age_secs: u64,
    #[serde(default)]
    pub hsts_include_subdomains: bool,
    #[serde(default)]
    pub hsts_preload: bool,
    #[serde(default = "default_content_security_policy")]
    pub content_security_policy: String,
    #[serde(default = "default_x_frame_options")]
    pub x_frame_options: String,
    #[serde(default = "default_true")]
    pub x_content_type_options: bool,
    #[serde(default = "default_true")]
    pub x_xss_protection: bool,
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
    #[serde(default)]
    pub permissions_policy: Option<String>,
    #[serde(default = "default_sensitive_path_prefixes")]
    pub sensitive_path_prefixes: Vec<String>,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hsts: true,
            hsts_max_age_secs: default_hsts_max_age_secs(),
            hsts_include_subdomains: false,
            hsts_preload: false,
            content_security_policy: default_content_security_policy(),
            x_frame_options: default_x_frame_options(),
            x_content_type_options: true,
            x_xss_protection: true,
            referrer_policy: default_referrer_policy(),
            permissions_policy: None,
            sensitive_path_prefixes: default_sensitive_path_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTrackingConfig {
    #[serde(default = "default_true")]
    pub request_id_enabled: bool,
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
    #[serde(default = "default_true")]
    pub mask_sensitive_headers: bool,
}

impl Default for RequestTrackingConfig {
    fn default() -> Self {
        Self {
            request_id_enabled: true,
            request_id_header: default_request_id_header(),
            mask_sensitive_headers: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub log_request_body: bool,
    #[serde(default = "default_max_body_log_size")]
    pub max_body_log_size: usize,
    #[serde(default = "default_true")]
    pub sanitize: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_request_body: false,
            max_body_log_size: default_max_body_log_size(),
            sanitize: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_token_lookup() -> String {
    "header:Authorization".to_string()
}
fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}
fn default_tenant_claim() -> String {
    "tenant_id".to_string()
}
fn default_rate_limit() -> u32 {
    100
}
fn default_window_secs() -> u64 {
    60
}
fn default_rate_limit_prefix() -> String {
    "ratelimit".to_string()
}
fn default_rate_limit_strategy() -> String {
    "fixed".to_string()
}
fn default_rate_limit_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_idempotency_header() -> String {
    "Idempotency-Key".to_string()
}
fn default_processing_timeout_secs() -> u64 {
    30
}
fn default_idempotency_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_min_request_threshold() -> u32 {
    10
}
fn default_error_rate_threshold() -> f64 {
    0.5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_max_retry_attempts() -> u32 {
    1
}
fn default_sliding_window_size() -> usize {
    20
}
fn default_circuit_timeout_secs() -> u64 {
    30
}
fn default_global_limit() -> usize {
    100
}
fn default_max_wait_ms() -> u64 {
    0
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_strategy() -> String {
    "exponential".to_string()
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter_range() -> f64 {
    0.1
}
fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}
fn default_non_retryable_status_codes() -> Vec<u16> {
    vec![400, 401, 403, 404, 422]
}
fn default_load_shed_strategy() -> String {
    "adaptive".to_string()
}
fn default_target_latency_ms() -> u64 {
    500
}
fn default_min_rate() -> f64 {
    0.0
}
fn default_max_rate() -> f64 {
    0.5
}
fn default_adaptation_rate() -> f64 {
    0.05
}
fn default_sample_window() -> usize {
    100
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_content_security_policy() -> String {
    "default-src 'self'".to_string()
}
fn default_hsts_max_age_secs() -> u64 {
    31_536_000
}
fn default_x_frame_options() -> String {
    "DENY".to_string()
}
fn default_referrer_policy() -> String {
    "no-referrer".to_string()
}
fn default_sensitive_path_prefixes() -> Vec<String> {
    vec![
        "/auth".to_string(),
        "/payment".to_string(),
        "/users".to_string(),
        "/admin".to_string(),
    ]
}
fn default_request_id_header() -> String {
    "x-request-id".to_string()
}
fn default_max_body_log_size() -> usize {
    8 * 1024
}

impl Config {
    /// Loads configuration for a service, searching `./config.toml`, the
    /// XDG config dir, then `/etc/lift/{service_name}`, with `LIFT_`-prefixed
    /// environment variables taking highest precedence.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default_for(service_name)));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("LIFT_").split("_"));

        Ok(figment.extract()?)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LIFT_").split("_"))
            .extract()?;
        Ok(config)
    }

    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("lift");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/lift").join(service_name).join("config.toml"));
        paths
    }

    pub fn recommended_path(service_name: &str) -> PathBuf {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("lift");
        let config_file_path = Path::new(service_name).join("config.toml");
        xdg_dirs
            .place_config_file(&config_file_path)
            .unwrap_or_else(|_| {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| String::from("~")))
                    .join(".config/lift")
                    .join(service_name)
                    .join("config.toml")
            })
    }

    fn default_for(service_name: &str) -> Self {
        let mut config = Self::default();
        config.service.name = service_name.to_string();
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "lift".to_string(),
                log_level: default_log_level(),
                environment: default_environment(),
            },
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            idempotency: IdempotencyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            bulkhead: BulkheadConfig::default(),
            retry: RetryConfig::default(),
            load_shed: LoadShedConfig::default(),
            timeout: TimeoutConfig::default(),
            security_headers: SecurityHeadersConfig::default(),
            request_tracking: RequestTrackingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
