// clasper-config/src/config.rs
// ============================================================================
// Module: Clasper Configuration
// Description: Layered environment + TOML-overlay configuration loading and
// validation for the Clasper control plane.
// Purpose: Assemble a typed, validated `ClasperConfig` from environment
// variables and an optional file overlay, failing closed on malformed input.
// Dependencies: clasper-store-sqlite, serde, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration has three layers, applied in this order: built-in defaults,
//! an optional TOML overlay file, then environment variables. Environment
//! values always win over the file, which always wins over defaults.
//! Secrets (`*_SECRET` variables and the OIDC JWKS URL's bearer material)
//! are accepted from the environment only; the overlay file can never set
//! them. Validation runs once, after merging, and collects every problem it
//! finds rather than stopping at the first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use clasper_store_sqlite::SqliteStoreConfig;
use clasper_store_sqlite::SqliteStoreMode;
use clasper_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable used to point at the optional TOML overlay file.
const CONFIG_ENV_VAR: &str = "CLASPER_CONFIG";
/// Maximum configuration overlay file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum total path length accepted anywhere in configuration.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
const DEFAULT_APPROVAL_TTL_SECONDS: u64 = 86_400;
const DEFAULT_GRANT_TTL_SECONDS: u64 = 900;
const DEFAULT_STORE_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;
const DEFAULT_TELEMETRY_MAX_SKEW_SECONDS: u64 = 300;
const DEFAULT_DB_PATH: &str = "clasper.db";

// ============================================================================
// SECTION: Enforcement Mode
// ============================================================================

/// Shared enforcement mode for telemetry signature checking and tool
/// authorization. Both knobs are independently configurable but share the
/// same three-state shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Skip verification entirely; accepted for migration windows.
    Off,
    /// Verify, but accept on failure and record a violation.
    #[default]
    Warn,
    /// Verify and reject on failure.
    Enforce,
}

impl FromStr for EnforcementMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "warn" => Ok(Self::Warn),
            "enforce" => Ok(Self::Enforce),
            other => Err(format!("expected off|warn|enforce, got {other:?}")),
        }
    }
}

// ============================================================================
// SECTION: Identity Configuration
// ============================================================================

/// Bearer-token verification configuration.
///
/// # Invariants
/// - Every field here is secret-bearing or secret-adjacent; none of them may
///   ever be populated from the overlay file.
#[derive(Clone, Default)]
pub struct IdentityConfig {
    /// `AGENT_JWT_SECRET`: symmetric secret for backend-minted tokens.
    pub agent_jwt_secret: Option<String>,
    /// `ADAPTER_JWT_SECRET`: symmetric secret for adapter-minted tokens.
    pub adapter_jwt_secret: Option<String>,
    /// `OPS_OIDC_JWKS_URL`: JWKS document location for operator tokens.
    pub ops_oidc_jwks_url: Option<String>,
    /// `OPS_OIDC_ISSUER`: expected `iss` claim for operator tokens, if checked.
    pub ops_oidc_issuer: Option<String>,
    /// `OPS_OIDC_AUDIENCE`: expected `aud` claim for operator tokens, if checked.
    pub ops_oidc_audience: Option<String>,
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("agent_jwt_secret", &redacted(&self.agent_jwt_secret))
            .field("adapter_jwt_secret", &redacted(&self.adapter_jwt_secret))
            .field("ops_oidc_jwks_url", &self.ops_oidc_jwks_url)
            .field("ops_oidc_issuer", &self.ops_oidc_issuer)
            .field("ops_oidc_audience", &self.ops_oidc_audience)
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> &'static str {
    if secret.is_some() { "<redacted>" } else { "<unset>" }
}

// ============================================================================
// SECTION: Dev Configuration
// ============================================================================

/// Development-only overrides. Every field here must be inert unless
/// `is_production` is `false`; enforcement of that rule lives in the
/// consuming crate (`clasper-providers`), not here, but this config always
/// carries `is_production` alongside `no_auth` so callers cannot construct
/// one without the other.
#[derive(Debug, Clone)]
pub struct DevConfig {
    /// `DEV_NO_AUTH`: request the identity bypass. Development only.
    pub no_auth: bool,
    /// Whether this deployment considers itself production. Defaults to
    /// `true` (fail closed) when `CLASPER_ENV` is unset or unrecognized.
    pub is_production: bool,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self { no_auth: false, is_production: true }
    }
}

// ============================================================================
// SECTION: TLS Configuration
// ============================================================================

/// Optional TLS/mTLS material for the HTTP server binary. TLS is enabled
/// when both `cert_path` and `key_path` are set; mTLS additionally requires
/// `mtls_client_ca_path`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// `CLASPER_TLS_CERT_PATH`.
    pub cert_path: Option<PathBuf>,
    /// `CLASPER_TLS_KEY_PATH`.
    pub key_path: Option<PathBuf>,
    /// `CLASPER_MTLS_CLIENT_CA_PATH`.
    pub mtls_client_ca_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Returns whether server-side TLS is enabled.
    #[must_use]
    pub const fn tls_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    /// Returns whether client-certificate verification (mTLS) is enabled.
    #[must_use]
    pub const fn mtls_enabled(&self) -> bool {
        self.tls_enabled() && self.mtls_client_ca_path.is_some()
    }
}

// ============================================================================
// SECTION: File Overlay
// ============================================================================

/// Non-secret settings accepted from the `CLASPER_CONFIG` TOML overlay.
/// Every field is optional: an absent field falls through to the built-in
/// default (or to the environment, if the environment sets it).
#[derive(Debug, Clone, Default, Deserialize)]
struct FileOverlay {
    policy_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
    bind_addr: Option<String>,
    #[serde(default)]
    tls: TlsConfig,
    max_payload_bytes: Option<usize>,
    approval_ttl_seconds: Option<u64>,
    grant_ttl_seconds: Option<u64>,
    store_retry_attempts: Option<u32>,
    jwks_cache_ttl_seconds: Option<u64>,
    telemetry_max_skew_seconds: Option<u64>,
    telemetry_signature_mode: Option<EnforcementMode>,
    tool_auth_mode: Option<EnforcementMode>,
}

// ============================================================================
// SECTION: Assembled Configuration
// ============================================================================

/// Fully assembled, validated Clasper control-plane configuration.
#[derive(Clone)]
pub struct ClasperConfig {
    /// Bearer-token verification material.
    pub identity: IdentityConfig,
    /// `DECISION_TOKEN_SECRET`.
    pub decision_token_secret: Option<String>,
    /// `TOOL_TOKEN_SECRET`.
    pub tool_token_secret: Option<String>,
    /// `TELEMETRY_SIGNATURE_MODE`.
    pub telemetry_signature_mode: EnforcementMode,
    /// `TELEMETRY_MAX_SKEW_SECONDS`.
    pub telemetry_max_skew_seconds: u64,
    /// `TOOL_AUTH_MODE`.
    pub tool_auth_mode: EnforcementMode,
    /// `POLICY_PATH`.
    pub policy_path: Option<PathBuf>,
    /// `DB_PATH`.
    pub db_path: PathBuf,
    /// Development-only overrides.
    pub dev: DevConfig,
    /// `CLASPER_BIND_ADDR`.
    pub bind_addr: SocketAddr,
    /// TLS/mTLS configuration for the HTTP server binary.
    pub tls: TlsConfig,
    /// `CLASPER_MAX_PAYLOAD_BYTES`.
    pub max_payload_bytes: usize,
    /// `CLASPER_APPROVAL_TTL_SECONDS`.
    pub approval_ttl_seconds: u64,
    /// `CLASPER_GRANT_TTL_SECONDS`.
    pub grant_ttl_seconds: u64,
    /// `CLASPER_STORE_RETRY_ATTEMPTS`.
    pub store_retry_attempts: u32,
    /// `CLASPER_JWKS_CACHE_TTL_SECONDS`.
    pub jwks_cache_ttl_seconds: u64,
}

impl fmt::Debug for ClasperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClasperConfig")
            .field("identity", &self.identity)
            .field("decision_token_secret", &redacted(&self.decision_token_secret))
            .field("tool_token_secret", &redacted(&self.tool_token_secret))
            .field("telemetry_signature_mode", &self.telemetry_signature_mode)
            .field("telemetry_max_skew_seconds", &self.telemetry_max_skew_seconds)
            .field("tool_auth_mode", &self.tool_auth_mode)
            .field("policy_path", &self.policy_path)
            .field("db_path", &self.db_path)
            .field("dev", &self.dev)
            .field("bind_addr", &self.bind_addr)
            .field("tls", &self.tls)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("approval_ttl_seconds", &self.approval_ttl_seconds)
            .field("grant_ttl_seconds", &self.grant_ttl_seconds)
            .field("store_retry_attempts", &self.store_retry_attempts)
            .field("jwks_cache_ttl_seconds", &self.jwks_cache_ttl_seconds)
            .finish()
    }
}

impl ClasperConfig {
    /// Loads configuration using the default resolution rules: an optional
    /// `CLASPER_CONFIG` TOML overlay merged under the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the overlay file cannot be read or parsed,
    /// or if the merged configuration fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let overlay = match resolve_overlay_path() {
            Some(path) => read_overlay(&path)?,
            None => FileOverlay::default(),
        };
        Self::from_overlay_and_source(overlay, &ProcessEnv)
    }

    /// Assembles configuration from a file overlay and an arbitrary
    /// environment source. Kept private to this module; tests reach it
    /// through `super::` to supply a synthetic environment without mutating
    /// real process state.
    fn from_overlay_and_source(overlay: FileOverlay, env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();

        let bind_addr_text = env_string(env, "CLASPER_BIND_ADDR")
            .or(overlay.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_text.parse::<SocketAddr>().unwrap_or_else(|err| {
            problems.push(format!("CLASPER_BIND_ADDR {bind_addr_text:?} is not a socket address: {err}"));
            DEFAULT_BIND_ADDR.parse().unwrap_or_else(|_| unreachable_default_addr())
        });

        let is_production = match env_string(env, "CLASPER_ENV").as_deref() {
            None => true,
            Some("production") => true,
            Some("development") => false,
            Some(other) => {
                problems.push(format!("CLASPER_ENV {other:?} is not production|development"));
                true
            }
        };

        let telemetry_signature_mode =
            parse_mode_env(env, "TELEMETRY_SIGNATURE_MODE", overlay.telemetry_signature_mode, &mut problems);
        let tool_auth_mode = parse_mode_env(env, "TOOL_AUTH_MODE", overlay.tool_auth_mode, &mut problems);

        let config = Self {
            identity: IdentityConfig {
                agent_jwt_secret: env_string(env, "AGENT_JWT_SECRET"),
                adapter_jwt_secret: env_string(env, "ADAPTER_JWT_SECRET"),
                ops_oidc_jwks_url: env_string(env, "OPS_OIDC_JWKS_URL"),
                ops_oidc_issuer: env_string(env, "OPS_OIDC_ISSUER"),
                ops_oidc_audience: env_string(env, "OPS_OIDC_AUDIENCE"),
            },
            decision_token_secret: env_string(env, "DECISION_TOKEN_SECRET"),
            tool_token_secret: env_string(env, "TOOL_TOKEN_SECRET"),
            telemetry_signature_mode,
            telemetry_max_skew_seconds: env_u64(env, "TELEMETRY_MAX_SKEW_SECONDS", &mut problems)
                .or(overlay.telemetry_max_skew_seconds)
                .unwrap_or(DEFAULT_TELEMETRY_MAX_SKEW_SECONDS),
            tool_auth_mode,
            policy_path: env_path(env, "POLICY_PATH").or(overlay.policy_path),
            db_path: env_path(env, "DB_PATH").or(overlay.db_path).unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            dev: DevConfig { no_auth: env_bool(env, "DEV_NO_AUTH"), is_production },
            bind_addr,
            tls: TlsConfig {
                cert_path: env_path(env, "CLASPER_TLS_CERT_PATH").or(overlay.tls.cert_path),
                key_path: env_path(env, "CLASPER_TLS_KEY_PATH").or(overlay.tls.key_path),
                mtls_client_ca_path: env_path(env, "CLASPER_MTLS_CLIENT_CA_PATH").or(overlay.tls.mtls_client_ca_path),
            },
            max_payload_bytes: env_usize(env, "CLASPER_MAX_PAYLOAD_BYTES", &mut problems)
                .or(overlay.max_payload_bytes)
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            approval_ttl_seconds: env_u64(env, "CLASPER_APPROVAL_TTL_SECONDS", &mut problems)
                .or(overlay.approval_ttl_seconds)
                .unwrap_or(DEFAULT_APPROVAL_TTL_SECONDS),
            grant_ttl_seconds: env_u64(env, "CLASPER_GRANT_TTL_SECONDS", &mut problems)
                .or(overlay.grant_ttl_seconds)
                .unwrap_or(DEFAULT_GRANT_TTL_SECONDS),
            store_retry_attempts: env_u32(env, "CLASPER_STORE_RETRY_ATTEMPTS", &mut problems)
                .or(overlay.store_retry_attempts)
                .unwrap_or(DEFAULT_STORE_RETRY_ATTEMPTS),
            jwks_cache_ttl_seconds: env_u64(env, "CLASPER_JWKS_CACHE_TTL_SECONDS", &mut problems)
                .or(overlay.jwks_cache_ttl_seconds)
                .unwrap_or(DEFAULT_JWKS_CACHE_TTL_SECONDS),
        };

        config.collect_validation_problems(&mut problems);
        if problems.is_empty() { Ok(config) } else { Err(ConfigError::Invalid(problems)) }
    }

    fn collect_validation_problems(&self, problems: &mut Vec<String>) {
        if self.identity.agent_jwt_secret.is_none()
            && self.identity.adapter_jwt_secret.is_none()
            && self.identity.ops_oidc_jwks_url.is_none()
            && !self.dev.no_auth
        {
            problems.push(
                "no identity verification path is configured: set AGENT_JWT_SECRET, \
                 ADAPTER_JWT_SECRET, OPS_OIDC_JWKS_URL, or DEV_NO_AUTH"
                    .to_string(),
            );
        }
        if self.dev.no_auth && self.dev.is_production {
            problems.push("DEV_NO_AUTH is set but CLASPER_ENV is production".to_string());
        }
        if self.decision_token_secret.is_none() {
            problems.push("DECISION_TOKEN_SECRET is required".to_string());
        }
        if self.tool_token_secret.is_none() {
            problems.push("TOOL_TOKEN_SECRET is required".to_string());
        }
        if self.max_payload_bytes == 0 {
            problems.push("CLASPER_MAX_PAYLOAD_BYTES must be greater than zero".to_string());
        }
        if self.approval_ttl_seconds == 0 {
            problems.push("CLASPER_APPROVAL_TTL_SECONDS must be greater than zero".to_string());
        }
        if self.grant_ttl_seconds == 0 {
            problems.push("CLASPER_GRANT_TTL_SECONDS must be greater than zero".to_string());
        }
        if self.store_retry_attempts == 0 {
            problems.push("CLASPER_STORE_RETRY_ATTEMPTS must be greater than zero".to_string());
        }
        if self.jwks_cache_ttl_seconds == 0 {
            problems.push("CLASPER_JWKS_CACHE_TTL_SECONDS must be greater than zero".to_string());
        }
        if self.tls.mtls_client_ca_path.is_some() && !self.tls.tls_enabled() {
            problems.push(
                "CLASPER_MTLS_CLIENT_CA_PATH requires both CLASPER_TLS_CERT_PATH and \
                 CLASPER_TLS_KEY_PATH to be set"
                    .to_string(),
            );
        }
        if let Err(err) = validate_path_length(&self.db_path) {
            problems.push(format!("DB_PATH: {err}"));
        }
        if let Some(path) = &self.policy_path
            && let Err(err) = validate_path_length(path)
        {
            problems.push(format!("POLICY_PATH: {err}"));
        }
    }

    /// Builds the `SQLite` store configuration implied by `db_path`, using
    /// WAL journaling and full synchronous durability as defaults since this
    /// configuration layer does not expose per-pragma tuning knobs.
    #[must_use]
    pub fn store_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            path: self.db_path.clone(),
            busy_timeout_ms: 5_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Full,
        }
    }
}

fn unreachable_default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn parse_mode_env(
    env: &dyn EnvSource,
    var: &str,
    file_value: Option<EnforcementMode>,
    problems: &mut Vec<String>,
) -> EnforcementMode {
    match env_string(env, var) {
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            problems.push(format!("{var}: {err}"));
            EnforcementMode::default()
        }),
        None => file_value.unwrap_or_default(),
    }
}

/// A source of environment-variable values, abstracted so tests can supply
/// a synthetic environment instead of mutating real process state (which
/// would require the now-`unsafe` `std::env::set_var`/`remove_var`).
trait EnvSource {
    fn get(&self, var: &str) -> Option<String>;
}

/// Reads from the real process environment.
struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, var: &str) -> Option<String> {
        env::var(var).ok()
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading the overlay file.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error in the overlay file.
    #[error("config parse error: {0}")]
    Parse(String),
    /// One or more validation problems, aggregated so every problem is
    /// reported at once rather than stopping at the first.
    #[error("invalid config:\n{}", .0.iter().map(|p| format!("  - {p}")).collect::<Vec<_>>().join("\n"))]
    Invalid(Vec<String>),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn resolve_overlay_path() -> Option<PathBuf> {
    env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn read_overlay(path: &Path) -> Result<FileOverlay, ConfigError> {
    validate_path_length(path).map_err(|err| ConfigError::Invalid(vec![err]))?;
    let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Invalid(vec!["config overlay file exceeds size limit".to_string()]));
    }
    let content = std::str::from_utf8(&bytes)
        .map_err(|_err| ConfigError::Invalid(vec!["config overlay file must be utf-8".to_string()]))?;
    toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
}

fn validate_path_length(path: &Path) -> Result<(), String> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(format!("path exceeds max length of {MAX_TOTAL_PATH_LENGTH}"));
    }
    Ok(())
}

fn env_string(env: &dyn EnvSource, var: &str) -> Option<String> {
    env.get(var).filter(|value| !value.is_empty())
}

fn env_path(env: &dyn EnvSource, var: &str) -> Option<PathBuf> {
    env_string(env, var).map(PathBuf::from)
}

fn env_bool(env: &dyn EnvSource, var: &str) -> bool {
    env_string(env, var).is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_u64(env: &dyn EnvSource, var: &str, problems: &mut Vec<String>) -> Option<u64> {
    env_string(env, var).map(|raw| {
        raw.parse().unwrap_or_else(|err| {
            problems.push(format!("{var} {raw:?} is not a non-negative integer: {err}"));
            0
        })
    })
}

fn env_u32(env: &dyn EnvSource, var: &str, problems: &mut Vec<String>) -> Option<u32> {
    env_string(env, var).map(|raw| {
        raw.parse().unwrap_or_else(|err| {
            problems.push(format!("{var} {raw:?} is not a non-negative integer: {err}"));
            0
        })
    })
}

fn env_usize(env: &dyn EnvSource, var: &str, problems: &mut Vec<String>) -> Option<usize> {
    env_string(env, var).map(|raw| {
        raw.parse().unwrap_or_else(|err| {
            problems.push(format!("{var} {raw:?} is not a non-negative integer: {err}"));
            0
        })
    })
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use std::collections::HashMap;

    use super::ClasperConfig;
    use super::ConfigError;
    use super::EnforcementMode;
    use super::EnvSource;
    use super::FileOverlay;

    /// A synthetic environment for tests, avoiding real process env
    /// mutation (which would require the now-`unsafe` `std::env::set_var`).
    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for MapEnv {
        fn get(&self, var: &str) -> Option<String> {
            self.0.get(var).map(|value| (*value).to_string())
        }
    }

    fn empty_env() -> MapEnv {
        MapEnv(HashMap::new())
    }

    fn minimal_valid_env() -> MapEnv {
        MapEnv(HashMap::from([
            ("AGENT_JWT_SECRET", "agent-secret"),
            ("DECISION_TOKEN_SECRET", "decision-secret"),
            ("TOOL_TOKEN_SECRET", "tool-secret"),
        ]))
    }

    #[test]
    fn loads_defaults_when_only_required_secrets_are_set() {
        let config = ClasperConfig::from_overlay_and_source(FileOverlay::default(), &minimal_valid_env()).unwrap();
        assert_eq!(config.db_path.to_str(), Some("clasper.db"));
        assert_eq!(config.approval_ttl_seconds, 86_400);
        assert_eq!(config.jwks_cache_ttl_seconds, 300);
        assert_eq!(config.telemetry_signature_mode, EnforcementMode::Warn);
    }

    #[test]
    fn aggregates_every_validation_problem_at_once() {
        let err = ClasperConfig::from_overlay_and_source(FileOverlay::default(), &empty_env()).unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected an aggregated Invalid error");
        };
        assert!(problems.iter().any(|p| p.contains("identity verification path")));
        assert!(problems.iter().any(|p| p.contains("DECISION_TOKEN_SECRET")));
        assert!(problems.iter().any(|p| p.contains("TOOL_TOKEN_SECRET")));
    }

    #[test]
    fn environment_wins_over_file_overlay() {
        let mut env = minimal_valid_env();
        env.0.insert("CLASPER_BIND_ADDR", "127.0.0.1:9999");
        let overlay = FileOverlay { bind_addr: Some("127.0.0.1:1111".to_string()), ..FileOverlay::default() };
        let config = ClasperConfig::from_overlay_and_source(overlay, &env).unwrap();
        assert_eq!(config.bind_addr.port(), 9999);
    }

    #[test]
    fn file_overlay_wins_over_defaults() {
        let overlay = FileOverlay { bind_addr: Some("127.0.0.1:1111".to_string()), ..FileOverlay::default() };
        let config = ClasperConfig::from_overlay_and_source(overlay, &minimal_valid_env()).unwrap();
        assert_eq!(config.bind_addr.port(), 1111);
    }

    #[test]
    fn secrets_are_never_accepted_from_the_file_overlay() {
        // `FileOverlay` has no secret fields at all: this is enforced by the
        // type, not by a runtime check. This test documents that invariant.
        let overlay_toml = r#"
            policy_path = "policy.toml"
            db_path = "custom.db"
        "#;
        let overlay: FileOverlay = toml::from_str(overlay_toml).unwrap();
        assert_eq!(overlay.db_path.as_deref(), Some(std::path::Path::new("custom.db")));
    }

    #[test]
    fn dev_no_auth_conflicts_with_production() {
        let mut env = minimal_valid_env();
        env.0.insert("DEV_NO_AUTH", "true");
        env.0.insert("CLASPER_ENV", "production");
        let err = ClasperConfig::from_overlay_and_source(FileOverlay::default(), &env).unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected an aggregated Invalid error");
        };
        assert!(problems.iter().any(|p| p.contains("CLASPER_ENV is production")));
    }

    #[test]
    fn debug_output_never_includes_secret_values() {
        let config = ClasperConfig::from_overlay_and_source(FileOverlay::default(), &minimal_valid_env()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("agent-secret"));
        assert!(!rendered.contains("decision-secret"));
        assert!(!rendered.contains("tool-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn unparseable_enforcement_mode_is_a_validation_problem() {
        let mut env = minimal_valid_env();
        env.0.insert("TOOL_AUTH_MODE", "sometimes");
        let err = ClasperConfig::from_overlay_and_source(FileOverlay::default(), &env).unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected an aggregated Invalid error");
        };
        assert!(problems.iter().any(|p| p.contains("TOOL_AUTH_MODE")));
    }

    #[test]
    fn read_overlay_parses_a_toml_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clasper.toml");
        std::fs::write(&path, "bind_addr = \"127.0.0.1:2222\"\n").unwrap();

        let overlay = super::read_overlay(&path).unwrap();
        assert_eq!(overlay.bind_addr.as_deref(), Some("127.0.0.1:2222"));
    }

    #[test]
    fn read_overlay_rejects_non_utf8_and_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();

        let malformed = dir.path().join("malformed.toml");
        std::fs::write(&malformed, "bind_addr = [").unwrap();
        assert!(matches!(super::read_overlay(&malformed), Err(ConfigError::Parse(_))));

        let not_utf8 = dir.path().join("not_utf8.toml");
        std::fs::write(&not_utf8, [0xFF, 0xFE, 0xFD]).unwrap();
        assert!(matches!(super::read_overlay(&not_utf8), Err(ConfigError::Invalid(_))));
    }
}
