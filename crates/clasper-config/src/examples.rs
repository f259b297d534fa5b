// clasper-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payloads.
// Purpose: Deterministic example overlay for docs and operators.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A canonical example of the optional TOML overlay file. Every field here
//! is non-secret; secrets are environment-only and have no place in this
//! template (see [`crate::config::ClasperConfig`]).

/// Returns a canonical example overlay file, conventionally named
/// `clasper.toml` and pointed to via the `CLASPER_CONFIG` environment
/// variable.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"policy_path = "/etc/clasper/policy.json"
db_path = "/var/lib/clasper/clasper.db"
bind_addr = "0.0.0.0:8080"
max_payload_bytes = 1048576
approval_ttl_seconds = 86400
grant_ttl_seconds = 900
store_retry_attempts = 5
jwks_cache_ttl_seconds = 300
telemetry_max_skew_seconds = 300
telemetry_signature_mode = "enforce"
tool_auth_mode = "enforce"

[tls]
cert_path = "/etc/clasper/tls/server.crt"
key_path = "/etc/clasper/tls/server.key"
# mtls_client_ca_path = "/etc/clasper/tls/client_ca.crt"
"#,
    )
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::config_toml_example;

    #[test]
    fn the_example_overlay_parses_as_valid_toml() {
        let parsed: Value = toml::from_str(&config_toml_example()).unwrap();
        assert!(parsed.get("policy_path").is_some());
        assert!(parsed.get("tls").is_some());
    }

    #[test]
    fn the_example_overlay_never_mentions_a_secret_field() {
        let example = config_toml_example();
        assert!(!example.contains("secret"));
    }
}
