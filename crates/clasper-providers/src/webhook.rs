// clasper-providers/src/webhook.rs
// ============================================================================
// Module: Clasper Webhook Notifier
// Description: Outbound fire-and-forget webhook delivery.
// Purpose: Notify a tenant-configured endpoint about decision and approval
// events without ever blocking the decision path that triggered the notify.
// Dependencies: clasper-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! Webhook delivery is a courtesy, not part of the decision contract: a
//! slow or unreachable endpoint must never delay the caller. URL and host
//! validation happen synchronously on the calling thread (they're cheap and
//! catch misconfiguration immediately); the network request itself always
//! runs on a detached thread whose outcome the caller never observes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while preparing a webhook delivery. Failures of the
/// delivery itself (timeout, connection refused, non-2xx response) happen
/// on the detached delivery thread and are never returned here.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The target URL could not be parsed.
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
    /// The URL scheme was neither `https` nor an explicitly allowed `http`.
    #[error("unsupported webhook url scheme: {0}")]
    UnsupportedScheme(String),
    /// The URL host is not on the configured allowlist.
    #[error("webhook url host not allowed: {0}")]
    HostNotAllowed(String),
    /// The underlying HTTP client could not be built.
    #[error("failed to build webhook client: {0}")]
    ClientBuild(String),
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for [`WebhookNotifier`].
///
/// # Invariants
/// - `allow_http = false` blocks cleartext `http://` endpoints.
/// - If `allowed_hosts` is set, only listed hosts may receive deliveries.
#[derive(Debug, Clone, Default)]
pub struct WebhookNotifierConfig {
    /// Allow cleartext HTTP endpoints (disabled by default).
    pub allow_http: bool,
    /// Per-delivery timeout in milliseconds.
    pub timeout_ms: u64,
    /// Optional endpoint host allowlist.
    pub allowed_hosts: Option<BTreeSet<String>>,
    /// User agent string for outbound requests.
    pub user_agent: String,
}

fn normalize_host_label(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn validate_url(url: &Url, config: &WebhookNotifierConfig) -> Result<(), WebhookError> {
    match url.scheme() {
        "https" => {}
        "http" if config.allow_http => {}
        other => return Err(WebhookError::UnsupportedScheme(other.to_string())),
    }
    if let Some(allowlist) = &config.allowed_hosts {
        let host = url
            .host_str()
            .map(normalize_host_label)
            .ok_or_else(|| WebhookError::InvalidUrl("url host required".to_string()))?;
        let allowed = allowlist.iter().any(|entry| normalize_host_label(entry) == host);
        if !allowed {
            return Err(WebhookError::HostNotAllowed(host));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Notifier
// ============================================================================

/// Delivers outbound webhook notifications without blocking the caller.
pub struct WebhookNotifier {
    config: WebhookNotifierConfig,
    client: Arc<Client>,
}

impl WebhookNotifier {
    /// Builds a notifier from `config`.
    ///
    /// # Errors
    /// Returns [`WebhookError::ClientBuild`] if the HTTP client cannot be
    /// constructed.
    pub fn new(config: WebhookNotifierConfig) -> Result<Self, WebhookError> {
        let user_agent = if config.user_agent.is_empty() {
            "clasper-providers/0.1".to_string()
        } else {
            config.user_agent.clone()
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| WebhookError::ClientBuild(err.to_string()))?;
        Ok(Self {
            config,
            client: Arc::new(client),
        })
    }

    /// Validates `endpoint_url` and schedules delivery of `payload` on a
    /// detached thread. Returns once validation passes; the delivery
    /// outcome (success, timeout, non-2xx) is never reported back.
    ///
    /// # Errors
    /// Returns a [`WebhookError`] if `endpoint_url` fails validation before
    /// any network activity begins.
    pub fn notify(&self, endpoint_url: &str, payload: Value) -> Result<(), WebhookError> {
        let url = Url::parse(endpoint_url).map_err(|err| WebhookError::InvalidUrl(err.to_string()))?;
        validate_url(&url, &self.config)?;
        let client = Arc::clone(&self.client);
        thread::spawn(move || {
            let _ = client.post(url).json(&payload).send();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use std::thread;
    use std::time::Duration;

    use serde_json::json;
    use tiny_http::Response;
    use tiny_http::Server;

    use super::WebhookError;
    use super::WebhookNotifier;
    use super::WebhookNotifierConfig;

    fn local_notifier() -> WebhookNotifier {
        let mut allowed_hosts = std::collections::BTreeSet::new();
        allowed_hosts.insert("127.0.0.1".to_string());
        WebhookNotifier::new(WebhookNotifierConfig {
            allow_http: true,
            timeout_ms: 2_000,
            allowed_hosts: Some(allowed_hosts),
            user_agent: "clasper-providers-test/0.1".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn notify_returns_immediately_and_delivers_in_the_background() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let url = format!("http://{addr}/webhook");
        let handle = thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let mut body = String::new();
                let mut request = request;
                let _ = std::io::Read::read_to_string(request.as_reader(), &mut body);
                let _ = request.respond(Response::from_string("ok"));
                body
            } else {
                String::new()
            }
        });

        let notifier = local_notifier();
        notifier.notify(&url, json!({"event": "decision.resolved", "decision_id": "d-1"})).unwrap();

        let delivered_body = handle.join().unwrap();
        assert!(delivered_body.contains("decision.resolved"));
    }

    #[test]
    fn notify_rejects_plain_http_when_not_allowed() {
        let notifier = WebhookNotifier::new(WebhookNotifierConfig::default()).unwrap();
        let err = notifier.notify("http://127.0.0.1:9/webhook", json!({})).unwrap_err();
        assert!(matches!(err, WebhookError::UnsupportedScheme(_)));
    }

    #[test]
    fn notify_rejects_host_not_in_allowlist() {
        let notifier = local_notifier();
        let err = notifier.notify("http://forbidden.example.com/webhook", json!({})).unwrap_err();
        assert!(matches!(err, WebhookError::HostNotAllowed(_)));
    }

    #[test]
    fn notify_rejects_invalid_url() {
        let notifier = local_notifier();
        let err = notifier.notify("not-a-url", json!({})).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidUrl(_)));
    }

    #[test]
    fn a_slow_endpoint_does_not_block_notify() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let url = format!("http://{addr}/webhook");
        let handle = thread::spawn(move || {
            // Accept the connection but never respond before the test's
            // own assertion below runs, proving notify() did not wait.
            let _request = server.recv();
            thread::sleep(Duration::from_millis(50));
        });

        let notifier = local_notifier();
        let started = std::time::Instant::now();
        notifier.notify(&url, json!({"event": "slow"})).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50), "notify() blocked on delivery");

        let _ = handle.join();
    }
}
