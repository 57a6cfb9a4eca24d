//! Webhook dispatch to providers
//!
//! One POST per event, no retries. The response body is always read so a
//! rejection can be reported with whatever the provider said.

use std::ops::Deref;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info_span, warn, Instrument};

use cloudkinds_common::metrics;
use cloudkinds_common::{Error, ResourceEvent, Result};

/// Largest response body kept for diagnostics
pub const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Body reported when the response body could not be read
pub const UNREADABLE_BODY: &str = "could not read response body";

const TRUNCATED_SUFFIX: &str = "... (truncated)";

/// What the provider answered
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body, possibly truncated
    pub body: String,
    /// Set when the body could not be read; the status is still valid
    pub body_error: Option<String>,
}

impl WebhookResponse {
    /// Create a response with a readable body
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            body_error: None,
        }
    }

    /// Only 200 counts as acceptance
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A resource event together with its JSON body
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedEvent {
    event: ResourceEvent,
    body: Vec<u8>,
}

impl EncodedEvent {
    /// Serialize `event`; fails with a serialization error
    pub fn new(event: ResourceEvent) -> Result<Self> {
        let body = event.to_json()?;
        Ok(Self { event, body })
    }

    /// Request body sent to the provider
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Deref for EncodedEvent {
    type Target = ResourceEvent;

    fn deref(&self) -> &ResourceEvent {
        &self.event
    }
}

/// Delivers resource events to provider webhooks.
///
/// `Err` means no HTTP response was received; any response, whatever its
/// status, is `Ok`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    /// POST the event to `url`
    async fn send(&self, url: &str, event: &EncodedEvent) -> Result<WebhookResponse>;
}

/// Configuration for [`HttpDispatcher`]
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Whole-request timeout, `None` waits forever
    pub timeout: Option<Duration>,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            user_agent: concat!("cloudkinds/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Build from a timeout in seconds, where 0 disables the timeout
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self {
            timeout: (secs > 0).then(|| Duration::from_secs(secs)),
            ..Default::default()
        }
    }
}

/// Dispatcher posting over HTTP with `reqwest`
#[derive(Clone, Debug)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    config: DispatcherConfig,
}

impl HttpDispatcher {
    /// Create a dispatcher with the given configuration
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(&config.user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::validation(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create a dispatcher with the default 30s timeout
    pub fn with_defaults() -> Result<Self> {
        Self::new(DispatcherConfig::default())
    }
}

#[async_trait]
impl WebhookDispatcher for HttpDispatcher {
    async fn send(&self, url: &str, event: &EncodedEvent) -> Result<WebhookResponse> {
        let body = event.body().to_vec();
        let span = info_span!(
            "webhook",
            url,
            action = %event.action,
            kind = %event.resource.kind,
            name = %event.resource.name
        );

        async move {
            let start = Instant::now();
            let response = match self
                .client
                .post(url)
                .header("content-type", "application/json")
                .body(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    metrics::record_webhook(None);
                    warn!(duration_ms = start.elapsed().as_millis(), error = %e, "webhook request failed");
                    if e.is_timeout() {
                        let after = self
                            .config
                            .timeout
                            .map(|t| format!("timed out after {}s", t.as_secs()))
                            .unwrap_or_else(|| "timed out".to_string());
                        return Err(Error::transport_timeout(url, after));
                    }
                    if e.is_connect() {
                        return Err(Error::transport(url, format!("connection failed: {e}")));
                    }
                    return Err(Error::transport(url, e.to_string()));
                }
            };

            let status = response.status().as_u16();
            metrics::record_webhook(Some(status));

            let read = response.bytes().await;
            let (body, body_error) = body_from(read.as_deref().map_err(|e| e.to_string()));

            debug!(
                status,
                duration_ms = start.elapsed().as_millis(),
                bytes = body.len(),
                "webhook response received"
            );

            Ok(WebhookResponse {
                status,
                body,
                body_error,
            })
        }
        .instrument(span)
        .await
    }
}

fn body_from(read: std::result::Result<&[u8], String>) -> (String, Option<String>) {
    match read {
        Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
            let kept = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
            (format!("{kept}{TRUNCATED_SUFFIX}"), None)
        }
        Ok(bytes) => (String::from_utf8_lossy(bytes).into_owned(), None),
        Err(e) => {
            warn!(error = %e, "failed to read webhook response body");
            (UNREADABLE_BODY.to_string(), Some(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkinds_common::{ReconcileRequest, ResourceAction, ResourceKind};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn created_event() -> EncodedEvent {
        let request = ReconcileRequest::new("ns1", "db1", ResourceKind::new("", "v1alpha1", "MySQL"));
        EncodedEvent::new(ResourceEvent::new(ResourceAction::Created, &request)).unwrap()
    }

    #[test]
    fn encoded_event_carries_its_json_body() {
        let event = created_event();
        assert_eq!(event.action, ResourceAction::Created);
        assert_eq!(event.body(), event.to_json().unwrap().as_slice());
    }

    #[tokio::test]
    async fn posts_json_event() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_json(serde_json::json!({
                "action": "Created",
                "resource": {"apiVersion": "v1alpha1", "kind": "MySQL", "namespace": "ns1", "name": "db1"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::with_defaults().unwrap();
        let response = dispatcher
            .send(&format!("{}/hook", server.uri()), &created_event())
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.body, "OK");
        assert_eq!(response.body_error, None);
    }

    #[tokio::test]
    async fn rejection_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::with_defaults().unwrap();
        let response = dispatcher
            .send(&format!("{}/hook", server.uri()), &created_event())
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body, "unavailable");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn only_200_is_success() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::with_defaults().unwrap();
        let response = dispatcher
            .send(&format!("{}/hook", server.uri()), &created_event())
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let dispatcher = HttpDispatcher::new(DispatcherConfig {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        })
        .unwrap();

        match dispatcher
            .send(&format!("{}/hook", server.uri()), &created_event())
            .await
        {
            Err(Error::Transport { timed_out, .. }) => assert!(timed_out),
            other => panic!("Expected Transport timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_transport_error() {
        let dispatcher = HttpDispatcher::with_defaults().unwrap();
        let result = dispatcher
            .send("http://127.0.0.1:1/hook", &created_event())
            .await;
        assert!(matches!(result, Err(Error::Transport { timed_out: false, .. })));
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        assert_eq!(DispatcherConfig::with_timeout_secs(0).timeout, None);
        assert_eq!(
            DispatcherConfig::with_timeout_secs(5).timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn large_bodies_are_truncated() {
        let big = vec![b'a'; MAX_RESPONSE_BODY_SIZE + 10];
        let (body, err) = body_from(Ok(big.as_slice()));
        assert!(err.is_none());
        assert!(body.ends_with(TRUNCATED_SUFFIX));
        assert_eq!(body.len(), MAX_RESPONSE_BODY_SIZE + TRUNCATED_SUFFIX.len());
    }

    #[test]
    fn unreadable_body_is_reported_not_fatal() {
        let (body, err) = body_from(Err("connection reset".to_string()));
        assert_eq!(body, UNREADABLE_BODY);
        assert_eq!(err.as_deref(), Some("connection reset"));
    }
}
