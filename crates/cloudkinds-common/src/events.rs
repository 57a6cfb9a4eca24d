//! Kubernetes Event recording for the CloudKinds controller.
//!
//! Reconcile outcomes are attached to the target resource as Kubernetes
//! Events so that `kubectl describe mysql db1` shows whether its provider was
//! notified.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "EventDelivered")
    /// * `action` - What action was taken (e.g. "Notify")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                name = resource_ref.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// An event captured by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// Name of the object the event was attached to
    pub name: Option<String>,
    /// Whether the event was a warning
    pub warning: bool,
    /// Event reason
    pub reason: String,
    /// Event action
    pub action: String,
    /// Event note
    pub note: Option<String>,
}

/// Publisher that keeps events in memory, for tests and dry runs.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event published so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Reasons of every event published so far, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                name: resource_ref.name.clone(),
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
                action: action.to_string(),
                note,
            });
        }
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// No provider in the namespace handles the kind
    pub const PROVIDER_MISSING: &str = "ProviderMissing";
    /// Several providers in the namespace handle the kind
    pub const PROVIDER_AMBIGUOUS: &str = "ProviderAmbiguous";
    /// The provider acknowledged the event
    pub const EVENT_DELIVERED: &str = "EventDelivered";
    /// The provider answered with a non-200 status
    pub const PROVIDER_REJECTED: &str = "ProviderRejected";
    /// The webhook could not be reached
    pub const WEBHOOK_FAILED: &str = "WebhookFailed";
    /// The finalizer could not be updated
    pub const FINALIZER_FAILED: &str = "FinalizerFailed";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Looking up the provider for a kind
    pub const RESOLVE: &str = "Resolve";
    /// Posting a resource event to a provider
    pub const NOTIFY: &str = "Notify";
    /// Adding or removing the provider finalizer
    pub const FINALIZE: &str = "Finalize";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
        assert_send_sync::<RecordingEventPublisher>();
    }

    #[tokio::test]
    async fn recording_publisher_keeps_order_and_type() {
        let publisher = RecordingEventPublisher::new();
        let obj_ref = ObjectReference {
            name: Some("db1".to_string()),
            ..Default::default()
        };
        publisher
            .publish(
                &obj_ref,
                EventType::Warning,
                reasons::PROVIDER_MISSING,
                actions::RESOLVE,
                None,
            )
            .await;
        publisher
            .publish(
                &obj_ref,
                EventType::Normal,
                reasons::EVENT_DELIVERED,
                actions::NOTIFY,
                Some("Created".to_string()),
            )
            .await;

        let events = publisher.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].warning);
        assert!(!events[1].warning);
        assert_eq!(events[1].name.as_deref(), Some("db1"));
        assert_eq!(
            publisher.reasons(),
            vec!["ProviderMissing".to_string(), "EventDelivered".to_string()]
        );
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Normal,
                reasons::EVENT_DELIVERED,
                actions::NOTIFY,
                Some("test".to_string()),
            )
            .await;
    }
}
