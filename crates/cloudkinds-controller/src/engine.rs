//! Reconcile engine
//!
//! Drives one reconcile request through provider resolution, target fetch
//! and webhook dispatch, and decides whether the request should be retried.
//!
//! The engine holds no mutable state: the provider list and the target
//! object are read fresh on every call, so concurrent invocations for
//! different keys need no coordination.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::api::DynamicObject;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use cloudkinds_common::crd::CloudProvider;
use cloudkinds_common::events::{actions, reasons, EventPublisher};
use cloudkinds_common::{
    metrics, Error, ReconcileRequest, ResourceAction, ResourceEvent, PROVIDER_FINALIZER,
};

use crate::resolver::ProviderResolver;
use crate::target::TargetStore;
use crate::webhook::{EncodedEvent, WebhookDispatcher};

/// Delay before retrying a request whose kind has no provider
pub const PROVIDER_MISSING_REQUEUE: Duration = Duration::from_secs(30);

/// Terminal state reached by one reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcileState {
    /// No provider handles the kind in the namespace
    ProviderMissing,
    /// Several providers handle the kind in the namespace
    ProviderAmbiguous,
    /// The target no longer exists; nothing to do
    Clean,
    /// Reading the catalog or the target, or updating the target, failed
    FetchFailed,
    /// The event could not be serialized
    EncodeFailed,
    /// The provider accepted the event
    Delivered,
    /// The provider answered with a non-200 status
    ProviderRejected,
    /// The webhook call produced no response
    TransportFailure,
}

impl ReconcileState {
    /// Label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderMissing => "provider_missing",
            Self::ProviderAmbiguous => "provider_ambiguous",
            Self::Clean => "clean",
            Self::FetchFailed => "fetch_failed",
            Self::EncodeFailed => "encode_failed",
            Self::Delivered => "delivered",
            Self::ProviderRejected => "provider_rejected",
            Self::TransportFailure => "transport_failure",
        }
    }
}

/// Result of one reconciliation, handed back to the driving harness
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Whether the harness should schedule the request again
    pub requeue: bool,
    /// Delay before the retry; zero leaves the delay to the harness
    pub requeue_after: Duration,
    /// Error to surface, if any
    pub error: Option<Error>,
    /// Terminal state reached
    pub state: ReconcileState,
}

impl ReconcileOutcome {
    fn done(state: ReconcileState) -> Self {
        Self {
            requeue: false,
            requeue_after: Duration::ZERO,
            error: None,
            state,
        }
    }

    fn failed(state: ReconcileState, error: Error) -> Self {
        Self {
            error: Some(error),
            ..Self::done(state)
        }
    }

    fn requeue_after(state: ReconcileState, delay: Duration, error: Error) -> Self {
        Self {
            requeue: true,
            requeue_after: delay,
            error: Some(error),
            state,
        }
    }

    fn requeue_now(state: ReconcileState, error: Error) -> Self {
        Self::requeue_after(state, Duration::ZERO, error)
    }

    /// True when no error is reported
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Settings that shape the engine's retry decisions
#[derive(Clone, Debug)]
pub struct ReconcilePolicy {
    /// Delay before retrying when no provider handles the kind
    pub provider_missing_requeue: Duration,
    /// Hold deletions with a finalizer until the provider has been told
    pub manage_finalizers: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            provider_missing_requeue: PROVIDER_MISSING_REQUEUE,
            manage_finalizers: false,
        }
    }
}

/// Per-request reconciliation state machine
pub struct ReconcileEngine {
    resolver: ProviderResolver,
    targets: Arc<dyn TargetStore>,
    dispatcher: Arc<dyn WebhookDispatcher>,
    events: Arc<dyn EventPublisher>,
    policy: ReconcilePolicy,
}

impl ReconcileEngine {
    /// Create an engine from its collaborators
    pub fn new(
        resolver: ProviderResolver,
        targets: Arc<dyn TargetStore>,
        dispatcher: Arc<dyn WebhookDispatcher>,
        events: Arc<dyn EventPublisher>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            resolver,
            targets,
            dispatcher,
            events,
            policy,
        }
    }

    /// Reconcile one request
    #[instrument(
        skip(self, request),
        fields(kind = %request.kind.kind(), namespace = %request.namespace, name = %request.name)
    )]
    pub async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileOutcome {
        let start = Instant::now();
        let outcome = self.run(request).await;
        metrics::record_reconcile(
            request.kind.kind(),
            outcome.state.as_str(),
            start.elapsed().as_secs_f64(),
        );

        match &outcome.error {
            None => debug!(state = outcome.state.as_str(), "reconcile finished"),
            Some(e) => warn!(
                state = outcome.state.as_str(),
                requeue = outcome.requeue,
                requeue_after_secs = outcome.requeue_after.as_secs(),
                error = %e,
                "reconcile failed"
            ),
        }
        outcome
    }

    async fn run(&self, request: &ReconcileRequest) -> ReconcileOutcome {
        let provider = match self
            .resolver
            .resolve(&request.namespace, request.kind.kind())
            .await
        {
            Ok(provider) => provider,
            Err(e @ Error::ProviderNotFound { .. }) => {
                self.warn(request, reasons::PROVIDER_MISSING, actions::RESOLVE, &e)
                    .await;
                return ReconcileOutcome::requeue_after(
                    ReconcileState::ProviderMissing,
                    self.policy.provider_missing_requeue,
                    e,
                );
            }
            Err(e @ Error::AmbiguousProvider { .. }) => {
                self.warn(request, reasons::PROVIDER_AMBIGUOUS, actions::RESOLVE, &e)
                    .await;
                return ReconcileOutcome::requeue_after(
                    ReconcileState::ProviderAmbiguous,
                    self.policy.provider_missing_requeue,
                    e,
                );
            }
            Err(e) => return ReconcileOutcome::requeue_now(ReconcileState::FetchFailed, e),
        };

        let object = match self.targets.get(request).await {
            Ok(Some(object)) => object,
            Ok(None) => {
                debug!("target no longer exists");
                return ReconcileOutcome::done(ReconcileState::Clean);
            }
            Err(e) => return ReconcileOutcome::requeue_now(ReconcileState::FetchFailed, e),
        };

        let action = derive_action(&object);

        if self.policy.manage_finalizers && action != ResourceAction::Deleted {
            if let Err(e) = self.add_finalizer(request, &object).await {
                self.warn(request, reasons::FINALIZER_FAILED, actions::FINALIZE, &e)
                    .await;
                return ReconcileOutcome::requeue_now(ReconcileState::FetchFailed, e);
            }
        }

        let event = match EncodedEvent::new(ResourceEvent::new(action, request)) {
            Ok(event) => event,
            Err(e) => return encode_failed(e),
        };
        let outcome = self.dispatch(request, &provider, &event).await;

        // also release objects finalized while management was enabled
        if outcome.is_success() && action == ResourceAction::Deleted {
            if let Err(e) = self.remove_finalizer(request, &object).await {
                self.warn(request, reasons::FINALIZER_FAILED, actions::FINALIZE, &e)
                    .await;
                return ReconcileOutcome::requeue_now(ReconcileState::FetchFailed, e);
            }
        }

        outcome
    }

    async fn dispatch(
        &self,
        request: &ReconcileRequest,
        provider: &CloudProvider,
        event: &EncodedEvent,
    ) -> ReconcileOutcome {
        let provider_name = provider.display_name();
        let url = provider.webhook();

        let response = match self.dispatcher.send(url, event).await {
            Ok(response) => response,
            Err(e) => {
                self.warn(request, reasons::WEBHOOK_FAILED, actions::NOTIFY, &e)
                    .await;
                return ReconcileOutcome::failed(ReconcileState::TransportFailure, e);
            }
        };

        if let Some(body_error) = &response.body_error {
            warn!(provider = %provider_name, status = response.status, %body_error, "provider response body unreadable");
        }

        if response.is_success() {
            info!(provider = %provider_name, action = %event.action, "provider notified");
            self.events
                .publish(
                    &request.object_reference(),
                    EventType::Normal,
                    reasons::EVENT_DELIVERED,
                    actions::NOTIFY,
                    Some(format!("{} event delivered to {}", event.action, provider_name)),
                )
                .await;
            return ReconcileOutcome::done(ReconcileState::Delivered);
        }

        let e = Error::provider_rejected(provider_name, url, response.status, response.body);
        self.warn(request, reasons::PROVIDER_REJECTED, actions::NOTIFY, &e)
            .await;
        ReconcileOutcome::failed(ReconcileState::ProviderRejected, e)
    }

    async fn add_finalizer(
        &self,
        request: &ReconcileRequest,
        object: &DynamicObject,
    ) -> cloudkinds_common::Result<()> {
        if has_finalizer(object) {
            return Ok(());
        }
        let mut finalizers = object.finalizers().to_vec();
        finalizers.push(PROVIDER_FINALIZER.to_string());
        debug!("adding provider finalizer");
        self.targets
            .set_finalizers(request, finalizers, object.resource_version())
            .await
    }

    async fn remove_finalizer(
        &self,
        request: &ReconcileRequest,
        object: &DynamicObject,
    ) -> cloudkinds_common::Result<()> {
        if !has_finalizer(object) {
            return Ok(());
        }
        let finalizers: Vec<String> = object
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != PROVIDER_FINALIZER)
            .cloned()
            .collect();
        debug!("removing provider finalizer");
        self.targets
            .set_finalizers(request, finalizers, object.resource_version())
            .await
    }

    async fn warn(&self, request: &ReconcileRequest, reason: &str, action: &str, error: &Error) {
        self.events
            .publish(
                &request.object_reference(),
                EventType::Warning,
                reason,
                action,
                Some(error.to_string()),
            )
            .await;
    }
}

/// Derive the change an object's metadata describes
pub fn derive_action(object: &DynamicObject) -> ResourceAction {
    if object.metadata.deletion_timestamp.is_some() {
        ResourceAction::Deleted
    } else if object.metadata.generation.unwrap_or(1) > 1 {
        ResourceAction::Updated
    } else {
        ResourceAction::Created
    }
}

fn encode_failed(error: Error) -> ReconcileOutcome {
    ReconcileOutcome::requeue_now(ReconcileState::EncodeFailed, error)
}

fn has_finalizer(object: &DynamicObject) -> bool {
    object.finalizers().iter().any(|f| f == PROVIDER_FINALIZER)
}
