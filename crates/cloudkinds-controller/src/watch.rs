//! Change subscription backed by `kube::runtime::Controller`
//!
//! One controller runs per subscribed kind. Its reconcile callback forwards
//! each object as a [`PendingRequest`] and waits for the outcome; its error
//! policy turns failed outcomes into requeues. Key deduplication, concurrency
//! limits and scheduling all come from the controller runtime.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::runtime::controller::{Action, Config as ControllerConfig, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use cloudkinds_common::retry::RetryConfig;
use cloudkinds_common::{Error, ReconcileRequest, ResourceKind, Result};

use crate::engine::ReconcileOutcome;
use crate::subscription::{ChangeSubscription, PendingRequest, RequestStream};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Default number of concurrent reconciliations per kind
pub const DEFAULT_CONCURRENCY: u16 = 8;

/// Settings for watching kinds
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Restrict watches to one namespace; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Concurrent reconciliations per kind
    pub concurrency: u16,
    /// Per-key backoff applied after failures without an explicit delay
    pub error_backoff: RetryConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: DEFAULT_CONCURRENCY,
            error_backoff: RetryConfig {
                max_attempts: 0,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(300),
                backoff_multiplier: 2.0,
            },
        }
    }
}

/// Per-key exponential backoff, reset when a key succeeds
pub struct ErrorBackoff {
    config: RetryConfig,
    failures: DashMap<String, u32>,
}

impl ErrorBackoff {
    /// Create an empty backoff table
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return the delay before its retry
    pub fn next(&self, key: &str) -> Duration {
        let mut failures = self.failures.entry(key.to_string()).or_insert(0);
        *failures = failures.saturating_add(1);
        self.config.delay_for(*failures)
    }

    /// Forget past failures of `key`
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }
}

/// A failed outcome, as seen by the controller's error policy
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ReconcileFailure {
    /// What went wrong
    #[source]
    pub source: Error,
    /// Delay the engine asked for, if any
    pub requeue_after: Option<Duration>,
}

/// Shared state of the controller watching one kind
pub struct WatchContext {
    kind: ResourceKind,
    requests: mpsc::Sender<PendingRequest>,
    backoff: ErrorBackoff,
}

impl WatchContext {
    /// Create a context forwarding requests for `kind` into `requests`
    pub fn new(
        kind: ResourceKind,
        requests: mpsc::Sender<PendingRequest>,
        backoff: ErrorBackoff,
    ) -> Self {
        Self {
            kind,
            requests,
            backoff,
        }
    }
}

fn object_key(obj: &DynamicObject) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

fn ref_key(obj_ref: &ObjectRef<DynamicObject>) -> String {
    format!(
        "{}/{}",
        obj_ref.namespace.as_deref().unwrap_or_default(),
        obj_ref.name
    )
}

/// Reconcile callback: hand the object to the engine and wait for its outcome
pub async fn forward(
    obj: Arc<DynamicObject>,
    ctx: Arc<WatchContext>,
) -> std::result::Result<Action, ReconcileFailure> {
    let request = ReconcileRequest::new(
        obj.namespace().unwrap_or_default(),
        obj.name_any(),
        ctx.kind.clone(),
    );
    let key = object_key(&obj);
    let (pending, reply) = PendingRequest::new(request);

    let stopped = || ReconcileFailure {
        source: Error::subscription(ctx.kind.kind(), "reconcile engine stopped"),
        requeue_after: None,
    };

    ctx.requests.send(pending).await.map_err(|_| stopped())?;
    let outcome = reply.await.map_err(|_| stopped())?;

    decide(&ctx.backoff, &key, outcome)
}

fn decide(
    backoff: &ErrorBackoff,
    key: &str,
    outcome: ReconcileOutcome,
) -> std::result::Result<Action, ReconcileFailure> {
    let requested = (outcome.requeue && !outcome.requeue_after.is_zero())
        .then_some(outcome.requeue_after);

    if let Some(source) = outcome.error {
        return Err(ReconcileFailure {
            source,
            requeue_after: requested,
        });
    }

    if outcome.requeue {
        let delay = requested.unwrap_or_else(|| backoff.next(key));
        return Ok(Action::requeue(delay));
    }

    backoff.reset(key);
    Ok(Action::await_change())
}

/// Error policy: honour the engine's delay, otherwise back off per key
pub fn error_policy(
    obj: Arc<DynamicObject>,
    failure: &ReconcileFailure,
    ctx: Arc<WatchContext>,
) -> Action {
    let key = object_key(&obj);

    if !failure.source.is_retryable() {
        warn!(
            kind = %ctx.kind.kind(),
            %key,
            error = %failure.source,
            "permanent failure, waiting for next change"
        );
        return Action::await_change();
    }

    let delay = failure
        .requeue_after
        .unwrap_or_else(|| ctx.backoff.next(&key));
    debug!(
        kind = %ctx.kind.kind(),
        %key,
        delay_secs = delay.as_secs(),
        failures = ctx.backoff.failures(&key),
        "requeueing after failure"
    );
    Action::requeue(delay)
}

/// Subscription watching kinds through the Kubernetes API
pub struct KubeSubscription {
    client: Client,
    config: WatchConfig,
}

impl KubeSubscription {
    /// Create a subscription using the given client
    pub fn new(client: Client, config: WatchConfig) -> Self {
        Self { client, config }
    }
}

impl ChangeSubscription for KubeSubscription {
    fn subscribe(&self, kind: &ResourceKind) -> Result<RequestStream> {
        let ar = kind.api_resource();
        let api: Api<DynamicObject> = match &self.config.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };

        let concurrency = self.config.concurrency.max(1);
        let (tx, rx) = mpsc::channel(usize::from(concurrency));
        let ctx = Arc::new(WatchContext::new(
            kind.clone(),
            tx,
            ErrorBackoff::new(self.config.error_backoff.clone()),
        ));

        info!(kind = %kind, namespace = ?self.config.namespace, concurrency, "starting controller");

        let controller = Controller::new_with(
            api,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            ar,
        )
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(forward, error_policy, ctx.clone())
        .for_each(handle_reconcile_result(kind.kind().to_string(), ctx));

        let feeder = tokio::spawn(controller);
        Ok(RequestStream::with_feeder(ReceiverStream::new(rx), feeder))
    }
}

type ReconcileResult = std::result::Result<
    (ObjectRef<DynamicObject>, Action),
    ControllerError<ReconcileFailure, watcher::Error>,
>;

/// Creates a closure for logging reconciliation results.
///
/// A retry scheduled for an object that has since been deleted surfaces as
/// `ObjectNotFound`; its backoff entry is dropped then.
fn handle_reconcile_result(
    kind: String,
    ctx: Arc<WatchContext>,
) -> impl Fn(ReconcileResult) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", kind),
            Err(ControllerError::ObjectNotFound(obj_ref)) => {
                debug!(object = %obj_ref, "{} object gone, forgetting its backoff", kind);
                ctx.backoff.reset(&ref_key(&obj_ref));
            }
            Err(e) => debug!(error = ?e, "{} reconciliation error", kind),
        }
        std::future::ready(())
    }
}
