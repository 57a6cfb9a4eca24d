//! Change subscriptions and the loop that serves them
//!
//! A subscription yields one [`PendingRequest`] per change noticed on a
//! watched kind. The consumer reconciles it and answers through the request's
//! completion handle, which lets the watching side turn the outcome into a
//! requeue decision.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cloudkinds_common::{ReconcileRequest, ResourceKind, Result};

use crate::engine::{ReconcileEngine, ReconcileOutcome};

/// A reconcile request waiting for its outcome
#[derive(Debug)]
pub struct PendingRequest {
    /// What to reconcile
    pub request: ReconcileRequest,
    reply: oneshot::Sender<ReconcileOutcome>,
}

impl PendingRequest {
    /// Create a request and the receiver its outcome will arrive on
    pub fn new(request: ReconcileRequest) -> (Self, oneshot::Receiver<ReconcileOutcome>) {
        let (reply, rx) = oneshot::channel();
        (Self { request, reply }, rx)
    }

    /// Report the outcome back to whoever raised the request
    pub fn complete(self, outcome: ReconcileOutcome) {
        if self.reply.send(outcome).is_err() {
            debug!(request = %self.request, "requester gone before outcome was delivered");
        }
    }
}

/// Stream of pending requests for one kind.
///
/// Dropping the stream stops the task feeding it, if any.
pub struct RequestStream {
    inner: BoxStream<'static, PendingRequest>,
    feeder: Option<JoinHandle<()>>,
}

impl RequestStream {
    /// Wrap any stream of pending requests
    pub fn new(inner: impl Stream<Item = PendingRequest> + Send + 'static) -> Self {
        Self {
            inner: inner.boxed(),
            feeder: None,
        }
    }

    /// Wrap a stream fed by a background task that is aborted on drop
    pub fn with_feeder(
        inner: impl Stream<Item = PendingRequest> + Send + 'static,
        feeder: JoinHandle<()>,
    ) -> Self {
        Self {
            inner: inner.boxed(),
            feeder: Some(feeder),
        }
    }
}

impl Stream for RequestStream {
    type Item = PendingRequest;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for RequestStream {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

/// Source of change notifications for a kind.
pub trait ChangeSubscription: Send + Sync {
    /// Start watching `kind`; requests for distinct keys arrive unordered
    fn subscribe(&self, kind: &ResourceKind) -> Result<RequestStream>;
}

/// Reconcile every request from the stream until it ends.
///
/// Up to `concurrency` requests are in flight at once.
pub async fn serve(engine: Arc<ReconcileEngine>, requests: RequestStream, concurrency: usize) {
    requests
        .for_each_concurrent(concurrency.max(1), |pending| {
            let engine = engine.clone();
            async move {
                let outcome = engine.reconcile(&pending.request).await;
                pending.complete(outcome);
            }
        })
        .await;
    info!("change subscription ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cloudkinds_common::crd::{CloudProvider, CloudProviderSpec};
    use cloudkinds_common::events::NoopEventPublisher;

    use crate::engine::{ReconcilePolicy, ReconcileState};
    use crate::resolver::{MockProviderCatalog, ProviderResolver};
    use crate::target::MockTargetStore;
    use crate::webhook::MockWebhookDispatcher;

    fn request(name: &str) -> ReconcileRequest {
        ReconcileRequest::new("ns1", name, ResourceKind::cloudkind("MySQL"))
    }

    fn engine_without_providers() -> Arc<ReconcileEngine> {
        let mut catalog = MockProviderCatalog::new();
        catalog.expect_list_providers().returning(|_| Ok(vec![]));
        Arc::new(ReconcileEngine::new(
            ProviderResolver::new(Arc::new(catalog)),
            Arc::new(MockTargetStore::new()),
            Arc::new(MockWebhookDispatcher::new()),
            Arc::new(NoopEventPublisher),
            ReconcilePolicy::default(),
        ))
    }

    #[tokio::test]
    async fn every_request_gets_an_outcome() {
        let mut pending = Vec::new();
        let mut replies = Vec::new();
        for name in ["db1", "db2", "db3"] {
            let (p, rx) = PendingRequest::new(request(name));
            pending.push(p);
            replies.push(rx);
        }

        serve(
            engine_without_providers(),
            RequestStream::new(futures::stream::iter(pending)),
            2,
        )
        .await;

        for rx in replies {
            let outcome = rx.await.expect("outcome delivered");
            assert_eq!(outcome.state, ReconcileState::ProviderMissing);
            assert_eq!(outcome.requeue_after, Duration::from_secs(30));
        }
    }

    #[tokio::test]
    async fn completing_after_requester_left_is_harmless() {
        let (pending, rx) = PendingRequest::new(request("db1"));
        drop(rx);
        let mut catalog = MockProviderCatalog::new();
        catalog.expect_list_providers().returning(|_| {
            Ok(vec![CloudProvider::new(
                "aws",
                CloudProviderSpec {
                    kinds: vec!["Other".to_string()],
                    webhook: "http://p/hook".to_string(),
                },
            )])
        });
        let engine = ReconcileEngine::new(
            ProviderResolver::new(Arc::new(catalog)),
            Arc::new(MockTargetStore::new()),
            Arc::new(MockWebhookDispatcher::new()),
            Arc::new(NoopEventPublisher),
            ReconcilePolicy::default(),
        );
        let outcome = engine.reconcile(&pending.request).await;
        pending.complete(outcome);
    }

    #[tokio::test]
    async fn dropping_stream_stops_feeder() {
        let (alive, stopped) = oneshot::channel::<()>();
        let feeder = tokio::spawn(async move {
            let _alive = alive;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let stream = RequestStream::with_feeder(futures::stream::empty(), feeder);
        drop(stream);
        assert!(stopped.await.is_err());
    }
}
