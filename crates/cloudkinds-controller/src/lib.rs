//! CloudKinds reconcile engine
//!
//! Watches dynamically registered cloud resource kinds and notifies the
//! provider responsible for each kind in a namespace:
//! - Registers a CRD per kind
//! - Resolves the CloudProvider advertising the kind
//! - Posts a resource event to the provider's webhook
//! - Decides whether the change should be retried

#![deny(missing_docs)]

pub mod engine;
pub mod registry;
pub mod resolver;
pub mod subscription;
pub mod target;
pub mod watch;
pub mod webhook;

pub use engine::{ReconcileEngine, ReconcileOutcome, ReconcilePolicy, ReconcileState};
pub use registry::{register_kinds, CrdKindRegistry, KindRegistry, KubeCrdClient};
pub use resolver::{KubeProviderCatalog, ProviderCatalog, ProviderResolver};
pub use subscription::{serve, ChangeSubscription, PendingRequest, RequestStream};
pub use target::{KubeTargetStore, TargetStore};
pub use watch::{KubeSubscription, WatchConfig};
pub use webhook::{
    DispatcherConfig, EncodedEvent, HttpDispatcher, WebhookDispatcher, WebhookResponse,
};
