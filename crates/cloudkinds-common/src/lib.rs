//! Common types for CloudKinds: CRDs, resource events, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kind;
pub mod metrics;
pub mod resource;
pub mod retry;
pub mod telemetry;

pub use error::Error;
pub use kind::ResourceKind;
pub use resource::{ReconcileRequest, ResourceAction, ResourceEvent, ResourceReference};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the CloudProvider CRD and of every default kind
pub const CLOUDKINDS_GROUP: &str = "cloudkinds.k8s.io";

/// Version assigned to kinds configured without an explicit version
pub const DEFAULT_VERSION: &str = "v1alpha1";

/// Kinds that are always registered and watched
pub const DEFAULT_KINDS: &[&str] = &["CloudResource", "MySQL"];

/// Field manager used for server-side apply and the Kubernetes event reporter
pub const FIELD_MANAGER: &str = "cloudkinds-controller";

/// Finalizer placed on target resources so deletions reach the provider
pub const PROVIDER_FINALIZER: &str = "cloudkinds.k8s.io/provider-notification";

/// CRD category shared by every registered kind (`kubectl get cloudkinds`)
pub const KIND_CATEGORY: &str = "cloudkinds";
