//! Custom Resource Definitions for CloudKinds
//!
//! Only the provider catalog is a typed CRD. Watched cloud resource kinds are
//! registered at runtime with an open schema, see the controller's kind
//! registry.

mod cloud_provider;

pub use cloud_provider::{CloudProvider, CloudProviderSpec};
