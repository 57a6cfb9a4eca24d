//! Access to the resources being reconciled
//!
//! Targets are read as `DynamicObject` since their kinds are only known at
//! runtime and their schema is open.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use cloudkinds_common::{Error, ReconcileRequest, Result};

/// Reads and updates target resources.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Fetch the object; `Ok(None)` when it no longer exists
    async fn get(&self, request: &ReconcileRequest) -> Result<Option<DynamicObject>>;

    /// Replace the object's finalizers.
    ///
    /// `resource_version` makes the write conditional on the object being
    /// unchanged since it was read.
    async fn set_finalizers(
        &self,
        request: &ReconcileRequest,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<()>;
}

/// Store backed by the Kubernetes API
pub struct KubeTargetStore {
    client: Client,
}

impl KubeTargetStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, request: &ReconcileRequest) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &request.namespace,
            &request.kind.api_resource(),
        )
    }
}

fn fetch_error(request: &ReconcileRequest, e: kube::Error) -> Error {
    Error::object_fetch(
        &request.namespace,
        &request.name,
        request.kind.kind(),
        e.to_string(),
    )
}

#[async_trait]
impl TargetStore for KubeTargetStore {
    async fn get(&self, request: &ReconcileRequest) -> Result<Option<DynamicObject>> {
        self.api(request)
            .get_opt(&request.name)
            .await
            .map_err(|e| fetch_error(request, e))
    }

    async fn set_finalizers(
        &self,
        request: &ReconcileRequest,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<()> {
        let patch = finalizers_patch(finalizers, resource_version);
        self.api(request)
            .patch(&request.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| fetch_error(request, e))?;
        Ok(())
    }
}

fn finalizers_patch(finalizers: Vec<String>, resource_version: Option<String>) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(rv);
    }
    serde_json::json!({ "metadata": metadata })
}
