//! Kind registration
//!
//! Every watched kind needs a CustomResourceDefinition before it can be
//! listed or watched. Kinds are registered with an open schema: the
//! controller only reads their metadata, the provider owns their spec.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames,
    CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceSubresourceStatus,
    CustomResourceSubresources, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{error, info};

use cloudkinds_common::retry::{retry_with_backoff, RetryConfig};
use cloudkinds_common::{Error, ResourceKind, Result, FIELD_MANAGER, KIND_CATEGORY};

/// Makes kinds known to the API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KindRegistry: Send + Sync {
    /// Register `kind`; registering an already served kind is a no-op
    async fn register(&self, kind: &ResourceKind) -> Result<()>;
}

/// Minimal CustomResourceDefinition access
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CrdClient: Send + Sync {
    /// Fetch a CRD by name
    async fn get(&self, name: &str) -> Result<Option<CustomResourceDefinition>>;

    /// Server-side apply a CRD
    async fn apply(&self, crd: &CustomResourceDefinition) -> Result<()>;
}

/// CRD access through the Kubernetes API
pub struct KubeCrdClient {
    client: Client,
}

impl KubeCrdClient {
    /// Create a CRD client using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrdClient for KubeCrdClient {
    async fn get(&self, name: &str) -> Result<Option<CustomResourceDefinition>> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(crds.get_opt(name).await?)
    }

    async fn apply(&self, crd: &CustomResourceDefinition) -> Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let name = crd.metadata.name.as_deref().unwrap_or_default();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        crds.patch(name, &params, &Patch::Apply(crd)).await?;
        Ok(())
    }
}

/// Registry installing one CRD per kind
pub struct CrdKindRegistry {
    crds: Arc<dyn CrdClient>,
    wait: RetryConfig,
}

impl CrdKindRegistry {
    /// Create a registry waiting up to ~30s for each CRD to become established
    pub fn new(crds: Arc<dyn CrdClient>) -> Self {
        Self::with_wait(
            crds,
            RetryConfig {
                max_attempts: 10,
                ..Default::default()
            },
        )
    }

    /// Create a registry with a custom establishment wait
    pub fn with_wait(crds: Arc<dyn CrdClient>, wait: RetryConfig) -> Self {
        Self { crds, wait }
    }

    /// Apply `crd` unless it already serves `version`, then wait until it is established
    pub async fn ensure(&self, crd: &CustomResourceDefinition, version: &str) -> Result<()> {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let existing = self
            .crds
            .get(&name)
            .await
            .map_err(|e| Error::registration(&name, e.to_string()))?;

        if let Some(existing) = &existing {
            if serves_version(existing, version) {
                info!(crd = %name, version, "CRD already registered");
                return Ok(());
            }
        }

        let mut desired = crd.clone();
        if let Some(existing) = existing {
            // keep every served version; the existing storage version stays put
            let mut versions = existing.spec.versions;
            for mut v in desired.spec.versions {
                if !versions.iter().any(|known| known.name == v.name) {
                    v.storage = false;
                    versions.push(v);
                }
            }
            desired.spec.versions = versions;
        }

        info!("Installing {} CRD...", name);
        self.crds
            .apply(&desired)
            .await
            .map_err(|e| Error::registration(&name, e.to_string()))?;

        retry_with_backoff(&self.wait, &format!("wait for {name}"), || {
            let crds = self.crds.clone();
            let name = name.clone();
            async move {
                match crds.get(&name).await {
                    Ok(Some(crd)) if is_established(&crd) => Ok(()),
                    Ok(_) => Err(Error::registration(&name, "CRD not yet established")),
                    Err(e) => Err(Error::registration(&name, e.to_string())),
                }
            }
        })
        .await?;

        info!(crd = %name, "CRD established");
        Ok(())
    }
}

#[async_trait]
impl KindRegistry for CrdKindRegistry {
    async fn register(&self, kind: &ResourceKind) -> Result<()> {
        let crd = build_crd(kind)?;
        self.ensure(&crd, kind.version()).await
    }
}

/// Register every kind, skipping the ones that fail.
///
/// Returns the kinds that are ready to watch, in input order.
pub async fn register_kinds(
    registry: &dyn KindRegistry,
    kinds: &[ResourceKind],
) -> Vec<ResourceKind> {
    let mut ready = Vec::with_capacity(kinds.len());
    for kind in kinds {
        match registry.register(kind).await {
            Ok(()) => ready.push(kind.clone()),
            Err(e) => error!(kind = %kind, error = %e, "failed to register kind, it will not be watched"),
        }
    }
    ready
}

/// Build the open-schema CRD backing a kind
pub fn build_crd(kind: &ResourceKind) -> Result<CustomResourceDefinition> {
    if kind.group().is_empty() {
        return Err(Error::registration(
            kind.kind(),
            "kinds without an API group cannot be registered",
        ));
    }

    let open_schema = JSONSchemaProps {
        type_: Some("object".to_string()),
        x_kubernetes_preserve_unknown_fields: Some(true),
        ..Default::default()
    };

    Ok(CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(kind.crd_name()),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: kind.group().to_string(),
            names: CustomResourceDefinitionNames {
                kind: kind.kind().to_string(),
                list_kind: Some(format!("{}List", kind.kind())),
                plural: kind.plural(),
                singular: Some(kind.kind().to_lowercase()),
                categories: Some(vec![KIND_CATEGORY.to_string()]),
                short_names: None,
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: kind.version().to_string(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(open_schema),
                }),
                subresources: Some(CustomResourceSubresources {
                    status: Some(CustomResourceSubresourceStatus(serde_json::json!({}))),
                    scale: None,
                }),
                additional_printer_columns: Some(vec![CustomResourceColumnDefinition {
                    name: "Age".to_string(),
                    type_: "date".to_string(),
                    json_path: ".metadata.creationTimestamp".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    })
}

fn serves_version(crd: &CustomResourceDefinition, version: &str) -> bool {
    crd.spec
        .versions
        .iter()
        .any(|v| v.name == version && v.served)
}

fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
        .unwrap_or(false)
}
