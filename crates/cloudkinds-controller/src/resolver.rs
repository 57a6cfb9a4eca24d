//! Provider resolution
//!
//! Finds the single CloudProvider in a namespace that advertises a kind.
//! Every call reads the catalog fresh; nothing is cached.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use cloudkinds_common::crd::CloudProvider;
use cloudkinds_common::{Error, Result};

/// Source of the providers registered in a namespace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    /// List every provider in the namespace
    async fn list_providers(&self, namespace: &str) -> Result<Vec<CloudProvider>>;
}

/// Catalog backed by CloudProvider objects in the cluster
pub struct KubeProviderCatalog {
    client: Client,
}

impl KubeProviderCatalog {
    /// Create a catalog reading through the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderCatalog for KubeProviderCatalog {
    async fn list_providers(&self, namespace: &str) -> Result<Vec<CloudProvider>> {
        let api: Api<CloudProvider> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::catalog(namespace, e.to_string()))?;
        Ok(list.items)
    }
}

/// Resolves the provider responsible for a kind within a namespace
#[derive(Clone)]
pub struct ProviderResolver {
    catalog: Arc<dyn ProviderCatalog>,
}

impl ProviderResolver {
    /// Create a resolver over the given catalog
    pub fn new(catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self { catalog }
    }

    /// Find the provider advertising `kind` in `namespace`.
    ///
    /// Returns `ProviderNotFound` when no provider matches and
    /// `AmbiguousProvider` when more than one does.
    pub async fn resolve(&self, namespace: &str, kind: &str) -> Result<CloudProvider> {
        let providers = self.catalog.list_providers(namespace).await?;
        let total = providers.len();

        let mut matches: Vec<CloudProvider> =
            providers.into_iter().filter(|p| p.handles(kind)).collect();

        debug!(namespace, kind, total, matched = matches.len(), "resolved providers");

        match matches.len() {
            0 => Err(Error::provider_not_found(namespace, kind)),
            1 => Ok(matches.remove(0)),
            _ => {
                let mut names: Vec<String> = matches.iter().map(|p| p.name_any()).collect();
                names.sort();
                Err(Error::ambiguous_provider(namespace, kind, names))
            }
        }
    }
}
