//! Operator startup
//!
//! Installs the CloudProvider CRD, registers every configured kind and starts
//! one watch per kind that registered successfully.

use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use kube::{Client, CustomResourceExt};
use tracing::{error, info};

use cloudkinds_common::crd::CloudProvider;
use cloudkinds_common::events::KubeEventPublisher;
use cloudkinds_common::{ResourceKind, DEFAULT_VERSION, FIELD_MANAGER};
use cloudkinds_controller::registry::build_crd;
use cloudkinds_controller::{
    register_kinds, serve, ChangeSubscription, CrdKindRegistry, HttpDispatcher, KubeCrdClient,
    KubeProviderCatalog, KubeSubscription, KubeTargetStore, ProviderResolver, ReconcileEngine,
};

use crate::config::Settings;

/// Render the CloudProvider CRD and the CRDs of every configured kind as YAML
pub fn render_crds(kinds: &[ResourceKind]) -> anyhow::Result<String> {
    let mut docs = vec![serde_yaml::to_string(&CloudProvider::crd())
        .context("failed to serialize CloudProvider CRD")?];
    for kind in kinds {
        let crd = build_crd(kind)?;
        docs.push(
            serde_yaml::to_string(&crd)
                .with_context(|| format!("failed to serialize CRD for {kind}"))?,
        );
    }
    Ok(docs.join("---\n"))
}

/// Wire the production collaborators into an engine
fn build_engine(client: Client, settings: &Settings) -> anyhow::Result<ReconcileEngine> {
    let dispatcher = HttpDispatcher::new(settings.dispatcher.clone())?;
    Ok(ReconcileEngine::new(
        ProviderResolver::new(Arc::new(KubeProviderCatalog::new(client.clone()))),
        Arc::new(KubeTargetStore::new(client.clone())),
        Arc::new(dispatcher),
        Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER)),
        settings.policy.clone(),
    ))
}

/// Run the controller until every watch has shut down
pub async fn run_controller(settings: Settings) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let registry = CrdKindRegistry::new(Arc::new(KubeCrdClient::new(client.clone())));

    registry
        .ensure(&CloudProvider::crd(), DEFAULT_VERSION)
        .await
        .context("failed to install CloudProvider CRD")?;

    let ready = register_kinds(&registry, &settings.kinds).await;
    if ready.is_empty() {
        anyhow::bail!("none of the {} configured kinds could be registered", settings.kinds.len());
    }

    let engine = Arc::new(build_engine(client.clone(), &settings)?);
    let subscription = KubeSubscription::new(client, settings.watch.clone());
    let concurrency = usize::from(settings.watch.concurrency);

    info!("Starting controllers...");
    let mut watches = Vec::with_capacity(ready.len());
    for kind in &ready {
        match subscription.subscribe(kind) {
            Ok(stream) => watches.push(serve(engine.clone(), stream, concurrency)),
            Err(e) => error!(kind = %kind, error = %e, "failed to watch kind"),
        }
    }
    if watches.is_empty() {
        anyhow::bail!("no kind could be watched");
    }

    join_all(watches).await;
    info!("All controllers stopped, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_provider_and_kind_crds() {
        let yaml = render_crds(&[ResourceKind::cloudkind("MySQL")]).unwrap();
        let docs: Vec<&str> = yaml.split("---\n").collect();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("cloudproviders.cloudkinds.k8s.io"));
        assert!(docs[1].contains("mysqls.cloudkinds.k8s.io"));
        assert!(docs[1].contains("x-kubernetes-preserve-unknown-fields: true"));
    }

    #[test]
    fn rendering_rejects_unregistrable_kinds() {
        assert!(render_crds(&[ResourceKind::new("", "v1", "MySQL")]).is_err());
    }
}
