//! CloudProvider CRD for registering provider webhooks
//!
//! A CloudProvider announces which cloud resource kinds it handles within its
//! namespace and where change notifications for them are delivered.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CloudProvider registers a webhook responsible for a set of kinds.
///
/// Example:
/// ```yaml
/// apiVersion: cloudkinds.k8s.io/v1alpha1
/// kind: CloudProvider
/// metadata:
///   name: aws
///   namespace: ns1
/// spec:
///   kinds: [MySQL, CloudResource]
///   webhook: http://aws-provider.ns1.svc/hook
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudkinds.k8s.io",
    version = "v1alpha1",
    kind = "CloudProvider",
    namespaced,
    category = "cloudkinds",
    printcolumn = r#"{"name":"Kinds","type":"string","jsonPath":".spec.kinds"}"#,
    printcolumn = r#"{"name":"Webhook","type":"string","jsonPath":".spec.webhook"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderSpec {
    /// Kind names this provider handles within its namespace
    #[serde(default)]
    pub kinds: Vec<String>,

    /// URL that receives resource events
    #[serde(alias = "webHook")]
    pub webhook: String,
}

impl CloudProvider {
    /// Whether this provider advertises the kind (case-sensitive)
    pub fn handles(&self, kind: &str) -> bool {
        self.spec.kinds.iter().any(|k| k == kind)
    }

    /// Webhook URL events are posted to
    pub fn webhook(&self) -> &str {
        &self.spec.webhook
    }

    /// `namespace/name` of this provider for logs and errors
    pub fn display_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }
}
