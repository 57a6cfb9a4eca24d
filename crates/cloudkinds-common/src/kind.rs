//! Identity of a watched cloud resource kind
//!
//! Kinds are configured as either a bare `Kind`, which lands in the default
//! `cloudkinds.k8s.io/v1alpha1` group version, or fully qualified as
//! `Kind.version.group` (e.g. `MySQL.v1alpha1.cloudkinds.k8s.io`).

use std::fmt;
use std::str::FromStr;

use kube::api::{ApiResource, GroupVersionKind};

use crate::{Error, CLOUDKINDS_GROUP, DEFAULT_VERSION};

/// A resource type watched by the controller.
///
/// Immutable once registered. An empty group denotes a core-style kind whose
/// apiVersion is the bare version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    group: String,
    version: String,
    kind: String,
}

impl ResourceKind {
    /// Create a kind from its group, version and kind name
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Create a kind in the default CloudKinds group and version
    pub fn cloudkind(kind: impl Into<String>) -> Self {
        Self::new(CLOUDKINDS_GROUP, DEFAULT_VERSION, kind)
    }

    /// API group, empty for core-style kinds
    pub fn group(&self) -> &str {
        &self.group
    }

    /// API version within the group
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Kind name, e.g. `MySQL`
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The `apiVersion` string objects of this kind carry
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Lowercase plural resource name, e.g. `mysqls`
    pub fn plural(&self) -> String {
        pluralize_kind(&self.kind)
    }

    /// Name of the CustomResourceDefinition backing this kind
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural(), self.group)
    }

    /// Dynamic API resource used to read objects of this kind
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.splitn(3, '.');
        let kind = parts.next().unwrap_or_default();
        validate_kind_name(kind)?;

        match (parts.next(), parts.next()) {
            (None, _) => Ok(Self::cloudkind(kind)),
            (Some(version), Some(group)) if !version.is_empty() && !group.is_empty() => {
                Ok(Self::new(group, version, kind))
            }
            _ => Err(Error::validation(format!(
                "invalid kind '{s}': expected Kind or Kind.version.group"
            ))),
        }
    }
}

fn validate_kind_name(kind: &str) -> crate::Result<()> {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {}
        _ => {
            return Err(Error::validation(format!(
                "invalid kind '{kind}': must start with an uppercase letter"
            )))
        }
    }
    if !chars.all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::validation(format!(
            "invalid kind '{kind}': must be alphanumeric"
        )));
    }
    Ok(())
}

/// Pluralize a kind name the way CRD scaffolding does
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh")
    {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_kind_uses_default_group_version() {
        let kind: ResourceKind = "MySQL".parse().unwrap();
        assert_eq!(kind.group(), "cloudkinds.k8s.io");
        assert_eq!(kind.version(), "v1alpha1");
        assert_eq!(kind.api_version(), "cloudkinds.k8s.io/v1alpha1");
        assert_eq!(kind.crd_name(), "mysqls.cloudkinds.k8s.io");
    }

    #[test]
    fn qualified_kind_keeps_dotted_group() {
        let kind: ResourceKind = "Bucket.v1beta1.storage.example.com".parse().unwrap();
        assert_eq!(kind.kind(), "Bucket");
        assert_eq!(kind.version(), "v1beta1");
        assert_eq!(kind.group(), "storage.example.com");
        assert_eq!(kind.to_string(), "Bucket.v1beta1.storage.example.com");
    }

    #[test]
    fn core_style_kind_has_bare_api_version() {
        let kind = ResourceKind::new("", "v1alpha1", "MySQL");
        assert_eq!(kind.api_version(), "v1alpha1");
    }

    #[test]
    fn malformed_kinds_are_rejected() {
        assert!("".parse::<ResourceKind>().is_err());
        assert!("mysql".parse::<ResourceKind>().is_err());
        assert!("MySQL.v1".parse::<ResourceKind>().is_err());
        assert!("My-SQL".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn api_resource_matches_kind() {
        let ar = ResourceKind::cloudkind("CloudResource").api_resource();
        assert_eq!(ar.plural, "cloudresources");
        assert_eq!(ar.api_version, "cloudkinds.k8s.io/v1alpha1");
        assert_eq!(ar.kind, "CloudResource");
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("MySQL"), "mysqls");
        assert_eq!(pluralize_kind("Redis"), "redises");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
        assert_eq!(pluralize_kind("Mailbox"), "mailboxes");
    }
}
