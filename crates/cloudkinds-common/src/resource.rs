//! Resource change notifications sent to providers
//!
//! Wire format of the webhook body:
//!
//! ```json
//! {"action":"Created","resource":{"apiVersion":"v1alpha1","kind":"MySQL","namespace":"ns1","name":"db1"}}
//! ```

use k8s_openapi::api::core::v1::ObjectReference;
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceKind, Result};

/// What happened to the resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceAction {
    /// The resource was created
    Created,
    /// The resource spec changed
    Updated,
    /// The resource is being deleted
    Deleted,
}

impl ResourceAction {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        }
    }
}

impl std::fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinates of the resource an event is about
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReference {
    /// apiVersion of the resource
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Kind of the resource
    pub kind: String,
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
}

/// A change notification delivered to a provider webhook
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// What happened
    pub action: ResourceAction,
    /// Which resource it happened to
    pub resource: ResourceReference,
}

impl ResourceEvent {
    /// Build an event for a reconcile request
    pub fn new(action: ResourceAction, request: &ReconcileRequest) -> Self {
        Self {
            action,
            resource: ResourceReference {
                api_version: request.kind.api_version(),
                kind: request.kind.kind().to_string(),
                namespace: request.namespace.clone(),
                name: request.name.clone(),
            },
        }
    }

    /// Serialize to the canonical JSON body
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Parse an event from a JSON body
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// A request to reconcile one resource, produced by a change subscription
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
    /// Kind of the resource
    pub kind: ResourceKind,
}

impl ReconcileRequest {
    /// Create a new request
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }

    /// Reference used to attach Kubernetes Events to the resource
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.kind.api_version()),
            kind: Some(self.kind.kind().to_string()),
            namespace: Some(self.namespace.clone()),
            name: Some(self.name.clone()),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind.kind(), self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_request() -> ReconcileRequest {
        ReconcileRequest::new("ns1", "db1", ResourceKind::new("", "v1alpha1", "MySQL"))
    }

    #[test]
    fn created_event_wire_format() {
        let event = ResourceEvent::new(ResourceAction::Created, &mysql_request());
        let body = String::from_utf8(event.to_json().unwrap()).unwrap();
        assert_eq!(
            body,
            r#"{"action":"Created","resource":{"apiVersion":"v1alpha1","kind":"MySQL","namespace":"ns1","name":"db1"}}"#
        );
    }

    #[test]
    fn event_parses_back_from_wire() {
        let event = ResourceEvent::new(ResourceAction::Deleted, &mysql_request());
        let parsed = ResourceEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let body = br#"{"action":"Moved","resource":{"apiVersion":"v1","kind":"K","namespace":"n","name":"x"}}"#;
        assert!(matches!(
            ResourceEvent::from_json(body),
            Err(Error::Serialization { .. })
        ));
    }

    #[test]
    fn object_reference_points_at_resource() {
        let request = ReconcileRequest::new("ns1", "db1", ResourceKind::cloudkind("MySQL"));
        let reference = request.object_reference();
        assert_eq!(reference.api_version.as_deref(), Some("cloudkinds.k8s.io/v1alpha1"));
        assert_eq!(reference.kind.as_deref(), Some("MySQL"));
        assert_eq!(reference.namespace.as_deref(), Some("ns1"));
        assert_eq!(reference.name.as_deref(), Some("db1"));
        assert_eq!(request.to_string(), "MySQL ns1/db1");
    }
}
