//! Error types for the CloudKinds controller
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the coordinates of the reconciliation it belongs to
//! (namespace, kind, provider) so a single log line is enough to locate the
//! misbehaving provider or resource.

use thiserror::Error;

/// Main error type for CloudKinds operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// No provider in the namespace advertises the kind
    #[error("no provider registered for kind: {kind} in namespace {namespace}")]
    ProviderNotFound {
        /// Namespace that was searched
        namespace: String,
        /// Kind name that was requested
        kind: String,
    },

    /// More than one provider in the namespace advertises the kind
    #[error("ambiguous provider for kind {kind} in namespace {namespace}: {}", providers.join(", "))]
    AmbiguousProvider {
        /// Namespace that was searched
        namespace: String,
        /// Kind name that was requested
        kind: String,
        /// Names of every provider advertising the kind
        providers: Vec<String>,
    },

    /// Listing the provider catalog failed
    #[error("failed to list providers in namespace {namespace}: {message}")]
    Catalog {
        /// Namespace that was listed
        namespace: String,
        /// Description of what failed
        message: String,
    },

    /// Reading or updating the target resource failed for a reason other than absence
    #[error("failed to access {kind} {namespace}/{name}: {message}")]
    ObjectFetch {
        /// Namespace of the target resource
        namespace: String,
        /// Name of the target resource
        name: String,
        /// Kind of the target resource
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// The webhook call never produced an HTTP response
    #[error("webhook transport error for {url}: {message}")]
    Transport {
        /// Provider webhook URL
        url: String,
        /// Description of what failed
        message: String,
        /// Whether the configured timeout elapsed
        timed_out: bool,
    },

    /// The provider answered with a status other than 200
    #[error("provider {provider} rejected event: {status} {url} {body}")]
    ProviderRejected {
        /// Name of the provider that rejected the event
        provider: String,
        /// Provider webhook URL
        url: String,
        /// HTTP status code returned
        status: u16,
        /// Response body returned by the provider
        body: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Registering the schema of a kind failed
    #[error("failed to register kind {kind}: {message}")]
    Registration {
        /// Kind being registered
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// The channel between the watch harness and the engine closed
    #[error("subscription for {kind} closed: {message}")]
    Subscription {
        /// Kind whose subscription closed
        kind: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a provider-not-found error
    pub fn provider_not_found(namespace: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::ProviderNotFound {
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    /// Create an ambiguous-provider error
    pub fn ambiguous_provider(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        providers: Vec<String>,
    ) -> Self {
        Self::AmbiguousProvider {
            namespace: namespace.into(),
            kind: kind.into(),
            providers,
        }
    }

    /// Create a catalog listing error
    pub fn catalog(namespace: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Catalog {
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create an object access error
    pub fn object_fetch(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ObjectFetch {
            namespace: namespace.into(),
            name: name.into(),
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a transport error
    pub fn transport(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: msg.into(),
            timed_out: false,
        }
    }

    /// Create a transport error for an elapsed timeout
    pub fn transport_timeout(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: msg.into(),
            timed_out: true,
        }
    }

    /// Create a provider rejection error
    pub fn provider_rejected(
        provider: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self::ProviderRejected {
            provider: provider.into(),
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a registration error for a kind
    pub fn registration(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Registration {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a subscription error for a kind
    pub fn subscription(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Subscription {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Missing or ambiguous providers are retryable because an operator may
    /// fix the catalog at any time. Provider rejections and transport failures
    /// are retryable from the harness' point of view even though the engine
    /// never retries them itself. Validation and serialization errors require
    /// a code or configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::ProviderNotFound { .. } => true,
            Error::AmbiguousProvider { .. } => true,
            Error::Catalog { .. } => true,
            Error::ObjectFetch { .. } => true,
            Error::Transport { .. } => true,
            Error::ProviderRejected { .. } => true,
            Error::Serialization { .. } => false,
            Error::Registration { .. } => true,
            Error::Validation { .. } => false,
            Error::Subscription { .. } => true,
        }
    }
}
