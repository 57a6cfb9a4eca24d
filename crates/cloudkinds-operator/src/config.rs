//! Operator configuration
//!
//! Settings come from an optional YAML file and from the command line; CLI
//! values win. Kinds from both sources are merged with the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde::Deserialize;

use cloudkinds_common::retry::RetryConfig;
use cloudkinds_common::telemetry::LogFormat;
use cloudkinds_common::{ResourceKind, DEFAULT_KINDS};
use cloudkinds_controller::engine::PROVIDER_MISSING_REQUEUE;
use cloudkinds_controller::watch::DEFAULT_CONCURRENCY;
use cloudkinds_controller::{DispatcherConfig, ReconcilePolicy, WatchConfig};

const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ERROR_BACKOFF_BASE_SECS: u64 = 1;
const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Options shared by every command
#[derive(Args, Debug, Default, Clone)]
pub struct ControllerArgs {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "CLOUDKINDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Additional kind to watch, as Kind or Kind.version.group (repeatable)
    #[arg(long = "kind", env = "CLOUDKINDS_KINDS", value_delimiter = ',')]
    pub kinds: Vec<String>,

    /// Only watch resources in this namespace
    #[arg(long, env = "CLOUDKINDS_NAMESPACE")]
    pub namespace: Option<String>,

    /// Webhook request timeout in seconds, 0 disables it
    #[arg(long)]
    pub webhook_timeout_secs: Option<u64>,

    /// Delay before retrying a resource whose kind has no provider
    #[arg(long)]
    pub provider_missing_requeue_secs: Option<u64>,

    /// Concurrent reconciliations per kind
    #[arg(long)]
    pub concurrency: Option<u16>,

    /// Hold deletions until the provider has been notified
    #[arg(long)]
    pub manage_finalizers: bool,

    /// Log output format: pretty or json
    #[arg(long, env = "CLOUDKINDS_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

/// Contents of the YAML configuration file
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    /// Additional kinds to watch
    #[serde(default)]
    pub kinds: Vec<String>,
    /// Only watch resources in this namespace
    pub namespace: Option<String>,
    /// Webhook request timeout in seconds, 0 disables it
    pub webhook_timeout_secs: Option<u64>,
    /// Delay before retrying a resource whose kind has no provider
    pub provider_missing_requeue_secs: Option<u64>,
    /// Concurrent reconciliations per kind
    pub concurrency: Option<u16>,
    /// Hold deletions until the provider has been notified
    pub manage_finalizers: Option<bool>,
    /// First delay of the per-resource error backoff
    pub error_backoff_base_secs: Option<u64>,
    /// Largest delay of the per-resource error backoff
    pub error_backoff_max_secs: Option<u64>,
}

impl FileConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse configuration from YAML; an empty document is an empty config
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }
}

/// Fully resolved operator settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Kinds to register and watch, defaults first
    pub kinds: Vec<ResourceKind>,
    /// Webhook client configuration
    pub dispatcher: DispatcherConfig,
    /// Engine retry policy
    pub policy: ReconcilePolicy,
    /// Watch harness configuration
    pub watch: WatchConfig,
}

impl Settings {
    /// Load the file named by `args`, if any, and merge it with `args`
    pub fn load(args: &ControllerArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Merge CLI arguments over file configuration
    pub fn resolve(args: &ControllerArgs, file: FileConfig) -> anyhow::Result<Self> {
        let kinds = merge_kinds(&file.kinds, &args.kinds)?;

        let timeout_secs = args
            .webhook_timeout_secs
            .or(file.webhook_timeout_secs)
            .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS);

        let provider_missing_requeue = args
            .provider_missing_requeue_secs
            .or(file.provider_missing_requeue_secs)
            .map(Duration::from_secs)
            .unwrap_or(PROVIDER_MISSING_REQUEUE);
        if provider_missing_requeue.is_zero() {
            anyhow::bail!("providerMissingRequeueSecs must be greater than 0");
        }

        let concurrency = args
            .concurrency
            .or(file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        let backoff_base = file
            .error_backoff_base_secs
            .unwrap_or(DEFAULT_ERROR_BACKOFF_BASE_SECS);
        let backoff_max = file
            .error_backoff_max_secs
            .unwrap_or(DEFAULT_ERROR_BACKOFF_MAX_SECS);
        if backoff_base == 0 || backoff_base > backoff_max {
            anyhow::bail!(
                "errorBackoffBaseSecs ({backoff_base}) must be > 0 and <= errorBackoffMaxSecs ({backoff_max})"
            );
        }

        Ok(Self {
            kinds,
            dispatcher: DispatcherConfig::with_timeout_secs(timeout_secs),
            policy: ReconcilePolicy {
                provider_missing_requeue,
                manage_finalizers: args.manage_finalizers || file.manage_finalizers.unwrap_or(false),
            },
            watch: WatchConfig {
                namespace: args.namespace.clone().or(file.namespace),
                concurrency,
                error_backoff: RetryConfig {
                    max_attempts: 0,
                    initial_delay: Duration::from_secs(backoff_base),
                    max_delay: Duration::from_secs(backoff_max),
                    backoff_multiplier: 2.0,
                },
            },
        })
    }
}

/// Defaults, then file kinds, then CLI kinds, without duplicates
fn merge_kinds(file: &[String], cli: &[String]) -> anyhow::Result<Vec<ResourceKind>> {
    let mut kinds: Vec<ResourceKind> = Vec::new();
    let configured = DEFAULT_KINDS
        .iter()
        .copied()
        .chain(file.iter().map(String::as_str))
        .chain(cli.iter().map(String::as_str))
        .filter(|k| !k.trim().is_empty());

    for raw in configured {
        let kind: ResourceKind = raw
            .parse()
            .with_context(|| format!("invalid kind '{raw}'"))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn kind_names(settings: &Settings) -> Vec<String> {
        settings.kinds.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn defaults_without_any_configuration() {
        let settings = Settings::resolve(&ControllerArgs::default(), FileConfig::default()).unwrap();

        assert_eq!(
            kind_names(&settings),
            vec![
                "CloudResource.v1alpha1.cloudkinds.k8s.io",
                "MySQL.v1alpha1.cloudkinds.k8s.io"
            ]
        );
        assert_eq!(settings.dispatcher.timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.policy.provider_missing_requeue, Duration::from_secs(30));
        assert!(!settings.policy.manage_finalizers);
        assert_eq!(settings.watch.concurrency, 8);
        assert_eq!(settings.watch.namespace, None);
        assert_eq!(settings.watch.error_backoff.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn kinds_are_merged_in_order_without_duplicates() {
        let file = FileConfig {
            kinds: vec!["Redis".to_string(), "MySQL".to_string()],
            ..Default::default()
        };
        let args = ControllerArgs {
            kinds: vec![
                "Redis.v1alpha1.cloudkinds.k8s.io".to_string(),
                "Bucket.v1.storage.example.com".to_string(),
            ],
            ..Default::default()
        };

        let settings = Settings::resolve(&args, file).unwrap();
        assert_eq!(
            kind_names(&settings),
            vec![
                "CloudResource.v1alpha1.cloudkinds.k8s.io",
                "MySQL.v1alpha1.cloudkinds.k8s.io",
                "Redis.v1alpha1.cloudkinds.k8s.io",
                "Bucket.v1.storage.example.com",
            ]
        );
    }

    #[test]
    fn cli_overrides_file() {
        let file = FileConfig {
            namespace: Some("from-file".to_string()),
            webhook_timeout_secs: Some(10),
            concurrency: Some(2),
            ..Default::default()
        };
        let args = ControllerArgs {
            namespace: Some("from-cli".to_string()),
            webhook_timeout_secs: Some(0),
            ..Default::default()
        };

        let settings = Settings::resolve(&args, file).unwrap();
        assert_eq!(settings.watch.namespace.as_deref(), Some("from-cli"));
        assert_eq!(settings.dispatcher.timeout, None);
        assert_eq!(settings.watch.concurrency, 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_kind = ControllerArgs {
            kinds: vec!["mysql".to_string()],
            ..Default::default()
        };
        assert!(Settings::resolve(&bad_kind, FileConfig::default()).is_err());

        let zero = ControllerArgs {
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(Settings::resolve(&zero, FileConfig::default()).is_err());

        let inverted = FileConfig {
            error_backoff_base_secs: Some(600),
            error_backoff_max_secs: Some(60),
            ..Default::default()
        };
        assert!(Settings::resolve(&ControllerArgs::default(), inverted).is_err());
    }

    #[test]
    fn parses_camel_case_yaml() {
        let config = FileConfig::parse(
            r#"
kinds: [Redis]
namespace: team-a
webhookTimeoutSecs: 5
providerMissingRequeueSecs: 60
concurrency: 4
manageFinalizers: true
errorBackoffBaseSecs: 2
errorBackoffMaxSecs: 120
"#,
        )
        .unwrap();

        assert_eq!(config.kinds, vec!["Redis".to_string()]);
        assert_eq!(config.webhook_timeout_secs, Some(5));
        assert_eq!(config.manage_finalizers, Some(true));
        assert_eq!(config.error_backoff_max_secs, Some(120));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("webhookTimeout: 5").is_err());
        assert_eq!(FileConfig::parse("  \n").unwrap(), FileConfig::default());
    }

    #[test]
    fn loads_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "kinds: [Redis]\nmanageFinalizers: true").unwrap();

        let args = ControllerArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let settings = Settings::load(&args).unwrap();
        assert!(settings.policy.manage_finalizers);
        assert_eq!(settings.kinds.len(), 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let args = ControllerArgs {
            config: Some(PathBuf::from("/nonexistent/cloudkinds.yaml")),
            ..Default::default()
        };
        assert!(Settings::load(&args).is_err());
    }
}
