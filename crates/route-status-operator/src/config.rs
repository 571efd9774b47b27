//! Operator configuration
//!
//! Loaded from a YAML file when `ROUTE_STATUS_CONFIG` names one, otherwise
//! from `ROUTE_STATUS_*` environment variables. Missing values fall back to
//! the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::class::ClassFilter;
use crate::health::DEFAULT_HEALTH_PORT;
use crate::resource::ResourceKind;
use crate::sync::DEFAULT_RESYNC_CONCURRENCY;

/// Environment variables read by [`OperatorConfig::from_env`]
pub mod env {
    pub const CONFIG_FILE: &str = "ROUTE_STATUS_CONFIG";
    pub const SERVICE_NAMESPACE: &str = "ROUTE_STATUS_SERVICE_NAMESPACE";
    pub const SERVICE_NAME: &str = "ROUTE_STATUS_SERVICE_NAME";
    pub const INGRESS_CLASS: &str = "ROUTE_STATUS_INGRESS_CLASS";
    pub const DEFAULT_CLASS: &str = "ROUTE_STATUS_DEFAULT_CLASS";
    pub const KINDS: &str = "ROUTE_STATUS_KINDS";
    pub const RESYNC_CONCURRENCY: &str = "ROUTE_STATUS_RESYNC_CONCURRENCY";
    pub const HEALTH_PORT: &str = "ROUTE_STATUS_HEALTH_PORT";
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration for the status operator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Namespace of the proxy Service
    pub service_namespace: String,
    /// Name of the proxy Service
    pub service_name: String,
    /// Ingress class this controller owns; empty means unclassed resources
    pub ingress_class: String,
    /// Extra class claimed when `ingress_class` is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_class: Option<String>,
    /// Routing resource kinds whose status is maintained
    pub kinds: Vec<ResourceKind>,
    /// Parallel status patches during a re-sync
    pub resync_concurrency: usize,
    /// Port for the health check server
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            service_namespace: "projectcontour".to_string(),
            service_name: "envoy".to_string(),
            ingress_class: String::new(),
            default_class: None,
            kinds: ResourceKind::ALL.to_vec(),
            resync_concurrency: DEFAULT_RESYNC_CONCURRENCY,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl OperatorConfig {
    /// Load from the file named by `ROUTE_STATUS_CONFIG`, or the environment
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(env::CONFIG_FILE) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Self::from_env(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `ROUTE_STATUS_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(env::SERVICE_NAMESPACE) {
            config.service_namespace = v;
        }
        if let Some(v) = lookup(env::SERVICE_NAME) {
            config.service_name = v;
        }
        if let Some(v) = lookup(env::INGRESS_CLASS) {
            config.ingress_class = v;
        }
        config.default_class = lookup(env::DEFAULT_CLASS).filter(|v| !v.is_empty());

        if let Some(v) = lookup(env::KINDS) {
            config.kinds = parse_kinds(&v)?;
        }
        if let Some(v) = lookup(env::RESYNC_CONCURRENCY) {
            config.resync_concurrency = parse_number(env::RESYNC_CONCURRENCY, &v)?;
        }
        if let Some(v) = lookup(env::HEALTH_PORT) {
            config.health_port = parse_number(env::HEALTH_PORT, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_namespace.is_empty() {
            return Err(ConfigError::Invalid(
                "serviceNamespace cannot be empty".to_string(),
            ));
        }
        if self.service_name.is_empty() {
            return Err(ConfigError::Invalid("serviceName cannot be empty".to_string()));
        }
        if self.kinds.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one resource kind must be tracked".to_string(),
            ));
        }
        if self.resync_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "resyncConcurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Class filter for this controller instance
    pub fn class_filter(&self) -> ClassFilter {
        ClassFilter::new(self.ingress_class.clone()).with_default_class(self.default_class.clone())
    }
}

/// Comma-separated kinds; duplicates collapse, order is kept
fn parse_kinds(value: &str) -> Result<Vec<ResourceKind>, ConfigError> {
    let mut kinds = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind: ResourceKind = part.parse().map_err(|reason| ConfigError::InvalidValue {
            var: env::KINDS,
            value: part.to_string(),
            reason,
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
