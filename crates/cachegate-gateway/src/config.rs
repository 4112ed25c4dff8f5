//! Gateway configuration
//!
//! Loaded from YAML or TOML (chosen by file extension), then overridden by
//! `CACHEGATE_*` environment variables, then validated.

use cachegate_core::{MethodId, Tenant};
use cachegate_observability::{DispatchMetrics, LoggingConfig};
use cachegate_routing::{
    ConfigError, ConnectionFactory, DispatchSettings, Dispatcher, DispatcherConfig, PoolConfig,
    build_pools,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::gate::{Authorizer, OpenGate, PolicyGate};
use crate::policy_store::{ANY_METHOD, ApiKeyPolicy, StaticPolicyStore};
use crate::service::CacheService;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub dispatch: TimeoutSettings,

    /// Omitted means an open gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationConfig>,

    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(flatten)]
    pub dispatch: DispatchSettings,

    #[serde(default = "default_policy_timeout_ms")]
    pub policy_timeout_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            dispatch: DispatchSettings::default(),
            policy_timeout_ms: default_policy_timeout_ms(),
        }
    }
}

fn default_policy_timeout_ms() -> u64 {
    500
}

impl TimeoutSettings {
    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }
}

/// Per-tenant API key policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub tenants: BTreeMap<Tenant, Vec<ApiKeyPolicy>>,
}

impl AuthorizationConfig {
    pub fn policy_count(&self) -> usize {
        self.tenants.values().map(Vec::len).sum()
    }

    pub fn to_store(&self) -> StaticPolicyStore {
        self.tenants
            .iter()
            .fold(StaticPolicyStore::new(), |store, (tenant, policies)| {
                store.with_tenant(tenant.clone(), policies.clone())
            })
    }
}

impl GatewayConfig {
    /// Load configuration from file (YAML or TOML)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| GatewayConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            Self::from_toml_str(&contents)
        } else {
            // Default to YAML
            Self::from_yaml_str(&contents)
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, GatewayConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, GatewayConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(level) = std::env::var("CACHEGATE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(val) = std::env::var("CACHEGATE_LOG_JSON") {
            match val.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json = true,
                "0" | "false" | "no" => self.logging.json = false,
                _ => eprintln!("Warning: Invalid CACHEGATE_LOG_JSON '{}', ignoring", val),
            }
        }

        if let Ok(val) = std::env::var("CACHEGATE_CALL_TIMEOUT_MS") {
            match val.parse() {
                Ok(ms) => self.dispatch.dispatch.call_timeout_ms = ms,
                Err(_) => eprintln!("Warning: Invalid CACHEGATE_CALL_TIMEOUT_MS '{}', ignoring", val),
            }
        }

        if let Ok(val) = std::env::var("CACHEGATE_POLICY_TIMEOUT_MS") {
            match val.parse() {
                Ok(ms) => self.dispatch.policy_timeout_ms = ms,
                Err(_) => eprintln!("Warning: Invalid CACHEGATE_POLICY_TIMEOUT_MS '{}', ignoring", val),
            }
        }
    }

    /// Replace `$VAR` / `${VAR}` API key references with their values
    pub fn resolve_env_vars(&mut self) -> Result<(), GatewayConfigError> {
        let Some(authorization) = self.authorization.as_mut() else {
            return Ok(());
        };

        for (tenant, policies) in authorization.tenants.iter_mut() {
            for policy in policies.iter_mut() {
                policy.api_key = resolve_env_var(&policy.api_key).map_err(|e| {
                    GatewayConfigError::EnvVarResolution {
                        tenant: tenant.to_string(),
                        source: Box::new(e),
                    }
                })?;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        self.dispatch.dispatch.validate()?;
        if self.dispatch.policy_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("policy_timeout_ms").into());
        }

        let mut keys = HashSet::new();
        for pool in &self.pools {
            pool.validate()?;
            let key = pool.key();
            if !keys.insert(key.clone()) {
                return Err(ConfigError::DuplicatePool(key.to_string()).into());
            }
        }

        if let Some(authorization) = &self.authorization {
            for (tenant, policies) in &authorization.tenants {
                for policy in policies {
                    if policy.methods.is_empty() {
                        return Err(GatewayConfigError::EmptyMethodList {
                            tenant: tenant.to_string(),
                        });
                    }
                    if let Some(unknown) = policy
                        .methods
                        .iter()
                        .find(|m| m.as_str() != ANY_METHOD && MethodId::cache_method(m).is_none())
                    {
                        return Err(GatewayConfigError::UnknownMethod {
                            tenant: tenant.to_string(),
                            method: unknown.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::from(&self.dispatch.dispatch)
    }

    /// Authorizer for this configuration: a policy gate when an
    /// authorization section is present, an open gate otherwise
    pub fn authorizer(&self, metrics: Option<Arc<DispatchMetrics>>) -> Arc<dyn Authorizer> {
        match &self.authorization {
            Some(authorization) => {
                let mut gate = PolicyGate::new(Arc::new(authorization.to_store()))
                    .with_timeout(self.dispatch.policy_timeout());
                if let Some(metrics) = metrics {
                    gate = gate.with_metrics(metrics);
                }
                Arc::new(gate)
            }
            None => Arc::new(OpenGate),
        }
    }

    /// Build the cache service, asking `factory` for every configured connection.
    ///
    /// API key references are resolved from the environment on a copy of the
    /// configuration, so `self` keeps its `$VAR` placeholders.
    pub fn build_service(
        &self,
        factory: &dyn ConnectionFactory,
        metrics: Option<Arc<DispatchMetrics>>,
    ) -> Result<CacheService, GatewayConfigError> {
        let mut resolved = self.clone();
        resolved.resolve_env_vars()?;
        resolved.validate()?;

        let pools = Arc::new(build_pools(&self.pools, factory)?);
        let mut dispatcher = Dispatcher::new(pools, self.dispatcher_config());
        if let Some(metrics) = &metrics {
            dispatcher = dispatcher.with_metrics(metrics.clone());
            for pool in dispatcher.pools().pools() {
                for record in pool.snapshot() {
                    metrics.set_connection_reachable(
                        pool.tenant().as_str(),
                        pool.subsystem().as_str(),
                        record.id(),
                        record.is_reachable(),
                    );
                }
            }
        }

        Ok(CacheService::new(resolved.authorizer(metrics), Arc::new(dispatcher)))
    }
}

/// Resolve a single environment variable reference
/// Supports: $VAR_NAME or ${VAR_NAME}
/// If no $ prefix, returns value as-is
fn resolve_env_var(value: &str) -> Result<String, GatewayConfigError> {
    let trimmed = value.trim();

    if let Some(var_name) = trimmed.strip_prefix('$') {
        let var_name = var_name
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(var_name);

        std::env::var(var_name).map_err(|_| GatewayConfigError::EnvVarNotFound {
            var_name: var_name.to_string(),
        })
    } else {
        Ok(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum GatewayConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Environment variable not found: {var_name}")]
    EnvVarNotFound { var_name: String },

    #[error("Failed to resolve API key for tenant '{tenant}'")]
    EnvVarResolution {
        tenant: String,
        #[source]
        source: Box<GatewayConfigError>,
    },

    #[error("Tenant '{tenant}' has an API key with no methods")]
    EmptyMethodList { tenant: String },

    #[error("Tenant '{tenant}' grants unknown method '{method}'")]
    UnknownMethod { tenant: String, method: String },

    #[error(transparent)]
    Routing(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
logging:
  level: debug
dispatch:
  call_timeout_ms: 1500
  policy_timeout_ms: 250
authorization:
  tenants:
    cgrates.org:
      - api_key: admin
        methods: ["*"]
      - api_key: reader
        methods: ["CacheSv1.Ping", "CacheSv1.HasItem"]
        expires_at: 2030-01-01T00:00:00Z
pools:
  - tenant: cgrates.org
    subsystem: caches
    strategy:
      type: round-robin
    failover:
      max_attempts: 2
    connections:
      - id: cache1
      - id: cache2
"#;

    #[test]
    fn test_yaml_config() {
        let config = GatewayConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.dispatch.dispatch.call_timeout_ms, 1500);
        assert_eq!(config.dispatch.policy_timeout(), Duration::from_millis(250));
        assert_eq!(config.authorization.as_ref().unwrap().policy_count(), 2);
        assert_eq!(config.pools.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_yaml_str("pools: []").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.dispatch.dispatch.call_timeout_ms, 2000);
        assert_eq!(config.dispatch.policy_timeout_ms, 500);
        assert!(config.authorization.is_none());
    }

    #[test]
    fn test_toml_config() {
        let config = GatewayConfig::from_toml_str(
            r#"
[dispatch]
call_timeout_ms = 750

[[pools]]
tenant = "cgrates.org"
strategy = { type = "broadcast" }

[[pools.connections]]
id = "cache1"
"#,
        )
        .unwrap();
        assert_eq!(config.dispatch.dispatch.call_timeout_ms, 750);
        assert!(config.pools[0].strategy.is_broadcast());
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut config = GatewayConfig::from_yaml_str(YAML).unwrap();
        config
            .authorization
            .as_mut()
            .unwrap()
            .tenants
            .values_mut()
            .for_each(|policies| policies[0].methods = vec!["CacheSv1.Explode".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(GatewayConfigError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_duplicate_pools_rejected() {
        let mut config = GatewayConfig::from_yaml_str(YAML).unwrap();
        config.pools.push(config.pools[0].clone());
        assert!(matches!(
            config.validate(),
            Err(GatewayConfigError::Routing(ConfigError::DuplicatePool(_)))
        ));
    }

    #[test]
    fn test_resolve_env_var_literal() {
        assert_eq!(resolve_env_var("literal-value").unwrap(), "literal-value");
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_api_key_from_env() {
        // Set test env var (serialized test prevents race conditions)
        unsafe {
            std::env::set_var("CACHEGATE_TEST_ADMIN_KEY", "s3cret");
        }

        let mut config = GatewayConfig::from_yaml_str(
            r#"
authorization:
  tenants:
    cgrates.org:
      - api_key: "${CACHEGATE_TEST_ADMIN_KEY}"
        methods: ["*"]
"#,
        )
        .unwrap();
        config.resolve_env_vars().unwrap();

        let tenant = Tenant::new("cgrates.org").unwrap();
        let policies = &config.authorization.as_ref().unwrap().tenants[&tenant];
        assert_eq!(policies[0].api_key, "s3cret");

        unsafe {
            std::env::remove_var("CACHEGATE_TEST_ADMIN_KEY");
        }
    }

    #[test]
    fn test_missing_env_var_reported() {
        let mut config = GatewayConfig::from_yaml_str(
            r#"
authorization:
  tenants:
    cgrates.org:
      - api_key: "$CACHEGATE_TEST_MISSING_KEY_XYZ"
        methods: ["*"]
"#,
        )
        .unwrap();
        let err = config.resolve_env_vars().unwrap_err();
        assert!(matches!(err, GatewayConfigError::EnvVarResolution { .. }));
    }

    struct Pong;

    #[async_trait::async_trait]
    impl cachegate_core::Connection for Pong {
        async fn call(
            &self,
            _method: &MethodId,
            _request: serde_json::Value,
        ) -> Result<serde_json::Value, cachegate_core::ConnectionError> {
            Ok(serde_json::json!("Pong"))
        }
    }

    fn pong_factory(
        _pool: &cachegate_routing::PoolKey,
        _config: &cachegate_routing::ConnectionConfig,
    ) -> Result<Arc<dyn cachegate_core::Connection>, String> {
        Ok(Arc::new(Pong))
    }

    const ENV_KEY_YAML: &str = r#"
authorization:
  tenants:
    cgrates.org:
      - api_key: "$CACHEGATE_TEST_SERVICE_KEY"
        methods: ["*"]
pools:
  - tenant: cgrates.org
    connections:
      - id: cache1
"#;

    #[tokio::test]
    #[serial_test::serial]
    async fn test_build_service_resolves_api_keys() {
        use cachegate_core::{CallContext, Envelope, ErrorCategory, Event, RouteArgument};

        unsafe {
            std::env::set_var("CACHEGATE_TEST_SERVICE_KEY", "s3cret");
        }

        let config = GatewayConfig::from_yaml_str(ENV_KEY_YAML).unwrap();
        let service = config.build_service(&pong_factory, None).unwrap();

        unsafe {
            std::env::remove_var("CACHEGATE_TEST_SERVICE_KEY");
        }

        let tenant = Tenant::new("cgrates.org").unwrap();
        let ping = |key: &str| {
            Envelope::for_event(
                Event::for_tenant(tenant.clone()),
                Some(RouteArgument::new(key)),
            )
        };

        let ctx = CallContext::new();
        assert_eq!(service.ping(&ctx, ping("s3cret")).await.unwrap(), "Pong");

        let err = service
            .ping(&ctx, ping("$CACHEGATE_TEST_SERVICE_KEY"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unauthorized);

        // Placeholders stay in the loaded configuration
        let policies = &config.authorization.as_ref().unwrap().tenants[&tenant];
        assert_eq!(policies[0].api_key, "$CACHEGATE_TEST_SERVICE_KEY");
    }

    #[test]
    #[serial_test::serial]
    fn test_build_service_reports_missing_env_var() {
        unsafe {
            std::env::remove_var("CACHEGATE_TEST_SERVICE_KEY");
        }

        let config = GatewayConfig::from_yaml_str(ENV_KEY_YAML).unwrap();
        assert!(matches!(
            config.build_service(&pong_factory, None),
            Err(GatewayConfigError::EnvVarResolution { .. })
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_merge_env_overrides() {
        unsafe {
            std::env::set_var("CACHEGATE_LOG_LEVEL", "warn");
            std::env::set_var("CACHEGATE_CALL_TIMEOUT_MS", "900");
            std::env::set_var("CACHEGATE_POLICY_TIMEOUT_MS", "not-a-number");
        }

        let mut config = GatewayConfig::from_yaml_str(YAML).unwrap();
        config.merge_env();

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.dispatch.dispatch.call_timeout_ms, 900);
        assert_eq!(config.dispatch.policy_timeout_ms, 250);

        unsafe {
            std::env::remove_var("CACHEGATE_LOG_LEVEL");
            std::env::remove_var("CACHEGATE_CALL_TIMEOUT_MS");
            std::env::remove_var("CACHEGATE_POLICY_TIMEOUT_MS");
        }
    }
}
