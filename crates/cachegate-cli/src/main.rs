//! CacheGate CLI
//!
//! Command-line interface for checking and exercising a CacheGate
//! configuration

use anyhow::{Context, bail};
use cachegate_core::{
    CallContext, Connection, ConnectionError, Event, MethodId, Subsystem, Tenant,
};
use cachegate_gateway::GatewayConfig;
use cachegate_observability::{DispatchMetrics, init_logging};
use cachegate_routing::{ConnectionConfig, PoolKey};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

/// CacheGate - routing and authorization gateway for cache backends
#[derive(Parser)]
#[command(name = "cachegate")]
#[command(about = "CacheGate configuration and routing tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "CACHEGATE_CONFIG",
        global = true
    )]
    config: Option<String>,

    /// Log level or filter directive (overrides the config file)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration
    Check,
    /// Print the resolved pools and authorization policies
    Show,
    /// Dispatch one call against dry-run connections and report which answered
    Route {
        /// Tenant owning the pool
        #[arg(long)]
        tenant: String,

        /// Method identifier (e.g. CacheSv1.HasItem)
        #[arg(long, default_value = "CacheSv1.Ping")]
        method: String,

        /// Explicit route identifier; empty means strategy selection
        #[arg(long, default_value = "")]
        route_id: String,

        /// API key presented to the authorization gate
        #[arg(long, default_value = "")]
        api_key: String,

        /// Number of calls to dispatch
        #[arg(long, default_value = "1")]
        count: usize,

        /// Print Prometheus metrics afterwards
        #[arg(long, default_value = "false")]
        metrics: bool,
    },
}

/// Connection that answers with its own identity instead of reaching a backend
struct DryRunConnection {
    id: String,
}

#[async_trait::async_trait]
impl Connection for DryRunConnection {
    async fn call(&self, method: &MethodId, _request: Value) -> Result<Value, ConnectionError> {
        Ok(json!({ "connection": self.id, "method": method.as_str() }))
    }
}

fn dry_run_factory(
    _pool: &PoolKey,
    config: &ConnectionConfig,
) -> Result<Arc<dyn Connection>, String> {
    Ok(Arc::new(DryRunConnection {
        id: config.id.clone(),
    }))
}

fn load_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            GatewayConfig::from_file(&path)
                .with_context(|| format!("loading configuration from {path}"))?
        }
        None => GatewayConfig::default(),
    };

    // Environment overrides the file, flags override both
    config.merge_env();
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}

fn show(config: &GatewayConfig) {
    println!(
        "dispatch: call_timeout={}ms policy_timeout={}ms",
        config.dispatch.dispatch.call_timeout_ms, config.dispatch.policy_timeout_ms
    );

    match &config.authorization {
        Some(authorization) => {
            println!("authorization: {} policies", authorization.policy_count());
            for (tenant, policies) in &authorization.tenants {
                for policy in policies {
                    let key = if policy.is_anonymous() { "<anonymous>" } else { "<key>" };
                    let expiry = policy
                        .expires_at
                        .map(|at| format!(" expires {}", at.to_rfc3339()))
                        .unwrap_or_default();
                    println!("  {tenant} {key} [{}]{expiry}", policy.methods.join(", "));
                }
            }
        }
        None => println!("authorization: open"),
    }

    println!("pools: {}", config.pools.len());
    for pool in &config.pools {
        println!(
            "  {} strategy={} max_attempts={} retry_mutations={}",
            pool.key(),
            pool.strategy.as_str(),
            pool.failover
                .max_attempts
                .map(|n| n.to_string())
                .unwrap_or_else(|| "pool-size".to_string()),
            pool.failover.retry_mutations
        );
        for connection in &pool.connections {
            println!(
                "    {} weight={}{}",
                connection.id,
                connection.weight,
                if connection.reachable { "" } else { " (failed)" }
            );
        }
    }
}

async fn route(
    config: &GatewayConfig,
    tenant: &str,
    method: &str,
    route_id: &str,
    api_key: &str,
    count: usize,
    print_metrics: bool,
) -> anyhow::Result<()> {
    let tenant = Tenant::new(tenant)?;
    let method = MethodId::cache_method(method)
        .with_context(|| format!("unknown method '{method}'"))?;

    let metrics = Arc::new(DispatchMetrics::new()?);
    let service = config.build_service(&dry_run_factory, Some(metrics.clone()))?;

    service
        .authorizer()
        .authorize(&method, &tenant, api_key, Utc::now())
        .await?;

    let event = Event::for_tenant(tenant);
    let route_id = (!route_id.is_empty()).then_some(route_id);
    for call in 1..=count {
        let reply = service
            .dispatcher()
            .dispatch(
                &CallContext::new(),
                &event,
                &Subsystem::caches(),
                route_id,
                &method,
                Value::Null,
            )
            .await?;
        println!(
            "call {call}: {} -> {}",
            method,
            reply["connection"].as_str().unwrap_or("?")
        );
    }

    if print_metrics {
        print!("{}", metrics.gather_text()?);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging(&config.logging)?;

    match cli.command {
        Commands::Check => {
            config.clone().resolve_env_vars()?;
            config.validate()?;
            info!(pools = config.pools.len(), "Configuration is valid");
            println!("configuration OK");
        }
        Commands::Show => {
            config.validate()?;
            show(&config);
        }
        Commands::Route {
            tenant,
            method,
            route_id,
            api_key,
            count,
            metrics,
        } => {
            if count == 0 {
                bail!("--count must be at least 1");
            }
            route(&config, &tenant, &method, &route_id, &api_key, count, metrics).await?;
        }
    }

    Ok(())
}
