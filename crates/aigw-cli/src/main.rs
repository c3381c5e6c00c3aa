//! # AI Gateway CLI Entry Point
//!
//! Main binary for the AI gateway. Provides the `serve` command to run the
//! gateway itself, plus `services` and `call` commands for querying a
//! running gateway from scripts and terminals.
//!
//! ## Usage
//!
//! ```bash
//! # Run the gateway with two seed instances
//! aigw serve -b 0.0.0.0:7510 \
//!   -i resume@127.0.0.1:7511 \
//!   -i matching@127.0.0.1:7512
//!
//! # Enable admission control and admin auth
//! aigw serve --rate-limit-rpm 600 --api-key s3cret
//!
//! # List capabilities and instance health (outputs raw JSON)
//! aigw services http://127.0.0.1:7510
//!
//! # Dispatch one request (outputs raw JSON)
//! aigw call http://127.0.0.1:7510 resume parse -d '{"text": "..."}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;

use aigw_common::auth::AuthConfig;
use aigw_common::rate_limit::{RateLimitConfig, RateLimiter};
use aigw_common::HttpClient;
use aigw_gateway::{
    BalancePolicy, BreakerConfig, Capability, CircuitBreaker, DispatchConfig, Dispatcher,
    HealthCheckConfig, HealthMonitor, HttpServer, LoadBalancer, ServiceRegistry,
};
use aigw_metrics::GatewayMetricsCollector;

/// A seed instance supplied on the command line as
/// `capability@host:port`, e.g. `resume@127.0.0.1:7511`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SeedInstance {
    capability: Capability,
    host: String,
    port: u16,
}

fn parse_seed(value: &str) -> Result<SeedInstance> {
    let (capability_str, addr) = value.split_once('@').ok_or_else(|| {
        anyhow::anyhow!(
            "invalid instance '{}': expected capability@host:port",
            value
        )
    })?;
    let capability: Capability = capability_str
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown capability '{}' in '{}'", capability_str, value))?;
    let (host, port_str) = addr.rsplit_once(':').ok_or_else(|| {
        anyhow::anyhow!("invalid instance '{}': missing port", value)
    })?;
    if host.is_empty() {
        return Err(anyhow::anyhow!("invalid instance '{}': empty host", value));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid port '{}' in '{}'", port_str, value))?;

    Ok(SeedInstance {
        capability,
        host: host.to_string(),
        port,
    })
}

fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

/// AI Gateway - unified ingress for backend AI capabilities
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Services(ServicesArgs),
    Call(CallArgs),
}

/// Arguments for running the gateway.
///
/// All thresholds, cooldowns and windows are deployment parameters, exposed
/// here rather than hard-coded in the components.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run the AI gateway
struct ServeArgs {
    /// address to bind the gateway's HTTP server to
    ///
    /// Defaults to "0.0.0.0:7510".
    #[argh(option, short = 'b', default = "\"0.0.0.0:7510\".into()")]
    bind: String,

    /// seed backend instance as capability@host:port
    ///
    /// Can be specified multiple times. Instances may also register
    /// themselves at runtime via POST /api/ai/register.
    #[argh(option, short = 'i', long = "instance")]
    instances: Vec<String>,

    /// gateway identity stamped into forwarded requests
    #[argh(option, long = "gateway-name", default = "\"ai-gateway\".into()")]
    gateway_name: String,

    /// load balancing policy: round_robin or least_connections
    #[argh(option, long = "balance-policy", default = "\"round_robin\".into()")]
    balance_policy: String,

    /// timeout for one forwarded backend call in milliseconds
    #[argh(option, long = "forward-timeout-ms", default = "30000")]
    forward_timeout_ms: u64,

    /// concurrent sub-requests per batch
    #[argh(option, long = "batch-concurrency", default = "8")]
    batch_concurrency: usize,

    /// overall deadline for a batch in milliseconds
    ///
    /// On expiry the batch returns completed sub-results plus timeout
    /// markers for the rest.
    #[argh(option, long = "batch-deadline-ms", default = "60000")]
    batch_deadline_ms: u64,

    /// interval between health probe rounds in seconds
    #[argh(option, long = "health-check-interval", default = "5")]
    health_check_interval_secs: u64,

    /// timeout for each health probe in milliseconds
    #[argh(option, long = "health-check-timeout", default = "2000")]
    health_check_timeout_ms: u64,

    /// consecutive probe failures before an instance is marked unhealthy
    #[argh(option, long = "health-check-failure-threshold", default = "3")]
    health_check_failure_threshold: u32,

    /// heartbeat age in seconds after which an instance is evicted
    ///
    /// Instances refresh their heartbeat by re-registering.
    #[argh(option, long = "instance-ttl", default = "60")]
    instance_ttl_secs: u64,

    /// disable health probing and TTL eviction entirely
    ///
    /// Useful for testing or environments with unreliable networks.
    #[argh(switch, long = "disable-health-check")]
    disable_health_check: bool,

    /// consecutive backend failures before an instance's circuit opens
    #[argh(option, long = "breaker-failure-threshold", default = "5")]
    breaker_failure_threshold: u32,

    /// circuit cooldown after the first opening, in seconds
    ///
    /// Doubles on each consecutive opening, capped by --breaker-max-cooldown.
    #[argh(option, long = "breaker-cooldown", default = "30")]
    breaker_cooldown_secs: u64,

    /// cap on the backed-off circuit cooldown, in seconds
    #[argh(option, long = "breaker-max-cooldown", default = "300")]
    breaker_max_cooldown_secs: u64,

    /// optional rate limit in requests per minute per caller and capability
    ///
    /// Admission control is disabled when not set.
    #[argh(option, long = "rate-limit-rpm")]
    rate_limit_rpm: Option<u32>,

    /// optional API key guarding the administrative endpoints
    ///
    /// When set, POST /api/ai/register and DELETE /api/ai/unregister require
    /// a matching X-API-Key header. The dispatch path stays open.
    #[argh(option, long = "api-key")]
    api_key: Option<String>,
}

/// Arguments for listing a running gateway's capabilities.
///
/// Outputs raw JSON to stdout for piping into `jq` and friends.
#[derive(FromArgs)]
#[argh(subcommand, name = "services")]
/// list capabilities and instance health of a running gateway
struct ServicesArgs {
    /// address of the gateway, including the http:// prefix
    #[argh(positional)]
    gateway_address: String,
}

/// Arguments for dispatching a single request.
///
/// Outputs the raw JSON envelope to stdout; a failed dispatch exits
/// non-zero so the command composes with shell pipelines.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// dispatch one request through a running gateway
struct CallArgs {
    /// address of the gateway, including the http:// prefix
    #[argh(positional)]
    gateway_address: String,

    /// capability to dispatch to (e.g. resume, matching, chat)
    #[argh(positional)]
    capability: String,

    /// action to invoke (e.g. parse, match, chat)
    #[argh(positional)]
    action: String,

    /// JSON payload for the action
    #[argh(option, short = 'd', long = "data", default = "\"{}\".into()")]
    data: String,

    /// request timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "30000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `services` and `call` output clean for unix tool usage
    if matches!(cli.command, Commands::Serve(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Services(args) => {
            validate_http_url(&args.gateway_address, "gateway address")?;
            let url = format!("{}/api/ai/services", args.gateway_address);
            let (_, body) = HttpClient::get_json(&url, Duration::from_secs(10)).await?;
            println!("{}", serde_json::to_string(&body)?);
            Ok(())
        }
        Commands::Call(args) => {
            validate_http_url(&args.gateway_address, "gateway address")?;
            let payload: serde_json::Value = serde_json::from_str(&args.data)
                .map_err(|e| anyhow::anyhow!("invalid --data JSON: {}", e))?;

            let url = format!(
                "{}/api/ai/{}/{}",
                args.gateway_address, args.capability, args.action
            );
            let (status, body) =
                HttpClient::post_json(&url, &payload, Duration::from_millis(args.timeout_ms))
                    .await?;

            println!("{}", serde_json::to_string(&body)?);
            if body.get("success") == Some(&serde_json::Value::Bool(true)) {
                Ok(())
            } else {
                Err(anyhow::anyhow!("dispatch failed with status {}", status))
            }
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    tracing::info!("Starting AI gateway");
    tracing::info!("Binding to: {}", args.bind);

    let seeds = args
        .instances
        .iter()
        .map(|s| parse_seed(s))
        .collect::<Result<Vec<_>>>()?;

    let policy: BalancePolicy = args
        .balance_policy
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let registry = Arc::new(ServiceRegistry::new());
    for seed in &seeds {
        registry
            .register(seed.capability, &seed.host, seed.port)
            .await;
    }
    tracing::info!("Seeded {} backend instance(s)", seeds.len());

    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: args.breaker_failure_threshold,
        base_cooldown: Duration::from_secs(args.breaker_cooldown_secs),
        max_cooldown: Duration::from_secs(args.breaker_max_cooldown_secs),
        backoff_multiplier: 2.0,
    }));

    if args.disable_health_check {
        tracing::info!("Health checking disabled");
    } else {
        let health_config = HealthCheckConfig {
            interval: Duration::from_secs(args.health_check_interval_secs),
            timeout: Duration::from_millis(args.health_check_timeout_ms),
            failure_threshold: args.health_check_failure_threshold,
            instance_ttl: Duration::from_secs(args.instance_ttl_secs),
        };
        let monitor =
            HealthMonitor::new(Arc::clone(&registry), Arc::clone(&breaker), health_config);
        // Handle detaches; the task runs for the life of the process
        let _monitor_handle = monitor.spawn();
        tracing::info!(
            "Health monitor running (interval {}s, TTL {}s)",
            args.health_check_interval_secs,
            args.instance_ttl_secs
        );
    }

    let limiter = match args.rate_limit_rpm {
        Some(rpm) => {
            tracing::info!("Rate limiting enabled: {} requests per minute", rpm);
            RateLimiter::new(RateLimitConfig::per_minute(rpm))
        }
        None => RateLimiter::disabled(),
    };

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        breaker,
        LoadBalancer::new(policy),
        limiter,
        Arc::new(GatewayMetricsCollector::new()),
        DispatchConfig {
            gateway_name: args.gateway_name,
            forward_timeout: Duration::from_millis(args.forward_timeout_ms),
            probe_timeout: Duration::from_millis(args.health_check_timeout_ms),
            batch_concurrency: args.batch_concurrency,
            batch_deadline: Duration::from_millis(args.batch_deadline_ms),
        },
    ));

    let mut server = HttpServer::new(dispatcher);
    if let Some(api_key) = &args.api_key {
        tracing::info!("API key authentication enabled for admin endpoints");
        server = server.with_auth(AuthConfig::with_api_key(api_key));
    }

    let addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;
    server.run(addr).await?;

    Ok(())
}
