use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quotaguard::access::{IpAccessList, StaticIpAccessList};
use quotaguard::config::QuotaGuardConfig;
use quotaguard::ratelimit::{
    normalize_endpoint, AdmissionEngine, ConfigResolver, Dimension, RateLimitPolicy,
    RequestContext, Scope,
};

#[derive(Parser, Debug)]
#[command(name = "quotaguard", version, about = "API admission control")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run admission checks for a simulated request
    Check {
        #[arg(long)]
        client_id: String,

        /// Endpoint identifier or request path
        #[arg(long)]
        endpoint: String,

        #[arg(long, default_value = "ip")]
        dimension: Dimension,

        #[arg(long)]
        method: Option<String>,

        #[arg(long)]
        principal: Option<String>,

        /// Request header as NAME=VALUE, repeatable
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Declared limit for the call site
        #[arg(long)]
        limit: Option<u32>,

        /// Declared window in seconds for the call site
        #[arg(long)]
        window: Option<u32>,

        /// Methods the policy applies to
        #[arg(long, value_delimiter = ',')]
        methods: Vec<String>,

        /// Number of requests to send
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },

    /// Print the effective limit for an endpoint
    Resolve {
        #[arg(long)]
        endpoint: String,

        #[arg(long, default_value = "ip")]
        dimension: Dimension,

        #[arg(long)]
        method: Option<String>,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long)]
        window: Option<u32>,
    },

    /// Print the loaded configuration
    Config,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<QuotaGuardConfig> {
    match path {
        Some(path) => QuotaGuardConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            info!("No configuration file given, using defaults");
            Ok(QuotaGuardConfig::default())
        }
    }
}

/// Send `repeat` requests through the engine and print each decision.
/// Stops at the first backend error.
async fn run_checks(
    engine: &AdmissionEngine,
    client_id: &str,
    endpoint: &str,
    policy: &RateLimitPolicy,
    context: &RequestContext,
    repeat: u32,
) -> anyhow::Result<()> {
    for attempt in 1..=repeat {
        let decision = engine
            .decide(client_id, endpoint, policy, context)
            .await
            .with_context(|| format!("deciding attempt {}", attempt))?;
        let headers: serde_json::Map<String, serde_json::Value> = decision
            .headers()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.into()))
            .collect();
        println!(
            "{}",
            json!({
                "attempt": attempt,
                "decision": decision,
                "headers": headers,
                "message": decision.message(),
            })
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    info!("Quotaguard version {}", env!("CARGO_PKG_VERSION"));
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Command::Resolve {
            endpoint,
            dimension,
            method,
            limit,
            window,
        } => {
            let resolver = ConfigResolver::from_env(config.rate_limiter.clone());
            let endpoint = normalize_endpoint(&endpoint);
            let scope = Scope::endpoint(&endpoint).with_method(method.as_deref());
            let effective = resolver.resolve(scope, dimension, limit, window);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "endpoint": endpoint,
                    "dimension": dimension,
                    "effective": effective,
                }))?
            );
        }

        Command::Check {
            client_id,
            endpoint,
            dimension,
            method,
            principal,
            headers,
            limit,
            window,
            methods,
            repeat,
        } => {
            if repeat == 0 {
                bail!("--repeat must be at least 1");
            }

            let access = StaticIpAccessList::from_settings(&config.access);
            if access.is_blacklisted(&client_id) {
                warn!(client_id = %client_id, "Client is blacklisted");
                println!("{}", json!({ "outcome": "blacklisted", "client_id": client_id }));
                return Ok(());
            }
            if access.is_whitelisted(&client_id) {
                info!(client_id = %client_id, "Client is whitelisted, bypassing limits");
                println!("{}", json!({ "outcome": "whitelisted", "client_id": client_id }));
                return Ok(());
            }

            let engine = AdmissionEngine::from_config(&config)
                .await
                .context("building admission engine")?;

            let mut context = RequestContext::new();
            if let Some(method) = method {
                context = context.with_method(method);
            }
            if let Some(principal) = principal {
                context = context.with_principal(principal);
            }
            for (name, value) in &headers {
                context = context.with_header(name, value.clone());
            }

            let mut policy = RateLimitPolicy::new(dimension).with_methods(methods);
            policy.limit = limit;
            policy.window_seconds = window;

            let endpoint = normalize_endpoint(&endpoint);
            let outcome = run_checks(&engine, &client_id, &endpoint, &policy, &context, repeat).await;
            engine.shutdown().await;
            outcome?;
        }
    }

    Ok(())
}
