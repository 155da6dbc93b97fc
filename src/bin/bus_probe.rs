// ============================================================================
// bus-probe - send one island bus request and print the reply
// ============================================================================
//
// Usage: bus-probe <operation> [actor] [key=value ...]
//
// Values that parse as JSON (numbers, booleans, quoted strings, objects) are
// sent as such; anything else is sent as a plain string.
//
// Example: bus-probe island.get U1 islandId=ISL1
//
// ============================================================================

use anyhow::{Context, Result};
use island_bus::utils::log_safe_id;
use island_bus::{IslandClient, RedisBus};
use island_config::Config;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct ProbeArgs {
    operation: String,
    actor: Option<String>,
    data: Map<String, Value>,
}

fn parse_args(args: &[String]) -> Result<ProbeArgs> {
    let (operation, rest) = args
        .split_first()
        .context("usage: bus-probe <operation> [actor] [key=value ...]")?;

    let mut actor = None;
    let mut data = Map::new();
    for (i, arg) in rest.iter().enumerate() {
        match arg.split_once('=') {
            Some((key, raw)) => {
                let value =
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                data.insert(key.to_string(), value);
            }
            None if i == 0 => actor = Some(arg.clone()),
            None => anyhow::bail!("expected key=value, got {:?}", arg),
        }
    }

    Ok(ProbeArgs {
        operation: operation.clone(),
        actor,
        data,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let probe = parse_args(&args)?;

    info!("Connecting to Redis at: {}", config.redis_url_safe());
    let bus = RedisBus::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;

    let client = IslandClient::start(&config.bus, &config.cache, Arc::new(bus), None);

    info!(
        operation = %probe.operation,
        actor_hash = %probe
            .actor
            .as_deref()
            .map(|actor| log_safe_id(actor, &config.logging.hash_salt))
            .unwrap_or_default(),
        "Sending probe request"
    );
    let data = probe.data;
    let outcome = client
        .send(&probe.operation, probe.actor.as_deref(), move |request| {
            request.set_data(data)
        })
        .await;

    client.shutdown().await;

    let reply = outcome.context("Probe request failed")?;
    if let Some(error) = reply.business_error() {
        warn!(code = %error.code, message = %error.message, "Request answered with a business error");
    }
    println!("{}", String::from_utf8_lossy(&reply.to_wire()));
    Ok(())
}
