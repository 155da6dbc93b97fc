
use island_bus::{IslandClient, RedisBus, Responder};
use island_config::{BusConfig, CacheConfig};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use test_utils::*;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Unique namespace per run so parallel test runs do not hear each other
fn isolated_config() -> BusConfig {
    let mut config = bus_config();
    config.prefix = format!("islands-test-{}", Uuid::new_v4().simple());
    config.response_timeout_ms = 2000;
    config
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_round_trip_over_redis() {
    let config = isolated_config();

    let responder_bus = RedisBus::connect(&redis_url()).await.unwrap();
    let handler = Arc::new(IslandHandler::default());
    let responder = Arc::new(Responder::new(&config, Arc::new(responder_bus), handler.clone()));
    let cancel = CancellationToken::new();
    let responder_task = tokio::spawn(Arc::clone(&responder).run(cancel.clone()));

    let client_bus = RedisBus::connect(&redis_url()).await.unwrap();
    let client = IslandClient::start(&config, &CacheConfig::default(), Arc::new(client_bus), None);

    // PSUBSCRIBE on both sides completes asynchronously
    tokio::time::sleep(Duration::from_millis(200)).await;

    let reply = client
        .send("island.get", Some("U1"), |req| req.put("islandId", "ISL1"))
        .await
        .unwrap();
    assert_eq!(reply.ok(), Some(true));
    assert_eq!(reply.data_str("islandId"), Some("ISL1"));
    assert_eq!(handler.executions(), 1);

    client.shutdown().await;
    cancel.cancel();
    responder_task.await.unwrap();
}
