//! Controller walkthrough on an in-memory network
//!
//! Starts a talker, a listener and a controller, then has the controller
//! enumerate the talker, connect its stream to the listener and tear it
//! down again.
//!
//! Run with `cargo run --example controller`; set `RUST_LOG=avdecc=debug`
//! to follow the protocol exchanges.

use std::sync::Arc;

use avdecc::testing::{MemoryNetwork, test_mac};
use avdecc::{AvdeccConfig, AvdeccEntity, StreamEndpoint};
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "avdecc=info".into()))
        .init();

    let network = MemoryNetwork::new();
    let talker = AvdeccEntity::new(
        AvdeccConfig::builder().talker_stream_sources(2).build(),
        Arc::new(network.endpoint(test_mac(2))),
    )?;
    let listener = AvdeccEntity::new(
        AvdeccConfig::builder().listener_stream_sinks(2).build(),
        Arc::new(network.endpoint(test_mac(3))),
    )?;
    let controller = AvdeccEntity::new(
        AvdeccConfig::default(),
        Arc::new(network.endpoint(test_mac(1))),
    )?;

    talker.start().await?;
    listener.start().await?;
    controller.start().await?;
    controller.discover_all().await?;
    sleep(Duration::from_millis(200)).await;

    for entity in controller.discovered_entities().await {
        println!(
            "found {} (sources: {}, sinks: {})",
            entity.entity_id, entity.talker_stream_sources, entity.listener_stream_sinks
        );
    }

    controller.acquire_entity(talker.entity_id()).await?;
    let descriptor = controller.read_entity_descriptor(talker.entity_id()).await?;
    println!(
        "talker descriptor: model {:#018x}, available_index {}",
        descriptor.entity_model_id, descriptor.available_index
    );

    let source = StreamEndpoint::new(talker.entity_id(), 0);
    let sink = StreamEndpoint::new(listener.entity_id(), 1);
    let stream_id = controller.connect_stream(source, sink).await?;
    println!("connected {source} -> {sink} as stream {stream_id}");

    let state = controller.get_tx_state(source).await?;
    println!("talker reports {} listener(s)", state.connection_count);

    controller.disconnect_stream(stream_id).await?;
    controller.release_entity(talker.entity_id()).await?;

    controller.shutdown().await?;
    listener.shutdown().await?;
    talker.shutdown().await?;
    Ok(())
}
