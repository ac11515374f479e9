//! Shared fixtures for entity-level tests
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use avdecc::testing::{MemoryNetwork, test_mac};
use avdecc::{AvdeccConfig, AvdeccEntity, EntityEvent, EntityId, MacAddress, StreamEndpoint};
use tokio::sync::broadcast;

static INIT: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "avdecc=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Poll an async condition until it holds, failing the test after 30 (virtual) seconds
macro_rules! eventually {
    ($cond:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30);
        loop {
            if $cond {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition never held: {}",
                stringify!($cond)
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}

pub const CONTROLLER_MAC: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x01]);
pub const TALKER_MAC: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x02]);
pub const LISTENER_MAC: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x03]);

/// A controller, a talker with one source and a listener with one sink on one segment
pub struct Fixture {
    pub network: MemoryNetwork,
    pub controller: AvdeccEntity,
    pub talker: AvdeccEntity,
    pub listener: AvdeccEntity,
}

impl Fixture {
    /// Create the three entities without starting them.
    pub fn new() -> Self {
        init_tracing();
        let network = MemoryNetwork::new();
        let controller = entity(&network, CONTROLLER_MAC, AvdeccConfig::default());
        let talker = entity(
            &network,
            TALKER_MAC,
            AvdeccConfig::builder()
                .entity_model_id(0x0001_0002_0003_0004)
                .talker_stream_sources(1)
                .build(),
        );
        let listener = entity(
            &network,
            LISTENER_MAC,
            AvdeccConfig::builder().listener_stream_sinks(1).build(),
        );
        Self {
            network,
            controller,
            talker,
            listener,
        }
    }

    /// Start every entity and wait until the controller knows the other two.
    pub async fn started() -> Self {
        let fixture = Self::new();
        fixture.talker.start().await.unwrap();
        fixture.listener.start().await.unwrap();
        fixture.controller.start().await.unwrap();
        eventually!(fixture.controller.discovered_entities().await.len() == 2);
        eventually!(
            fixture
                .listener
                .discovered_entity(fixture.talker.entity_id())
                .await
                .is_some()
        );
        fixture
    }

    pub fn source(&self) -> StreamEndpoint {
        StreamEndpoint::new(self.talker.entity_id(), 0)
    }

    pub fn sink(&self) -> StreamEndpoint {
        StreamEndpoint::new(self.listener.entity_id(), 0)
    }
}

/// An entity on `network` at `mac`
pub fn entity(network: &MemoryNetwork, mac: MacAddress, config: AvdeccConfig) -> AvdeccEntity {
    AvdeccEntity::new(config, Arc::new(network.endpoint(mac))).unwrap()
}

/// Entity id derived from the `n`th test MAC
pub fn test_entity_id(n: u8) -> EntityId {
    EntityId::from_mac(test_mac(n))
}

/// Wait for the first event matching `pred`, skipping everything else
pub async fn next_event<F>(rx: &mut broadcast::Receiver<EntityEvent>, pred: F) -> EntityEvent
where
    F: Fn(&EntityEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not received")
}
