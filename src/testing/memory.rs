use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::net::{MAX_FRAME_PAYLOAD, NetworkTransport};
use crate::types::MacAddress;

type DropFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// One frame as it left an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Sending endpoint
    pub from: MacAddress,
    /// AVTP payload
    pub frame: Bytes,
}

struct Port {
    mac: MacAddress,
    tx: mpsc::UnboundedSender<Bytes>,
    drop_inbound: Option<DropFilter>,
}

#[derive(Default)]
struct Hub {
    ports: Vec<Port>,
    sent: Vec<SentFrame>,
}

/// Shared in-memory multicast segment
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hub = self.lock();
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &hub.ports.len())
            .field("sent", &hub.sent.len())
            .finish()
    }
}

impl MemoryNetwork {
    /// Empty segment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach an endpoint with address `mac`, replacing any endpoint already using it.
    #[must_use]
    pub fn endpoint(&self, mac: MacAddress) -> MemoryEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.lock();
        hub.ports.retain(|p| p.mac != mac);
        hub.ports.push(Port {
            mac,
            tx,
            drop_inbound: None,
        });
        MemoryEndpoint {
            mac,
            hub: Arc::clone(&self.hub),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Discard inbound frames at `mac` for which `filter` returns true.
    pub fn set_drop_filter<F>(&self, mac: MacAddress, filter: F)
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        if let Some(port) = self.lock().ports.iter_mut().find(|p| p.mac == mac) {
            port.drop_inbound = Some(Arc::new(filter));
        }
    }

    /// Deliver everything to `mac` again.
    pub fn clear_drop_filter(&self, mac: MacAddress) {
        if let Some(port) = self.lock().ports.iter_mut().find(|p| p.mac == mac) {
            port.drop_inbound = None;
        }
    }

    /// Detach `mac`; its pending `recv` returns `Closed` and its sends fail.
    pub fn detach(&self, mac: MacAddress) {
        self.lock().ports.retain(|p| p.mac != mac);
    }

    /// Every frame sent so far, in order.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    /// Frames sent by `mac`, in order.
    #[must_use]
    pub fn sent_by(&self, mac: MacAddress) -> Vec<Bytes> {
        self.lock()
            .sent
            .iter()
            .filter(|s| s.from == mac)
            .map(|s| s.frame.clone())
            .collect()
    }

    /// Forget captured frames.
    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }
}

/// One station on a [`MemoryNetwork`]
///
/// Frames are not looped back to the sender.
pub struct MemoryEndpoint {
    mac: MacAddress,
    hub: Arc<Mutex<Hub>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl std::fmt::Debug for MemoryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEndpoint").field("mac", &self.mac).finish_non_exhaustive()
    }
}

#[async_trait]
impl NetworkTransport for MemoryEndpoint {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_PAYLOAD {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        let frame = Bytes::copy_from_slice(frame);
        let mut hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
        if !hub.ports.iter().any(|p| p.mac == self.mac) {
            return Err(TransportError::Closed);
        }
        hub.sent.push(SentFrame {
            from: self.mac,
            frame: frame.clone(),
        });
        for port in hub.ports.iter().filter(|p| p.mac != self.mac) {
            if port.drop_inbound.as_ref().is_some_and(|drop| drop(&frame)) {
                tracing::trace!(to = %port.mac, "Dropping frame");
                continue;
            }
            let _ = port.tx.send(frame.clone());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        self.rx.lock().await.recv().await.ok_or(TransportError::Closed)
    }

    fn local_mac(&self) -> MacAddress {
        self.mac
    }
}
