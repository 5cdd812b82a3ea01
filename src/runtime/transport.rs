//! The internal topic.
//!
//! Every node publishes to and subscribes from one shared topic; channels
//! are carried inside messages and selected by filters, not by the
//! transport.

use crate::error::{Result, TransportError};
use crate::types::Host;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// A shared publish/subscribe topic.
pub trait Transport: Send + Sync + 'static {
    /// Publish an encoded message to every subscriber, the publisher included.
    fn publish(&self, data: Bytes) -> Result<()>;

    /// Start receiving everything published on the topic.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Bytes>>;
}

#[derive(Debug, Default)]
struct BusInner {
    subscribers: RwLock<Vec<(Host, mpsc::UnboundedSender<Bytes>)>>,
    muted: RwLock<HashSet<Host>>,
}

/// In-process topic connecting nodes that share a runtime.
///
/// A muted host neither sends nor receives, which looks to its peers and to
/// itself like a dead or partitioned node.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport for `host` attached to this bus.
    pub fn endpoint(&self, host: impl Into<Host>) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            host: host.into(),
            bus: self.inner.clone(),
        })
    }

    /// Cut a host off the bus.
    pub fn mute(&self, host: &str) {
        self.inner.muted.write().insert(host.to_string());
    }

    /// Reconnect a muted host.
    pub fn unmute(&self, host: &str) {
        self.inner.muted.write().remove(host);
    }

    pub fn is_muted(&self, host: &str) -> bool {
        self.inner.muted.read().contains(host)
    }

    /// Close every subscription held by `host`.
    pub fn disconnect(&self, host: &str) {
        self.inner.subscribers.write().retain(|(h, _)| h != host);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }
}

/// One host's attachment to a [`LocalBus`].
#[derive(Debug)]
pub struct LocalEndpoint {
    host: Host,
    bus: Arc<BusInner>,
}

impl LocalEndpoint {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Transport for LocalEndpoint {
    fn publish(&self, data: Bytes) -> Result<()> {
        let muted = self.bus.muted.read();
        if muted.contains(&self.host) {
            trace!(host = %self.host, "Muted, dropping publish");
            return Ok(());
        }

        let mut closed = false;
        for (host, tx) in self.bus.subscribers.read().iter() {
            if muted.contains(host) {
                continue;
            }
            if tx.send(data.clone()).is_err() {
                closed = true;
            }
        }
        drop(muted);

        if closed {
            self.bus.subscribers.write().retain(|(_, tx)| !tx.is_closed());
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.bus.subscribers.write();
        if subscribers.iter().any(|(h, tx)| h == &self.host && !tx.is_closed()) {
            return Err(TransportError::AlreadySubscribed(self.host.clone()).into());
        }
        subscribers.push((self.host.clone(), tx));
        Ok(rx)
    }
}
