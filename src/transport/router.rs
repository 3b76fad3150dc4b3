//! Per-tab inboxes.
//!
//! Each connected tab owns an unbounded inbox. A send pairs the message
//! with a oneshot reply channel, so correlation is structural rather
//! than id-based.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::{Message, Response};

use super::TabMessenger;

// ============================================================================
// Constants
// ============================================================================

/// Error reported when a tab has no listening content script.
const NO_RECEIVER: &str = "Could not establish connection. Receiving end does not exist.";

/// Delivery log capacity; the oldest entries are dropped first.
pub const DELIVERY_LOG_LIMIT: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// A message plus the channel its response goes back on.
#[derive(Debug)]
pub struct Envelope {
    /// The message.
    pub message: Message,
    /// Reply channel.
    pub reply: oneshot::Sender<Response>,
}

/// Receiving half handed to a content script.
pub type Inbox = mpsc::UnboundedReceiver<Envelope>;

// ============================================================================
// TabRouter
// ============================================================================

/// Routes background messages to tab inboxes.
///
/// Keeps a bounded log of the most recent [`DELIVERY_LOG_LIMIT`]
/// delivered messages.
#[derive(Debug, Default)]
pub struct TabRouter {
    tabs: RwLock<FxHashMap<TabId, mpsc::UnboundedSender<Envelope>>>,
    delivered: Mutex<VecDeque<(TabId, Message)>>,
}

impl TabRouter {
    /// Creates a router with no tabs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a content script in `tab`, replacing any previous one.
    pub fn connect(&self, tab: TabId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.tabs.write().insert(tab, tx).is_some() {
            debug!(tab_id = %tab, "Replaced content script connection");
        }
        rx
    }

    /// Drops the content script connection of `tab`.
    pub fn disconnect(&self, tab: TabId) {
        self.tabs.write().remove(&tab);
    }

    /// Returns `true` if a content script listens in `tab`.
    #[must_use]
    pub fn is_connected(&self, tab: TabId) -> bool {
        self.tabs.read().contains_key(&tab)
    }

    /// Logged deliveries, oldest first.
    #[must_use]
    pub fn delivered(&self) -> Vec<(TabId, Message)> {
        self.delivered.lock().iter().cloned().collect()
    }

    /// Empties the delivery log.
    pub fn clear_delivered(&self) {
        self.delivered.lock().clear();
    }

    /// Logged deliveries to `tab`, oldest first.
    #[must_use]
    pub fn delivered_to(&self, tab: TabId) -> Vec<Message> {
        self.delivered
            .lock()
            .iter()
            .filter(|(t, _)| *t == tab)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl TabMessenger for TabRouter {
    async fn send_to_tab(&self, tab: TabId, message: Message) -> Result<Response> {
        let sender = self
            .tabs
            .read()
            .get(&tab)
            .cloned()
            .ok_or_else(|| Error::transport(NO_RECEIVER))?;

        let (reply, response) = oneshot::channel();
        let logged = message.clone();
        trace!(tab_id = %tab, kind = message.kind(), "Delivering message");

        if sender.send(Envelope { message, reply }).is_err() {
            self.tabs.write().remove(&tab);
            return Err(Error::transport(NO_RECEIVER));
        }
        {
            let mut log = self.delivered.lock();
            if log.len() == DELIVERY_LOG_LIMIT {
                log.pop_front();
            }
            log.push_back((tab, logged));
        }

        Ok(response.await?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::ConfigId;

    fn tab(id: u32) -> TabId {
        TabId::new(id).expect("tab")
    }

    #[tokio::test]
    async fn test_round_trip() {
        let router = TabRouter::new();
        let mut inbox = router.connect(tab(1));

        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let _ = envelope.reply.send(Response::ok());
            }
        });

        let message = Message::Cleanup {
            config_id: ConfigId::new("demo"),
        };
        let response = router.send_to_tab(tab(1), message.clone()).await.expect("send");

        assert!(response.success);
        assert_eq!(router.delivered_to(tab(1)), vec![message]);
    }

    #[tokio::test]
    async fn test_delivery_log_is_bounded_and_clearable() {
        let router = TabRouter::new();
        let mut inbox = router.connect(tab(4));

        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let _ = envelope.reply.send(Response::ok());
            }
        });

        for n in 0..DELIVERY_LOG_LIMIT + 10 {
            let message = Message::Cleanup {
                config_id: ConfigId::new(format!("c{n}")),
            };
            router.send_to_tab(tab(4), message).await.expect("send");
        }

        let log = router.delivered();
        assert_eq!(log.len(), DELIVERY_LOG_LIMIT);
        assert_eq!(
            log[0].1,
            Message::Cleanup {
                config_id: ConfigId::new("c10")
            }
        );

        router.clear_delivered();
        assert!(router.delivered().is_empty());
        assert!(router.delivered_to(tab(4)).is_empty());
    }

    #[tokio::test]
    async fn test_missing_tab_is_transport_error() {
        let router = TabRouter::new();
        let err = router.send_to_tab(tab(9), Message::GetTabId).await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(router.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_inbox_disconnects() {
        let router = TabRouter::new();
        drop(router.connect(tab(2)));

        let err = router.send_to_tab(tab(2), Message::GetTabId).await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(!router.is_connected(tab(2)));
    }

    #[tokio::test]
    async fn test_unanswered_envelope_is_channel_closed() {
        let router = TabRouter::new();
        let mut inbox = router.connect(tab(3));

        tokio::spawn(async move {
            if let Some(envelope) = inbox.recv().await {
                drop(envelope);
            }
        });

        let err = router.send_to_tab(tab(3), Message::GetTabId).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed(_)));
    }
}
