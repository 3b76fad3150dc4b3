//! In-process background port.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::background::Coordinator;
use crate::error::Result;
use crate::protocol::{Message, Response, Sender};

use super::BackgroundPort;

// ============================================================================
// LocalPort
// ============================================================================

/// Calls a [`Coordinator`] directly, as a fixed sender.
#[derive(Debug, Clone)]
pub struct LocalPort {
    coordinator: Arc<Coordinator>,
    sender: Sender,
}

impl LocalPort {
    /// Creates a port speaking for `sender`.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, sender: Sender) -> Self {
        Self {
            coordinator,
            sender,
        }
    }

    /// Sender attached to every message.
    #[inline]
    #[must_use]
    pub fn sender(&self) -> &Sender {
        &self.sender
    }
}

#[async_trait]
impl BackgroundPort for LocalPort {
    async fn send(&self, message: Message) -> Result<Response> {
        Ok(self.coordinator.handle(message, &self.sender).await)
    }
}
