//! Message transport between execution contexts.
//!
//! The background coordinator and every tab's content script run in
//! separate contexts that only talk through request/response messages.
//!
//! ```text
//! ┌──────────────────┐   BackgroundPort    ┌──────────────────┐
//! │  ContentScript   │────────────────────►│   Coordinator    │
//! │  (one per tab)   │◄────────────────────│   (background)   │
//! └──────────────────┘    TabMessenger     └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `router` | [`TabRouter`]: per-tab inboxes with reply correlation |
//! | `port` | [`LocalPort`]: content-to-background calls in process |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::TabId;
use crate::protocol::{Message, Response};

// ============================================================================
// Submodules
// ============================================================================

/// In-process content-to-background port.
pub mod port;

/// Per-tab message routing.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use port::LocalPort;
pub use router::{DELIVERY_LOG_LIMIT, Envelope, Inbox, TabRouter};

// ============================================================================
// Traits
// ============================================================================

/// Content script side: send a message to the background.
#[async_trait]
pub trait BackgroundPort: Send + Sync {
    /// Sends a message and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::error::Error::Transport) if the
    /// background is unreachable.
    async fn send(&self, message: Message) -> Result<Response>;
}

/// Background side: send a message to a tab's content script.
#[async_trait]
pub trait TabMessenger: Send + Sync {
    /// Sends a message and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::error::Error::Transport) if no
    /// content script listens in the tab.
    async fn send_to_tab(&self, tab: TabId, message: Message) -> Result<Response>;
}
