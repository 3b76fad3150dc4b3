//! Error types for the UserSite injection pipeline.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use usersite::{Result, Error};
//!
//! async fn example(store: &mut ConfigStore) -> Result<()> {
//!     store.toggle(&config_id, false).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidConfig`], [`Error::InvalidPattern`] |
//! | Lookup | [`Error::NotFound`] |
//! | Engine | [`Error::RegistrationFailure`], [`Error::Engine`], [`Error::EngineUnavailable`] |
//! | Messaging | [`Error::Transport`], [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | Persistence | [`Error::Storage`], [`Error::Fetch`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Base64`] |
//!
//! Errors never cross the message boundary as values: the background
//! coordinator and the content script convert them into a failed
//! [`Response`](crate::protocol::Response) carrying the display string.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use base64::DecodeError;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::ScriptId;

// ============================================================================
// Constants
// ============================================================================

/// Engine message fragment reported when an id is already registered.
const DUPLICATE_SCRIPT_ID: &str = "duplicate script id";

/// Engine message fragment reported when unregistering an unknown id.
const NONEXISTENT_SCRIPT_ID: &str = "nonexistent script id";

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Coordinator configuration error.
    ///
    /// Returned when a builder is missing a required collaborator.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Site configuration failed validation.
    ///
    /// The configuration is not persisted.
    #[error("Invalid config format: {reason}")]
    InvalidConfig {
        /// Which validation rule failed.
        reason: String,
    },

    /// Match pattern could not be compiled.
    #[error("Invalid match pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// Referenced file, blob, cache entry or configuration is absent.
    #[error("{what} not found: {name}")]
    NotFound {
        /// Kind of resource (e.g. "JS file", "Config").
        what: String,
        /// Name or key that was looked up.
        name: String,
    },

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// Engine rejected a registration for a reason other than a duplicate id.
    #[error("Failed to register user script {script_id}: {message}")]
    RegistrationFailure {
        /// Engine id of the rejected script.
        script_id: ScriptId,
        /// Raw engine message.
        message: String,
    },

    /// Raw engine call failure.
    ///
    /// Reported by [`ScriptRegistry`](crate::engine::ScriptRegistry) and
    /// [`ScriptRunner`](crate::engine::ScriptRunner) implementations.
    #[error("Engine error: {message}")]
    Engine {
        /// Message reported by the engine.
        message: String,
    },

    /// No usable script registration or execution API was detected.
    #[error("Scripting API not available")]
    EngineUnavailable,

    // ========================================================================
    // Messaging Errors
    // ========================================================================
    /// Message channel round-trip failed.
    ///
    /// Typically the receiving end is gone (tab closed mid-flight).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Peer answered with a failure or an unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument in a command payload.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Durable storage read or write failed.
    #[error("Storage error on '{key}': {message}")]
    Storage {
        /// Storage key involved.
        key: String,
        /// Description of the failure.
        message: String,
    },

    /// Remote asset fetch failed.
    #[error("Failed to fetch {url}: {message}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Status text or network error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 payload could not be decoded.
    #[error("Base64 error: {0}")]
    Base64(#[from] DecodeError),

    /// Reply channel dropped before answering.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid site configuration error.
    #[inline]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates an invalid match pattern error.
    #[inline]
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[inline]
    pub fn not_found(what: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            name: name.into(),
        }
    }

    /// Creates a registration failure error.
    #[inline]
    pub fn registration_failure(script_id: ScriptId, message: impl Into<String>) -> Self {
        Self::RegistrationFailure {
            script_id,
            message: message.into(),
        }
    }

    /// Creates an engine error.
    #[inline]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[inline]
    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a fetch error.
    #[inline]
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transport error.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::ChannelClosed(_))
    }

    /// Returns `true` if a referenced resource was absent.
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the engine reported the script id as already registered.
    #[must_use]
    pub fn is_duplicate_script_id(&self) -> bool {
        self.engine_message()
            .is_some_and(|message| message.to_lowercase().contains(DUPLICATE_SCRIPT_ID))
    }

    /// Returns `true` if the engine reported an unknown script id.
    #[must_use]
    pub fn is_nonexistent_script_id(&self) -> bool {
        self.engine_message()
            .is_some_and(|message| message.to_lowercase().contains(NONEXISTENT_SCRIPT_ID))
    }

    /// Raw engine message, if this error came from the engine.
    fn engine_message(&self) -> Option<&str> {
        match self {
            Self::Engine { message } | Self::RegistrationFailure { message, .. } => {
                Some(message.as_str())
            }
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
