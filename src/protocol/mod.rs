//! Message protocol between the background coordinator, the dashboard
//! and content scripts.
//!
//! Every message is a JSON object tagged by `type`; every answer is a
//! [`Response`] with a `success` flag.
//!
//! | Type | Direction | Payload | Response |
//! |------|-----------|---------|----------|
//! | `GET_CONFIGS` | dashboard/content → background | none | `configs` |
//! | `ADD_CONFIG` | dashboard → background | `configId`, `config` | none |
//! | `TOGGLE_CONFIG` | dashboard → background | `configId`, `enabled` | none |
//! | `DELETE_CONFIG` | dashboard → background | `configId` | none |
//! | `RELOAD_CONFIGS` | dashboard → background | none | none |
//! | `RESCAN_CONFIG` | dashboard → background | `configId` | none |
//! | `CACHE_ASSETS` | dashboard → background | `configId` | `report` |
//! | `GET_CONFIG` | content → background | `url` or sender tab | `config` |
//! | `GET_TAB_ID` | content → background | none | `tabId` |
//! | `INJECT_JS` | content → background | `configId`, `jsFileName` or `jsCode`, `runAt`, `tabId` | none |
//! | `INJECT_JQUERY` | content → background | `configId`, `version`, `runAt`, `tabId` | none |
//! | `GET_CACHED_CONTENT` | content → background | `configId`, `url` | `content` |
//! | `INJECT` | background → content | `config` | none |
//! | `CLEANUP` | background → content | `configId` | none |

// ============================================================================
// Submodules
// ============================================================================

/// Tagged message type and sender context.
pub mod message;

/// Response envelope.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{Message, Sender};
pub use response::{AssetReport, Response};
