//! Site configurations: data model, URL matching and the store.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `model` | [`Configuration`], items, default merge |
//! | `matcher` | [`MatchPattern`] and [`match_pattern`] |
//! | `store` | [`ConfigStore`] with durable persistence |

// ============================================================================
// Submodules
// ============================================================================

mod matcher;
mod model;
mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use matcher::{
    MatchPattern, PATTERN_CACHE_LIMIT, cached_patterns, match_pattern, matches_any,
};
pub use model::{
    Configuration, CssItem, CssOptions, InjectAt, Item, ItemSource, JsItem, JsOptions,
    ResolvedJs, RunAt, Source, ValidationMode, World,
};
pub use store::ConfigStore;
