//! Script registration state.
//!
//! The [`Reconciler`] owns the Registration Record table and the pending
//! set. Per `(config id, item identity)` it moves through
//! `Unregistered -> Pending -> Registered`, treating an engine
//! "duplicate script id" rejection as success because a restarted
//! background process cannot see the engine's own bookkeeping.

mod reconciler;

pub use reconciler::{
    DesiredScript, ReconcileReport, Reconciler, RegisterOutcome, RegistrationKey,
    RegistrationState,
};
