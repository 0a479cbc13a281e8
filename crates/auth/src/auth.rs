//! Inhibitor Registry (C7) and Authorization Gate (C8).

mod gate;
mod inhibitor;

pub use gate::{AllowAllAuthority, AuthDecision, AuthDetails, Authority, AuthorizationGate, GateError};
pub use inhibitor::{CallerId, CallerRegistry, Inhibitor, InhibitorRegistry};
