//! Connection sessions: state, collaborators, scoped membership and the
//! runner that ties them together.

pub mod collaborators;
pub mod membership;
pub mod runner;
pub mod state;

pub use collaborators::{Authorizer, Credentials, LocationResolver, Principal, StaticDirectory};
pub use membership::Membership;
pub use runner::{SessionConfig, SessionContext, SessionOutcome, run_session};
pub use state::{RejectReason, SessionState, TerminationCause};
