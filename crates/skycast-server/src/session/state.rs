//! Session lifecycle states and the closed set of events a live session
//! reacts to.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// WebSocket close code for a normal close.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code sent when the server shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code for a missing or invalid principal.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// WebSocket close code when the service cannot take new subscribers.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Application close code: the principal has no resolvable location.
pub const CLOSE_NO_LOCATION: u16 = 4004;

/// Why a session was refused before reaching `Active`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No principal, or the credentials were invalid.
    #[error("unauthenticated")]
    Unauthenticated,
    /// The principal has no location configured.
    #[error("no resolvable location")]
    NoLocation,
    /// The registry refused the subscription.
    #[error("subscriptions unavailable")]
    Unavailable,
}

impl RejectReason {
    /// Close code sent with the (body-less) close frame.
    pub fn close_code(self) -> u16 {
        match self {
            Self::Unauthenticated => CLOSE_POLICY_VIOLATION,
            Self::NoLocation => CLOSE_NO_LOCATION,
            Self::Unavailable => CLOSE_TRY_AGAIN_LATER,
        }
    }

    /// Short label for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::NoLocation => "no_location",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, nothing resolved yet.
    Connecting,
    /// Resolving the principal.
    Authorizing,
    /// Resolving the principal's location and joining its group.
    Subscribing,
    /// Member of exactly one group, forwarding readings.
    Active,
    /// Leaving the group and closing the transport.
    Closing,
    /// Terminal after a normal close.
    Closed,
    /// Terminal after refusal before `Active`.
    Rejected(RejectReason),
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Active, Authorizing, Closed, Closing, Connecting, Rejected, Subscribing};
        matches!(
            (self, next),
            (Connecting, Authorizing)
                | (Authorizing, Subscribing)
                | (Subscribing, Active)
                | (Active, Closing)
                | (Closing, Closed)
                | (Connecting | Authorizing | Subscribing, Rejected(_))
        )
    }

    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Rejected(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Authorizing => f.write_str("authorizing"),
            Self::Subscribing => f.write_str("subscribing"),
            Self::Active => f.write_str("active"),
            Self::Closing => f.write_str("closing"),
            Self::Closed => f.write_str("closed"),
            Self::Rejected(reason) => write!(f, "rejected ({reason})"),
        }
    }
}

/// What ended an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// The client closed the connection.
    ClientClosed,
    /// Reading from or writing to the transport failed.
    TransportError,
    /// No client activity within the heartbeat timeout.
    HeartbeatTimeout,
    /// The gateway evicted the session (slow or unreachable).
    Evicted,
    /// The server is shutting down.
    Shutdown,
}

impl TerminationCause {
    /// Close code sent to the client, if it is still listening.
    pub fn close_code(self) -> u16 {
        match self {
            Self::Shutdown => CLOSE_GOING_AWAY,
            Self::Evicted => CLOSE_TRY_AGAIN_LATER,
            Self::ClientClosed | Self::TransportError | Self::HeartbeatTimeout => CLOSE_NORMAL,
        }
    }

    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Everything an active session reacts to, matched exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Stop: leave the group, then close.
    Terminate(TerminationCause),
    /// A payload from the gateway to push to the client.
    Forward(Arc<String>),
}
