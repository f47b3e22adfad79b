//! # Control Request Handling
//!
//! Request handlers receive the decoded SETUP packet and the data and
//! status phase strobes through a [`RequestHandlerInterface`] and decide
//! which handshake to answer with.

use std::fmt::Debug;

use tracing::debug;

use super::{
    link::{HandshakeRequest, Tick},
    setup::{RequestHandlerInterface, SetupPacket},
};

/// The interface a control request handler has to implement.
pub trait ControlRequestHandler: Debug {
    /// Advance the handler by one clock edge.
    ///
    /// # Parameters
    ///
    /// - `now`: the current tick, shared with the SETUP decoder.
    /// - `interface`: the SETUP packet and phase strobes of this tick.
    fn tick(&mut self, now: Tick, interface: &RequestHandlerInterface) -> HandshakeRequest;
}

/// The states of the [`StandardRequestHandler`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Not handling any active request.
    #[default]
    Idle,
    /// We've received a request we're not prepared to handle.
    Unhandled,
}

/// The default request handler.
///
/// Every request lands in [`HandlerState::Unhandled`] and is stalled at
/// the first opportunity. Specialized handlers hook in where a new
/// request is classified.
#[derive(Debug, Default, Clone)]
pub struct StandardRequestHandler {
    state: HandlerState,
}

impl StandardRequestHandler {
    /// Create an idle handler.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// The current FSM state.
    #[must_use]
    pub const fn state(&self) -> HandlerState {
        self.state
    }

    fn classify(&self, now: Tick, setup: &SetupPacket) -> HandlerState {
        // TODO: route standard device requests (GET_DESCRIPTOR,
        // SET_ADDRESS, ...) to their own states once descriptor tables exist.
        debug!(
            "{now} no handler for {:?} request {} to {:?}, will stall",
            setup.kind(),
            setup.request(),
            setup.recipient()
        );
        HandlerState::Unhandled
    }
}

impl ControlRequestHandler for StandardRequestHandler {
    fn tick(&mut self, now: Tick, interface: &RequestHandlerInterface) -> HandshakeRequest {
        let (next, handshake) = match self.state {
            HandlerState::Idle if interface.setup.received() => {
                (self.classify(now, &interface.setup), HandshakeRequest::NONE)
            }
            HandlerState::Idle => (HandlerState::Idle, HandshakeRequest::NONE),

            // Stall on the next opportunity, then go back to idle.
            HandlerState::Unhandled if interface.response_due() => {
                debug!("{now} stalling unhandled request");
                (HandlerState::Idle, HandshakeRequest::STALL)
            }
            HandlerState::Unhandled => (HandlerState::Unhandled, HandshakeRequest::NONE),
        };

        self.state = next;
        handshake
    }
}
