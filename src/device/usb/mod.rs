//! # USB2.0 Control Transfer Entry Point
//!
//! Everything in here advances in lock-step on a shared logical clock.
//! Every component exposes a `tick` function that is called exactly
//! once per clock edge with the [`Tick`](link::Tick) of that edge.
//!
//! The data flow is:
//!
//! ```text
//! TokenEvent / DataPacket --> SetupDecoder --> SetupPacket + ack
//!                                  |                 |
//!                          InterpacketTimer   ControlRequestHandler --> stall
//! ```
//!
//! [`endpoint::ControlEndpoint`] wires these components together.

pub mod constants;
pub mod decoder;
pub mod endpoint;
pub mod link;
pub mod pcap;
pub mod request;
pub mod setup;
pub mod timer;
