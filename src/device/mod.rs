//! # Device-Side USB Link Logic
//!
//! This module contains the device-side link-layer logic that turns
//! token and data packet events into decoded SETUP requests. It
//! should never depend on a concrete PHY, host operating system or
//! simulation harness.

#![deny(missing_docs)]
#![deny(rustdoc::all)]
#![deny(clippy::must_use_candidate)]
#![deny(missing_debug_implementations)]

pub mod usb;
