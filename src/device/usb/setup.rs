//! # SETUP Packets
//!
//! Represent the decoded content of a SETUP data stage.
//!
//! For documentation of the fields, see Section "9.3 USB Device Requests"
//! in the USB 2.0 specification.

use std::fmt;

use super::constants::setup::{
    offset,
    request_type::{self, kind, recipient},
    PACKET_SIZE,
};

/// Snapshot of the most recent valid SETUP data stage.
///
/// Only the [`SetupDecoder`](super::decoder::SetupDecoder) writes these
/// fields. Everybody else gets a read-only copy through the accessors.
///
/// The fields are meaningful starting with the tick on which
/// [`received`](Self::received) is set and stay stable until the next
/// successful decode overwrites them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    received: bool,

    is_in_request: bool,
    type_bits: u8,
    recipient_bits: u8,

    request: u8,
    value: u16,
    index: u16,
    length: u16,
}

impl SetupPacket {
    /// Decode the eight byte data stage.
    ///
    /// The returned packet has its `received` strobe set.
    pub(super) fn decode(bytes: &[u8; PACKET_SIZE]) -> Self {
        let bm_request_type = bytes[offset::REQUEST_TYPE];
        let word = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

        Self {
            received: true,
            is_in_request: bm_request_type & request_type::DIRECTION_IN != 0,
            type_bits: (bm_request_type >> request_type::TYPE_SHIFT) & request_type::TYPE_MASK,
            recipient_bits: bm_request_type & request_type::RECIPIENT_MASK,
            request: bytes[offset::REQUEST],
            value: word(offset::VALUE),
            index: word(offset::INDEX),
            length: word(offset::LENGTH),
        }
    }

    /// Drop the `received` strobe while keeping the decoded fields.
    pub(super) fn end_strobe(&mut self) {
        self.received = false;
    }

    /// True exactly on the tick a new packet was decoded.
    #[must_use]
    pub const fn received(&self) -> bool {
        self.received
    }

    /// True if this is a device-to-host request.
    #[must_use]
    pub const fn is_in_request(&self) -> bool {
        self.is_in_request
    }

    /// The raw two bit request type (standard, class, vendor, reserved).
    #[must_use]
    pub const fn type_bits(&self) -> u8 {
        self.type_bits
    }

    /// The raw five bit recipient.
    #[must_use]
    pub const fn recipient_bits(&self) -> u8 {
        self.recipient_bits
    }

    /// The request number (bRequest).
    #[must_use]
    pub const fn request(&self) -> u8 {
        self.request
    }

    /// The value argument (wValue).
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.value
    }

    /// The index argument (wIndex).
    #[must_use]
    pub const fn index(&self) -> u16 {
        self.index
    }

    /// The length of the data stage (wLength).
    #[must_use]
    pub const fn length(&self) -> u16 {
        self.length
    }

    /// Repack the bmRequestType byte.
    #[must_use]
    pub const fn request_type_byte(&self) -> u8 {
        let direction = if self.is_in_request {
            request_type::DIRECTION_IN
        } else {
            0
        };
        direction | (self.type_bits << request_type::TYPE_SHIFT) | self.recipient_bits
    }

    /// The data stage in wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut bytes = [0; PACKET_SIZE];

        bytes[offset::REQUEST_TYPE] = self.request_type_byte();
        bytes[offset::REQUEST] = self.request;
        bytes[offset::VALUE..offset::VALUE + 2].copy_from_slice(&self.value.to_le_bytes());
        bytes[offset::INDEX..offset::INDEX + 2].copy_from_slice(&self.index.to_le_bytes());
        bytes[offset::LENGTH..offset::LENGTH + 2].copy_from_slice(&self.length.to_le_bytes());

        bytes
    }

    /// The direction of the data stage.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        if self.is_in_request {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        }
    }

    /// The request type.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self.type_bits {
            kind::STANDARD => RequestKind::Standard,
            kind::CLASS => RequestKind::Class,
            kind::VENDOR => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    /// The target of the request.
    #[must_use]
    pub const fn recipient(&self) -> Recipient {
        match self.recipient_bits {
            recipient::DEVICE => Recipient::Device,
            recipient::INTERFACE => Recipient::Interface,
            recipient::ENDPOINT => Recipient::Endpoint,
            recipient::OTHER => Recipient::Other,
            other => Recipient::Reserved(other),
        }
    }
}

impl fmt::Display for SetupPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} request {} to {:?} (value {:#06x}, index {:#06x}, length {})",
            self.direction(),
            self.kind(),
            self.request,
            self.recipient(),
            self.value,
            self.index,
            self.length
        )
    }
}

/// Direction of the data stage, bit 7 of bmRequestType.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// OUT request.
    HostToDevice,
    /// IN request.
    DeviceToHost,
}

/// Request type, bits 5..6 of bmRequestType.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Requests every device has to support.
    Standard,
    /// Requests defined by a device class.
    Class,
    /// Vendor specific requests.
    Vendor,
    /// Not assigned.
    Reserved,
}

/// Request recipient, bits 0..4 of bmRequestType.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// The device itself.
    Device,
    /// An interface, selected by wIndex.
    Interface,
    /// An endpoint, selected by wIndex.
    Endpoint,
    /// Something else.
    Other,
    /// One of the reserved encodings.
    Reserved(u8),
}

/// The connection between the SETUP decoder and a request handler.
///
/// The handler answers with a
/// [`HandshakeRequest`](super::link::HandshakeRequest).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestHandlerInterface {
    /// The most recent SETUP packet.
    pub setup: SetupPacket,

    /// Pulsed when a data-phase token has been issued and it's now time
    /// to respond (after the interpacket delay).
    pub data_requested: bool,

    /// Pulsed when a response to the status phase has been requested.
    pub status_requested: bool,
}

impl RequestHandlerInterface {
    /// Whether the handler has an opportunity to respond on this tick.
    #[must_use]
    pub const fn response_due(&self) -> bool {
        self.data_requested || self.status_requested
    }
}
