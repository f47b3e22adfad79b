//! # Link-Layer Event Records
//!
//! The records in this module are what the external collaborators of
//! the SETUP decoder (token detector, data packet deserializer,
//! interpacket timer) hand to us once per clock edge, and what we hand
//! back to the handshake generator.

use std::{fmt, str::FromStr};

use thiserror::Error;

use super::constants::{pid, MAX_DATA_PACKET_SIZE};

/// A single edge of the logical link clock.
///
/// All components advance against the same `Tick`. It is passed
/// explicitly into every `tick` function instead of living in a global.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(pub u64);

impl Tick {
    /// The tick following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The number of ticks elapsed since `earlier`.
    #[must_use]
    pub const fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// The negotiated operating speed of the link.
///
/// The discriminants match the encoding the link layer uses on its
/// speed signal.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsbSpeed {
    /// 480 Mb/s.
    #[default]
    High = 0,
    /// 12 Mb/s.
    Full = 1,
    /// 1.5 Mb/s.
    Low = 2,
}

/// The error returned when a speed value cannot be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpeedError {
    /// The numeric speed encoding is not one of 0, 1 or 2.
    #[error("invalid link speed encoding {0}")]
    InvalidEncoding(u8),
    /// The speed name is not known.
    #[error("unknown link speed {0:?} (expected high, full or low)")]
    UnknownName(String),
}

impl TryFrom<u8> for UsbSpeed {
    type Error = SpeedError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::High),
            1 => Ok(Self::Full),
            2 => Ok(Self::Low),
            other => Err(SpeedError::InvalidEncoding(other)),
        }
    }
}

impl FromStr for UsbSpeed {
    type Err = SpeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "hs" => Ok(Self::High),
            "full" | "fs" => Ok(Self::Full),
            "low" | "ls" => Ok(Self::Low),
            _ => Err(SpeedError::UnknownName(s.to_string())),
        }
    }
}

impl fmt::Display for UsbSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "Low Speed (1.5 Mbps)",
            Self::Full => "Full Speed (12 Mbps)",
            Self::High => "High Speed (480 Mbps)",
        };
        write!(f, "{}", name)
    }
}

/// A four bit USB packet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(u8);

/// The error returned for values that do not fit into a PID.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PidError {
    /// The value has bits set above the lower nibble.
    #[error("PID {0:#x} does not fit into four bits")]
    OutOfRange(u8),
    /// The name does not denote a known PID.
    #[error("unknown PID name {0:?}")]
    UnknownName(String),
}

impl Pid {
    /// Host-to-device token.
    pub const OUT: Self = Self(pid::OUT);
    /// Device-to-host token.
    pub const IN: Self = Self(pid::IN);
    /// Start-of-frame token.
    pub const SOF: Self = Self(pid::SOF);
    /// Control transfer SETUP token.
    pub const SETUP: Self = Self(pid::SETUP);
    /// Even data packet.
    pub const DATA0: Self = Self(pid::DATA0);
    /// Odd data packet.
    pub const DATA1: Self = Self(pid::DATA1);
    /// Receiver accepted the packet.
    pub const ACK: Self = Self(pid::ACK);
    /// Receiver cannot accept or send data right now.
    pub const NAK: Self = Self(pid::NAK);
    /// Endpoint halted or request not supported.
    pub const STALL: Self = Self(pid::STALL);

    /// The raw four bit value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Look up a PID by its conventional name, e.g. `"setup"`.
    pub fn from_name(name: &str) -> Result<Self, PidError> {
        match name.to_ascii_lowercase().as_str() {
            "out" => Ok(Self::OUT),
            "in" => Ok(Self::IN),
            "sof" => Ok(Self::SOF),
            "setup" => Ok(Self::SETUP),
            "data0" => Ok(Self::DATA0),
            "data1" => Ok(Self::DATA1),
            "ack" => Ok(Self::ACK),
            "nak" => Ok(Self::NAK),
            "stall" => Ok(Self::STALL),
            _ => Err(PidError::UnknownName(name.to_string())),
        }
    }
}

impl TryFrom<u8> for Pid {
    type Error = PidError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & !pid::MASK != 0 {
            return Err(PidError::OutOfRange(value));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            pid::OUT => "OUT",
            pid::IN => "IN",
            pid::SOF => "SOF",
            pid::SETUP => "SETUP",
            pid::DATA0 => "DATA0",
            pid::DATA1 => "DATA1",
            pid::ACK => "ACK",
            pid::NAK => "NAK",
            pid::STALL => "STALL",
            other => return write!(f, "PID({:#06b})", other),
        };
        write!(f, "{}", name)
    }
}

/// The pulse the token detector emits when it has framed a new token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEvent {
    /// The identifier of the new token.
    pub pid: Pid,
}

impl TokenEvent {
    /// Create a token event for `pid`.
    #[must_use]
    pub const fn new(pid: Pid) -> Self {
        Self { pid }
    }
}

/// The error returned when a data packet exceeds the deserializer capacity.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("data packet of {0} bytes exceeds the maximum of 8 bytes")]
pub struct PacketTooLong(pub usize);

/// A fully received, CRC-checked data packet.
///
/// The deserializer validates the CRC before emitting the packet, so
/// only the payload and its length are visible here.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataPacket {
    bytes: [u8; MAX_DATA_PACKET_SIZE],
    length: usize,
}

impl DataPacket {
    /// Build a data packet from its payload bytes.
    pub fn new(payload: &[u8]) -> Result<Self, PacketTooLong> {
        if payload.len() > MAX_DATA_PACKET_SIZE {
            return Err(PacketTooLong(payload.len()));
        }

        let mut bytes = [0; MAX_DATA_PACKET_SIZE];
        bytes[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            bytes,
            length: payload.len(),
        })
    }

    /// The number of payload bytes received.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Whether the packet carried no payload at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The received payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.length]
    }
}

/// Handshake generation requests.
///
/// Both fields are single-cycle pulses. Within one transaction at most
/// one of them is asserted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request an ACK handshake.
    pub ack: bool,
    /// Request a STALL handshake.
    pub stall: bool,
}

impl HandshakeRequest {
    /// No handshake this tick.
    pub const NONE: Self = Self {
        ack: false,
        stall: false,
    };

    /// Request an ACK.
    pub const ACK: Self = Self {
        ack: true,
        stall: false,
    };

    /// Request a STALL.
    pub const STALL: Self = Self {
        ack: false,
        stall: true,
    };

    /// Whether any handshake is requested.
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        self.ack || self.stall
    }

    /// The PID of the requested handshake, if any.
    #[must_use]
    pub const fn pid(&self) -> Option<Pid> {
        match (self.ack, self.stall) {
            (true, _) => Some(Pid::ACK),
            (false, true) => Some(Pid::STALL),
            (false, false) => None,
        }
    }
}
