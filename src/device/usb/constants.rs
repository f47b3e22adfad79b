//! # USB Constants
//!
//! This module collects USB related constants. All definitions are derived
//! from the "Universal Serial Bus Specification Revision 2.0".

// Allow missing docs to avoid duplicating the USB spec for all constants.
#![allow(missing_docs)]

/// Packet identifiers as carried in the lower nibble of a PID byte.
///
/// See Table 8-1 "PID Types" in the USB 2.0 specification.
pub mod pid {
    // Token
    pub const OUT: u8 = 0b0001;
    pub const IN: u8 = 0b1001;
    pub const SOF: u8 = 0b0101;
    pub const SETUP: u8 = 0b1101;

    // Data
    pub const DATA0: u8 = 0b0011;
    pub const DATA1: u8 = 0b1011;

    // Handshake
    pub const ACK: u8 = 0b0010;
    pub const NAK: u8 = 0b1010;
    pub const STALL: u8 = 0b1110;

    /// PIDs are four bits wide.
    pub const MASK: u8 = 0x0f;
}

/// Layout of the eight byte SETUP data stage.
///
/// See Section 9.3 "USB Device Requests" in the USB 2.0 specification.
pub mod setup {
    /// A SETUP data stage is always exactly this long.
    pub const PACKET_SIZE: usize = 8;

    pub mod offset {
        pub const REQUEST_TYPE: usize = 0;
        pub const REQUEST: usize = 1;
        pub const VALUE: usize = 2;
        pub const INDEX: usize = 4;
        pub const LENGTH: usize = 6;
    }

    /// Fields of the bmRequestType byte.
    pub mod request_type {
        pub const RECIPIENT_MASK: u8 = 0x1f;
        pub const TYPE_SHIFT: u8 = 5;
        pub const TYPE_MASK: u8 = 0x03;
        pub const DIRECTION_IN: u8 = 0x80;

        pub mod kind {
            pub const STANDARD: u8 = 0b00;
            pub const CLASS: u8 = 0b01;
            pub const VENDOR: u8 = 0b10;
            pub const RESERVED: u8 = 0b11;
        }

        pub mod recipient {
            pub const DEVICE: u8 = 0b00000;
            pub const INTERFACE: u8 = 0b00001;
            pub const ENDPOINT: u8 = 0b00010;
            pub const OTHER: u8 = 0b00011;
        }
    }
}

/// Data packets carry at most this many bytes on the control endpoint.
pub const MAX_DATA_PACKET_SIZE: usize = 8;

/// Timing of the link clock and the rx-to-tx turnaround.
pub mod timing {
    /// The link (ULPI) clock runs at 60 MHz. One high-speed bit time
    /// is 1/480 us, so a single link cycle covers eight of them.
    pub const LINK_CLOCK_HZ: u64 = 60_000_000;

    /// Two full-speed bit times at 12 Mb/s, rounded up to link cycles.
    pub const FS_RX_TO_TX_DELAY: u32 = 10;

    /// Two low-speed bit times at 1.5 Mb/s, rounded up to link cycles.
    pub const LS_RX_TO_TX_DELAY: u32 = 80;
}
