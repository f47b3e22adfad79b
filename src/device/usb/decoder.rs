//! # SETUP Transaction Decoder
//!
//! Detects SETUP transactions on the link, decodes their eight byte data
//! stage into a [`SetupPacket`] and requests an ACK once the turnaround
//! time required for the current link speed has passed.
//!
//! Malformed transactions are not errors. A token that arrives while we
//! still wait for the data stage, or a data stage that isn't exactly
//! eight bytes long, means this wasn't a SETUP transaction for us
//! [USB2, 8.5.3]. We silently return to idle and resynchronize on the
//! next token.

use tracing::{debug, trace};

use super::{
    constants::setup::PACKET_SIZE,
    link::{DataPacket, Pid, Tick, TokenEvent, UsbSpeed},
    setup::SetupPacket,
};

/// The states of the SETUP decoder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// We haven't yet detected a SETUP token.
    #[default]
    Idle,
    /// We've seen a SETUP token and wait for the data stage.
    ReadData,
    /// We've decoded a SETUP packet and wait out the interpacket delay
    /// before we acknowledge it.
    InterpacketDelay,
}

/// Everything the decoder samples on a single tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderInputs {
    /// The token detector pulse.
    pub token: Option<TokenEvent>,
    /// The data packet deserializer pulse.
    pub packet: Option<DataPacket>,
    /// The interpacket timer output.
    pub tx_allowed: bool,
    /// The current link speed.
    pub speed: UsbSpeed,
}

/// Something noteworthy the decoder did on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderEvent {
    /// A SETUP packet was decoded.
    Decoded,
    /// A token arrived before the data stage and the frame was dropped.
    FrameAborted,
    /// The data stage had the wrong length and was dropped.
    LengthMismatch(usize),
}

/// Everything the decoder drives on a single tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOutputs {
    /// Request an ACK handshake.
    pub ack: bool,
    /// Start the interpacket timer.
    pub timer_start: bool,
    /// What happened on this tick, if anything worth counting.
    pub event: Option<DecoderEvent>,
}

/// The SETUP decoder state machine.
///
/// The decoder is the only writer of its [`SetupPacket`]. Consumers read
/// it through [`packet`](Self::packet), which hands out a shared
/// reference.
#[derive(Debug, Default, Clone)]
pub struct SetupDecoder {
    state: DecoderState,
    packet: SetupPacket,
}

impl SetupDecoder {
    /// Create an idle decoder.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// The current FSM state.
    #[must_use]
    pub const fn state(&self) -> DecoderState {
        self.state
    }

    /// The most recently decoded SETUP packet.
    #[must_use]
    pub const fn packet(&self) -> &SetupPacket {
        &self.packet
    }

    /// Advance the decoder by one clock edge.
    pub fn tick(&mut self, now: Tick, inputs: &DecoderInputs) -> DecoderOutputs {
        let mut outputs = DecoderOutputs::default();

        // `received` is a strobe. Keep it de-asserted unless we decode
        // a new packet on this tick.
        self.packet.end_strobe();

        self.state = match self.state {
            DecoderState::Idle => match inputs.token {
                Some(TokenEvent { pid: Pid::SETUP }) => {
                    trace!("{now} SETUP token, waiting for data stage");
                    DecoderState::ReadData
                }
                _ => DecoderState::Idle,
            },

            DecoderState::ReadData => match (inputs.packet, inputs.token) {
                // A data packet takes precedence over a token sampled on
                // the same tick.
                (Some(packet), _) => self.read_data(now, &packet, inputs.speed, &mut outputs),
                (None, Some(token)) => {
                    debug!("{now} {} token while waiting for SETUP data, dropping frame", token.pid);
                    outputs.event = Some(DecoderEvent::FrameAborted);
                    DecoderState::Idle
                }
                (None, None) => DecoderState::ReadData,
            },

            // Once we've accepted a packet, we owe the host an ACK. Tokens
            // are not considered until we've sent it.
            DecoderState::InterpacketDelay => {
                if inputs.tx_allowed {
                    trace!("{now} interpacket delay over, acknowledging");
                    outputs.ack = true;
                    DecoderState::Idle
                } else {
                    DecoderState::InterpacketDelay
                }
            }
        };

        outputs
    }

    fn read_data(
        &mut self,
        now: Tick,
        packet: &DataPacket,
        speed: UsbSpeed,
        outputs: &mut DecoderOutputs,
    ) -> DecoderState {
        let Ok(bytes) = <&[u8; PACKET_SIZE]>::try_from(packet.payload()) else {
            debug!(
                "{now} dropping {} byte data stage, SETUP requires {PACKET_SIZE}",
                packet.len()
            );
            outputs.event = Some(DecoderEvent::LengthMismatch(packet.len()));
            return DecoderState::Idle;
        };

        self.packet = SetupPacket::decode(bytes);
        outputs.event = Some(DecoderEvent::Decoded);
        debug!("{now} decoded SETUP: {}", self.packet);

        match speed {
            // Each link cycle already covers the eight high-speed bit times
            // a device has to wait before transmitting [USB2, 7.1.18.2].
            // Our processing delay is enough, so we can ACK right away.
            UsbSpeed::High => {
                outputs.ack = true;
                DecoderState::Idle
            }
            UsbSpeed::Full | UsbSpeed::Low => {
                outputs.timer_start = true;
                DecoderState::InterpacketDelay
            }
        }
    }
}
