//! # Control Endpoint
//!
//! Wires the [`SetupDecoder`], the [`InterpacketTimer`] and a
//! [`ControlRequestHandler`] together and advances them in lock-step.
//!
//! Within a tick the components run in the order decoder, timer,
//! handler. The timer output is registered, so the decoder samples the
//! `tx_allowed` pulse produced on the previous tick. The handler sees
//! the SETUP packet the decoder committed on the same tick.

use tracing::trace;

use super::{
    decoder::{DecoderEvent, DecoderInputs, DecoderState, SetupDecoder},
    link::{DataPacket, HandshakeRequest, Tick, TokenEvent, UsbSpeed},
    request::{ControlRequestHandler, StandardRequestHandler},
    setup::{RequestHandlerInterface, SetupPacket},
    timer::{InterpacketDelays, InterpacketTimer},
};

/// The external events of a single tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInputs {
    /// Token detector pulse.
    pub token: Option<TokenEvent>,
    /// Data packet deserializer pulse.
    pub packet: Option<DataPacket>,
    /// Data phase strobe for the request handler.
    pub data_requested: bool,
    /// Status phase strobe for the request handler.
    pub status_requested: bool,
}

/// What the endpoint drives on a single tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EndpointOutputs {
    /// The tick these outputs belong to.
    pub tick: Tick,
    /// A new SETUP packet is available through
    /// [`ControlEndpoint::setup`].
    pub setup_received: bool,
    /// Handshakes for the handshake generator.
    pub handshake: HandshakeRequest,
}

/// Per-session counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EndpointStats {
    /// SETUP packets decoded.
    pub decoded: u64,
    /// Frames dropped because a token arrived before the data stage.
    pub aborted: u64,
    /// Data stages dropped because they weren't eight bytes long.
    pub length_mismatches: u64,
    /// ACKs requested.
    pub acks: u64,
    /// STALLs requested.
    pub stalls: u64,
}

/// A control endpoint's SETUP path.
#[derive(Debug)]
pub struct ControlEndpoint {
    now: Tick,
    speed: UsbSpeed,

    decoder: SetupDecoder,
    timer: InterpacketTimer,
    handler: Box<dyn ControlRequestHandler>,

    /// The timer output of the previous tick.
    tx_allowed: bool,

    stats: EndpointStats,
}

impl ControlEndpoint {
    /// Create an endpoint with the given request handler.
    #[must_use]
    pub fn new(
        speed: UsbSpeed,
        delays: InterpacketDelays,
        handler: Box<dyn ControlRequestHandler>,
    ) -> Self {
        Self {
            now: Tick::default(),
            speed,
            decoder: SetupDecoder::new(),
            timer: InterpacketTimer::new(delays),
            handler,
            tx_allowed: false,
            stats: EndpointStats::default(),
        }
    }

    /// Create an endpoint that stalls every request.
    #[must_use]
    pub fn with_standard_handler(speed: UsbSpeed, delays: InterpacketDelays) -> Self {
        Self::new(speed, delays, Box::new(StandardRequestHandler::new()))
    }

    /// The tick the next call to [`tick`](Self::tick) will process.
    #[must_use]
    pub const fn now(&self) -> Tick {
        self.now
    }

    /// The current link speed.
    #[must_use]
    pub const fn speed(&self) -> UsbSpeed {
        self.speed
    }

    /// Change the link speed.
    ///
    /// The speed is sampled on every tick, so a change only makes sense
    /// between transactions.
    pub fn set_speed(&mut self, speed: UsbSpeed) {
        trace!("{} link speed now {speed}", self.now);
        self.speed = speed;
    }

    /// The most recently decoded SETUP packet.
    #[must_use]
    pub const fn setup(&self) -> &SetupPacket {
        self.decoder.packet()
    }

    /// The state of the SETUP decoder.
    #[must_use]
    pub const fn decoder_state(&self) -> DecoderState {
        self.decoder.state()
    }

    /// The counters of this session.
    #[must_use]
    pub const fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    /// Advance all components by one clock edge.
    pub fn tick(&mut self, inputs: &EndpointInputs) -> EndpointOutputs {
        let now = self.now;

        let decoded = self.decoder.tick(
            now,
            &DecoderInputs {
                token: inputs.token,
                packet: inputs.packet,
                tx_allowed: self.tx_allowed,
                speed: self.speed,
            },
        );

        self.tx_allowed = self.timer.tick(now, decoded.timer_start, self.speed);

        let interface = RequestHandlerInterface {
            setup: *self.decoder.packet(),
            data_requested: inputs.data_requested,
            status_requested: inputs.status_requested,
        };
        let handled = self.handler.tick(now, &interface);

        let handshake = HandshakeRequest {
            ack: decoded.ack,
            stall: handled.stall,
        };
        self.count(decoded.event, &handshake);

        self.now = now.next();

        EndpointOutputs {
            tick: now,
            setup_received: interface.setup.received(),
            handshake,
        }
    }

    /// Let `ticks` clock edges pass without any external events.
    ///
    /// Returns the outputs of every tick that drove something.
    pub fn idle(&mut self, ticks: u64) -> Vec<EndpointOutputs> {
        (0..ticks)
            .map(|_| self.tick(&EndpointInputs::default()))
            .filter(|outputs| outputs.setup_received || outputs.handshake.is_requested())
            .collect()
    }

    fn count(&mut self, event: Option<DecoderEvent>, handshake: &HandshakeRequest) {
        match event {
            Some(DecoderEvent::Decoded) => self.stats.decoded += 1,
            Some(DecoderEvent::FrameAborted) => self.stats.aborted += 1,
            Some(DecoderEvent::LengthMismatch(_)) => self.stats.length_mismatches += 1,
            None => {}
        }

        self.stats.acks += u64::from(handshake.ack);
        self.stats.stalls += u64::from(handshake.stall);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::usb::link::Pid;

    const REFERENCE: [u8; 8] = [0b0_10_00010, 12, 0xcd, 0xab, 0x23, 0x01, 0x78, 0x56];

    fn endpoint(speed: UsbSpeed) -> ControlEndpoint {
        ControlEndpoint::with_standard_handler(speed, InterpacketDelays::default())
    }

    fn send_token(endpoint: &mut ControlEndpoint, pid: Pid) -> EndpointOutputs {
        endpoint.tick(&EndpointInputs {
            token: Some(TokenEvent::new(pid)),
            ..Default::default()
        })
    }

    fn send_data(endpoint: &mut ControlEndpoint, payload: &[u8]) -> EndpointOutputs {
        endpoint.tick(&EndpointInputs {
            packet: Some(DataPacket::new(payload).unwrap()),
            ..Default::default()
        })
    }

    /// Feed the reference SETUP transaction. Returns the outputs of the
    /// tick that carried the data stage.
    fn reference_transaction(endpoint: &mut ControlEndpoint) -> EndpointOutputs {
        send_token(endpoint, Pid::SETUP);
        endpoint.idle(3);
        send_data(endpoint, &REFERENCE)
    }

    #[test]
    fn high_speed_setup_is_acked_immediately() {
        let mut endpoint = endpoint(UsbSpeed::High);
        assert!(!endpoint.setup().received());

        let outputs = reference_transaction(&mut endpoint);
        assert!(outputs.setup_received);
        assert_eq!(outputs.handshake, HandshakeRequest::ACK);

        let setup = endpoint.setup();
        assert!(!setup.is_in_request());
        assert_eq!(setup.type_bits(), 0b10);
        assert_eq!(setup.recipient_bits(), 0b00010);
        assert_eq!(setup.request(), 12);
        assert_eq!(setup.value(), 0xabcd);
        assert_eq!(setup.index(), 0x0123);
        assert_eq!(setup.length(), 0x5678);

        // `received` is a one tick strobe.
        assert!(!endpoint.tick(&EndpointInputs::default()).setup_received);
        assert_eq!(endpoint.stats().decoded, 1);
        assert_eq!(endpoint.stats().acks, 1);
    }

    #[test]
    fn full_speed_setup_waits_for_the_interpacket_delay() {
        let mut endpoint = endpoint(UsbSpeed::Full);

        let decoded = reference_transaction(&mut endpoint);
        assert!(decoded.setup_received);
        assert!(!decoded.handshake.ack);

        let acks = endpoint.idle(50);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].handshake, HandshakeRequest::ACK);

        // The timer fires ten cycles after the decode tick, the ACK
        // follows on the next tick.
        assert_eq!(acks[0].tick.since(decoded.tick), 11);
        assert_eq!(endpoint.decoder_state(), DecoderState::Idle);
    }

    #[test]
    fn low_speed_setup_waits_longer() {
        let mut endpoint = endpoint(UsbSpeed::Low);

        let decoded = reference_transaction(&mut endpoint);
        let acks = endpoint.idle(200);

        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].tick.since(decoded.tick), 81);
    }

    #[test]
    fn short_setup_data_is_ignored() {
        let mut endpoint = endpoint(UsbSpeed::High);

        send_token(&mut endpoint, Pid::SETUP);
        let outputs = send_data(&mut endpoint, &[0x23, 0x45, 0x67, 0x89, 0x1c, 0x0e]);

        assert!(!outputs.setup_received);
        assert!(!outputs.handshake.is_requested());
        assert!(endpoint.idle(20).is_empty());
        assert_eq!(endpoint.decoder_state(), DecoderState::Idle);
        assert_eq!(endpoint.stats().length_mismatches, 1);
    }

    #[test]
    fn token_during_data_wait_resynchronizes() {
        let mut endpoint = endpoint(UsbSpeed::High);

        send_token(&mut endpoint, Pid::SETUP);
        send_token(&mut endpoint, Pid::OUT);
        assert_eq!(endpoint.decoder_state(), DecoderState::Idle);
        assert_eq!(endpoint.stats().aborted, 1);

        // The next well-formed transaction goes through.
        let outputs = reference_transaction(&mut endpoint);
        assert!(outputs.setup_received);
        assert!(outputs.handshake.ack);
    }

    #[test]
    fn unclassified_request_is_stalled_on_first_phase_strobe() {
        let mut endpoint = endpoint(UsbSpeed::High);
        reference_transaction(&mut endpoint);
        assert!(endpoint.idle(5).is_empty());

        let outputs = endpoint.tick(&EndpointInputs {
            data_requested: true,
            ..Default::default()
        });
        assert_eq!(outputs.handshake, HandshakeRequest::STALL);

        // A second strobe has nothing left to stall.
        let outputs = endpoint.tick(&EndpointInputs {
            status_requested: true,
            ..Default::default()
        });
        assert!(!outputs.handshake.is_requested());
        assert_eq!(endpoint.stats().stalls, 1);
    }

    #[test]
    fn speed_change_between_transactions_is_honored() {
        let mut endpoint = endpoint(UsbSpeed::Full);
        reference_transaction(&mut endpoint);
        assert_eq!(endpoint.idle(20).len(), 1);

        endpoint.set_speed(UsbSpeed::High);
        assert!(reference_transaction(&mut endpoint).handshake.ack);
    }

    #[test]
    fn high_speed_ack_does_not_depend_on_configured_delays() {
        let mut endpoint = ControlEndpoint::with_standard_handler(
            UsbSpeed::High,
            InterpacketDelays { full: 50, low: 50 },
        );

        let outputs = reference_transaction(&mut endpoint);
        assert!(outputs.setup_received);
        assert_eq!(outputs.handshake, HandshakeRequest::ACK);

        // Nothing else is owed, the timer never ran.
        assert!(endpoint.idle(100).is_empty());
        assert_eq!(endpoint.stats().acks, 1);
    }
}
