//! # Event Traces
//!
//! A line-oriented description of what the link delivers on every tick,
//! used to drive a [`ControlEndpoint`] outside of real hardware.
//!
//! ```text
//! # full speed GET_DESCRIPTOR(Device)
//! speed full
//! token setup
//! data 80 06 00 01 00 00 12 00
//! idle 12
//! data-requested
//! ```
//!
//! Every line except `speed` takes exactly one tick. `idle N` lets `N`
//! ticks pass without events.

use thiserror::Error;
use tracing::{debug, info};

use crate::device::usb::{
    endpoint::{ControlEndpoint, EndpointInputs, EndpointOutputs},
    link::{DataPacket, PacketTooLong, Pid, PidError, SpeedError, TokenEvent, UsbSpeed},
    pcap::SetupCapture,
};

/// A single line of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStep {
    /// Switch the link speed. Takes no time.
    Speed(UsbSpeed),
    /// A token pulse.
    Token(Pid),
    /// A data packet pulse.
    Data(DataPacket),
    /// The data phase strobe.
    DataRequested,
    /// The status phase strobe.
    StatusRequested,
    /// Ticks without any event.
    Idle(u64),
}

/// Why a trace line couldn't be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceErrorKind {
    /// The first word isn't a known command.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    /// The command needs an argument.
    #[error("missing argument for {0:?}")]
    MissingArgument(&'static str),
    /// The command got more arguments than it takes.
    #[error("unexpected argument {0:?}")]
    UnexpectedArgument(String),
    /// A number couldn't be parsed.
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    /// A byte of a data packet couldn't be parsed.
    #[error("invalid data byte {0:?}")]
    InvalidByte(String),
    /// The token PID is invalid.
    #[error(transparent)]
    Pid(#[from] PidError),
    /// The link speed is invalid.
    #[error(transparent)]
    Speed(#[from] SpeedError),
    /// The data packet is too long.
    #[error(transparent)]
    PacketTooLong(#[from] PacketTooLong),
}

/// A parse error together with the line it occurred on.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct TraceError {
    /// The 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub kind: TraceErrorKind,
}

/// Parse an integer in decimal, `0x` hexadecimal or `0b` binary notation.
fn parse_number(word: &str) -> Result<u64, TraceErrorKind> {
    let invalid = || TraceErrorKind::InvalidNumber(word.to_string());

    if let Some(hex) = word.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).map_err(|_| invalid())
    } else if let Some(bin) = word.strip_prefix("0b") {
        u64::from_str_radix(&bin.replace('_', ""), 2).map_err(|_| invalid())
    } else {
        word.parse().map_err(|_| invalid())
    }
}

fn parse_pid(word: &str) -> Result<Pid, TraceErrorKind> {
    if word.starts_with(|c: char| c.is_ascii_digit()) {
        let value = parse_number(word)?;
        let value =
            u8::try_from(value).map_err(|_| TraceErrorKind::InvalidNumber(word.to_string()))?;
        Ok(Pid::try_from(value)?)
    } else {
        Ok(Pid::from_name(word)?)
    }
}

fn parse_data(words: &[&str]) -> Result<DataPacket, TraceErrorKind> {
    let bytes = words
        .iter()
        .map(|word| {
            let digits = word.strip_prefix("0x").unwrap_or(word);
            u8::from_str_radix(digits, 16).map_err(|_| TraceErrorKind::InvalidByte(word.to_string()))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    Ok(DataPacket::new(&bytes)?)
}

fn parse_line(line: &str) -> Result<Option<TraceStep>, TraceErrorKind> {
    let line = line.split('#').next().unwrap_or_default();
    let words: Vec<&str> = line.split_whitespace().collect();

    let Some((&command, args)) = words.split_first() else {
        return Ok(None);
    };

    let single = |name: &'static str| match args {
        [] => Err(TraceErrorKind::MissingArgument(name)),
        [arg] => Ok(*arg),
        [_, extra, ..] => Err(TraceErrorKind::UnexpectedArgument(extra.to_string())),
    };
    let none = || match args {
        [] => Ok(()),
        [extra, ..] => Err(TraceErrorKind::UnexpectedArgument(extra.to_string())),
    };

    let step = match command {
        "speed" => TraceStep::Speed(single("speed")?.parse()?),
        "token" => TraceStep::Token(parse_pid(single("token")?)?),
        "data" => TraceStep::Data(parse_data(args)?),
        "data-requested" => none().map(|()| TraceStep::DataRequested)?,
        "status-requested" => none().map(|()| TraceStep::StatusRequested)?,
        "idle" => TraceStep::Idle(parse_number(single("idle")?)?),
        other => return Err(TraceErrorKind::UnknownCommand(other.to_string())),
    };

    Ok(Some(step))
}

/// Parse a whole trace.
pub fn parse_trace(source: &str) -> Result<Vec<TraceStep>, TraceError> {
    source
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            parse_line(line)
                .map_err(|kind| TraceError {
                    line: index + 1,
                    kind,
                })
                .transpose()
        })
        .collect()
}

/// Drive `endpoint` through `steps`.
///
/// `observer` is called for every tick that decoded a SETUP packet or
/// requested a handshake. Decoded packets and handshakes also go into
/// `capture`.
pub fn replay<F>(
    endpoint: &mut ControlEndpoint,
    steps: &[TraceStep],
    capture: &mut SetupCapture,
    mut observer: F,
) where
    F: FnMut(&ControlEndpoint, &EndpointOutputs),
{
    let mut emit = |endpoint: &mut ControlEndpoint, inputs: &EndpointInputs| {
        let outputs = endpoint.tick(inputs);

        if outputs.setup_received {
            capture.record_setup(outputs.tick, endpoint.setup());
        }
        capture.record_handshake(outputs.tick, &outputs.handshake);

        if outputs.setup_received || outputs.handshake.is_requested() {
            observer(endpoint, &outputs);
        }
    };

    for step in steps {
        debug!("{} {:?}", endpoint.now(), step);

        match *step {
            TraceStep::Speed(speed) => endpoint.set_speed(speed),
            TraceStep::Token(pid) => emit(
                endpoint,
                &EndpointInputs {
                    token: Some(TokenEvent::new(pid)),
                    ..Default::default()
                },
            ),
            TraceStep::Data(packet) => emit(
                endpoint,
                &EndpointInputs {
                    packet: Some(packet),
                    ..Default::default()
                },
            ),
            TraceStep::DataRequested => emit(
                endpoint,
                &EndpointInputs {
                    data_requested: true,
                    ..Default::default()
                },
            ),
            TraceStep::StatusRequested => emit(
                endpoint,
                &EndpointInputs {
                    status_requested: true,
                    ..Default::default()
                },
            ),
            TraceStep::Idle(ticks) => {
                for _ in 0..ticks {
                    emit(endpoint, &EndpointInputs::default());
                }
            }
        }
    }

    capture.flush();
    info!("replayed {} steps in {} ticks", steps.len(), endpoint.now().0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::usb::{link::HandshakeRequest, timer::InterpacketDelays};

    const FULL_SPEED_TRACE: &str = "
        # vendor request to an endpoint
        speed full
        token 0b1101
        data 42 0c cd ab 23 01 78 56
        idle 15
        status-requested
    ";

    #[test]
    fn trace_lines_are_parsed() {
        let steps = parse_trace(FULL_SPEED_TRACE).unwrap();

        assert_eq!(
            steps,
            vec![
                TraceStep::Speed(UsbSpeed::Full),
                TraceStep::Token(Pid::SETUP),
                TraceStep::Data(
                    DataPacket::new(&[0x42, 0x0c, 0xcd, 0xab, 0x23, 0x01, 0x78, 0x56]).unwrap()
                ),
                TraceStep::Idle(15),
                TraceStep::StatusRequested,
            ]
        );
    }

    #[test]
    fn pids_can_be_named_or_numeric() {
        assert_eq!(parse_pid("setup"), Ok(Pid::SETUP));
        assert_eq!(parse_pid("0xd"), Ok(Pid::SETUP));
        assert_eq!(parse_pid("13"), Ok(Pid::SETUP));
        assert!(parse_pid("0x2d").is_err());
        assert!(parse_pid("bogus").is_err());
    }

    #[test]
    fn oversized_numeric_pid_reports_the_written_value() {
        assert_eq!(
            parse_pid("0x1ff"),
            Err(TraceErrorKind::InvalidNumber("0x1ff".to_string()))
        );
        assert_eq!(
            parse_pid("256"),
            Err(TraceErrorKind::InvalidNumber("256".to_string()))
        );

        let error = parse_trace("token setup
token 0x1ff
").unwrap_err();
        assert_eq!(error.line, 2);
        assert_eq!(error.to_string(), "line 2: invalid number \"0x1ff\"");
    }

    #[test]
    fn errors_carry_line_numbers() {
        let error = parse_trace("token setup\n\ndata 00 zz\n").unwrap_err();
        assert_eq!(error.line, 3);
        assert_eq!(error.kind, TraceErrorKind::InvalidByte("zz".to_string()));

        let error = parse_trace("idle").unwrap_err();
        assert_eq!(error.kind, TraceErrorKind::MissingArgument("idle"));

        let error = parse_trace("data 0 1 2 3 4 5 6 7 8").unwrap_err();
        assert_eq!(error.kind, TraceErrorKind::PacketTooLong(PacketTooLong(9)));

        let error = parse_trace("status-requested now").unwrap_err();
        assert_eq!(
            error.kind,
            TraceErrorKind::UnexpectedArgument("now".to_string())
        );

        assert!(matches!(
            parse_trace("reset").unwrap_err().kind,
            TraceErrorKind::UnknownCommand(_)
        ));
    }

    #[test]
    fn replay_reports_decode_ack_and_stall() {
        let steps = parse_trace(FULL_SPEED_TRACE).unwrap();
        let mut endpoint =
            ControlEndpoint::with_standard_handler(UsbSpeed::High, InterpacketDelays::default());
        let mut capture = SetupCapture::disabled();

        let mut seen = Vec::new();
        replay(&mut endpoint, &steps, &mut capture, |endpoint, outputs| {
            seen.push((outputs.tick.0, outputs.setup_received, outputs.handshake));
            if outputs.setup_received {
                assert_eq!(endpoint.setup().request(), 12);
            }
        });

        assert_eq!(
            seen,
            vec![
                (1, true, HandshakeRequest::NONE),
                (12, false, HandshakeRequest::ACK),
                (17, false, HandshakeRequest::STALL),
            ]
        );
        assert_eq!(endpoint.now().0, 18);
    }

    #[test]
    fn malformed_demo_only_acks_the_valid_transaction() {
        let steps = parse_trace(include_str!("../demos/malformed.trace")).unwrap();
        let mut endpoint =
            ControlEndpoint::with_standard_handler(UsbSpeed::High, InterpacketDelays::default());

        let mut ticks = Vec::new();
        replay(&mut endpoint, &steps, &mut SetupCapture::disabled(), |_, outputs| {
            ticks.push(outputs.tick.0)
        });

        assert_eq!(ticks, vec![8]);

        let stats = endpoint.stats();
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.length_mismatches, 1);
        assert_eq!(stats.acks, 1);
        assert_eq!(endpoint.setup().request(), 5);
    }

    #[test]
    fn demo_traces_parse() {
        for source in [
            include_str!("../demos/high_speed_vendor.trace"),
            include_str!("../demos/full_speed_get_descriptor.trace"),
        ] {
            assert!(parse_trace(source).is_ok());
        }
    }
}
