//! This module implements the CLI interface.
//!
//! The binary replays an event trace (see [`usb2_setup::trace`]) through
//! a control endpoint and reports every decoded SETUP packet and every
//! handshake it requested.
use std::path::PathBuf;

use clap::Parser;
use usb2_setup::device::usb::{
    constants::timing::LINK_CLOCK_HZ, link::UsbSpeed, timer::InterpacketDelays,
};

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
pub struct Cli {
    /// Enable verbose logging. Can be specified multiple times to
    /// increase verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to the event trace to replay.
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// The link speed at the start of the trace. A `speed` line in the
    /// trace overrides it.
    #[arg(long, default_value = "high", value_name = "high|full|low")]
    pub speed: UsbSpeed,

    /// Interpacket delay of a full-speed link in link cycles. At least 1.
    ///
    /// High-speed links need no delay, SETUP packets are acknowledged on
    /// the cycle they complete.
    #[arg(long, value_name = "CYCLES", value_parser = clap::value_parser!(u32).range(1..))]
    fs_delay: Option<u32>,

    /// Interpacket delay of a low-speed link in link cycles. At least 1.
    #[arg(long, value_name = "CYCLES", value_parser = clap::value_parser!(u32).range(1..))]
    ls_delay: Option<u32>,

    /// Frequency of the link clock. Used to timestamp captured packets.
    #[arg(long, default_value_t = LINK_CLOCK_HZ, value_name = "HZ")]
    pub clock_hz: u64,

    /// Write all decoded SETUP packets and handshakes into this PCAP
    /// file. Omit this option to disable PCAP logging.
    #[arg(long = "pcap-file", value_name = "FILE")]
    pub pcap_file: Option<PathBuf>,
}

impl Cli {
    /// The interpacket delays, with defaults for everything not given
    /// on the command line.
    pub fn delays(&self) -> InterpacketDelays {
        let defaults = InterpacketDelays::default();

        InterpacketDelays {
            full: self.fs_delay.unwrap_or(defaults.full),
            low: self.ls_delay.unwrap_or(defaults.low),
        }
    }
}
