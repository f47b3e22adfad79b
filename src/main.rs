mod cli;

use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use usb2_setup::{
    device::usb::{endpoint::ControlEndpoint, pcap::SetupCapture},
    trace::{parse_trace, replay},
};

fn main() -> Result<()> {
    let args = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;
    tracing_log::LogTracer::init().context("Failed to forward log records to tracing")?;

    let source = fs::read_to_string(&args.trace)
        .with_context(|| format!("Failed to read trace {}", args.trace.display()))?;
    let steps = parse_trace(&source)
        .with_context(|| format!("Failed to parse trace {}", args.trace.display()))?;

    let delays = args.delays();
    info!(
        "replaying {} at {} (interpacket delays FS {} / LS {} cycles)",
        args.trace.display(),
        args.speed,
        delays.full,
        delays.low
    );

    let mut endpoint = ControlEndpoint::with_standard_handler(args.speed, delays);
    let mut capture = SetupCapture::new(args.pcap_file.clone(), args.clock_hz);

    replay(&mut endpoint, &steps, &mut capture, |endpoint, outputs| {
        if outputs.setup_received {
            info!("{} SETUP {}", outputs.tick, endpoint.setup());
        }
        if let Some(pid) = outputs.handshake.pid() {
            info!("{} handshake {}", outputs.tick, pid);
        }
    });

    let stats = endpoint.stats();
    info!(
        "{} decoded, {} aborted, {} wrong length, {} ACK, {} STALL",
        stats.decoded, stats.aborted, stats.length_mismatches, stats.acks, stats.stalls
    );

    Ok(())
}
