//! # SETUP Capture
//!
//! Write decoded SETUP packets and the handshakes answering them into a
//! PCAP file using the Linux usbmon link type, so the traffic can be
//! inspected with Wireshark.
//!
//! Capturing never influences the link logic. If the file can't be
//! created or written, we log a warning once and stop capturing.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{
    constants::timing::LINK_CLOCK_HZ,
    link::{HandshakeRequest, Tick},
    setup::SetupPacket,
};

const LINKTYPE_USB_LINUX: u32 = 189;
const PCAP_MAGIC: u32 = 0xa1b2c3d4;
const SNAPLEN: u32 = 65_535;

const EVENT_SUBMIT: u8 = b'S';
const EVENT_COMPLETE: u8 = b'C';
const TRANSFER_CONTROL: u8 = 2;
const SETUP_PRESENT: u8 = 0;
const SETUP_ABSENT: u8 = b'-';
const NO_DATA: u8 = b'<';
const DIRECTION_IN: u8 = 0x80;

const STATUS_OK: i32 = 0;
const STATUS_IN_PROGRESS: i32 = -115;
const STATUS_STALLED: i32 = -32;

/// Timestamp of a packet in seconds and microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    /// Whole seconds.
    pub seconds: u32,
    /// Fraction of the second in microseconds.
    pub microseconds: u32,
}

impl Timestamp {
    /// Convert a tick into link time, given the link clock frequency.
    #[must_use]
    pub fn from_tick(tick: Tick, clock_hz: u64) -> Self {
        let clock_hz = clock_hz.max(1);
        let micros = u128::from(tick.0) * 1_000_000 / u128::from(clock_hz);

        Self {
            seconds: (micros / 1_000_000) as u32,
            microseconds: (micros % 1_000_000) as u32,
        }
    }
}

/// The usbmon header preceding every captured packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UsbPacketMeta {
    /// URB identifier. Submission and completion share it.
    pub id: u64,
    /// `S`ubmission or `C`ompletion.
    pub event_type: u8,
    /// Transfer type, 2 for control.
    pub transfer_type: u8,
    /// Endpoint number and direction bit.
    pub endpoint_address: u8,
    /// Device address on the bus.
    pub device_address: u8,
    /// Bus number.
    pub bus_number: u16,
    /// 0 if `setup` is valid.
    pub setup_flag: u8,
    /// 0 if data follows the header.
    pub data_flag: u8,
    /// URB status, a negative errno or 0.
    pub status: i32,
    /// Requested transfer length.
    pub urb_len: u32,
    /// Length of the captured data.
    pub data_len: u32,
    /// The SETUP data stage.
    pub setup: [u8; 8],
}

impl UsbPacketMeta {
    /// The submission record of a SETUP packet.
    #[must_use]
    pub fn submission(id: u64, setup: &SetupPacket) -> Self {
        Self {
            id,
            event_type: EVENT_SUBMIT,
            transfer_type: TRANSFER_CONTROL,
            endpoint_address: if setup.is_in_request() { DIRECTION_IN } else { 0 },
            bus_number: 1,
            setup_flag: SETUP_PRESENT,
            data_flag: NO_DATA,
            status: STATUS_IN_PROGRESS,
            urb_len: u32::from(setup.length()),
            setup: setup.to_bytes(),
            ..Default::default()
        }
    }

    /// The completion record of the handshake answering submission `id`.
    #[must_use]
    pub fn completion(id: u64, handshake: &HandshakeRequest) -> Self {
        Self {
            id,
            event_type: EVENT_COMPLETE,
            transfer_type: TRANSFER_CONTROL,
            bus_number: 1,
            setup_flag: SETUP_ABSENT,
            data_flag: NO_DATA,
            status: if handshake.stall {
                STATUS_STALLED
            } else {
                STATUS_OK
            },
            ..Default::default()
        }
    }

    /// Length of the encoded usbmon header.
    pub const ENCODED_LEN: usize = 48;

    /// Encode the usbmon header, little-endian as usbmon writes it.
    #[must_use]
    pub fn encode(&self, timestamp: Timestamp) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);

        out.extend(self.id.to_le_bytes());
        out.extend([
            self.event_type,
            self.transfer_type,
            self.endpoint_address,
            self.device_address,
        ]);
        out.extend(self.bus_number.to_le_bytes());
        out.extend([self.setup_flag, self.data_flag]);
        out.extend(i64::from(timestamp.seconds).to_le_bytes());
        out.extend(timestamp.microseconds.to_le_bytes());
        out.extend(self.status.to_le_bytes());
        out.extend(self.urb_len.to_le_bytes());
        out.extend(self.data_len.to_le_bytes());
        out.extend(self.setup);

        debug_assert_eq!(out.len(), Self::ENCODED_LEN);
        out
    }
}

/// The PCAP file header: format 2.4, UTC, no timestamp accuracy given.
fn file_header() -> Vec<u8> {
    let (major, minor) = (2u16, 4u16);

    let fields: [&[u8]; 7] = [
        &PCAP_MAGIC.to_le_bytes(),
        &major.to_le_bytes(),
        &minor.to_le_bytes(),
        &0i32.to_le_bytes(),
        &0u32.to_le_bytes(),
        &SNAPLEN.to_le_bytes(),
        &LINKTYPE_USB_LINUX.to_le_bytes(),
    ];
    fields.concat()
}

/// A PCAP record: the per-packet header followed by the usbmon header.
fn record(timestamp: Timestamp, meta: &UsbPacketMeta) -> Vec<u8> {
    let body = meta.encode(timestamp);
    // Nothing is truncated, so captured and original length agree.
    let len = body.len() as u32;

    let mut out = Vec::with_capacity(16 + body.len());
    for word in [timestamp.seconds, timestamp.microseconds, len, len] {
        out.extend(word.to_le_bytes());
    }
    out.extend(body);
    out
}

/// Captures SETUP traffic into a PCAP file.
///
/// The file is created when the first packet is captured.
pub struct SetupCapture {
    path: Option<PathBuf>,
    file: Option<BufWriter<File>>,
    clock_hz: u64,
    last_id: u64,
    warned: bool,
}

impl std::fmt::Debug for SetupCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupCapture")
            .field("path", &self.path)
            .field("open", &self.file.is_some())
            .field("clock_hz", &self.clock_hz)
            .field("last_id", &self.last_id)
            .finish()
    }
}

impl SetupCapture {
    /// Create a capture writing to `path`. Passing `None` disables
    /// capturing.
    #[must_use]
    pub fn new(path: Option<PathBuf>, clock_hz: u64) -> Self {
        Self {
            path,
            file: None,
            clock_hz,
            last_id: 0,
            warned: false,
        }
    }

    /// A capture that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, LINK_CLOCK_HZ)
    }

    /// Whether captured packets still end up in a file.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Record a newly decoded SETUP packet.
    pub fn record_setup(&mut self, tick: Tick, setup: &SetupPacket) {
        self.last_id += 1;
        let meta = UsbPacketMeta::submission(self.last_id, setup);
        self.append(tick, &meta);
    }

    /// Record a handshake answering the most recent SETUP packet.
    pub fn record_handshake(&mut self, tick: Tick, handshake: &HandshakeRequest) {
        if handshake.is_requested() {
            let meta = UsbPacketMeta::completion(self.last_id, handshake);
            self.append(tick, &meta);
        }
    }

    /// Flush buffered records to the file.
    pub fn flush(&mut self) {
        let result = match self.file.as_mut() {
            Some(file) => file.flush(),
            None => return,
        };

        if let Err(error) = result {
            self.give_up(format_args!("flushing failed: {error}"));
        }
    }

    fn append(&mut self, tick: Tick, meta: &UsbPacketMeta) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        if self.file.is_none() {
            match Self::open(path) {
                Ok(file) => self.file = Some(file),
                Err(error) => {
                    let shown = path.display().to_string();
                    self.give_up(format_args!("cannot create {shown}: {error}"));
                    return;
                }
            }
        }

        let bytes = record(Timestamp::from_tick(tick, self.clock_hz), meta);
        let result = self
            .file
            .as_mut()
            .map_or(Ok(()), |file| file.write_all(&bytes));

        if let Err(error) = result {
            self.give_up(format_args!("writing record {} failed: {error}", meta.id));
        }
    }

    /// Create `path` with its parent directories and write the file header.
    fn open(path: &Path) -> io::Result<BufWriter<File>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&file_header())?;
        Ok(file)
    }

    fn give_up(&mut self, reason: std::fmt::Arguments<'_>) {
        if !std::mem::replace(&mut self.warned, true) {
            warn!("SETUP capture stopped, {reason}");
        }
        self.path = None;
        self.file = None;
    }
}

impl Drop for SetupCapture {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_setup() -> SetupPacket {
        SetupPacket::decode(&[0x80, 6, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00])
    }

    #[test]
    fn ticks_convert_to_link_time() {
        assert_eq!(Timestamp::from_tick(Tick(0), LINK_CLOCK_HZ), Timestamp::default());
        assert_eq!(
            Timestamp::from_tick(Tick(90_000_060), LINK_CLOCK_HZ),
            Timestamp {
                seconds: 1,
                microseconds: 500_001
            }
        );
    }

    #[test]
    fn submission_header_carries_the_setup_bytes() {
        let setup = reference_setup();
        let header = UsbPacketMeta::submission(7, &setup).encode(Timestamp::default());

        assert_eq!(&header[0..8], &7u64.to_le_bytes());
        assert_eq!(header[8], b'S');
        assert_eq!(header[9], TRANSFER_CONTROL);
        assert_eq!(header[10], DIRECTION_IN);
        assert_eq!(header[14], SETUP_PRESENT);
        assert_eq!(&header[32..36], &0x40u32.to_le_bytes());
        assert_eq!(&header[40..48], &setup.to_bytes());
        assert_eq!(header.len(), UsbPacketMeta::ENCODED_LEN);
    }

    #[test]
    fn stall_completes_with_epipe() {
        let header = UsbPacketMeta::completion(1, &HandshakeRequest::STALL)
            .encode(Timestamp::default());

        assert_eq!(header[8], b'C');
        assert_eq!(&header[28..32], &(-32i32).to_le_bytes());
    }

    #[test]
    fn capture_writes_global_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("setup.pcap");

        let mut capture = SetupCapture::new(Some(path.clone()), LINK_CLOCK_HZ);
        capture.record_setup(Tick(10), &reference_setup());
        capture.record_handshake(Tick(11), &HandshakeRequest::ACK);
        capture.record_handshake(Tick(12), &HandshakeRequest::NONE);
        drop(capture);

        let bytes = fs::read(path).unwrap();
        let record_len = 16 + UsbPacketMeta::ENCODED_LEN;
        assert_eq!(bytes.len(), 24 + 2 * record_len);
        assert_eq!(&bytes[0..4], &PCAP_MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..8], &[2u8, 0, 4, 0]);
        assert_eq!(&bytes[20..24], &LINKTYPE_USB_LINUX.to_le_bytes());

        // Captured and original length of the first record.
        assert_eq!(&bytes[32..36], &48u32.to_le_bytes());
        assert_eq!(&bytes[36..40], &48u32.to_le_bytes());

        // The completion shares the submission's URB id.
        let second = 24 + record_len + 16;
        assert_eq!(&bytes[24 + 16..24 + 24], &bytes[second..second + 8]);
        assert_eq!(bytes[second + 8], b'C');
    }

    #[test]
    fn disabled_capture_never_touches_the_filesystem() {
        let mut capture = SetupCapture::disabled();
        capture.record_setup(Tick(0), &reference_setup());

        assert!(!capture.is_enabled());
    }

    #[test]
    fn unwritable_path_disables_capture() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();

        let mut capture = SetupCapture::new(Some(blocker.join("setup.pcap")), LINK_CLOCK_HZ);
        capture.record_setup(Tick(0), &reference_setup());

        assert!(!capture.is_enabled());
    }
}
