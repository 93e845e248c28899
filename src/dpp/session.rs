//! Device session: owns one transport, sequences request/response
//! cycles, and publishes decoded results.
//!
//! Requests and responses are strictly sequential; a send is always
//! followed by blocking receives before the next send. The session owns
//! its receive buffer; nothing is shared between sessions.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::commands;
use super::diagnostics::{decode_diagnostics, DiagnosticSnapshot};
use super::netfinder::{self, NetfinderReply};
use super::protocol::{self, ConfigOptions, ConfigRequest};
use super::status::{decode_status, StatusSnapshot};
use super::transport::{
    SerialTransport, Transport, UdpTransport, UsbTransport, DEFAULT_UDP_TIMEOUT,
    DEFAULT_USB_TIMEOUT, DEVICE_UDP_PORT, DIAGNOSTIC_USB_TIMEOUT,
};
use super::types::{AckCode, DeviceVariant, PacketKind, RequestKind, MAX_ASCII_PAYLOAD, NETFINDER_PORT};
use crate::error::{DppError, Result};

/// Largest inbound packet: an 8k-channel spectrum with status block.
const RECEIVE_BUFFER_SIZE: usize = 32 * 1024;

/// Discovery parameters: broadcast attempts, spacing, settle delay, and
/// how many foreign packets one receive pass will look past.
const DISCOVERY_ATTEMPTS: usize = 3;
const DISCOVERY_RETRY_DELAY: Duration = Duration::from_secs(1);
const DISCOVERY_SETTLE: Duration = Duration::from_millis(100);
const DISCOVERY_MAX_ENTRIES: usize = 64;

/// Outcome of one discovery receive pass.
enum DiscoveryOutcome {
    Found(Box<NetfinderReply>),
    Timeout,
    Overflow,
}

/// Caller-set flags selecting how a configuration readback payload is
/// consumed once it arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadbackFormat {
    pub display_cfg: bool,
    pub display_sca: bool,
    pub cfg_read_back: bool,
    pub save_cfg: bool,
    pub print_cfg: bool,
}

impl ReadbackFormat {
    pub fn any_set(&self) -> bool {
        self.display_cfg || self.display_sca || self.cfg_read_back || self.save_cfg || self.print_cfg
    }
}

/// One connected device session.
pub struct DppSession {
    transport: Box<dyn Transport>,
    receive_buffer: Vec<u8>,
    default_timeout: Duration,
    source_label: String,

    /// Input flags for the next configuration readback.
    pub readback_format: ReadbackFormat,
    /// Set once a general configuration readback has been parsed.
    pub hw_cfg_ready: bool,
    /// Set once an SCA readback has been parsed.
    pub sca_read_back: bool,

    /// Gain representation this unit takes (coarse+fine vs. total).
    pub send_coarse_fine_gain: bool,

    pub status: Option<StatusSnapshot>,
    /// Rendered status summary from the latest status packet.
    pub status_text: String,
    /// Latest general configuration readback (ASCII command string).
    pub hw_config: Option<String>,
    /// Latest SCA configuration readback.
    pub sca_config: Option<String>,
    pub diagnostics: Option<DiagnosticSnapshot>,
}

impl DppSession {
    /// Wrap an already-open transport.
    pub fn from_transport(transport: Box<dyn Transport>, default_timeout: Duration) -> Self {
        let source_label = transport.description();
        Self {
            transport,
            receive_buffer: vec![0u8; RECEIVE_BUFFER_SIZE],
            default_timeout,
            source_label,
            readback_format: ReadbackFormat::default(),
            hw_cfg_ready: false,
            sca_read_back: false,
            send_coarse_fine_gain: true,
            status: None,
            status_text: String::new(),
            hw_config: None,
            sca_config: None,
            diagnostics: None,
        }
    }

    /// Discover the target on the local network, then open a UDP
    /// session to it.
    pub fn connect_udp(target: IpAddr) -> Result<Self> {
        let reply = discover(target)?;
        info!(
            "Discovered device at {target}: {}",
            reply.identity.first().map_or("(no identity)", |s| s.as_str())
        );
        let transport = UdpTransport::connect(SocketAddr::new(target, DEVICE_UDP_PORT))?;
        Ok(Self::from_transport(Box::new(transport), DEFAULT_UDP_TIMEOUT))
    }

    /// Open the `index`-th matching USB device.
    pub fn connect_usb(index: usize) -> Result<Self> {
        let transport = UsbTransport::open(index)?;
        Ok(Self::from_transport(Box::new(transport), DEFAULT_USB_TIMEOUT))
    }

    /// Serial sessions construct but fail on first use; the serial
    /// protocol variant is not implemented.
    pub fn connect_serial() -> Self {
        Self::from_transport(Box::new(SerialTransport), DEFAULT_UDP_TIMEOUT)
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<()> {
        info!("Closing session ({})", self.source_label);
        self.transport.close()
    }

    /// Reset all five configuration-readback input flags.
    pub fn clear_config_read_format_flags(&mut self) {
        self.readback_format = ReadbackFormat::default();
    }

    /// Override the per-receive timeout (slow requests still take at
    /// least the diagnostic timeout).
    pub fn set_receive_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    fn receive_timeout_for(&self, kind: RequestKind) -> Duration {
        if kind.is_slow() {
            self.default_timeout.max(DIAGNOSTIC_USB_TIMEOUT)
        } else {
            self.default_timeout
        }
    }

    /// Send one fixed request packet.
    fn send_request(&mut self, kind: RequestKind) -> Result<()> {
        let packet = protocol::build_request(kind)?;
        debug!("TX {kind:?} ({} bytes)", packet.len());
        self.transport.send(&packet)?;
        Ok(())
    }

    /// Receive and validate one packet, returning its kind and payload.
    fn receive_packet(&mut self, timeout: Duration) -> Result<(PacketKind, Vec<u8>)> {
        let count = self.transport.receive(&mut self.receive_buffer, timeout)?;
        let (kind, payload) = protocol::validate_and_classify(&self.receive_buffer[..count])?;
        debug!("RX {kind:?} ({} payload bytes)", payload.len());
        Ok((kind, payload.to_vec()))
    }

    /// Receive a packet, turning device NAKs into errors with a logged
    /// diagnostic line.
    fn receive_checked(&mut self, timeout: Duration) -> Result<(PacketKind, Vec<u8>)> {
        let (kind, payload) = self.receive_packet(timeout)?;
        if let PacketKind::Ack(code) = kind {
            if code != AckCode::Ok {
                warn!("{}", protocol::describe_ack_error(&self.source_label, code));
                return Err(DppError::Nak(code));
            }
        }
        Ok((kind, payload))
    }

    /// Request and decode a status packet.
    pub fn request_status(&mut self) -> Result<&StatusSnapshot> {
        self.send_request(RequestKind::Status)?;
        let timeout = self.receive_timeout_for(RequestKind::Status);
        let (kind, payload) = self.receive_checked(timeout)?;
        if kind != PacketKind::Status {
            return Err(DppError::unexpected(format!("wanted status, got {kind:?}")));
        }
        let snapshot = decode_status(&payload)?;
        self.status_text = snapshot.render_summary();
        Ok(self.status.insert(snapshot))
    }

    /// Request and decode a diagnostic packet. Uses the variant from the
    /// last status packet; request status first for correct gain tables.
    pub fn request_diagnostics(&mut self) -> Result<&DiagnosticSnapshot> {
        let device = self.device_variant();
        self.send_request(RequestKind::DiagnosticData)?;
        let timeout = self.receive_timeout_for(RequestKind::DiagnosticData);
        let (kind, payload) = self.receive_checked(timeout)?;
        if kind != PacketKind::Diagnostic {
            return Err(DppError::unexpected(format!("wanted diagnostics, got {kind:?}")));
        }
        let snapshot = decode_diagnostics(&payload, device)?;
        Ok(self.diagnostics.insert(snapshot))
    }

    /// Send a simple command and require an OK acknowledgement.
    pub fn execute(&mut self, kind: RequestKind) -> Result<()> {
        self.send_request(kind)?;
        let timeout = self.receive_timeout_for(kind);
        let (response, _) = self.receive_checked(timeout)?;
        match response {
            PacketKind::Ack(AckCode::Ok) => Ok(()),
            other => Err(DppError::unexpected(format!("wanted ACK, got {other:?}"))),
        }
    }

    pub fn enable_mca(&mut self) -> Result<()> {
        self.execute(RequestKind::EnableMca)
    }

    pub fn disable_mca(&mut self) -> Result<()> {
        self.execute(RequestKind::DisableMca)
    }

    pub fn clear_spectrum(&mut self) -> Result<()> {
        self.execute(RequestKind::ClearSpectrum)
    }

    fn device_variant(&self) -> DeviceVariant {
        self.status.as_ref().map(|s| s.device).unwrap_or_default()
    }

    fn config_options(&self, command_string: &str) -> ConfigOptions {
        let status = self.status.as_ref();
        ConfigOptions {
            command_string: command_string.to_string(),
            send_coarse_fine_gain: self.send_coarse_fine_gain,
            device: self.device_variant(),
            has_pc5: status.is_some_and(|s| s.pc5_present),
            is_rev_dx_gains: status.is_some_and(|s| s.is_dp5_rev_dx_gains),
            eco: status.map_or(0, |s| s.eco),
        }
    }

    /// Request the full configuration readback for this device.
    ///
    /// One of the readback format flags must be set first so the caller
    /// has declared what the payload is for; an unset flag set is an
    /// error, not a silent drop. Also runs the SCA readback when
    /// `display_sca` is set.
    pub fn request_full_configuration(&mut self) -> Result<String> {
        if !self.readback_format.any_set() {
            return Err(DppError::ReadbackFormatNotSet);
        }
        self.hw_cfg_ready = false;

        let options = self.config_options("");
        let packet = protocol::build_config_request(ConfigRequest::FullReadback, &options)?;
        self.transport.send(&packet)?;
        let (kind, payload) = self.receive_checked(self.default_timeout)?;
        if kind != PacketKind::ConfigReadback {
            return Err(DppError::unexpected(format!("wanted config readback, got {kind:?}")));
        }
        let config = String::from_utf8_lossy(&payload).into_owned();
        self.hw_config = Some(config.clone());
        self.hw_cfg_ready = true;

        if self.readback_format.display_sca {
            self.request_sca_configuration()?;
        }
        Ok(config)
    }

    /// Request the SCA window readback (indices 1..=8).
    pub fn request_sca_configuration(&mut self) -> Result<String> {
        self.sca_read_back = false;
        let options = self.config_options("");
        let packet = protocol::build_config_request(ConfigRequest::ScaReadback, &options)?;
        self.transport.send(&packet)?;
        let (kind, payload) = self.receive_checked(self.default_timeout)?;
        if kind != PacketKind::ConfigReadback {
            return Err(DppError::unexpected(format!("wanted SCA readback, got {kind:?}")));
        }
        let config = String::from_utf8_lossy(&payload).into_owned();
        self.sca_config = Some(config.clone());
        self.sca_read_back = true;
        Ok(config)
    }

    /// Send a configuration command string to the hardware.
    ///
    /// The string is gain-stripped and variant-filtered, then shortened
    /// by keyword abbreviation if over the 512-byte buffer, and finally
    /// split into two sequential packets if still too long. Splitting is
    /// a recovery path, not an error.
    pub fn send_configuration(&mut self, command_string: &str) -> Result<()> {
        let options = self.config_options(command_string);

        let mut cmd = options.command_string.clone();
        if options.send_coarse_fine_gain {
            cmd = commands::remove_command("GAIA", &cmd);
        } else {
            cmd = commands::remove_command("GAIN", &cmd);
            cmd = commands::remove_command("GAIF", &cmd);
        }
        cmd = commands::filter_by_device_variant(
            &cmd,
            options.has_pc5,
            options.device,
            options.is_rev_dx_gains,
            options.eco,
        );
        cmd = commands::shorten_command_string(&cmd);

        if cmd.len() <= MAX_ASCII_PAYLOAD {
            return self.send_config_chunk(&cmd);
        }

        let split = commands::find_split_point(&cmd);
        if split == 0 {
            return Err(DppError::CommandTooLong(cmd.len()));
        }
        let (first, second) = cmd.split_at(split);
        debug!("Splitting {}-byte command string at {split}", cmd.len());
        self.send_config_chunk(first)?;
        self.send_config_chunk(second)
    }

    fn send_config_chunk(&mut self, chunk: &str) -> Result<()> {
        let options = ConfigOptions {
            command_string: chunk.to_string(),
            ..self.config_options("")
        };
        let packet = protocol::build_config_request(ConfigRequest::SendRaw, &options)?;
        self.transport.send(&packet)?;
        let (kind, _) = self.receive_checked(self.default_timeout)?;
        match kind {
            PacketKind::Ack(AckCode::Ok) => Ok(()),
            other => Err(DppError::unexpected(format!("wanted ACK, got {other:?}"))),
        }
    }

    /// Load both sections of a configuration file and send them.
    pub fn send_configuration_file(&mut self, path: &std::path::Path) -> Result<()> {
        let general = commands::load_config_file(path, commands::CONFIG_SECTION);
        if general.is_empty() {
            return Err(DppError::config(format!(
                "no configuration found in {}",
                path.display()
            )));
        }
        self.send_configuration(&general)?;

        let sca = commands::load_config_file(path, commands::SCA_SECTION);
        if !sca.is_empty() {
            self.send_configuration(&sca)?;
        }
        Ok(())
    }
}

/// Broadcast NetFinder requests until the target answers.
///
/// Up to three broadcast attempts, one second apart, each followed by a
/// bounded receive pass that looks past replies from other devices.
pub fn discover(target: IpAddr) -> Result<NetfinderReply> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_broadcast(true)?;
    let destination = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), NETFINDER_PORT);
    discover_via(&socket, destination, target)
}

/// Discovery against an explicit destination (broadcast in production,
/// loopback in tests).
pub(crate) fn discover_via(
    socket: &UdpSocket,
    destination: SocketAddr,
    target: IpAddr,
) -> Result<NetfinderReply> {
    let mut overflowed = false;
    for attempt in 0..DISCOVERY_ATTEMPTS {
        if attempt > 0 {
            std::thread::sleep(DISCOVERY_RETRY_DELAY);
        }
        let nonce = netfinder::fresh_nonce();
        socket.send_to(&netfinder::build_request(nonce), destination)?;
        debug!("NetFinder broadcast attempt {} (nonce {nonce:#06X})", attempt + 1);

        // Let slow devices wake their network stack before we listen
        std::thread::sleep(DISCOVERY_SETTLE);

        match discovery_receive_pass(socket, target, nonce)? {
            DiscoveryOutcome::Found(reply) => return Ok(*reply),
            DiscoveryOutcome::Timeout => debug!("NetFinder attempt {} timed out", attempt + 1),
            DiscoveryOutcome::Overflow => {
                warn!("NetFinder receive budget exhausted without a matching reply");
                overflowed = true;
            }
        }
    }
    if overflowed {
        return Err(DppError::Overflow(format!(
            "discovery saw {DISCOVERY_MAX_ENTRIES}+ packets, none from {target}"
        )));
    }
    Err(DppError::NoDevice(format!("no NetFinder reply from {target}")))
}

fn discovery_receive_pass(
    socket: &UdpSocket,
    target: IpAddr,
    nonce: u16,
) -> Result<DiscoveryOutcome> {
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut buffer = [0u8; 1024];

    for _ in 0..DISCOVERY_MAX_ENTRIES {
        match socket.recv_from(&mut buffer) {
            Ok((count, from)) => {
                if from.ip() == target {
                    if let Some(reply) = netfinder::parse_reply(&buffer[..count], nonce) {
                        return Ok(DiscoveryOutcome::Found(Box::new(reply)));
                    }
                }
                // Foreign device or stale nonce; keep listening
                debug!("Ignoring {count}-byte discovery packet from {from}");
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(DiscoveryOutcome::Timeout);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(DiscoveryOutcome::Overflow)
}
