//! DPP packet framing, checksum validation, and classification.
//!
//! Wire layout:
//! - Sync (2 bytes): F5 FA
//! - PID1, PID2 (1 byte each)
//! - Payload length (2 bytes, BE)
//! - Payload
//! - Checksum (2 bytes, BE): two's complement of the 16-bit sum of all
//!   preceding bytes, so the whole packet sums to zero mod 65536.

use super::commands;
use super::types::{
    AckCode, PacketKind, RequestKind, HEADER_SIZE, MAX_ASCII_PAYLOAD, MAX_FRAMED_LEN,
    MIN_PACKET_SIZE, PID1_ACK, PID1_DATA, PID1_SPECTRUM, PID1_STATUS, PID2_CONFIG_READBACK,
    PID2_DIAGNOSTIC, PID2_MISC_TEXT, PID2_NETFINDER, PID2_PA_CALIBRATION, PID2_SCOPE_DATA,
    PID2_SCOPE_OVERFLOW, SYNC1, SYNC2,
};
use crate::error::{DppError, Result};

/// 16-bit byte sum of a buffer, mod 65536.
fn byte_sum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

/// Build a framed packet around `payload`.
pub fn frame(pid1: u8, pid2: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAMED_LEN {
        return Err(DppError::Length(payload.len()));
    }

    let mut packet = Vec::with_capacity(MIN_PACKET_SIZE + payload.len());
    packet.push(SYNC1);
    packet.push(SYNC2);
    packet.push(pid1);
    packet.push(pid2);
    packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    packet.extend_from_slice(payload);

    let checksum = 0u16.wrapping_sub(byte_sum(&packet));
    packet.extend_from_slice(&checksum.to_be_bytes());

    Ok(packet)
}

/// Independent checksum check for an arbitrary candidate buffer.
///
/// Trusts the framed length field only to locate the checksum; returns
/// false for anything malformed rather than erroring.
pub fn verify_checksum(raw: &[u8]) -> bool {
    if raw.len() < MIN_PACKET_SIZE {
        return false;
    }
    let len = usize::from(u16::from_be_bytes([raw[4], raw[5]]));
    if raw.len() < MIN_PACKET_SIZE + len {
        return false;
    }
    byte_sum(&raw[..HEADER_SIZE + len + 2]) == 0
}

/// Validate framing and classify a received packet.
///
/// Checks run in protocol order: sync pair, length bound, checksum, then
/// PID lookup. On success returns the packet kind and a view of the
/// payload bytes.
pub fn validate_and_classify(raw: &[u8]) -> Result<(PacketKind, &[u8])> {
    if raw.len() < MIN_PACKET_SIZE {
        return Err(DppError::ShortBuffer {
            got: raw.len(),
            need: MIN_PACKET_SIZE,
        });
    }
    if raw[0] != SYNC1 || raw[1] != SYNC2 {
        return Err(DppError::Sync);
    }

    // MSB >= 128 would put LEN past the sanity bound
    if raw[4] >= 0x80 {
        return Err(DppError::Length(usize::from(u16::from_be_bytes([raw[4], raw[5]]))));
    }
    let len = usize::from(u16::from_be_bytes([raw[4], raw[5]]));
    if raw.len() < MIN_PACKET_SIZE + len {
        return Err(DppError::ShortBuffer {
            got: raw.len(),
            need: MIN_PACKET_SIZE + len,
        });
    }

    let sum = byte_sum(&raw[..HEADER_SIZE + len + 2]);
    if sum != 0 {
        return Err(DppError::Checksum(sum));
    }

    let kind = classify(raw[2], raw[3])?;
    Ok((kind, &raw[HEADER_SIZE..HEADER_SIZE + len]))
}

/// PID pair to packet kind. Only called once the checksum is good.
fn classify(pid1: u8, pid2: u8) -> Result<PacketKind> {
    match (pid1, pid2) {
        (PID1_STATUS, 0x01) => Ok(PacketKind::Status),
        (PID1_SPECTRUM, 1..=12) => {
            // PID2 1..=12 encodes channel count (256..8192), even values
            // carry a trailing status block.
            let channels = 256u16 << ((u16::from(pid2) - 1) / 2);
            if pid2 % 2 == 1 {
                Ok(PacketKind::Spectrum { channels })
            } else {
                Ok(PacketKind::SpectrumWithStatus { channels })
            }
        }
        (PID1_DATA, PID2_SCOPE_DATA) => Ok(PacketKind::ScopeData),
        (PID1_DATA, PID2_MISC_TEXT) => Ok(PacketKind::MiscText),
        (PID1_DATA, PID2_SCOPE_OVERFLOW) => Ok(PacketKind::ScopeDataOverflow),
        (PID1_DATA, PID2_DIAGNOSTIC) => Ok(PacketKind::Diagnostic),
        (PID1_DATA, PID2_CONFIG_READBACK) => Ok(PacketKind::ConfigReadback),
        (PID1_DATA, PID2_NETFINDER) => Ok(PacketKind::NetfinderReadback),
        (PID1_DATA, PID2_PA_CALIBRATION) => Ok(PacketKind::PaCalibration),
        (PID1_ACK, code) => Ok(PacketKind::Ack(AckCode::from_pid2(code))),
        _ => Err(DppError::Pid(pid1, pid2)),
    }
}

/// Render an ACK error code as a one-line diagnostic prefixed with the
/// caller's source label. The OK code produces an empty string.
pub fn describe_ack_error(source_label: &str, code: AckCode) -> String {
    if code == AckCode::Ok {
        return String::new();
    }
    format!("{source_label}: {}", code.describe())
}

/// Build a request packet for a fixed command.
pub fn build_request(kind: RequestKind) -> Result<Vec<u8>> {
    let (pid1, pid2, payload) = kind.wire();
    frame(pid1, pid2, payload)
}

/// Parameters for the configuration command family.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Raw ASCII command string to send (send paths only).
    pub command_string: String,
    /// True: device takes coarse+fine gain (GAIN/GAIF); false: total gain (GAIA).
    pub send_coarse_fine_gain: bool,
    pub device: super::types::DeviceVariant,
    pub has_pc5: bool,
    pub is_rev_dx_gains: bool,
    pub eco: u8,
}

/// Which configuration send/readback path to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigRequest {
    /// Send `command_string` after gain stripping and variant filtering.
    SendToHardware,
    /// Send `command_string` verbatim, bypassing all filters.
    SendRaw,
    /// Query every mnemonic legal on this variant.
    FullReadback,
    /// Query the small factory/self-test subset.
    BasicReadback,
    /// Query SCA windows 1..=8.
    ScaReadback,
}

/// Build a configuration send or readback packet.
///
/// The payload is an ASCII command string derived per the selected path;
/// anything over the 512-byte hardware buffer is an error here (the
/// session shrinks and splits before calling).
pub fn build_config_request(request: ConfigRequest, options: &ConfigOptions) -> Result<Vec<u8>> {
    let (pids, ascii) = match request {
        ConfigRequest::SendToHardware => {
            let mut cmd = options.command_string.clone();
            // Exactly one gain representation may go to the hardware
            if options.send_coarse_fine_gain {
                cmd = commands::remove_command("GAIA", &cmd);
            } else {
                cmd = commands::remove_command("GAIN", &cmd);
                cmd = commands::remove_command("GAIF", &cmd);
            }
            let cmd = commands::filter_by_device_variant(
                &cmd,
                options.has_pc5,
                options.device,
                options.is_rev_dx_gains,
                options.eco,
            );
            (super::types::PID_SEND_CONFIG, cmd)
        }
        ConfigRequest::SendRaw => (super::types::PID_SEND_CONFIG, options.command_string.clone()),
        ConfigRequest::FullReadback => (
            super::types::PID_READ_CONFIG,
            commands::build_full_readback_command(
                options.has_pc5,
                options.device,
                options.is_rev_dx_gains,
                options.eco,
            ),
        ),
        ConfigRequest::BasicReadback => (
            super::types::PID_READ_CONFIG,
            commands::build_read_test_readback_command(options.send_coarse_fine_gain, options.device),
        ),
        ConfigRequest::ScaReadback => {
            let mut cmd = String::new();
            for index in 1..=8 {
                cmd.push_str(&format!("SCAI={index};SCAL=?;SCAH=?;SCAO=?;"));
            }
            (super::types::PID_READ_CONFIG, cmd)
        }
    };

    if ascii.len() > MAX_ASCII_PAYLOAD {
        return Err(DppError::CommandTooLong(ascii.len()));
    }
    frame(pids.0, pids.1, ascii.as_bytes())
}
