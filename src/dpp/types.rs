//! Protocol types and constants shared across the DPP stack.

// Framing constants
pub(crate) const SYNC1: u8 = 0xF5;
pub(crate) const SYNC2: u8 = 0xFA;
pub(crate) const HEADER_SIZE: usize = 6; // sync(2) + pid(2) + len(2)
pub(crate) const MIN_PACKET_SIZE: usize = 8; // header + checksum, empty payload
/// Hardware buffer limit for one ASCII configuration payload.
pub const MAX_ASCII_PAYLOAD: usize = 512;
/// Sanity bound on the framed length field (MSB >= 128 is rejected).
pub(crate) const MAX_FRAMED_LEN: usize = 0x7FFF;

// Response PID1 values
pub(crate) const PID1_STATUS: u8 = 0x80;
pub(crate) const PID1_SPECTRUM: u8 = 0x81;
pub(crate) const PID1_DATA: u8 = 0x82;
pub(crate) const PID1_ACK: u8 = 0xFF;

// PID1=0x82 response subtypes
pub(crate) const PID2_SCOPE_DATA: u8 = 0x01;
pub(crate) const PID2_MISC_TEXT: u8 = 0x02;
pub(crate) const PID2_SCOPE_OVERFLOW: u8 = 0x03;
pub(crate) const PID2_DIAGNOSTIC: u8 = 0x05;
pub(crate) const PID2_CONFIG_READBACK: u8 = 0x07;
pub(crate) const PID2_NETFINDER: u8 = 0x08;
pub(crate) const PID2_PA_CALIBRATION: u8 = 0x09;

// Request PIDs for the configuration command family
pub(crate) const PID_SEND_CONFIG: (u8, u8) = (0x20, 0x02);
pub(crate) const PID_READ_CONFIG: (u8, u8) = (0x20, 0x03);

/// NetFinder discovery UDP port.
pub const NETFINDER_PORT: u16 = 3040;

// Amptek DPP USB identity (CP2201-based interface)
pub(crate) const USB_VID: u16 = 0x10C4;
pub(crate) const USB_PID: u16 = 0x842A;
pub(crate) const USB_ENDPOINT_OUT: u8 = 0x02;
pub(crate) const USB_ENDPOINT_IN: u8 = 0x81;

/// Connected DPP hardware variant.
///
/// Fixed per unit; reported in byte 39 of the status packet. Drives
/// command applicability, status-bit meaning, and gain table selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceVariant {
    #[default]
    Dp5,
    Px5,
    Dp5g,
    Mca8000d,
    Tb5,
    Dp5x,
}

impl DeviceVariant {
    /// Map the status-packet device-id byte to a variant.
    ///
    /// Unrecognized ids fall back to DP5, matching device firmware
    /// numbering (0..=5 assigned, anything else treated as DP5).
    pub fn from_device_id(id: u8) -> Self {
        match id {
            1 => Self::Px5,
            2 => Self::Dp5g,
            3 => Self::Mca8000d,
            4 => Self::Tb5,
            5 => Self::Dp5x,
            _ => Self::Dp5,
        }
    }

    /// Marketing name as printed in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dp5 => "DP5",
            Self::Px5 => "PX5",
            Self::Dp5g => "DP5G",
            Self::Mca8000d => "MCA8000D",
            Self::Tb5 => "TB5",
            Self::Dp5x => "DP5-X",
        }
    }

    /// True for the scintillator units (DP5G, TB5).
    pub fn is_scint(&self) -> bool {
        matches!(self, Self::Dp5g | Self::Tb5)
    }
}

impl std::fmt::Display for DeviceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Acknowledgement code carried in PID2 of an ACK packet (PID1=0xFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    Ok,
    SyncError,
    PidError,
    LengthError,
    ChecksumError,
    BadParameter,
    BadHexRecord,
    UnrecognizedCommand,
    FpgaNotInitialized,
    Cp2201NotFound,
    NoScopeData,
    Pc5NotPresent,
    EthernetBusy,
    CalibrationDataNotPresent,
    /// Any PID2 value outside the documented set.
    UnrecognizedOther(u8),
}

impl AckCode {
    /// Decode the PID2 byte of an ACK packet.
    pub fn from_pid2(pid2: u8) -> Self {
        match pid2 {
            0x00 => Self::Ok,
            0x01 => Self::SyncError,
            0x02 => Self::PidError,
            0x03 => Self::LengthError,
            0x04 => Self::ChecksumError,
            0x05 => Self::BadParameter,
            0x06 => Self::BadHexRecord,
            0x07 => Self::UnrecognizedCommand,
            0x08 => Self::FpgaNotInitialized,
            0x09 => Self::Cp2201NotFound,
            0x0A => Self::NoScopeData,
            0x0B => Self::Pc5NotPresent,
            0x0D => Self::EthernetBusy,
            0x11 => Self::CalibrationDataNotPresent,
            other => Self::UnrecognizedOther(other),
        }
    }

    /// One-line diagnostic text. Empty for the OK code.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Ok => "",
            Self::SyncError => "sync bytes not found or not in the correct position",
            Self::PidError => "PID1 and PID2 are not recognized",
            Self::LengthError => "LEN field is not consistent with the PID",
            Self::ChecksumError => "checksum of the received packet is incorrect",
            Self::BadParameter => "bad parameter value",
            Self::BadHexRecord => "bad hex record in microcontroller upload",
            Self::UnrecognizedCommand => "unrecognized command",
            Self::FpgaNotInitialized => "FPGA not initialized",
            Self::Cp2201NotFound => "CP2201 ethernet controller not found",
            Self::NoScopeData => "scope data not available (digital oscilloscope not triggered)",
            Self::Pc5NotPresent => "PC5 not present",
            Self::EthernetBusy => "ethernet interface busy (shared by another process)",
            Self::CalibrationDataNotPresent => "calibration data not present",
            Self::UnrecognizedOther(_) => "unrecognized error code",
        }
    }
}

/// Semantic classification of a validated inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Status,
    /// Spectrum-only packet with the given channel count.
    Spectrum { channels: u16 },
    /// Spectrum packet with a trailing 64-byte status block.
    SpectrumWithStatus { channels: u16 },
    ScopeData,
    ScopeDataOverflow,
    MiscText,
    Diagnostic,
    ConfigReadback,
    NetfinderReadback,
    PaCalibration,
    Ack(AckCode),
}

/// Outbound requests that carry no payload or a fixed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Status,
    Spectrum,
    SpectrumClear,
    SpectrumStatus,
    SpectrumStatusClear,
    ScopeData,
    ScopeDataRearm,
    DiagnosticData,
    NetfinderReadback,
    ClearSpectrum,
    EnableMca,
    DisableMca,
    ArmScope,
    AutosetInputOffset,
    AutosetFastThreshold,
    EraseConfigFlash,
    SwitchConfigFlash,
    CommTestAck,
}

impl RequestKind {
    /// Fixed (PID1, PID2, payload) triple for this request.
    pub(crate) fn wire(&self) -> (u8, u8, &'static [u8]) {
        // Flash commands carry a fixed unlock key so a stray packet
        // cannot erase the stored configuration.
        const FLASH_KEY: &[u8] = &[0x55, 0xAA];
        match self {
            Self::Status => (0x01, 0x01, &[]),
            Self::Spectrum => (0x02, 0x01, &[]),
            Self::SpectrumClear => (0x02, 0x02, &[]),
            Self::SpectrumStatus => (0x02, 0x03, &[]),
            Self::SpectrumStatusClear => (0x02, 0x04, &[]),
            Self::ScopeData => (0x03, 0x01, &[]),
            Self::ScopeDataRearm => (0x03, 0x02, &[]),
            Self::DiagnosticData => (0x03, 0x05, &[]),
            Self::NetfinderReadback => (0x03, 0x08, &[]),
            Self::ClearSpectrum => (0xF0, 0x01, &[]),
            Self::EnableMca => (0xF0, 0x02, &[]),
            Self::DisableMca => (0xF0, 0x03, &[]),
            Self::ArmScope => (0xF0, 0x04, &[]),
            Self::AutosetInputOffset => (0xF0, 0x05, &[]),
            Self::AutosetFastThreshold => (0xF0, 0x06, &[]),
            Self::EraseConfigFlash => (0xF0, 0x20, FLASH_KEY),
            Self::SwitchConfigFlash => (0xF0, 0x21, FLASH_KEY),
            Self::CommTestAck => (0xF0, 0x1F, &[]),
        }
    }

    /// Requests the device needs extra time to answer.
    pub fn is_slow(&self) -> bool {
        matches!(self, Self::DiagnosticData)
    }
}

/// Assemble a little-endian 32-bit value starting at `start`.
///
/// Returned as f64: several status counters are accumulated past the
/// i32 range by legacy callers, so the wide float type is deliberate.
pub fn u32_le_at(buf: &[u8], start: usize) -> f64 {
    let mut value = 0.0;
    let mut scale = 1.0;
    for k in 0..4 {
        value += f64::from(buf[start + k]) * scale;
        scale *= 256.0;
    }
    value
}

/// Format a BCD-style version byte as "major.minor".
///
/// The low nibble is zero-padded to two digits even though a nibble
/// never exceeds 15; kept for display compatibility.
pub fn version_string(byte: u8) -> String {
    format!("{}.{:02}", byte >> 4, byte & 0x0F)
}
