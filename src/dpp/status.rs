//! Status packet decoding.
//!
//! The device answers a status request with a fixed 64-byte payload.
//! Every field sits at a fixed byte offset; several bits change meaning
//! with the device variant and firmware, so the decoded snapshot keeps
//! variant-conditional fields as `Option` rather than always-present
//! values with "meaningless unless" conventions.

use super::types::{u32_le_at, version_string, DeviceVariant};
use crate::error::{DppError, Result};

/// Size of the raw status payload.
pub const STATUS_SIZE: usize = 64;

/// Decoded view of one status packet. Rebuilt in full on every
/// reception; never partially updated.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub device: DeviceVariant,
    pub device_id: u8,

    pub fast_count: f64,
    pub slow_count: f64,
    pub gp_count: f64,
    /// Accumulation time, seconds.
    pub accumulation_time: f64,
    /// Real time, seconds.
    pub real_time: f64,
    /// Live time, seconds. MCA8000D with firmware >= 6.07 only.
    pub live_time: Option<f64>,

    pub firmware: u8,
    pub fpga: u8,
    /// Firmware build number; reported only by firmware newer than 6.05.
    pub build: Option<u8>,
    /// None when the unit has no programmed serial (guard byte >= 128).
    pub serial_number: Option<u32>,

    /// High voltage reading, volts (negative for negative-polarity HV).
    pub high_voltage: f64,
    /// Detector temperature, kelvin.
    pub detector_temp: f64,
    /// Board temperature, degrees C.
    pub board_temp: i16,
    /// TEC voltage, volts. PX5 built-in TEC or PC5 add-on.
    pub tec_voltage: Option<f64>,

    // Byte 35 flags
    pub preset_real_time_done: bool,
    /// Fast-threshold auto-lock finished. Analog variants only; the same
    /// bit is `preset_live_time_done` on an MCA8000D with live-time
    /// support.
    pub afast_locked: Option<bool>,
    pub preset_live_time_done: Option<bool>,
    pub mca_enabled: bool,
    pub preset_count_reached: bool,
    pub scope_data_ready: bool,
    pub unit_configured: bool,

    // Byte 36 flags
    pub auto_input_offset_locked: bool,
    pub mcs_done: bool,
    pub is_80mhz_mode: bool,
    pub fpga_auto_clock: bool,

    // PC5 companion module (byte 38)
    pub pc5_present: bool,
    pub pc5_hv_polarity_positive: Option<bool>,
    pub pc5_preamp_8_5v: Option<bool>,

    // PX5 option decode (bytes 35/36 bits, gated on the options byte)
    pub hpge_hv_inhibited: Option<bool>,
    pub hpge_hv_inhibit_polarity_high: Option<bool>,
    pub au34_2: Option<bool>,
    pub asc_installed: bool,

    /// Raw option byte (byte 42).
    pub dpp_options: u8,
    /// Engineering-change-order revision byte (byte 49).
    pub eco: u8,

    // Derived once per decode; consumers must not recompute
    pub is_dp5_rev_dx_gains: bool,
    pub scint_has_80mhz_option: bool,
}

/// Decode a raw 64-byte status payload.
pub fn decode_status(raw: &[u8]) -> Result<StatusSnapshot> {
    if raw.len() < STATUS_SIZE {
        return Err(DppError::ShortBuffer {
            got: raw.len(),
            need: STATUS_SIZE,
        });
    }

    let device_id = raw[39];
    let device = DeviceVariant::from_device_id(device_id);
    let firmware = raw[24];
    let build = (firmware > 0x65).then_some(raw[37]);
    let dpp_options = raw[42];
    let eco = raw[49];

    let mca8000d_live_time = device == DeviceVariant::Mca8000d && firmware >= 0x67;

    // 16-bit firmware:build comparison selects the Rev Dx gain hardware
    let version16 = (u16::from(firmware) << 4) | u16::from(build.unwrap_or(0));
    let is_dp5_rev_dx_gains =
        device == DeviceVariant::Dp5 && version16 >= 0x686 && eco < 0xFF;

    let px5_options = device == DeviceVariant::Px5 && dpp_options == 1;
    let px5_eco1 = px5_options && eco == 1;

    let pc5_present = raw[38] & 0x80 != 0;

    // HV spans bytes 30 (high) and 31, sign carried by the high byte
    let hv_raw = i32::from(raw[30]) * 256 + i32::from(raw[31]);
    let hv_raw = if raw[30] >= 0x80 { hv_raw - 65536 } else { hv_raw };

    let snapshot = StatusSnapshot {
        device,
        device_id,
        fast_count: u32_le_at(raw, 0),
        slow_count: u32_le_at(raw, 4),
        gp_count: u32_le_at(raw, 8),
        accumulation_time: f64::from(raw[12]) * 0.001
            + (f64::from(raw[13]) + f64::from(raw[14]) * 256.0 + f64::from(raw[15]) * 65536.0)
                * 0.1,
        real_time: u32_le_at(raw, 20) * 0.001,
        live_time: mca8000d_live_time.then(|| u32_le_at(raw, 16) * 0.001),
        firmware,
        fpga: raw[25],
        build,
        serial_number: (raw[29] < 128).then(|| u32_le_at(raw, 26) as u32),
        high_voltage: f64::from(hv_raw) * 0.5,
        detector_temp: (f64::from(raw[32] & 0x0F) * 256.0 + f64::from(raw[33])) * 0.1,
        board_temp: if raw[34] & 0x80 != 0 {
            i16::from(raw[34]) - 256
        } else {
            i16::from(raw[34])
        },
        tec_voltage: (device == DeviceVariant::Px5 || pc5_present)
            .then(|| (f64::from(raw[40] & 0x0F) * 256.0 + f64::from(raw[41])) / 758.5),

        preset_real_time_done: raw[35] & 0x80 != 0,
        afast_locked: (!mca8000d_live_time).then(|| raw[35] & 0x40 != 0),
        preset_live_time_done: mca8000d_live_time.then(|| raw[35] & 0x40 != 0),
        mca_enabled: raw[35] & 0x20 != 0,
        preset_count_reached: raw[35] & 0x10 != 0,
        scope_data_ready: raw[35] & 0x04 != 0,
        unit_configured: raw[35] & 0x02 != 0,

        auto_input_offset_locked: raw[36] & 0x80 != 0,
        mcs_done: raw[36] & 0x40 != 0,
        is_80mhz_mode: raw[36] & 0x02 != 0,
        fpga_auto_clock: raw[36] & 0x01 != 0,

        pc5_present,
        pc5_hv_polarity_positive: pc5_present.then(|| raw[38] & 0x40 != 0),
        pc5_preamp_8_5v: pc5_present.then(|| raw[38] & 0x20 != 0),

        hpge_hv_inhibited: px5_options.then(|| raw[36] & 0x20 != 0),
        hpge_hv_inhibit_polarity_high: px5_options.then(|| raw[36] & 0x10 != 0),
        au34_2: px5_eco1.then(|| raw[35] & 0x08 != 0),
        asc_installed: px5_eco1,

        dpp_options,
        eco,

        is_dp5_rev_dx_gains,
        scint_has_80mhz_option: device.is_scint() && matches!(eco, 1 | 2),
    };
    Ok(snapshot)
}

/// "ON"/"OFF" rendering for report lines.
pub fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

/// Either/or string selection used by the report formatters.
pub fn either<'a>(condition: bool, when_true: &'a str, when_false: &'a str) -> &'a str {
    if condition {
        when_true
    } else {
        when_false
    }
}

/// Zero-padded uppercase hex with an explicit digit count.
pub fn hex_string(value: u32, digits: usize) -> String {
    format!("{value:0digits$X}")
}

impl StatusSnapshot {
    /// Short one-screen summary: identity and headline counters.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Device Type: {}\n", self.device));
        out.push_str(&format!(
            "Serial Number: {}\n",
            self.serial_number
                .map_or_else(|| "not programmed".to_string(), |s| s.to_string())
        ));
        out.push_str(&format!(
            "Firmware: {}  FPGA: {}\n",
            self.firmware_text(),
            version_string(self.fpga)
        ));
        if self.device != DeviceVariant::Mca8000d {
            out.push_str(&format!("Fast Count: {:.0}\n", self.fast_count));
        }
        out.push_str(&format!("Slow Count: {:.0}\n", self.slow_count));
        out.push_str(&format!("Accumulation Time: {:.3}s\n", self.accumulation_time));
        out.push_str(&format!("Real Time: {:.3}s\n", self.real_time));
        if let Some(live) = self.live_time {
            out.push_str(&format!("Live Time: {:.3}s\n", live));
        }
        out
    }

    /// Firmware version with the build number appended when reported.
    pub fn firmware_text(&self) -> String {
        match self.build {
            Some(build) => format!("{} Build {}", version_string(self.firmware), build),
            None => version_string(self.firmware),
        }
    }

    /// Full status report, one field per line, variant-conditional.
    pub fn render_full_status(&self) -> String {
        let mut out = self.render_summary();

        out.push_str(&format!("GP Count: {:.0}\n", self.gp_count));
        out.push_str(&format!("Board Temp: {}C\n", self.board_temp));

        match self.device {
            DeviceVariant::Mca8000d => {
                // No analog front end: HV and detector temperature lines
                // do not apply
            }
            DeviceVariant::Dp5g | DeviceVariant::Tb5 => {
                out.push_str(&format!("HV: {:.1}V\n", self.high_voltage));
                if self.scint_has_80mhz_option {
                    out.push_str("80MHz Option: installed\n");
                }
            }
            _ => {
                out.push_str(&format!("HV: {:.1}V\n", self.high_voltage));
                out.push_str(&format!("Detector Temp: {:.1}K\n", self.detector_temp));
            }
        }
        if let Some(tec) = self.tec_voltage {
            out.push_str(&format!("TEC Voltage: {:.3}V\n", tec));
        }

        out.push_str(&format!("MCA: {}\n", on_off(self.mca_enabled)));
        out.push_str(&format!(
            "Device Configured: {}\n",
            either(self.unit_configured, "yes", "no (defaults)")
        ));
        out.push_str(&format!(
            "Preset Real Time: {}\n",
            either(self.preset_real_time_done, "reached", "not reached")
        ));
        if let Some(done) = self.preset_live_time_done {
            out.push_str(&format!(
                "Preset Live Time: {}\n",
                either(done, "reached", "not reached")
            ));
        }
        if let Some(locked) = self.afast_locked {
            out.push_str(&format!("Fast Threshold: {}\n", either(locked, "locked", "searching")));
        }
        out.push_str(&format!(
            "Preset Counts: {}\n",
            either(self.preset_count_reached, "reached", "not reached")
        ));
        out.push_str(&format!("Scope Data: {}\n", either(self.scope_data_ready, "ready", "not armed")));
        out.push_str(&format!("MCS: {}\n", either(self.mcs_done, "done", "running")));
        out.push_str(&format!(
            "Auto Input Offset: {}\n",
            either(self.auto_input_offset_locked, "locked", "searching")
        ));
        out.push_str(&format!(
            "FPGA Clock: {}{}\n",
            either(self.is_80mhz_mode, "80MHz", "20MHz"),
            either(self.fpga_auto_clock, " (auto)", "")
        ));

        if self.pc5_present {
            out.push_str("PC5: present\n");
            if let Some(positive) = self.pc5_hv_polarity_positive {
                out.push_str(&format!("PC5 HV Polarity: {}\n", either(positive, "positive", "negative")));
            }
            if let Some(v8_5) = self.pc5_preamp_8_5v {
                out.push_str(&format!("PC5 Preamp Supply: {}\n", either(v8_5, "8.5V", "5V")));
            }
        } else if self.device == DeviceVariant::Dp5 {
            out.push_str("PC5: not present\n");
        }

        if self.device == DeviceVariant::Px5 {
            out.push_str(&self.render_px5_options());
        }

        out.push_str(&format!(
            "Options: {}  ECO: {}\n",
            hex_string(u32::from(self.dpp_options), 2),
            hex_string(u32::from(self.eco), 2)
        ));
        out
    }

    /// PX5-specific options block.
    pub fn render_px5_options(&self) -> String {
        let mut out = String::new();
        if let Some(inhibited) = self.hpge_hv_inhibited {
            out.push_str(&format!(
                "HPGe HV: {}\n",
                either(inhibited, "inhibited", "not inhibited")
            ));
        }
        if let Some(high) = self.hpge_hv_inhibit_polarity_high {
            out.push_str(&format!("HPGe HV Inhibit Polarity: {}\n", either(high, "high", "low")));
        }
        if let Some(au34) = self.au34_2 {
            out.push_str(&format!("AU34.2: {}\n", on_off(au34)));
        }
        if self.asc_installed {
            out.push_str("ASC: installed\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Baseline raw status vector: PX5, firmware 6.07, build 15,
    /// real time 1.000 s, serial 12345678.
    fn px5_raw() -> [u8; STATUS_SIZE] {
        let mut raw = [0u8; STATUS_SIZE];
        raw[39] = 1; // PX5
        raw[24] = 0x67; // firmware 6.07
        raw[37] = 0x0F; // build 15
        raw[20..24].copy_from_slice(&1000u32.to_le_bytes()); // 1.000 s real time
        raw[26..30].copy_from_slice(&12_345_678u32.to_le_bytes());
        raw
    }

    #[test]
    fn decode_fixed_vector() {
        let status = decode_status(&px5_raw()).unwrap();
        assert_eq!(status.device, DeviceVariant::Px5);
        assert_eq!(version_string(status.firmware), "6.07");
        assert_eq!(status.build, Some(15));
        assert_eq!(status.real_time, 1.0);
        assert_eq!(status.serial_number, Some(12_345_678));
    }

    #[test]
    fn short_buffer_is_an_error() {
        let raw = [0u8; 32];
        assert!(matches!(
            decode_status(&raw),
            Err(DppError::ShortBuffer { got: 32, need: 64 })
        ));
    }

    #[test]
    fn build_requires_new_firmware() {
        let mut raw = px5_raw();
        raw[24] = 0x65;
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.build, None);
    }

    #[test]
    fn serial_guard_byte() {
        let mut raw = px5_raw();
        raw[29] = 0x80;
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.serial_number, None);
    }

    #[test]
    fn counters_assemble_little_endian() {
        let mut raw = px5_raw();
        raw[0..4].copy_from_slice(&70_000u32.to_le_bytes());
        raw[4..8].copy_from_slice(&12u32.to_le_bytes());
        raw[8..12].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.fast_count, 70_000.0);
        assert_eq!(status.slow_count, 12.0);
        assert_eq!(status.gp_count, 4_294_967_295.0);
    }

    #[test]
    fn accumulation_time_hybrid_scaling() {
        let mut raw = px5_raw();
        raw[12] = 250; // 0.250 s
        raw[13] = 10; // + 1.0 s
        raw[14] = 1; // + 25.6 s
        let status = decode_status(&raw).unwrap();
        assert!((status.accumulation_time - 26.85).abs() < 1e-9);
    }

    #[test]
    fn hv_positive_and_negative_branches() {
        let mut raw = px5_raw();
        raw[30] = 0x00;
        raw[31] = 0xC8;
        assert_eq!(decode_status(&raw).unwrap().high_voltage, 100.0);

        raw[30] = 0x80;
        raw[31] = 0x00;
        let expected = f64::from(0x80 * 256 - 65536) * 0.5;
        assert_eq!(decode_status(&raw).unwrap().high_voltage, expected);
        assert!(expected < 0.0);
    }

    #[test]
    fn detector_and_board_temperature() {
        let mut raw = px5_raw();
        raw[32] = 0xF1; // only low nibble counts
        raw[33] = 0x2C;
        raw[34] = 0xEC; // -20 C
        let status = decode_status(&raw).unwrap();
        assert!((status.detector_temp - 30.0).abs() < 1e-9); // (0x12C)*0.1
        assert_eq!(status.board_temp, -20);
    }

    #[test]
    fn byte35_bit6_is_variant_polymorphic() {
        // Analog device: fast-threshold lock
        let mut raw = px5_raw();
        raw[35] = 0x40;
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.afast_locked, Some(true));
        assert_eq!(status.preset_live_time_done, None);
        assert_eq!(status.live_time, None);

        // MCA8000D with live-time firmware: preset-live-time-done
        raw[39] = 3;
        raw[16..20].copy_from_slice(&500u32.to_le_bytes());
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.afast_locked, None);
        assert_eq!(status.preset_live_time_done, Some(true));
        assert_eq!(status.live_time, Some(0.5));

        // MCA8000D with old firmware keeps the analog meaning
        raw[24] = 0x66;
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.afast_locked, Some(true));
        assert_eq!(status.live_time, None);
    }

    #[test]
    fn rev_dx_gains_detection() {
        let mut raw = px5_raw();
        raw[39] = 0; // DP5
        raw[24] = 0x68;
        raw[37] = 0x06; // version16 = 0x686
        raw[49] = 0x0A;
        assert!(decode_status(&raw).unwrap().is_dp5_rev_dx_gains);

        raw[37] = 0x05; // just below the threshold
        assert!(!decode_status(&raw).unwrap().is_dp5_rev_dx_gains);

        raw[37] = 0x06;
        raw[49] = 0xFF; // unprogrammed ECO byte disqualifies
        assert!(!decode_status(&raw).unwrap().is_dp5_rev_dx_gains);
    }

    #[test]
    fn px5_option_gating() {
        let mut raw = px5_raw();
        raw[36] = 0x30;
        raw[35] = 0x08;
        // Options byte clear: no PX5 option decode
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.hpge_hv_inhibited, None);
        assert_eq!(status.au34_2, None);
        assert!(!status.asc_installed);

        raw[42] = 1;
        raw[49] = 1;
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.hpge_hv_inhibited, Some(true));
        assert_eq!(status.hpge_hv_inhibit_polarity_high, Some(true));
        assert_eq!(status.au34_2, Some(true));
        assert!(status.asc_installed);
    }

    #[test]
    fn scint_80mhz_option() {
        let mut raw = px5_raw();
        raw[39] = 2; // DP5G
        raw[49] = 2;
        assert!(decode_status(&raw).unwrap().scint_has_80mhz_option);
        raw[49] = 3;
        assert!(!decode_status(&raw).unwrap().scint_has_80mhz_option);
        raw[39] = 0; // DP5 never has it
        raw[49] = 1;
        assert!(!decode_status(&raw).unwrap().scint_has_80mhz_option);
    }

    #[test]
    fn report_variant_conditionals() {
        // MCA8000D: no fast-count line, no HV/detector lines
        let mut raw = px5_raw();
        raw[39] = 3;
        let report = decode_status(&raw).unwrap().render_full_status();
        assert!(!report.contains("Fast Count"));
        assert!(!report.contains("HV:"));
        assert!(!report.contains("Detector Temp"));

        // PX5 gets TEC voltage and the options block position
        let status = decode_status(&px5_raw()).unwrap();
        let report = status.render_full_status();
        assert!(report.contains("Fast Count"));
        assert!(report.contains("TEC Voltage"));
        assert!(report.contains("Detector Temp"));
    }

    #[test]
    fn hex_formatting_pads_to_digit_count() {
        assert_eq!(hex_string(0x0A, 2), "0A");
        assert_eq!(hex_string(0x1A2B, 4), "1A2B");
        assert_eq!(hex_string(0x5, 4), "0005");
    }
}
