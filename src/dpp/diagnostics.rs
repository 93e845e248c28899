//! Diagnostic packet decoding.
//!
//! The diagnostic response carries raw ADC readings of the internal
//! supply rails, a temperature reading, the SRAM self-test result, an
//! optional PC5 companion-board block, and a raw memory dump. Channel
//! count, bit width, and gain tables differ between the DP5 family and
//! the PX5.

use super::types::DeviceVariant;
use crate::error::{DppError, Result};

/// Size of the raw diagnostic payload.
pub const DIAGNOSTIC_SIZE: usize = 256;

/// Byte range scanned for PC5 presence (any non-zero byte).
const PC5_BLOCK: std::ops::RangeInclusive<usize> = 25..=38;

// Fixed-layout offsets outside the ADC block
const OFFSET_TEMP: usize = 24;
const OFFSET_TEMP_CAL: usize = 39;
const OFFSET_SRAM: usize = 40;
const OFFSET_DUMP: usize = 64;

/// One calibrated ADC channel reading.
#[derive(Debug, Clone)]
pub struct AdcReading {
    pub name: &'static str,
    pub volts: f64,
}

/// DP5-family ADC channels: 10-bit readings against a 2.44 V reference.
/// Gain converts the divided ADC input back to the rail voltage;
/// negative gains mark inverted (negative-rail) dividers.
const DP5_CHANNELS: [(&str, f64); 10] = [
    ("+5.0V", 3.0),
    ("+3.3V", 2.0),
    ("+2.5V", 1.5),
    ("+1.2V", 1.0),
    ("-5.5V", -3.375),
    ("HV bias monitor", 1.0),
    ("TEC current", 1.0),
    ("Input offset", 1.0),
    ("VREF", 1.0),
    ("Spare", 1.0),
];

/// PX5 ADC channels: eleven 12-bit readings against 3.0 V plus one
/// 10-bit reading (VREF) at the tail.
const PX5_CHANNELS: [(&str, f64); 12] = [
    ("+5.5V", 3.0),
    ("-5.5V", -3.0),
    ("+12V", 6.0),
    ("-12V", -6.0),
    ("HV bias monitor", 500.0),
    ("TEC voltage", 4.0),
    ("+3.3VA", 2.0),
    ("+3.3VD", 2.0),
    ("+2.5V", 1.5),
    ("+1.2V", 1.0),
    ("Analog in", 1.0),
    ("VREF", 1.0),
];

// Negative-rail correction: the inverting divider shares its reference
// with the positive companion rail, so part of the companion reading
// leaks into the measurement.
const DP5_NEG_RAIL: usize = 4;
const DP5_NEG_COMPANION: usize = 0;
const DP5_NEG_GAIN_RATIO: f64 = 0.6024;
const PX5_NEG_RAIL: usize = 1;
const PX5_NEG_COMPANION: usize = 0;
const PX5_NEG_GAIN_RATIO: f64 = 0.5;

/// PC5 companion-board diagnostic block.
#[derive(Debug, Clone)]
pub struct Pc5Diagnostics {
    /// Preamp positive supply rail, volts.
    pub rail_9v: f64,
    /// Logic supply rail, volts.
    pub rail_5v: f64,
    /// None when the guard byte marks the serial as unprogrammed.
    pub serial_number: Option<u32>,
    /// HV DAC calibration word; None when flash holds 0xFFFF.
    pub dcal: Option<u16>,
    pub hv_enabled: bool,
    pub tec_enabled: bool,
    /// True for the 8.5 V preamp supply option, false for 5 V.
    pub preamp_8_5v: bool,
    pub hv_polarity_positive: bool,
}

/// Decoded view of one diagnostic packet.
#[derive(Debug, Clone)]
pub struct DiagnosticSnapshot {
    pub device: DeviceVariant,
    pub adc_readings: Vec<AdcReading>,
    /// Board temperature, degrees C, straight from the sensor.
    pub temp_raw_c: f64,
    /// Board temperature with the stored calibration offset applied.
    pub temp_calibrated_c: f64,
    pub sram_test_pass: bool,
    /// First failing SRAM address when the self test failed.
    pub sram_fail_addr: Option<u16>,
    pub pc5: Option<Pc5Diagnostics>,
    /// 192-byte raw diagnostic dump.
    pub raw_dump: Vec<u8>,
}

/// 10-bit ADC pair: 2-bit high mask, 2.44 V reference.
fn adc10(raw: &[u8], channel: usize) -> f64 {
    (f64::from(raw[2 * channel] & 0x03) * 256.0 + f64::from(raw[2 * channel + 1])) * 2.44
        / 1024.0
}

/// 12-bit ADC pair: 4-bit high mask, 3.0 V reference.
fn adc12(raw: &[u8], channel: usize) -> f64 {
    (f64::from(raw[2 * channel] & 0x0F) * 256.0 + f64::from(raw[2 * channel + 1])) * 3.0
        / 4096.0
}

/// Tail PX5 channel: 10-bit against the 3.0 V reference.
fn adc10_3v(raw: &[u8], channel: usize) -> f64 {
    (f64::from(raw[2 * channel] & 0x03) * 256.0 + f64::from(raw[2 * channel + 1])) * 3.0
        / 1024.0
}

/// Decode a raw diagnostic payload for the given variant.
pub fn decode_diagnostics(raw: &[u8], device: DeviceVariant) -> Result<DiagnosticSnapshot> {
    if raw.len() < DIAGNOSTIC_SIZE {
        return Err(DppError::ShortBuffer {
            got: raw.len(),
            need: DIAGNOSTIC_SIZE,
        });
    }

    let mut adc_readings = Vec::new();
    let (neg_rail, neg_companion, neg_ratio) = if device == DeviceVariant::Px5 {
        for (channel, &(name, gain)) in PX5_CHANNELS.iter().enumerate() {
            let lsb = if channel == PX5_CHANNELS.len() - 1 {
                adc10_3v(raw, channel)
            } else {
                adc12(raw, channel)
            };
            adc_readings.push(AdcReading {
                name,
                volts: lsb * gain,
            });
        }
        (PX5_NEG_RAIL, PX5_NEG_COMPANION, PX5_NEG_GAIN_RATIO)
    } else {
        for (channel, &(name, gain)) in DP5_CHANNELS.iter().enumerate() {
            adc_readings.push(AdcReading {
                name,
                volts: adc10(raw, channel) * gain,
            });
        }
        (DP5_NEG_RAIL, DP5_NEG_COMPANION, DP5_NEG_GAIN_RATIO)
    };

    // Shared-reference compensation on the negative rail
    let companion = adc_readings[neg_companion].volts;
    adc_readings[neg_rail].volts += companion * (1.0 - neg_ratio);

    // PX5 stores temperature at 0.5 C/LSB, the DP5 family at 1 C/LSB
    let temp_lsb = f64::from(raw[OFFSET_TEMP] as i8);
    let temp_raw_c = if device == DeviceVariant::Px5 {
        temp_lsb * 0.5
    } else {
        temp_lsb
    };
    let temp_offset = f64::from(raw[OFFSET_TEMP_CAL] as i8) * 0.1;
    let temp_calibrated_c = temp_raw_c + temp_offset;

    let sram_test_pass = raw[OFFSET_SRAM] == 0;
    let sram_fail_addr =
        (!sram_test_pass).then(|| u16::from_be_bytes([raw[OFFSET_SRAM + 1], raw[OFFSET_SRAM + 2]]));

    let pc5_present = raw[PC5_BLOCK].iter().any(|&b| b != 0);
    let pc5 = pc5_present.then(|| Pc5Diagnostics {
        rail_9v: (f64::from(raw[25] & 0x03) * 256.0 + f64::from(raw[26])) * 2.44 / 1024.0 * 4.0,
        rail_5v: (f64::from(raw[27] & 0x03) * 256.0 + f64::from(raw[28])) * 2.44 / 1024.0 * 2.5,
        serial_number: (raw[32] < 128).then(|| {
            u32::from(raw[29])
                + u32::from(raw[30]) * 256
                + u32::from(raw[31]) * 65536
                + u32::from(raw[32]) * 16_777_216
        }),
        dcal: (!(raw[33] == 0xFF && raw[34] == 0xFF))
            .then(|| u16::from_le_bytes([raw[33], raw[34]])),
        hv_enabled: raw[38] & 0x01 != 0,
        tec_enabled: raw[38] & 0x02 != 0,
        preamp_8_5v: raw[38] & 0x04 != 0,
        hv_polarity_positive: raw[38] & 0x08 != 0,
    });

    Ok(DiagnosticSnapshot {
        device,
        adc_readings,
        temp_raw_c,
        temp_calibrated_c,
        sram_test_pass,
        sram_fail_addr,
        pc5,
        raw_dump: raw[OFFSET_DUMP..DIAGNOSTIC_SIZE].to_vec(),
    })
}

impl DiagnosticSnapshot {
    /// Temperature line without the calibration offset.
    pub fn temperature_raw_text(&self) -> String {
        format!("{:.1}C (uncalibrated)", self.temp_raw_c)
    }

    /// Temperature line with the calibration offset applied.
    pub fn temperature_calibrated_text(&self) -> String {
        format!("{:.1}C", self.temp_calibrated_c)
    }

    /// Multi-line diagnostics report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Diagnostics ({})\n", self.device));
        for reading in &self.adc_readings {
            out.push_str(&format!("{:<18}{:+.3}V\n", reading.name, reading.volts));
        }
        out.push_str(&format!("Temperature: {}\n", self.temperature_calibrated_text()));
        out.push_str(&format!("Temperature: {}\n", self.temperature_raw_text()));
        match self.sram_fail_addr {
            None => out.push_str("SRAM Test: passed\n"),
            Some(addr) => out.push_str(&format!("SRAM Test: FAILED at {addr:#06X}\n")),
        }

        if let Some(pc5) = &self.pc5 {
            out.push_str("PC5: present\n");
            out.push_str(&format!("PC5 Preamp Rail: {:.3}V\n", pc5.rail_9v));
            out.push_str(&format!("PC5 Logic Rail: {:.3}V\n", pc5.rail_5v));
            out.push_str(&format!(
                "PC5 Serial: {}\n",
                pc5.serial_number
                    .map_or_else(|| "-1".to_string(), |s| s.to_string())
            ));
            match pc5.dcal {
                Some(dcal) => out.push_str(&format!("PC5 DCAL: {dcal}\n")),
                None => out.push_str("PC5 DCAL: uninitialized\n"),
            }
            out.push_str(&format!(
                "PC5 HV: {}  TEC: {}  Preamp: {}  Polarity: {}\n",
                super::status::on_off(pc5.hv_enabled),
                super::status::on_off(pc5.tec_enabled),
                super::status::either(pc5.preamp_8_5v, "8.5V", "5V"),
                super::status::either(pc5.hv_polarity_positive, "positive", "negative"),
            ));
        } else {
            out.push_str("PC5: not present\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_payload() -> Vec<u8> {
        vec![0u8; DIAGNOSTIC_SIZE]
    }

    #[test]
    fn short_buffer_is_an_error() {
        assert!(matches!(
            decode_diagnostics(&[0u8; 100], DeviceVariant::Dp5),
            Err(DppError::ShortBuffer { got: 100, need: 256 })
        ));
    }

    #[test]
    fn dp5_channel_scaling() {
        let mut raw = empty_payload();
        // Channel 0 (+5.0V, gain 3.0): raw count 0x2BC = 700
        raw[0] = 0x02;
        raw[1] = 0xBC;
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        assert_eq!(snap.adc_readings.len(), 10);
        let expected = 700.0 * 2.44 / 1024.0 * 3.0;
        assert!((snap.adc_readings[0].volts - expected).abs() < 1e-9);
        // High-nibble bits above the 2-bit mask are ignored
        raw[0] = 0xFE;
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        let masked = (0x02 * 256 + 0xBC) as f64 * 2.44 / 1024.0 * 3.0;
        assert!((snap.adc_readings[0].volts - masked).abs() < 1e-9);
    }

    #[test]
    fn px5_channel_scaling_and_count() {
        let mut raw = empty_payload();
        // Channel 2 (+12V, gain 6.0): count 0x800 = 2048
        raw[4] = 0x08;
        raw[5] = 0x00;
        // Tail channel 11 (VREF): 10-bit against 3.0V, count 512
        raw[22] = 0x02;
        raw[23] = 0x00;
        let snap = decode_diagnostics(&raw, DeviceVariant::Px5).unwrap();
        assert_eq!(snap.adc_readings.len(), 12);
        assert!((snap.adc_readings[2].volts - 2048.0 * 3.0 / 4096.0 * 6.0).abs() < 1e-9);
        assert!((snap.adc_readings[11].volts - 512.0 * 3.0 / 1024.0).abs() < 1e-9);
    }

    #[test]
    fn negative_rail_correction_uses_companion() {
        let mut raw = empty_payload();
        // DP5: +5.0V companion count 820, -5.5V count 600
        raw[0] = 0x03;
        raw[1] = 0x34; // 820
        raw[8] = 0x02;
        raw[9] = 0x58; // 600
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        let companion = 820.0 * 2.44 / 1024.0 * 3.0;
        let measured = 600.0 * 2.44 / 1024.0 * -3.375;
        let expected = measured + companion * (1.0 - 0.6024);
        assert!((snap.adc_readings[4].volts - expected).abs() < 1e-9);
    }

    #[test]
    fn temperature_formulas_by_variant() {
        let mut raw = empty_payload();
        raw[24] = 0xEC; // -20 LSB
        raw[39] = 15; // +1.5 C calibration offset
        let dp5 = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        assert_eq!(dp5.temp_raw_c, -20.0);
        assert!((dp5.temp_calibrated_c - -18.5).abs() < 1e-9);

        let px5 = decode_diagnostics(&raw, DeviceVariant::Px5).unwrap();
        assert_eq!(px5.temp_raw_c, -10.0);
        assert!((px5.temp_calibrated_c - -8.5).abs() < 1e-9);
        assert!(px5.temperature_raw_text().contains("uncalibrated"));
    }

    #[test]
    fn sram_test_result() {
        let mut raw = empty_payload();
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        assert!(snap.sram_test_pass);
        assert_eq!(snap.sram_fail_addr, None);

        raw[40] = 1;
        raw[41] = 0x12;
        raw[42] = 0x34;
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        assert!(!snap.sram_test_pass);
        assert_eq!(snap.sram_fail_addr, Some(0x1234));
    }

    #[test]
    fn pc5_absent_when_block_all_zero() {
        let raw = empty_payload();
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        assert!(snap.pc5.is_none());
        assert!(snap.render().contains("PC5: not present"));
    }

    #[test]
    fn pc5_block_decodes() {
        let mut raw = empty_payload();
        raw[25] = 0x03;
        raw[26] = 0x00; // 9V rail count 768
        raw[29..33].copy_from_slice(&7654u32.to_le_bytes());
        raw[33] = 0x10;
        raw[34] = 0x27; // DCAL 10000
        raw[38] = 0x0B; // HV on, TEC on, 5V preamp, positive polarity
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        let pc5 = snap.pc5.expect("PC5 should be detected");
        assert!((pc5.rail_9v - 768.0 * 2.44 / 1024.0 * 4.0).abs() < 1e-9);
        assert_eq!(pc5.serial_number, Some(7654));
        assert_eq!(pc5.dcal, Some(10000));
        assert!(pc5.hv_enabled && pc5.tec_enabled && pc5.hv_polarity_positive);
        assert!(!pc5.preamp_8_5v);
    }

    #[test]
    fn pc5_sentinels() {
        let mut raw = empty_payload();
        raw[32] = 0x80; // serial guard byte
        raw[33] = 0xFF;
        raw[34] = 0xFF; // erased DCAL flash
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        let pc5 = snap.pc5.as_ref().expect("guard bytes still mark presence");
        assert_eq!(pc5.serial_number, None);
        assert_eq!(pc5.dcal, None);
        assert!(snap.render().contains("PC5 Serial: -1"));
        assert!(snap.render().contains("PC5 DCAL: uninitialized"));
    }

    #[test]
    fn raw_dump_is_192_bytes() {
        let mut raw = empty_payload();
        raw[64] = 0xAB;
        raw[255] = 0xCD;
        let snap = decode_diagnostics(&raw, DeviceVariant::Dp5).unwrap();
        assert_eq!(snap.raw_dump.len(), 192);
        assert_eq!(snap.raw_dump[0], 0xAB);
        assert_eq!(snap.raw_dump[191], 0xCD);
    }
}
