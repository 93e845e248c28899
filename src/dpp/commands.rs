//! ASCII configuration command strings: building, filtering, editing.
//!
//! Device configuration is a run of `MNEMONIC=VALUE;` commands, four
//! uppercase letters per mnemonic, `?` as the value for a readback query.
//! One outbound packet carries at most 512 bytes of command text, the
//! size of the hardware command buffer.

use std::path::Path;

use tracing::warn;

use super::types::{DeviceVariant, MAX_ASCII_PAYLOAD};

/// Section header for general configuration in a saved config file.
pub const CONFIG_SECTION: &str = "[DP5 Configuration File]";
/// Section header for SCA window configuration in a saved config file.
pub const SCA_SECTION: &str = "[DP5 SCA Configuration]";

/// Full readback query order for the analog instruments.
///
/// Mnemonics not legal on a given variant are skipped via
/// `command_applicability`; the order itself is fixed so callers can rely
/// on stable chunk boundaries when splitting long strings.
const FULL_READBACK_ORDER: &[&str] = &[
    "RESC", "CLCK", "TPEA", "GAIF", "GAIN", "RESL", "TFLA", "TPFA", "PURE", "RTDE", "SCTC",
    "MCAS", "MCAC", "SOFF", "AINP", "INOF", "GAIA", "CUSP", "PDMD", "THSL", "TLLD", "THFA",
    "DACO", "DACF", "RTDS", "RTDT", "BLRM", "BLRD", "BLRU", "GATE", "AUO1", "PRET", "PRER",
    "PREC", "PRCL", "PRCH", "HVSE", "TECS", "PAPZ", "PAPS", "SCOE", "SCOT", "SCOG", "MCSL",
    "MCSH", "MCST", "AUO2", "TPMO", "GPED", "GPIN", "GPME", "GPGA", "GPMC", "MCAE", "VOLU",
    "CON1", "CON2", "BOOT",
];

/// Full readback query order for the MCA8000D, which takes a shorter
/// instrument-specific command set.
const MCA8000D_READBACK_ORDER: &[&str] = &[
    "RESC", "CLCK", "GAIN", "MCAS", "MCAC", "SOFF", "THSL", "GATE", "PRET", "PRER", "PREL",
    "PREC", "PRCL", "PRCH", "TPMO", "MCAE",
];

/// Mnemonics never supported on the MCA8000D, stripped wholesale when
/// filtering a command string for that variant. The vendor documents this
/// list as evolving; amend here only.
const MCA8000D_UNSUPPORTED: &[&str] = &[
    "TPEA", "GAIF", "RESL", "TFLA", "TPFA", "PURE", "RTDE", "SCTC", "AINP", "INOF", "GAIA",
    "CUSP", "PDMD", "TLLD", "THFA", "DACO", "DACF", "RTDS", "RTDT", "BLRM", "BLRD", "BLRU",
    "AUO1", "AUO2", "HVSE", "TECS", "PAPZ", "PAPS", "SCOE", "SCOT", "SCOG", "MCSL", "MCSH",
    "MCST", "GPED", "GPIN", "GPME", "GPGA", "GPMC", "VOLU", "CON1", "CON2", "BOOT",
];

/// Mnemonics whose presence depends on the device variant. Everything
/// else is legal everywhere.
const GATED_MNEMONICS: &[&str] = &[
    "SCTC", "INOF", "HVSE", "TECS", "PAPZ", "PAPS", "GATE", "BOOT", "VOLU", "CON1", "CON2",
    "PREL",
];

/// Keyword abbreviations applied when a composed command string runs over
/// the 512-byte hardware buffer. Replacements are understood by firmware
/// as the long forms.
const KEYWORD_ABBREVIATIONS: &[(&str, &str)] = &[
    ("RISING;", "RI;"),
    ("FALLING;", "FA;"),
    ("AUTO;", "AU;"),
    ("HIGH;", "HI;"),
    ("LOW;", "LO;"),
    ("OFF;", "OF;"),
];

/// True when a DP5 unit is the Rev Dx K or L sub-revision, which carries
/// PC5-style preamp control on the mainboard.
fn is_rev_dx_kl(device: DeviceVariant, is_rev_dx_gains: bool, eco: u8) -> bool {
    device == DeviceVariant::Dp5
        && is_rev_dx_gains
        && matches!(eco & 0x0F, 0x0A | 0x0B)
}

/// Single applicability predicate consulted by both the readback builder
/// and the outbound filter, so the two can never drift apart.
pub fn command_applicability(
    mnemonic: &str,
    device: DeviceVariant,
    has_pc5: bool,
    is_rev_dx_gains: bool,
    eco: u8,
) -> bool {
    use DeviceVariant::*;
    match mnemonic {
        // Scintillator time constant: DP5G/TB5 front end only
        "SCTC" => device.is_scint(),
        // Input offset: analog pulse inputs only
        "INOF" => matches!(device, Dp5 | Px5 | Dp5x),
        // High voltage supply: built in on PX5/DP5G/TB5, PC5 add-on otherwise
        "HVSE" => has_pc5 || matches!(device, Px5 | Dp5g | Tb5),
        // TEC setpoint: PX5 built-in or PC5 add-on
        "TECS" => has_pc5 || device == Px5,
        // Preamp pole-zero: PX5, plus DP5 Rev Dx K/L mainboards
        "PAPZ" => device == Px5 || is_rev_dx_kl(device, is_rev_dx_gains, eco),
        // Preamp power supplies: PX5 only
        "PAPS" => device == Px5,
        // Gate input absent on the scintillator units
        "GATE" => !device.is_scint(),
        "BOOT" => matches!(device, Dp5 | Px5 | Dp5x),
        // Speaker volume and connector mapping: PX5 chassis only
        "VOLU" | "CON1" | "CON2" => device == Px5,
        // Preset live time: MCA8000D only
        "PREL" => device == Mca8000d,
        _ => true,
    }
}

/// Map every character to uppercase.
pub fn normalize_case(s: &str) -> String {
    s.to_uppercase()
}

/// Remove whitespace and NUL characters.
pub fn strip_whitespace(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\x0B' | '\x0C' | '\r' | ' ' | '\0'))
        .collect()
}

/// Build the full readback query string for a device.
///
/// Emits `MNEMONIC=?;` for every mnemonic legal on the variant, in the
/// fixed table order. The MCA8000D takes its own shorter list.
pub fn build_full_readback_command(
    has_pc5: bool,
    device: DeviceVariant,
    is_rev_dx_gains: bool,
    eco: u8,
) -> String {
    let order = if device == DeviceVariant::Mca8000d {
        MCA8000D_READBACK_ORDER
    } else {
        FULL_READBACK_ORDER
    };

    let mut cmd = String::new();
    for mnemonic in order {
        if command_applicability(mnemonic, device, has_pc5, is_rev_dx_gains, eco) {
            cmd.push_str(mnemonic);
            cmd.push_str("=?;");
        }
    }
    cmd
}

/// Build the smaller factory/self-test readback subset.
///
/// `send_coarse_fine_gain` selects the gain representation queried:
/// coarse+fine (GAIN/GAIF) or total gain (GAIA).
pub fn build_read_test_readback_command(send_coarse_fine_gain: bool, device: DeviceVariant) -> String {
    if device == DeviceVariant::Mca8000d {
        return "GAIN=?;MCAS=?;SOFF=?;THSL=?;".to_string();
    }

    let mut cmd = String::from("CLCK=?;TPEA=?;");
    if send_coarse_fine_gain {
        cmd.push_str("GAIN=?;GAIF=?;");
    } else {
        cmd.push_str("GAIA=?;");
    }
    cmd.push_str("RESL=?;TFLA=?;TPFA=?;");
    cmd
}

/// Remove the first `MNEMONIC=...;` command from a command string.
///
/// No-op if the mnemonic is not exactly four characters, the string is
/// shorter than the smallest possible command, or the mnemonic is absent.
pub fn remove_command(mnemonic: &str, command_string: &str) -> String {
    if mnemonic.len() != 4 || command_string.len() < 7 {
        return command_string.to_string();
    }

    let needle = format!("{mnemonic}=");
    let Some(start) = command_string.find(&needle) else {
        return command_string.to_string();
    };
    let Some(end) = command_string[start..].find(';') else {
        // Malformed tail without a terminator; leave untouched
        return command_string.to_string();
    };

    let mut out = String::with_capacity(command_string.len());
    out.push_str(&command_string[..start]);
    out.push_str(&command_string[start + end + 1..]);
    out
}

/// Strip every command not legal on the target variant.
///
/// MCA8000D goes through its dedicated removal list. DP5 Rev Dx K/L goes
/// through a dedicated pass that keeps PAPZ unconditionally, matching the
/// behavior of those mainboards' vendor filter.
pub fn filter_by_device_variant(
    command_string: &str,
    has_pc5: bool,
    device: DeviceVariant,
    is_rev_dx_gains: bool,
    eco: u8,
) -> String {
    if device == DeviceVariant::Mca8000d {
        let mut out = command_string.to_string();
        for mnemonic in MCA8000D_UNSUPPORTED {
            out = remove_command(mnemonic, &out);
        }
        return out;
    }

    let keep_papz_always = is_rev_dx_kl(device, is_rev_dx_gains, eco);

    let mut out = command_string.to_string();
    for mnemonic in GATED_MNEMONICS {
        if *mnemonic == "PAPZ" && keep_papz_always {
            continue;
        }
        if !command_applicability(mnemonic, device, has_pc5, is_rev_dx_gains, eco) {
            out = remove_command(mnemonic, &out);
        }
    }
    out
}

/// Naive left-to-right substring replacement.
///
/// Each match is replaced once and scanning resumes after the
/// replacement, so a `to` containing `from` cannot loop.
pub fn replace_all(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(from) {
        out.push_str(&rest[..pos]);
        out.push_str(to);
        rest = &rest[pos + from.len()..];
    }
    out.push_str(rest);
    out
}

/// Shrink an oversized command string by abbreviating long keywords.
///
/// Applied before splitting; returns the input unchanged when already
/// within the hardware buffer.
pub fn shorten_command_string(command_string: &str) -> String {
    if command_string.len() <= MAX_ASCII_PAYLOAD {
        return command_string.to_string();
    }

    let mut out = command_string.to_string();
    for (from, to) in KEYWORD_ABBREVIATIONS {
        if out.len() <= MAX_ASCII_PAYLOAD {
            break;
        }
        out = replace_all(&out, from, to);
    }
    out
}

/// Byte offset just past the last `;` whose prefix fits one packet.
///
/// Used to split a still-oversized string into two sequential sends.
/// Returns 0 if no semicolon falls within the first 512 bytes.
pub fn find_split_point(command_string: &str) -> usize {
    let bytes = command_string.as_bytes();
    let limit = bytes.len().min(MAX_ASCII_PAYLOAD);
    bytes[..limit]
        .iter()
        .rposition(|&b| b == b';')
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

/// Raw ASCII copy of a command string, truncated to `len` bytes.
pub fn to_bytes(command_string: &str, len: usize) -> Vec<u8> {
    let mut out = command_string.as_bytes().to_vec();
    out.truncate(len);
    out
}

/// Extract one bracketed section of a configuration file as a command
/// string.
///
/// Lines inside the section are uppercased, whitespace-stripped, and
/// truncated after their first `;`; anything not starting with a letter,
/// or without a terminator, is dropped. The SCA section additionally
/// re-keys indexed commands: the digit at character offset 4 becomes a
/// hoisted `SCAI=n;` emitted on every index change, and is removed from
/// the command body.
pub fn load_config_section(contents: &str, section_name: &str) -> String {
    let rekey_sca = section_name == SCA_SECTION;

    let mut out = String::new();
    let mut in_section = false;
    let mut last_sca_index: Option<char> = None;

    for line in contents.lines() {
        if line.starts_with('[') {
            in_section = line == section_name;
            continue;
        }
        if !in_section {
            continue;
        }

        let mut cmd = strip_whitespace(&normalize_case(line));
        match cmd.find(';') {
            Some(pos) if pos > 0 => cmd.truncate(pos + 1),
            // Leading `;` is a comment line; no `;` at all is not a command
            _ => continue,
        }
        if cmd.len() <= 1 || !cmd.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            continue;
        }

        if rekey_sca {
            let bytes = cmd.as_bytes();
            if bytes.len() > 5 && (b'1'..=b'8').contains(&bytes[4]) {
                let index = bytes[4] as char;
                if last_sca_index != Some(index) {
                    out.push_str(&format!("SCAI={index};"));
                    last_sca_index = Some(index);
                }
                // Drop the embedded index digit from the body
                cmd.remove(4);
            }
        }

        out.push_str(&cmd);
    }
    out
}

/// Read a configuration file and extract one section.
///
/// A missing or unreadable file yields an empty string; callers treat
/// empty as "no configuration found".
pub fn load_config_file(path: &Path, section_name: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => load_config_section(&contents, section_name),
        Err(e) => {
            warn!("Cannot read config file {}: {e}", path.display());
            String::new()
        }
    }
}
