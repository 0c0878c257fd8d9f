//! PEL assembler: builds a full PEL either from raw bytes or from a
//! registry entry, and flattens it back to bytes.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;

use crate::bcd::BcdTime;
use crate::data_interface::DataInterface;
use crate::error::{PelError, Result};
use crate::pel_values::{self, Severity};
use crate::registry::{self, resolve_callouts, CalloutKind, Entry};
use crate::sections::{
    ExtendedUserHeader, FailingMtms, PelSection, PrivateHeader, Section, Src, UserData,
    UserHeader,
};
use crate::src_builder::build_src;
use crate::stream::Stream;

pub const CRITICAL_SYSTEM_TERMINATION: u8 = 0x51;

/// An FFDC (First-Failure Data Capture) payload attached to a PEL under
/// construction.
#[derive(Debug, Clone)]
pub struct FfdcFile {
    pub format: FfdcFormat,
    pub subtype: u8,
    pub version: u8,
    pub data: Vec<u8>,
    pub is_sbe_ffdc: bool,
    pub is_json_callout: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfdcFormat {
    Json,
    Cbor,
    Text,
    Custom,
}

/// Captured journal lines for a single syslog-id section.
#[derive(Debug, Clone)]
pub struct JournalCaptureResult {
    pub label: String,
    pub lines: Vec<String>,
}

const FFDC_COMPONENT_ID: u16 = 0x2000;
const SYSTEM_INFO_SUBTYPE: u8 = 0x01;
const ADDITIONAL_DATA_SUBTYPE: u8 = 0x02;
const FFDC_SUBTYPE_BASE: u8 = 0x10;
const DEBUG_DATA_SUBTYPE: u8 = 0xFE;
const JOURNAL_SUBTYPE: u8 = 0xFD;

/// A fully assembled PEL: an ordered section list, PrivateHeader and
/// UserHeader always first.
#[derive(Debug, Clone)]
pub struct Pel {
    sections: Vec<PelSection>,
}

impl Pel {
    pub fn sections(&self) -> &[PelSection] {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut Vec<PelSection> {
        &mut self.sections
    }

    pub fn private_header(&self) -> &PrivateHeader {
        match &self.sections[0] {
            PelSection::PrivateHeader(ph) => ph,
            _ => unreachable!("first section is always PrivateHeader"),
        }
    }

    pub fn user_header(&self) -> &UserHeader {
        match &self.sections[1] {
            PelSection::UserHeader(uh) => uh,
            _ => unreachable!("second section is always UserHeader"),
        }
    }

    pub fn primary_src(&self) -> Option<&Src> {
        self.sections.iter().find_map(|s| match s {
            PelSection::Src(src) => Some(src),
            _ => None,
        })
    }

    pub fn primary_src_mut(&mut self) -> Option<&mut Src> {
        self.sections.iter_mut().find_map(|s| match s {
            PelSection::Src(src) => Some(src),
            _ => None,
        })
    }

    /// `valid() == all sections valid`.
    pub fn valid(&self) -> bool {
        self.sections.iter().all(|s| s.valid())
    }

    pub fn size(&self) -> usize {
        self.sections.iter().map(|s| s.flattened_size()).sum()
    }

    pub fn flatten(&self) -> Vec<u8> {
        let mut stream = Stream::new();
        for s in &self.sections {
            s.flatten(&mut stream);
        }
        stream.into_bytes()
    }

    /// From-bytes entry point: unflatten PrivateHeader,
    /// UserHeader, then `section_count - 2` further sections.
    pub fn from_bytes(bytes: Vec<u8>, obmc_id_override: Option<u32>) -> Result<Self> {
        let mut stream = Stream::from_bytes(bytes);
        let mut private_header = PrivateHeader::read(&mut stream)?;
        let user_header = UserHeader::read(&mut stream)?;

        if let Some(id) = obmc_id_override {
            if id != 0 {
                private_header.obmc_id = id;
            }
        }

        let remaining_sections = private_header.section_count.saturating_sub(2);
        let mut sections = vec![PelSection::PrivateHeader(private_header), PelSection::UserHeader(user_header)];
        for _ in 0..remaining_sections {
            if stream.remaining() == 0 {
                break;
            }
            sections.push(crate::sections::read_section(&mut stream));
        }

        Ok(Self { sections })
    }

    /// From-registry entry point.
    #[allow(clippy::too_many_arguments)]
    pub fn from_registry(
        entry: &Entry,
        obmc_id: u32,
        pel_id: u32,
        ts: BcdTime,
        mut severity: Severity,
        additional_data: &HashMap<String, String>,
        ffdc_files: &[FfdcFile],
        data: &dyn DataInterface,
        journal: &[JournalCaptureResult],
        max_pel_size: usize,
    ) -> Result<Self> {
        let mut debug_messages = Vec::new();

        // Step 1-2: SBE-FFDC and JSON-callout FFDC scanning. SBE-FFDC
        // severity overrides and hostboot-specific processing require the
        // PHAL feature; not modeled further here, but a
        // JSON-callout file, if present, is parsed for extra callouts.
        let mut caller_callout_json: Option<String> = None;
        for f in ffdc_files {
            if f.is_json_callout {
                match String::from_utf8(f.data.clone()) {
                    Ok(text) => caller_callout_json = Some(text),
                    Err(_) => debug_messages.push("JSON-callout FFDC was not valid UTF-8".to_string()),
                }
            }
        }

        let mut ad = additional_data.clone();
        if let Some(json) = caller_callout_json {
            ad.insert("CALLER_CALLOUT_JSON".to_string(), json);
        }

        // Step 3: SRC, via the registry's opaque callout JSON plus the
        // caller-supplied additional data.
        let system_names = data.system_names();
        let resolved_callouts = match &entry.callouts {
            Some(json) => resolve_callouts(json, &system_names, &ad)?,
            None => Vec::new(),
        };
        let build_result = build_src(entry, &ad, &resolved_callouts, data, None, None)?;
        debug_messages.extend(build_result.debug_messages);
        let src = build_result.src;

        let subsystem_byte = entry.subsystem_byte()?;
        let manufacturing = data.is_manufacturing_mode();
        let severity_name = entry.severity_for(&system_names, manufacturing);
        if let Some(name) = &severity_name {
            if let Some(resolved) = Severity::from_name(name) {
                severity = resolved;
            } else {
                return Err(PelError::InvalidRegistryValue(name.clone()));
            }
        }

        let action_flag_names = entry.action_flags_for(manufacturing);
        let action_flags = if action_flag_names.is_empty() {
            pel_values::ACTION_FLAGS_SENTINEL
        } else {
            pel_values::action_flags_from_names(action_flag_names)
                .ok_or_else(|| PelError::InvalidRegistryValue("ActionFlags".to_string()))?
        };

        let event_type = entry
            .event_type
            .as_deref()
            .and_then(crate::pel_values::EventType::from_name)
            .unwrap_or(crate::pel_values::EventType::NotApplicable);

        let creator_id = pel_values::CREATOR_BMC;
        let private_header =
            PrivateHeader::new(ts, ts, creator_id, obmc_id, pel_id, pel_id, 2);
        let user_header =
            UserHeader::new(subsystem_byte, severity.as_u8(), event_type as u8, action_flags);

        let symptom_words = if entry.src.symptom_id_words.is_empty() {
            vec![3]
        } else {
            entry.src.symptom_id_words.clone()
        };
        let symptom_id = crate::sections::extended_user_header_build_symptom_id(
            &src.ascii_string,
            &src,
            &symptom_words,
        );
        let extended_user_header = ExtendedUserHeader::new(
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            ts,
            symptom_id,
        );
        let failing_mtms = FailingMtms::new(String::new(), String::new());

        let mut sections = vec![
            PelSection::PrivateHeader(private_header),
            PelSection::UserHeader(user_header),
            PelSection::Src(src),
            PelSection::ExtendedUserHeader(extended_user_header),
            PelSection::FailingMtms(failing_mtms),
        ];

        // Step 4: system-info user-data section.
        let info = data.system_info();
        let info_json = json!({
            "firmwareVersionId": info.firmware_version_id,
            "imKeyword": info.im_keyword,
            "systemStates": info.system_states,
            "uptimeSecs": info.uptime_secs,
            "loadAverage": [info.load_average.0, info.load_average.1, info.load_average.2],
        });
        push_json_user_data_section(
            &mut sections,
            info_json,
            SYSTEM_INFO_SUBTYPE,
            max_pel_size,
            &mut debug_messages,
            "system-info",
        );

        // Step 5: critical-system-termination sets the SRC terminate bit.
        if severity.as_u8() == CRITICAL_SYSTEM_TERMINATION {
            if let Some(src) = sections.iter_mut().find_map(|s| match s {
                PelSection::Src(src) => Some(src),
                _ => None,
            }) {
                src.set_hex_word(5, src.hex_word(5) | crate::sections::HW5_TERMINATE_FW);
            }
        }

        // Step 6: additional-data JSON user-data section, minus ESEL.
        let mut ad_for_section = ad.clone();
        ad_for_section.remove("ESEL");
        push_json_user_data_section(
            &mut sections,
            json!(ad_for_section),
            ADDITIONAL_DATA_SUBTYPE,
            max_pel_size,
            &mut debug_messages,
            "additional-data",
        );

        // Step 7: FFDC files.
        for (i, f) in ffdc_files.iter().enumerate() {
            let format_byte = match f.format {
                FfdcFormat::Json => 0,
                FfdcFormat::Cbor => 1,
                FfdcFormat::Text => 2,
                FfdcFormat::Custom => 3,
            };
            let mut data_bytes = f.data.clone();
            if f.format == FfdcFormat::Cbor {
                let pad = (4 - data_bytes.len() % 4) % 4;
                let orig_len = data_bytes.len();
                data_bytes.resize(orig_len + pad, 0);
                data_bytes.extend_from_slice(&(pad as u32).to_be_bytes());
            }
            let ud = UserData::new(FFDC_COMPONENT_ID, FFDC_SUBTYPE_BASE + i as u8, format_byte, data_bytes);
            try_add_or_shrink_or_drop(
                &mut sections,
                PelSection::UserData(ud),
                max_pel_size,
                &mut debug_messages,
                &format!("FFDC file {}", i),
            );
        }

        // Step 8: accumulated debug data.
        if !debug_messages.is_empty() {
            let debug_json = json!({ "debug": debug_messages.clone() });
            push_json_user_data_section(
                &mut sections,
                debug_json,
                DEBUG_DATA_SUBTYPE,
                max_pel_size,
                &mut Vec::new(),
                "debug-data",
            );
        }

        // Step 9: journal capture sections.
        for capture in journal {
            let text = capture.lines.join("\n");
            let mut bytes = text.into_bytes();
            bytes.push(0);
            let ud = UserData::new(FFDC_COMPONENT_ID, JOURNAL_SUBTYPE, 0, bytes);
            try_add_or_shrink_or_drop(
                &mut sections,
                PelSection::UserData(ud),
                max_pel_size,
                &mut Vec::new(),
                &format!("journal capture '{}'", capture.label),
            );
        }

        // Step 10: section count, then rule-check-and-fix.
        let section_count = sections.len() as u8;
        if let PelSection::PrivateHeader(ph) = &mut sections[0] {
            ph.section_count = section_count;
        }
        if let PelSection::UserHeader(uh) = &mut sections[1] {
            if uh.action_flags == pel_values::ACTION_FLAGS_SENTINEL {
                let (flags, ev) = pel_values::default_action_flags_and_event_type(severity);
                uh.action_flags = flags;
                uh.event_type = ev as u8;
            }
        }

        Ok(Self { sections })
    }
}

fn push_json_user_data_section(
    sections: &mut Vec<PelSection>,
    value: serde_json::Value,
    subtype: u8,
    max_pel_size: usize,
    debug: &mut Vec<String>,
    label: &str,
) {
    let bytes = serde_json::to_vec(&value).unwrap_or_default();
    let ud = UserData::new(FFDC_COMPONENT_ID, subtype, 0, bytes);
    try_add_or_shrink_or_drop(sections, PelSection::UserData(ud), max_pel_size, debug, label);
}

/// If adding `section` would push the PEL past `max_pel_size`, try
/// `shrink()` on it first; drop it if that fails.
fn try_add_or_shrink_or_drop(
    sections: &mut Vec<PelSection>,
    mut section: PelSection,
    max_pel_size: usize,
    debug: &mut Vec<String>,
    label: &str,
) {
    let current_size: usize = sections.iter().map(|s| s.flattened_size()).sum();
    let projected = current_size + section.flattened_size();
    if projected <= max_pel_size {
        sections.push(section);
        return;
    }
    let budget = max_pel_size.saturating_sub(current_size);
    if section.shrink(budget) {
        sections.push(section);
    } else {
        debug.push(format!("dropped {} section: no room within max PEL size", label));
    }
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
    fn s3_registry_build_produces_expected_src_and_ids() {
        let entry = sample_entry();
        let data = MockDataInterface::default();
        let ts = BcdTime::from_datetime(Utc::now());
        let pel = Pel::from_registry(
            &entry,
            33,
            0x10,
            ts,
            Severity::Predictive,
            &HashMap::new(),
            &[],
            &data,
            &[],
            16 * 1024,
        )
        .unwrap();

        assert_eq!(pel.private_header().obmc_id, 33);
        assert_eq!(pel.primary_src().unwrap().ascii_string.trim_end(), "BD612030");
        assert!(pel.valid());
    }

    #[test]
    fn section_count_matches_assembled_sections() {
        let entry = sample_entry();
        let data = MockDataInterface::default();
        let ts = BcdTime::from_datetime(Utc::now());
        let pel = Pel::from_registry(
            &entry, 1, 1, ts, Severity::Predictive, &HashMap::new(), &[], &data, &[], 16 * 1024,
        )
        .unwrap();
        assert_eq!(pel.private_header().section_count as usize, pel.sections().len());
    }

    #[test]
    fn flatten_size_matches_sum_of_section_sizes() {
        let entry = sample_entry();
        let data = MockDataInterface::default();
        let ts = BcdTime::from_datetime(Utc::now());
        let pel = Pel::from_registry(
            &entry, 1, 1, ts, Severity::Predictive, &HashMap::new(), &[], &data, &[], 16 * 1024,
        )
        .unwrap();
        assert_eq!(pel.flatten().len(), pel.size());
    }

    #[test]
    fn from_bytes_round_trips_a_registry_built_pel() {
        let entry = sample_entry();
        let data = MockDataInterface::default();
        let ts = BcdTime::from_datetime(Utc::now());
        let pel = Pel::from_registry(
            &entry, 7, 9, ts, Severity::Predictive, &HashMap::new(), &[], &data, &[], 16 * 1024,
        )
        .unwrap();
        let bytes = pel.flatten();
        let back = Pel::from_bytes(bytes, None).unwrap();
        assert!(back.valid());
        assert_eq!(back.private_header().obmc_id, 7);
    }

    #[test]
    fn oversized_user_data_is_dropped_when_shrink_fails() {
        let entry = sample_entry();
        let data = MockDataInterface::default();
        let ts = BcdTime::from_datetime(Utc::now());
        let huge_ffdc = FfdcFile {
            format: FfdcFormat::Text,
            subtype: 0,
            version: 1,
            data: vec![0u8; 20_000],
            is_sbe_ffdc: false,
            is_json_callout: false,
        };
        let pel = Pel::from_registry(
            &entry, 1, 1, ts, Severity::Predictive, &HashMap::new(), &[huge_ffdc], &data, &[], 2 * 1024,
        )
        .unwrap();
        assert!(pel.size() <= 2 * 1024 + 512); // debug section may push slightly, but FFDC must be gone
    }
}
