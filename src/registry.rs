//! Message-registry JSON: event-name / reason-code lookup and callout
//! resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PelError, Result};
use crate::pel_values;

/// A single optional severity: either one value for every system, or a
/// per-system-type list with a default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SeverityChoice {
    Single(String),
    PerSystem { #[serde(default)] entries: Vec<SystemSeverity>, #[serde(rename = "Default")] default: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemSeverity {
    #[serde(rename = "System")]
    pub system: Option<String>,
    #[serde(rename = "Systems")]
    pub systems: Option<Vec<String>>,
    #[serde(rename = "Severity")]
    pub severity: String,
}

impl SeverityChoice {
    /// Resolves to a concrete severity name for `system_names`, per the
    /// same System/Systems precedence rule as callout resolution.
    pub fn resolve(&self, system_names: &[String]) -> String {
        match self {
            SeverityChoice::Single(s) => s.clone(),
            SeverityChoice::PerSystem { entries, default } => {
                for e in entries {
                    if e.system.as_deref().is_some_and(|s| system_names.iter().any(|n| n == s))
                        || e.systems.as_ref().is_some_and(|l| l.iter().any(|s| system_names.contains(s)))
                    {
                        return e.severity.clone();
                    }
                }
                default.clone()
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SrcMeta {
    #[serde(rename = "Type")]
    pub src_type: String,
    #[serde(rename = "ReasonCode")]
    pub reason_code: String,
    #[serde(default, rename = "Words6To9")]
    pub hex_word_fields: HashMap<String, String>,
    #[serde(default, rename = "SymptomIdFields")]
    pub symptom_id_words: Vec<usize>,
    #[serde(default, rename = "Deconfigure")]
    pub deconfigure: bool,
    #[serde(default, rename = "Checkstop")]
    pub checkstop: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Documentation {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(default, rename = "MessageArgSources")]
    pub message_args_sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JournalCapture {
    #[serde(default, rename = "NumLines")]
    pub num_lines: Option<u32>,
    #[serde(default, rename = "Sections")]
    pub sections: Vec<JournalSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JournalSection {
    #[serde(rename = "SyslogID")]
    pub syslog_id: String,
    #[serde(rename = "NumLines")]
    pub num_lines: u32,
}

/// A parsed message-registry entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Entry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(default, rename = "ComponentID")]
    pub component_id: Option<u16>,
    #[serde(rename = "Subsystem")]
    pub subsystem: String,
    #[serde(default, rename = "Severity")]
    pub severity: Option<SeverityChoice>,
    #[serde(default, rename = "MfgSeverity")]
    pub mfg_severity: Option<SeverityChoice>,
    #[serde(default, rename = "ActionFlags")]
    pub action_flags: Vec<String>,
    #[serde(default, rename = "MfgActionFlags")]
    pub mfg_action_flags: Vec<String>,
    #[serde(default, rename = "EventType")]
    pub event_type: Option<String>,
    #[serde(default, rename = "EventScope")]
    pub event_scope: Option<u8>,
    #[serde(rename = "SRC")]
    pub src: SrcMeta,
    #[serde(rename = "Documentation")]
    pub documentation: Documentation,
    /// Kept opaque; resolved per-event by [`resolve_callouts`].
    #[serde(default, rename = "Callouts")]
    pub callouts: Option<Value>,
    #[serde(default, rename = "JournalCapture")]
    pub journal_capture: Option<JournalCapture>,
}

impl Entry {
    /// Component-id explicit, else derived from the reason-code high
    /// byte when the SRC type is `BD`.
    pub fn resolved_component_id(&self) -> u16 {
        if let Some(id) = self.component_id {
            return id;
        }
        if self.src.src_type.eq_ignore_ascii_case("BD") {
            if let Ok(rc) = u16::from_str_radix(self.src.reason_code.trim_start_matches("0x"), 16) {
                return rc & 0xFF00;
            }
        }
        0
    }

    pub fn reason_code(&self) -> Result<u16> {
        u16::from_str_radix(self.src.reason_code.trim_start_matches("0x"), 16)
            .map_err(|_| PelError::InvalidRegistryValue(self.src.reason_code.clone()))
    }

    pub fn subsystem_byte(&self) -> Result<u8> {
        pel_values::subsystem_from_name(&self.subsystem)
            .ok_or_else(|| PelError::InvalidRegistryValue(self.subsystem.clone()))
    }

    pub fn severity_for(&self, system_names: &[String], manufacturing: bool) -> Option<String> {
        let choice = if manufacturing { self.mfg_severity.as_ref() } else { None }
            .or(self.severity.as_ref())?;
        Some(choice.resolve(system_names))
    }

    pub fn action_flags_for(&self, manufacturing: bool) -> &[String] {
        if manufacturing && !self.mfg_action_flags.is_empty() {
            &self.mfg_action_flags
        } else {
            &self.action_flags
        }
    }
}

/// Loaded registry: entries indexed both by name and by reason code
///.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_name: HashMap<String, Entry>,
    by_reason_code: HashMap<String, Entry>,
}

impl Registry {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let entries: Vec<Entry> =
            serde_json::from_str(text).map_err(|e| PelError::Parse(e.to_string()))?;
        Ok(Self::from_entries(entries))
    }

    /// Reads the message-registry JSON from disk, logging
    /// and skipping individual malformed entries instead of failing the
    /// whole load over one bad one.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(PelError::Io)?;
        let registry = Self::from_json_str_tolerant(&text);
        tracing::info!(path = %path.display(), entry_count = registry.by_name.len(), "loaded message registry");
        Ok(registry)
    }

    /// Like [`Self::from_json_str`], but parses the top-level array
    /// entry-by-entry so one malformed entry doesn't sink the whole
    /// registry.
    pub fn from_json_str_tolerant(text: &str) -> Self {
        let values: Vec<serde_json::Value> = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "message registry is not a JSON array; loading empty registry");
                return Self::default();
            }
        };
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value::<Entry>(value) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "skipping malformed registry entry"),
            }
        }
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<Entry>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_reason_code = HashMap::new();
        for e in entries {
            by_reason_code.insert(e.src.reason_code.to_uppercase(), e.clone());
            by_name.insert(e.name.clone(), e);
        }
        Self { by_name, by_reason_code }
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&Entry> {
        self.by_name.get(name)
    }

    pub fn lookup_by_reason_code(&self, reason_code: &str) -> Option<&Entry> {
        self.by_reason_code.get(&reason_code.to_uppercase())
    }

    /// An unknown message falls back to a `<base>Default` entry.
    pub fn lookup_with_default_fallback(&self, name: &str) -> Option<(&Entry, bool)> {
        if let Some(e) = self.lookup_by_name(name) {
            return Some((e, false));
        }
        let default_name = format!("{}Default", name);
        self.lookup_by_name(&default_name).map(|e| (e, true))
    }
}

/// A single resolved callout descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalloutKind {
    Procedure(String),
    SymbolicFru { fru_id: String, trusted: bool },
    Hardware { inventory_path: Option<String>, part_number: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCallout {
    pub priority: char,
    pub location_code: Option<String>,
    pub kind: CalloutKind,
    pub use_inventory_loc_code: bool,
}

/// Callout resolution: consumes the opaque callout JSON plus
/// `(system_names, additional_data)`.
pub fn resolve_callouts(
    callouts: &Value,
    system_names: &[String],
    additional_data: &HashMap<String, String>,
) -> Result<Vec<ResolvedCallout>> {
    if let Some(obj) = callouts.as_object() {
        if let Some(ad_name) = obj.get("ADName").and_then(Value::as_str) {
            let ad_value = additional_data.get(ad_name);
            let list = ad_value
                .and_then(|v| obj.get(v.as_str()))
                .or_else(|| obj.get("CalloutsWhenNoADMatch"));
            return match list {
                Some(l) => parse_callout_list(l),
                None => Ok(Vec::new()),
            };
        }
    }

    let array = callouts.as_array().ok_or(PelError::NoCallouts)?;
    let mut fallback: Option<&Value> = None;
    for entry in array {
        let system = entry.get("System").and_then(Value::as_str);
        let systems: Option<Vec<String>> = entry.get("Systems").and_then(|v| {
            v.as_array().map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
        });

        let matches_system = system.is_some_and(|s| system_names.iter().any(|n| n == s));
        let matches_systems =
            systems.as_ref().is_some_and(|l| l.iter().any(|s| system_names.contains(s)));

        if matches_system || matches_systems {
            return parse_callout_list(entry.get("Callouts").ok_or(PelError::NoCallouts)?);
        }
        if system.is_none() && systems.is_none() {
            fallback = Some(entry);
        }
    }

    match fallback {
        Some(entry) => parse_callout_list(entry.get("Callouts").ok_or(PelError::NoCallouts)?),
        None => Err(PelError::NoCallouts),
    }
}

fn parse_callout_list(list: &Value) -> Result<Vec<ResolvedCallout>> {
    let array = list.as_array().ok_or(PelError::NoCallouts)?;
    let mut out = Vec::with_capacity(array.len());
    for item in array {
        out.push(parse_one_callout(item)?);
    }
    Ok(out)
}

pub(crate) fn parse_one_callout(item: &Value) -> Result<ResolvedCallout> {
    let priority = item
        .get("Priority")
        .and_then(Value::as_str)
        .and_then(|s| s.chars().next())
        .filter(|c| pel_values::priority_char_valid(*c))
        .ok_or_else(|| PelError::InvalidRegistryValue("Priority".to_string()))?;

    let location_code = item.get("LocationCode").and_then(Value::as_str).map(String::from);
    let use_inventory_loc_code =
        item.get("UseInventoryLocCode").and_then(Value::as_bool).unwrap_or(false);

    let kind = if let Some(p) = item.get("Procedure").and_then(Value::as_str) {
        CalloutKind::Procedure(p.to_string())
    } else if let Some(fru_id) = item.get("SymbolicFRU").and_then(Value::as_str) {
        CalloutKind::SymbolicFru { fru_id: fru_id.to_string(), trusted: false }
    } else if let Some(fru_id) = item.get("TrustedSymbolicFRU").and_then(Value::as_str) {
        CalloutKind::SymbolicFru { fru_id: fru_id.to_string(), trusted: true }
    } else {
        CalloutKind::Hardware {
            inventory_path: item.get("InventoryPath").and_then(Value::as_str).map(String::from),
            part_number: item.get("PartNumber").and_then(Value::as_str).map(String::from),
        }
    };

    Ok(ResolvedCallout { priority, location_code, kind, use_inventory_loc_code })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry_json() -> &'static str {
        r#"[{
            "Name": "xyz.openbmc_project.Error.Test",
            "Subsystem": "power_supply",
            "ActionFlags": ["service_action", "report"],
            "SRC": {"Type": "BD", "ReasonCode": "0x2030"},
            "Documentation": {"Description": "d", "Message": "m"}
        }]"#
    }

    #[test]
    fn tolerant_load_skips_malformed_entries_but_keeps_good_ones() {
        let json = r#"[
            {"Name": "xyz.openbmc_project.Error.Good", "Subsystem": "power_supply",
             "SRC": {"Type": "BD", "ReasonCode": "0x2030"},
             "Documentation": {"Description": "d", "Message": "m"}},
            {"Name": "xyz.openbmc_project.Error.Bad", "Subsystem": "power_supply"}
        ]"#;
        let reg = Registry::from_json_str_tolerant(json);
        assert!(reg.lookup_by_name("xyz.openbmc_project.Error.Good").is_some());
        assert!(reg.lookup_by_name("xyz.openbmc_project.Error.Bad").is_none());
    }

    #[test]
    fn s3_registry_lookup_by_name_and_reason_code() {
        let reg = Registry::from_json_str(sample_entry_json()).unwrap();
        let by_name = reg.lookup_by_name("xyz.openbmc_project.Error.Test").unwrap();
        assert_eq!(by_name.subsystem_byte().unwrap(), 0x61);
        let by_code = reg.lookup_by_reason_code("0x2030").unwrap();
        assert_eq!(by_code.name, by_name.name);
    }

    #[test]
    fn s4_default_fallback_is_used_for_unknown_name() {
        let json = r#"[{
            "Name": "xyz.openbmc_project.Error.TestDefault",
            "Subsystem": "software",
            "SRC": {"Type": "BD", "ReasonCode": "0x2031"},
            "Documentation": {"Description": "d", "Message": "m"}
        }]"#;
        let reg = Registry::from_json_str(json).unwrap();
        let (entry, used_default) =
            reg.lookup_with_default_fallback("xyz.openbmc_project.Error.Test").unwrap();
        assert!(used_default);
        assert_eq!(entry.src.reason_code, "0x2031");
    }

    #[test]
    fn unknown_subsystem_name_fails_with_invalid_registry_value() {
        let json = r#"[{
            "Name": "n",
            "Subsystem": "not_a_real_subsystem",
            "SRC": {"Type": "BD", "ReasonCode": "0x1000"},
            "Documentation": {"Description": "d", "Message": "m"}
        }]"#;
        let reg = Registry::from_json_str(json).unwrap();
        let entry = reg.lookup_by_name("n").unwrap();
        assert!(matches!(entry.subsystem_byte(), Err(PelError::InvalidRegistryValue(_))));
    }

    #[test]
    fn callout_resolution_via_ad_name() {
        let callouts: Value = serde_json::from_str(
            r#"{"ADName": "CALLOUT_FOO", "bar": [{"Priority": "H", "Procedure": "proc1"}]}"#,
        )
        .unwrap();
        let mut ad = HashMap::new();
        ad.insert("CALLOUT_FOO".to_string(), "bar".to_string());
        let resolved = resolve_callouts(&callouts, &[], &ad).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].priority, 'H');
    }

    #[test]
    fn callout_resolution_prefers_first_matching_system_or_systems_entry() {
        // First matching entry on either `System` or `Systems` wins.
        let callouts: Value = serde_json::from_str(
            r#"[
                {"System": "systemA", "Callouts": [{"Priority": "H", "Procedure": "a"}]},
                {"Systems": ["systemB", "systemC"], "Callouts": [{"Priority": "M", "Procedure": "b"}]},
                {"Callouts": [{"Priority": "L", "Procedure": "fallback"}]}
            ]"#,
        )
        .unwrap();
        let resolved =
            resolve_callouts(&callouts, &["systemC".to_string()], &HashMap::new()).unwrap();
        assert_eq!(resolved[0].priority, 'M');
    }

    #[test]
    fn no_matching_system_falls_back_to_unscoped_entry() {
        let callouts: Value = serde_json::from_str(
            r#"[
                {"System": "systemA", "Callouts": [{"Priority": "H", "Procedure": "a"}]},
                {"Callouts": [{"Priority": "L", "Procedure": "fallback"}]}
            ]"#,
        )
        .unwrap();
        let resolved =
            resolve_callouts(&callouts, &["systemZ".to_string()], &HashMap::new()).unwrap();
        assert_eq!(resolved[0].priority, 'L');
    }

    #[test]
    fn no_match_and_no_fallback_fails_with_no_callouts() {
        let callouts: Value = serde_json::from_str(
            r#"[{"System": "systemA", "Callouts": [{"Priority": "H", "Procedure": "a"}]}]"#,
        )
        .unwrap();
        let result = resolve_callouts(&callouts, &["systemZ".to_string()], &HashMap::new());
        assert!(matches!(result, Err(PelError::NoCallouts)));
    }
}
