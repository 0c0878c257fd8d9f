//! Enumerated constants shared by the registry, the SRC builder, and the
//! section codecs: subsystem names, severities, action-flag bit names,
//! event types, and callout priority characters.
//!
//! Every lookup here that fails to find a name returns `None`; callers
//! turn that into `PelError::InvalidRegistryValue` at the
//! point where a *name from JSON* is being resolved. Internal code that
//! already has raw byte values never needs these tables at all.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Informational = 0x00,
    Recovered = 0x10,
    Predictive = 0x20,
    PredictiveDegraded = 0x21,
    PredictiveLossOfRedundancy = 0x22,
    Unrecoverable = 0x40,
    UnrecoverableLossOfRedundancy = 0x41,
    UnrecoverableLossOfFunction = 0x44,
    UnrecoverableLossOfRedundancyAndFunction = 0x45,
    Critical = 0x50,
    CriticalSystemTermination = 0x51,
    SymptomRecovered = 0x60,
    SymptomPredictive = 0x70,
    SymptomUnrecoverable = 0x80,
    SymptomCritical = 0x90,
}

impl Severity {
    pub fn from_u8(v: u8) -> Option<Self> {
        use Severity::*;
        Some(match v {
            0x00 => Informational,
            0x10 => Recovered,
            0x20 => Predictive,
            0x21 => PredictiveDegraded,
            0x22 => PredictiveLossOfRedundancy,
            0x40 => Unrecoverable,
            0x41 => UnrecoverableLossOfRedundancy,
            0x44 => UnrecoverableLossOfFunction,
            0x45 => UnrecoverableLossOfRedundancyAndFunction,
            0x50 => Critical,
            0x51 => CriticalSystemTermination,
            0x60 => SymptomRecovered,
            0x70 => SymptomPredictive,
            0x80 => SymptomUnrecoverable,
            0x90 => SymptomCritical,
            _ => return None,
        })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        use Severity::*;
        Some(match name {
            "informational" => Informational,
            "recovered" => Recovered,
            "predictive" => Predictive,
            "predictive_degraded" => PredictiveDegraded,
            "predictive_loss_of_redundancy" => PredictiveLossOfRedundancy,
            "unrecoverable" => Unrecoverable,
            "unrecoverable_loss_of_redundancy" => UnrecoverableLossOfRedundancy,
            "unrecoverable_loss_of_function" => UnrecoverableLossOfFunction,
            "unrecoverable_loss_of_redundancy_and_function" => {
                UnrecoverableLossOfRedundancyAndFunction
            }
            "critical" => Critical,
            "critical_system_terminating" => CriticalSystemTermination,
            "symptom_recovered" => SymptomRecovered,
            "symptom_predictive" => SymptomPredictive,
            "symptom_unrecoverable" => SymptomUnrecoverable,
            "symptom_critical" => SymptomCritical,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Serviceable-severity classification. `hidden_recovered` is the
    /// per-entry hidden action-flag bit that demotes a recovered/
    /// symptom-recovered severity out of serviceable status.
    pub fn is_serviceable(self, hidden_recovered: bool) -> bool {
        use Severity::*;
        match self {
            Predictive
            | PredictiveDegraded
            | PredictiveLossOfRedundancy
            | Unrecoverable
            | UnrecoverableLossOfRedundancy
            | UnrecoverableLossOfFunction
            | UnrecoverableLossOfRedundancyAndFunction
            | Critical
            | CriticalSystemTermination
            | SymptomPredictive
            | SymptomUnrecoverable
            | SymptomCritical => true,
            Recovered | SymptomRecovered => !hidden_recovered,
            Informational => false,
        }
    }

    pub fn is_informational(self) -> bool {
        matches!(self, Severity::Informational | Severity::Recovered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    NotApplicable = 0x00,
    Informational = 0x01,
    Tracing = 0x02,
    InternalFailure = 0x03,
    Dump = 0x04,
}

impl EventType {
    pub fn from_name(name: &str) -> Option<Self> {
        use EventType::*;
        Some(match name {
            "not_applicable" => NotApplicable,
            "informational" => Informational,
            "tracing" => Tracing,
            "internal_failure" => InternalFailure,
            "dump" => Dump,
            _ => return None,
        })
    }
}

/// Subsystem byte, keyed by registry name. Reduced but representative
/// subset of the real table (platform firmware, power, cooling, CPU,
/// memory, I/O, and BMC's own "other").
pub const SUBSYSTEM_NAMES: &[(&str, u8)] = &[
    ("processor", 0x10),
    ("memory", 0x15),
    ("power_supply", 0x61),
    ("fan", 0x65),
    ("platform_firmware", 0x70),
    ("software", 0x7A),
    ("external_environment", 0x7D),
    ("bmc_firmware", 0x73),
    ("bmc_software", 0x74),
    ("other", 0x0C),
];

pub fn subsystem_from_name(name: &str) -> Option<u8> {
    SUBSYSTEM_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}

pub fn subsystem_is_known(byte: u8) -> bool {
    SUBSYSTEM_NAMES.iter().any(|(_, v)| *v == byte)
}

/// Action-flag bit names -> bit position.
pub const ACTION_FLAG_NAMES: &[(&str, u16)] = &[
    ("service_action", 0x8000),
    ("dont_report", 0x4000),
    ("spare_bit2", 0x2000),
    ("report", 0x1000),
    ("call_home", 0x0800),
    ("isolation_incomplete", 0x0400),
    ("termination_requested", 0x0200),
    ("hidden", 0x0002),
];

pub fn action_flags_from_names(names: &[String]) -> Option<u16> {
    let mut flags = 0u16;
    for n in names {
        let bit = ACTION_FLAG_NAMES.iter().find(|(name, _)| name == n)?.1;
        flags |= bit;
    }
    Some(flags)
}

pub const ACTION_FLAGS_SENTINEL: u16 = 0xFFFF;

/// Derives action-flags and event-type from severity when the registry
/// didn't set them explicitly.
pub fn default_action_flags_and_event_type(sev: Severity) -> (u16, EventType) {
    if sev.is_informational() {
        (action_flags_from_names(&["report".to_string()]).unwrap(), EventType::Informational)
    } else {
        (
            action_flags_from_names(&["service_action".to_string(), "report".to_string()])
                .unwrap(),
            EventType::NotApplicable,
        )
    }
}

/// Valid callout priority characters.
pub fn priority_char_valid(c: char) -> bool {
    matches!(c, 'H' | 'M' | 'A' | 'B' | 'C' | 'L')
}

/// Creator-id char codes used in the PrivateHeader.
pub const CREATOR_BMC: u8 = b'O';
pub const CREATOR_HOSTBOOT: u8 = b'B';
pub const CREATOR_HYPERVISOR: u8 = b'H';
pub const CREATOR_PARTITION_FW: u8 = b'L';

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_serviceable_classification() {
        assert!(Severity::Predictive.is_serviceable(false));
        assert!(!Severity::Informational.is_serviceable(false));
        assert!(Severity::Recovered.is_serviceable(false));
        assert!(!Severity::Recovered.is_serviceable(true));
        assert!(Severity::SymptomCritical.is_serviceable(true));
    }

    #[test]
    fn unknown_subsystem_name_is_none() {
        assert_eq!(subsystem_from_name("not_a_subsystem"), None);
    }
}
