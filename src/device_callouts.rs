//! Device-callout JSON: maps a device path or I2C bus/address to an
//! ordered callout list, keyed by system-name.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PelError, Result};
use crate::registry::{parse_one_callout, ResolvedCallout};

/// One device-path or I2C-key to callout-list mapping, scoped to a
/// system-name like the registry's own callout JSON.
#[derive(Debug, Clone, Deserialize)]
struct DeviceCalloutFile {
    #[serde(flatten)]
    by_system: HashMap<String, HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceCalloutMap {
    by_system: HashMap<String, HashMap<String, Value>>,
}

impl DeviceCalloutMap {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let parsed: DeviceCalloutFile =
            serde_json::from_str(text).map_err(|e| PelError::Parse(e.to_string()))?;
        Ok(Self { by_system: parsed.by_system })
    }

    /// Looks up the callout list for `key` (a device path, or an I2C
    /// `"bus-addr"` composite key) under the first matching system name.
    pub fn lookup(&self, system_names: &[String], key: &str) -> Result<Vec<ResolvedCallout>> {
        for name in system_names {
            if let Some(table) = self.by_system.get(name) {
                if let Some(list) = table.get(key) {
                    return parse_callout_array(list);
                }
            }
        }
        Err(PelError::NoCallouts)
    }

    pub fn iic_key(bus: &str, addr: &str) -> String {
        format!("{}-{}", bus, addr)
    }
}

fn parse_callout_array(list: &Value) -> Result<Vec<ResolvedCallout>> {
    let array = list.as_array().ok_or(PelError::NoCallouts)?;
    array.iter().map(parse_one_callout).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_resolves_under_matching_system() {
        let json = r#"{
            "systemA": {
                "/dev/device0": [{"Priority": "H", "Procedure": "proc1"}]
            }
        }"#;
        let map = DeviceCalloutMap::from_json_str(json).unwrap();
        let resolved =
            map.lookup(&["systemA".to_string()], "/dev/device0").unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn iic_key_combines_bus_and_address() {
        assert_eq!(DeviceCalloutMap::iic_key("3", "0x50"), "3-0x50");
    }

    #[test]
    fn unknown_key_fails_with_no_callouts() {
        let map = DeviceCalloutMap::from_json_str("{}").unwrap();
        let result = map.lookup(&["systemA".to_string()], "/dev/missing");
        assert!(matches!(result, Err(PelError::NoCallouts)));
    }
}
