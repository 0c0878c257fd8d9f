//! `DataInterface`: the seam to system/inventory information the SRC
//! builder and PEL assembler consume. The real
//! implementation would query the inventory/VPD surface; that surface
//! itself is out of scope so only the query shape is
//! specified here, with an in-memory mock for tests.

use std::collections::HashMap;

/// Hardware-callout fields resolved from an inventory path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HwCalloutFields {
    pub part_number: String,
    pub ccin: String,
    pub serial_number: String,
}

/// System-info fields for the system-info user-data section.
#[derive(Debug, Clone, Default)]
pub struct SystemInfo {
    pub firmware_version_id: String,
    pub im_keyword: String,
    pub system_states: Vec<String>,
    pub uptime_secs: u64,
    pub load_average: (f32, f32, f32),
}

pub trait DataInterface: Send + Sync {
    fn get_location_code(&self, inventory_path: &str) -> Option<String>;
    fn get_hw_callout_fields(&self, inventory_path: &str) -> Option<HwCalloutFields>;
    fn motherboard_ccin(&self) -> Option<String>;
    fn system_names(&self) -> Vec<String>;
    fn system_info(&self) -> SystemInfo;
    fn is_manufacturing_mode(&self) -> bool;
    fn quiesce_on_error_enabled(&self) -> bool;
}

/// In-memory stand-in for tests and local development: every lookup is
/// keyed by inventory path / static fields set up by the caller.
#[derive(Debug, Clone, Default)]
pub struct MockDataInterface {
    pub location_codes: HashMap<String, String>,
    pub hw_callout_fields: HashMap<String, HwCalloutFields>,
    pub motherboard_ccin: Option<String>,
    pub system_names: Vec<String>,
    pub system_info: SystemInfo,
    pub manufacturing_mode: bool,
    pub quiesce_on_error: bool,
}

impl DataInterface for MockDataInterface {
    fn get_location_code(&self, inventory_path: &str) -> Option<String> {
        self.location_codes.get(inventory_path).cloned()
    }

    fn get_hw_callout_fields(&self, inventory_path: &str) -> Option<HwCalloutFields> {
        self.hw_callout_fields.get(inventory_path).cloned()
    }

    fn motherboard_ccin(&self) -> Option<String> {
        self.motherboard_ccin.clone()
    }

    fn system_names(&self) -> Vec<String> {
        self.system_names.clone()
    }

    fn system_info(&self) -> SystemInfo {
        self.system_info.clone()
    }

    fn is_manufacturing_mode(&self) -> bool {
        self.manufacturing_mode
    }

    fn quiesce_on_error_enabled(&self) -> bool {
        self.quiesce_on_error
    }
}

/// Production stand-in used by the standalone daemon: the real
/// inventory/VPD surface is out of scope, so this fills the
/// system-info fields from what's actually observable
/// on the host the daemon runs on, and returns `None`/empty for every
/// inventory-path lookup - the daemon has no VPD service to query.
#[derive(Debug, Clone, Default)]
pub struct LocalDataInterface {
    pub manufacturing_mode: bool,
    pub quiesce_on_error: bool,
}

impl DataInterface for LocalDataInterface {
    fn get_location_code(&self, _inventory_path: &str) -> Option<String> {
        None
    }

    fn get_hw_callout_fields(&self, _inventory_path: &str) -> Option<HwCalloutFields> {
        None
    }

    fn motherboard_ccin(&self) -> Option<String> {
        None
    }

    fn system_names(&self) -> Vec<String> {
        vec!["generic".to_string()]
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            firmware_version_id: env!("CARGO_PKG_VERSION").to_string(),
            im_keyword: String::new(),
            system_states: Vec::new(),
            uptime_secs: read_system_uptime_secs(),
            load_average: read_load_average(),
        }
    }

    fn is_manufacturing_mode(&self) -> bool {
        self.manufacturing_mode
    }

    fn quiesce_on_error_enabled(&self) -> bool {
        self.quiesce_on_error
    }
}

fn read_system_uptime_secs() -> u64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|s| s.split_whitespace().next().map(str::to_string))
        .and_then(|s| s.parse::<f64>().ok())
        .map(|v| v as u64)
        .unwrap_or(0)
}

fn read_load_average() -> (f32, f32, f32) {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| {
            let mut fields = s.split_whitespace();
            let one = fields.next()?.parse::<f32>().ok()?;
            let five = fields.next()?.parse::<f32>().ok()?;
            let fifteen = fields.next()?.parse::<f32>().ok()?;
            Some((one, five, fifteen))
        })
        .unwrap_or((0.0, 0.0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_data_interface_has_no_inventory_surface() {
        let data = LocalDataInterface::default();
        assert_eq!(data.get_location_code("/any/path"), None);
        assert_eq!(data.motherboard_ccin(), None);
        assert!(!data.is_manufacturing_mode());
    }

    #[test]
    fn mock_returns_configured_location_code() {
        let mut mock = MockDataInterface::default();
        mock.location_codes.insert("/system/chassis/fan0".to_string(), "Ufcs-A3".to_string());
        assert_eq!(mock.get_location_code("/system/chassis/fan0").as_deref(), Some("Ufcs-A3"));
        assert_eq!(mock.get_location_code("/nonexistent"), None);
    }
}
