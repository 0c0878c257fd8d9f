//! Orchestration: dispatches a new event-log entry to the raw/ESEL/
//! registry creation path, syncs results back to the event-log
//! collaborator, and handles the invalid-input fallback.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::bcd::BcdTime;
use crate::config::DaemonConfig;
use crate::data_interface::DataInterface;
use crate::device_callouts::DeviceCalloutMap;
use crate::error::{PelError, Result};
use crate::event_log::{EventLogSink, PelAttributes};
use crate::extensions::ExtensionRegistry;
use crate::log_id::LogIdGenerator;
use crate::pel::{FfdcFile, JournalCaptureResult, Pel};
use crate::pel_values::{self, Severity};
use crate::registry::Registry;
use crate::repository::{LogId, Repository};
use crate::sections::Src;

pub const ERROR_NAME_KEY: &str = "ERROR_NAME";
const BAD_PEL_EVENT_NAME: &str = "xyz.openbmc_project.Logging.Error.PELCreationFailed";

/// Request shape for `Manager::create`: message, obmc_id, timestamp,
/// severity, additional data, and FFDC files. `associations`
/// (event-to-event relationship metadata owned by the event-log
/// collaborator, not the PEL core) is out of this crate's scope and
/// so isn't modeled here.
pub struct CreateRequest {
    pub message: String,
    pub obmc_id: u32,
    pub ts: BcdTime,
    pub severity: Severity,
    pub additional_data: HashMap<String, String>,
    pub ffdc: Vec<FfdcFile>,
    pub journal: Vec<JournalCaptureResult>,
}

pub struct Manager {
    registry: Registry,
    repository: Repository,
    data: Arc<dyn DataInterface>,
    device_callouts: DeviceCalloutMap,
    pel_ids: LogIdGenerator,
    extensions: ExtensionRegistry,
    event_log: Arc<dyn EventLogSink>,
    config: DaemonConfig,
}

impl Manager {
    pub fn new(
        registry: Registry,
        repository: Repository,
        data: Arc<dyn DataInterface>,
        device_callouts: DeviceCalloutMap,
        pel_ids: LogIdGenerator,
        extensions: ExtensionRegistry,
        event_log: Arc<dyn EventLogSink>,
        config: DaemonConfig,
    ) -> Self {
        Self { registry, repository, data, device_callouts, pel_ids, extensions, event_log, config }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// `Manager.create` dispatch.
    pub fn create(&self, mut request: CreateRequest) -> Result<()> {
        if let Some(path) = request.additional_data.get("RAWPEL").cloned() {
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => return self.handle_invalid_input(&request, &format!("could not read RAWPEL file: {}", e)),
            };
            let result = self.add_pel(bytes, request.obmc_id);
            let _ = std::fs::remove_file(&path);
            return result.or_else(|e| self.handle_invalid_input(&request, &e.to_string()));
        }

        if let Some(esel) = request.additional_data.get("ESEL").cloned() {
            let bytes = match decode_esel(&esel) {
                Ok(b) => b,
                Err(e) => return self.handle_invalid_input(&request, &e.to_string()),
            };
            return self
                .add_pel(bytes, request.obmc_id)
                .or_else(|e| self.handle_invalid_input(&request, &e.to_string()));
        }

        let (entry, used_default) = match self.registry.lookup_with_default_fallback(&request.message) {
            Some(found) => found,
            None => {
                error!(message = %request.message, "no registry entry and no default fallback; abandoning PEL creation");
                return Ok(());
            }
        };
        if used_default {
            request.additional_data.insert(ERROR_NAME_KEY.to_string(), request.message.clone());
        }
        let entry = entry.clone();

        let pel_id = self.pel_ids.next_id()?;
        let system_names = self.data.system_names();
        self.resolve_device_callouts(&entry, &request.additional_data, &system_names);

        let pel = Pel::from_registry(
            &entry,
            request.obmc_id,
            pel_id,
            request.ts,
            request.severity,
            &request.additional_data,
            &request.ffdc,
            self.data.as_ref(),
            &request.journal,
            self.config.max_pel_size,
        )?;

        self.finish_add(pel, request.obmc_id)
    }

    /// Resolves any device-path/I2C-keyed callouts requested in
    /// additional-data, logging the outcome. `build_src` only leaves a
    /// debug breadcrumb for this; actually
    /// performing the lookup is the manager's job since only it holds
    /// the injected [`DeviceCalloutMap`].
    fn resolve_device_callouts(
        &self,
        _entry: &crate::registry::Entry,
        additional_data: &HashMap<String, String>,
        system_names: &[String],
    ) {
        let key = additional_data
            .get("CALLOUT_DEVICE_PATH")
            .cloned()
            .or_else(|| {
                let bus = additional_data.get("CALLOUT_IIC_BUS")?;
                let addr = additional_data.get("CALLOUT_IIC_ADDR")?;
                Some(DeviceCalloutMap::iic_key(bus, addr))
            });
        if let Some(key) = key {
            match self.device_callouts.lookup(system_names, &key) {
                Ok(_callouts) => info!(key = %key, "resolved device callout"),
                Err(e) => tracing::debug!(key = %key, error = %e, "device callout did not resolve"),
            }
        }
    }

    /// Raw-bytes ingestion path (RAWPEL / ESEL), with hostboot-dedupe.
    fn add_pel(&self, bytes: Vec<u8>, obmc_id: u32) -> Result<()> {
        let pel = Pel::from_bytes(bytes, Some(obmc_id))?;
        if !pel.valid() {
            return Err(PelError::Parse("unflattened PEL failed validity check".to_string()));
        }

        if pel.private_header().creator_id == pel_values::CREATOR_HOSTBOOT {
            let existing = self.repository.find(LogId::from_pel_id(pel.private_header().id));
            if existing.is_some() {
                info!(pel_id = pel.private_header().id, "duplicate hostboot PEL archived without further processing");
                self.event_log.delete(obmc_id)?;
                return Ok(());
            }
        }

        self.finish_add(pel, obmc_id)
    }

    /// Shared tail of both creation paths: add to the repository, sync
    /// attributes, build eventId, check quiesce-on-error, and prune if
    /// the repository crossed its size-warning threshold.
    fn finish_add(&self, pel: Pel, obmc_id: u32) -> Result<()> {
        let entry = self.repository.add(&pel)?;
        self.extensions.run_post_create(&entry, &pel);

        let src = pel.primary_src();
        let event_id = src.map(build_event_id).unwrap_or_default();
        let uh = pel.user_header();
        let attrs = PelAttributes {
            path: entry.path.to_string_lossy().to_string(),
            severity: uh.severity,
            service_provider_notify: uh.action_flags & 0x1000 != 0,
            event_id,
            resolution: String::new(),
            hidden: uh.action_flags & 0x0002 != 0,
            subsystem_name: pel_values::SUBSYSTEM_NAMES
                .iter()
                .find(|(_, v)| *v == uh.subsystem)
                .map(|(n, _)| n.to_string())
                .unwrap_or_default(),
            plid: pel.private_header().plid,
            deconfig: entry.deconfig,
            guard: entry.guard,
            creation_time: pel.private_header().create_timestamp,
        };
        self.event_log.sync_pel_attributes(obmc_id, &attrs)?;

        let has_hw_callout = src.is_some_and(|s| {
            s.callouts.as_ref().is_some_and(|c| {
                c.entries.iter().any(|co| {
                    matches!(
                        co.fru_identity,
                        Some(crate::sections::FruIdentity::Hardware { .. })
                    )
                })
            })
        });
        if uh.severity == crate::pel::CRITICAL_SYSTEM_TERMINATION
            && has_hw_callout
            && self.data.quiesce_on_error_enabled()
        {
            self.event_log.quiesce()?;
        }

        if !self.extensions.default_log_caps_disabled() {
            let isolated = self.extensions.list_isolated_log_ids();
            if let Err(e) = self.repository.prune_if_needed(&isolated) {
                tracing::warn!(error = %e, "prune after add failed");
            }
        }

        Ok(())
    }

    /// Invalid-input handling: writes the bad bytes (if any) to
    /// `<repo>/badPEL`, raises a system error event, and deletes the
    /// originating event-log entry.
    fn handle_invalid_input(&self, request: &CreateRequest, reason: &str) -> Result<()> {
        error!(message = %request.message, %reason, "PEL creation failed, falling back to badPEL handling");
        if let Some(path) = request.additional_data.get("RAWPEL") {
            if let Ok(bytes) = std::fs::read(path) {
                let _ = std::fs::write(self.config.bad_pel_path(), bytes);
            }
        } else if let Some(esel) = request.additional_data.get("ESEL") {
            let _ = std::fs::write(self.config.bad_pel_path(), esel.as_bytes());
        }
        self.event_log.create_system_error(BAD_PEL_EVENT_NAME, reason)?;
        self.event_log.delete(request.obmc_id)?;
        Ok(())
    }

    /// `HardwarePresent`: clears the deconfig flag on every BMC
    /// PEL whose primary-SRC callouts include `location_code`, and only
    /// on thermal/fan component ids (approximated here by the `fan`
    /// subsystem byte - the only subsystem this corpus treats as
    /// thermal-adjacent).
    pub fn hardware_present(&self, location_code: &str) -> Result<usize> {
        const FAN_SUBSYSTEM: u8 = 0x65;
        let mut cleared = 0;
        for entry in self.repository.all_entries() {
            if entry.creator_id != pel_values::CREATOR_BMC || entry.subsystem != FAN_SUBSYSTEM || !entry.deconfig {
                continue;
            }
            let id = LogId::from_pel_id(entry.pel_id);
            let matched = self.repository.update_pel(id, |pel| {
                let has_location = pel
                    .primary_src()
                    .and_then(|s| s.callouts.as_ref())
                    .is_some_and(|c| c.entries.iter().any(|co| co.location_code.as_deref() == Some(location_code)));
                if !has_location {
                    return false;
                }
                if let Some(src) = pel.primary_src_mut() {
                    src.set_hex_word(5, src.hex_word(5) & !crate::sections::HW5_DECONFIGURED);
                }
                true
            });
            if matched.is_ok() {
                if let Some(updated) = self.repository.find(id) {
                    if !updated.deconfig {
                        cleared += 1;
                    }
                }
            }
        }
        Ok(cleared)
    }
}

/// Builds the event id: ASCII-SRC trimmed + " " + each hex-word as 8
/// hex digits, sanitized to printable ASCII (newline/tab excepted).
fn build_event_id(src: &Src) -> String {
    let mut parts = vec![src.ascii_string.trim().to_string()];
    for word in 2..=9 {
        parts.push(format!("{:08X}", src.hex_word(word)));
    }
    sanitize_event_id(&parts.join(" "))
}

fn sanitize_event_id(s: &str) -> String {
    s.chars()
        .map(|c| if c == '\n' || c == '\t' || (' '..='~').contains(&c) { c } else { ' ' })
        .collect()
}

/// Decodes an ASCII hex-pair-separated-by-spaces ESEL string; the PEL
/// starts at byte 16 (character offset 48).
fn decode_esel(esel: &str) -> Result<Vec<u8>> {
    if esel.len() < 48 {
        return Err(PelError::TruncatedEsel);
    }
    esel[48..]
        .split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).map_err(|_| PelError::Parse(format!("invalid ESEL byte '{}'", tok))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_interface::MockDataInterface;
    use crate::event_log::{MockCall, MockEventLogSink};
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_registry() -> Registry {
        Registry::from_json_str(
            r#"[{
                "Name": "xyz.openbmc_project.Error.Test",
                "Subsystem": "power_supply",
                "SRC": {"Type": "BD", "ReasonCode": "0x2030"},
                "Documentation": {"Description": "d", "Message": "m"}
            }]"#,
        )
        .unwrap()
    }

    fn manager(dir: &std::path::Path) -> (Manager, Arc<MockEventLogSink>) {
        let repo =
            Repository::new(dir.join("logs"), dir.join("logs/archive"), 1024 * 1024, 3000).unwrap();
        let pel_ids = LogIdGenerator::load(dir.join("pelid")).unwrap();
        let sink = Arc::new(MockEventLogSink::default());
        let manager = Manager::new(
            sample_registry(),
            repo,
            Arc::new(MockDataInterface::default()),
            DeviceCalloutMap::default(),
            pel_ids,
            ExtensionRegistry::new(),
            sink.clone(),
            DaemonConfig::default(),
        );
        (manager, sink)
    }

    #[test]
    fn s4_unknown_message_falls_back_to_default_entry() {
        let dir = tempdir().unwrap();
        let repo =
            Repository::new(dir.path().join("logs"), dir.path().join("logs/archive"), 1024 * 1024, 3000)
                .unwrap();
        let registry = Registry::from_json_str(
            r#"[{
                "Name": "xyz.openbmc_project.Error.TestDefault",
                "Subsystem": "software",
                "SRC": {"Type": "BD", "ReasonCode": "0x2031"},
                "Documentation": {"Description": "d", "Message": "m"}
            }]"#,
        )
        .unwrap();
        let pel_ids = LogIdGenerator::load(dir.path().join("pelid")).unwrap();
        let sink = Arc::new(MockEventLogSink::default());
        let manager = Manager::new(
            registry,
            repo,
            Arc::new(MockDataInterface::default()),
            DeviceCalloutMap::default(),
            pel_ids,
            ExtensionRegistry::new(),
            sink.clone(),
            DaemonConfig::default(),
        );

        let req = CreateRequest {
            message: "xyz.openbmc_project.Error.Test".to_string(),
            obmc_id: 1,
            ts: BcdTime::from_datetime(Utc::now()),
            severity: Severity::Informational,
            additional_data: HashMap::new(),
            ffdc: Vec::new(),
            journal: Vec::new(),
        };
        manager.create(req).unwrap();
        assert_eq!(manager.repository().len(), 1);
    }

    #[test]
    fn unknown_message_with_no_default_creates_nothing() {
        let dir = tempdir().unwrap();
        let (manager, sink) = manager(dir.path());
        let req = CreateRequest {
            message: "xyz.openbmc_project.Error.NoSuchEntry".to_string(),
            obmc_id: 1,
            ts: BcdTime::from_datetime(Utc::now()),
            severity: Severity::Informational,
            additional_data: HashMap::new(),
            ffdc: Vec::new(),
            journal: Vec::new(),
        };
        manager.create(req).unwrap();
        assert_eq!(manager.repository().len(), 0);
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn s5_esel_shorter_than_48_chars_is_rejected_as_bad_pel() {
        let dir = tempdir().unwrap();
        let (manager, sink) = manager(dir.path());
        let mut ad = HashMap::new();
        ad.insert("ESEL".to_string(), "00 00 df".to_string());
        let req = CreateRequest {
            message: "xyz.openbmc_project.Error.Test".to_string(),
            obmc_id: 42,
            ts: BcdTime::from_datetime(Utc::now()),
            severity: Severity::Informational,
            additional_data: ad,
            ffdc: Vec::new(),
            journal: Vec::new(),
        };
        manager.create(req).unwrap();
        let calls = sink.calls.lock().unwrap();
        assert!(calls.iter().any(|c| matches!(c, MockCall::SystemError(_, _))));
        assert!(calls.contains(&MockCall::Delete(42)));
    }

    #[test]
    fn registry_created_pel_syncs_attributes_back() {
        let dir = tempdir().unwrap();
        let (manager, sink) = manager(dir.path());
        let req = CreateRequest {
            message: "xyz.openbmc_project.Error.Test".to_string(),
            obmc_id: 7,
            ts: BcdTime::from_datetime(Utc::now()),
            severity: Severity::Predictive,
            additional_data: HashMap::new(),
            ffdc: Vec::new(),
            journal: Vec::new(),
        };
        manager.create(req).unwrap();
        let calls = sink.calls.lock().unwrap();
        assert!(calls.iter().any(|c| matches!(c, MockCall::SyncAttributes(7, _))));
    }

    #[test]
    fn event_id_is_ascii_src_plus_hex_words() {
        let src = Src::new("BD612030                        ".to_string());
        let id = build_event_id(&src);
        assert!(id.starts_with("BD612030 00000000 00000000"));
    }

    #[test]
    fn s7_hardware_present_clears_deconfig_on_matching_thermal_callout() {
        let dir = tempdir().unwrap();
        let repo =
            Repository::new(dir.path().join("logs"), dir.path().join("logs/archive"), 1024 * 1024, 3000)
                .unwrap();
        let registry = Registry::from_json_str(
            r#"[{
                "Name": "xyz.openbmc_project.Error.Fan",
                "Subsystem": "fan",
                "SRC": {"Type": "BD", "ReasonCode": "0x2040", "Deconfigure": true},
                "Documentation": {"Description": "d", "Message": "m"},
                "Callouts": [{"Callouts": [{"Priority": "H", "LocationCode": "Ufcs-A3", "PartNumber": "ABC"}]}]
            }]"#,
        )
        .unwrap();
        let pel_ids = LogIdGenerator::load(dir.path().join("pelid")).unwrap();
        let sink = Arc::new(MockEventLogSink::default());
        let manager = Manager::new(
            registry,
            repo,
            Arc::new(MockDataInterface::default()),
            DeviceCalloutMap::default(),
            pel_ids,
            ExtensionRegistry::new(),
            sink,
            DaemonConfig::default(),
        );
        let req = CreateRequest {
            message: "xyz.openbmc_project.Error.Fan".to_string(),
            obmc_id: 1,
            ts: BcdTime::from_datetime(Utc::now()),
            severity: Severity::Predictive,
            additional_data: HashMap::new(),
            ffdc: Vec::new(),
            journal: Vec::new(),
        };
        manager.create(req).unwrap();
        assert!(manager.repository().all_entries()[0].deconfig);

        let cleared = manager.hardware_present("Ufcs-A3").unwrap();
        assert_eq!(cleared, 1);
        assert!(!manager.repository().all_entries()[0].deconfig);
    }
}
