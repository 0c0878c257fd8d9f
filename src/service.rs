//! The PEL daemon's single logical owner of state: wraps the `Manager`,
//! `Repository`, and `HostNotifier` behind one shared handle, broadcasts
//! bus-property-change events to WebSocket subscribers, and runs the two
//! background tasks a standalone daemon needs that a real BMC would get
//! for free from its surrounding services:
//! external-deletion reconciliation via `notify`, and obmc-id allocation.
//!
//! `Manager` and `Repository` already serialize every mutation behind
//! their own internal locks, so this does not add a
//! second lock around them - doing so would only be a redundant
//! bottleneck, not a stronger concurrency guarantee. What this module
//! adds is the single piece of state genuinely owned at the daemon
//! level: the broadcast channel and the obmc-id counter. See DESIGN.md
//! for the recorded decision.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;

use crate::bcd::BcdTime;
use crate::config::DaemonConfig;
use crate::error::{PelError, Result};
use crate::event_log::EventLogSink;
use crate::host_notifier::{HostNotifier, HostResponse, RejectReason};
use crate::manager::{CreateRequest, Manager};
use crate::pel::FfdcFile;
use crate::pel_values::Severity;
use crate::repository::{Entry, LogId};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events pushed to `/events` WebSocket subscribers.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PelEvent {
    /// A PEL was added to the repository.
    PelCreated { obmc_id: u32, pel_id: u32, severity: u8, subsystem: u8 },
    /// A PEL was removed (pruned, archived, or externally deleted).
    PelDeleted { obmc_id: u32, pel_id: u32 },
    /// A bus property on an existing PEL changed (ack, deconfig clear).
    PelPropertyChanged { obmc_id: u32, property: String },
    /// A structured log line, mirrored from `tracing`.
    LogLine {
        level: String,
        target: String,
        msg: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Derived per-entry bus properties, computed from an `Entry`
/// rather than stored redundantly.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntryProperties {
    pub obmc_id: u32,
    pub pel_id: u32,
    pub platform_log_id: u32,
    pub severity: u8,
    pub subsystem: u8,
    pub hidden: bool,
    pub management_system_ack: bool,
    pub deconfig: bool,
    pub guard: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&Entry> for EntryProperties {
    fn from(entry: &Entry) -> Self {
        use crate::sections::user_header::TransmissionState;
        Self {
            obmc_id: entry.obmc_id,
            pel_id: entry.pel_id,
            platform_log_id: entry.plid,
            severity: entry.severity,
            subsystem: entry.subsystem,
            hidden: entry.hidden(),
            management_system_ack: entry.hmc_trans_state == TransmissionState::Acked,
            deconfig: entry.deconfig,
            guard: entry.guard,
            timestamp: entry.commit_time.to_datetime(),
        }
    }
}

/// Renders a human-readable dump of a PEL .
pub type PelJsonFormatter = dyn Fn(&[u8]) -> Option<String> + Send + Sync;

/// The daemon's shared handle. Cheap to clone: every field is already an
/// `Arc` or plain `Copy` data.
#[derive(Clone)]
pub struct PelService {
    manager: Arc<Manager>,
    host_notifier: Arc<HostNotifier>,
    event_log: Arc<dyn EventLogSink>,
    config: Arc<DaemonConfig>,
    events_tx: broadcast::Sender<PelEvent>,
    next_obmc_id: Arc<AtomicU32>,
    formatter: Arc<PelJsonFormatter>,
}

fn default_formatter() -> Arc<PelJsonFormatter> {
    Arc::new(|bytes: &[u8]| {
        crate::pel::Pel::from_bytes(bytes.to_vec(), None).ok().map(|pel| {
            let uh = pel.user_header();
            let src_ascii = pel.primary_src().map(|s| s.ascii_string.clone()).unwrap_or_default();
            serde_json::json!({
                "id": format!("0x{:08X}", pel.private_header().id),
                "plid": format!("0x{:08X}", pel.private_header().plid),
                "creatorId": pel.private_header().creator_id as char,
                "severity": format!("0x{:02X}", uh.severity),
                "subsystem": format!("0x{:02X}", uh.subsystem),
                "src": src_ascii,
            })
            .to_string()
        })
    })
}

impl PelService {
    pub fn new(
        manager: Manager,
        host_notifier: HostNotifier,
        event_log: Arc<dyn EventLogSink>,
        config: DaemonConfig,
    ) -> Self {
        let (events_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            manager: Arc::new(manager),
            host_notifier: Arc::new(host_notifier),
            event_log,
            config: Arc::new(config),
            events_tx,
            next_obmc_id: Arc::new(AtomicU32::new(1)),
            formatter: default_formatter(),
        }
    }

    /// Overrides the PEL-JSON renderer.
    pub fn with_formatter(mut self, formatter: Arc<PelJsonFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PelEvent> {
        self.events_tx.subscribe()
    }

    pub fn broadcast_event(&self, event: PelEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Allocates a fresh obmc-id for a PEL created without a
    /// pre-existing event-log entry (standalone mode has no event-log
    /// bus assigning these).
    pub fn allocate_obmc_id(&self) -> u32 {
        self.next_obmc_id.fetch_add(1, Ordering::SeqCst)
    }

    /// `CreatePELWithFFDCFiles`: builds and stores a new PEL
    /// from a registry event name, returning its (obmc_id, pel_id).
    pub async fn create_pel_with_ffdc(
        &self,
        message: String,
        severity: Severity,
        additional_data: std::collections::HashMap<String, String>,
        ffdc: Vec<FfdcFile>,
    ) -> Result<(u32, u32)> {
        let obmc_id = self.allocate_obmc_id();
        let manager = self.manager.clone();
        let request = CreateRequest {
            message,
            obmc_id,
            ts: BcdTime::from_datetime(chrono::Utc::now()),
            severity,
            additional_data,
            ffdc,
            journal: Vec::new(),
        };
        tokio::task::spawn_blocking(move || manager.create(request))
            .await
            .map_err(|e| PelError::Internal(e.to_string()))??;

        let entry = self
            .manager
            .repository()
            .find(LogId::from_obmc_id(obmc_id))
            .ok_or_else(|| PelError::InvalidArgument(format!("obmc id {obmc_id}")))?;
        self.broadcast_event(PelEvent::PelCreated {
            obmc_id: entry.obmc_id,
            pel_id: entry.pel_id,
            severity: entry.severity,
            subsystem: entry.subsystem,
        });

        if !self.config.dont_send_pels_to_host {
            let notifier = self.host_notifier.clone();
            let pel_id = entry.pel_id;
            let size = entry.size;
            tokio::spawn(async move {
                if let Err(e) = notifier.send_new_log_cmd(pel_id, size).await {
                    tracing::warn!(pel_id, error = %e, "host notifier did not complete");
                }
            });
        }

        Ok((entry.obmc_id, entry.pel_id))
    }

    /// `GetPEL`: flattened bytes by pel id.
    pub fn get_pel(&self, pel_id: u32) -> Result<Vec<u8>> {
        self.flatten_entry(LogId::from_pel_id(pel_id))
    }

    /// `GetPELFromOBMCLogID`.
    pub fn get_pel_from_obmc_id(&self, obmc_id: u32) -> Result<Vec<u8>> {
        self.flatten_entry(LogId::from_obmc_id(obmc_id))
    }

    fn flatten_entry(&self, id: LogId) -> Result<Vec<u8>> {
        let entry = self
            .manager
            .repository()
            .find(id)
            .ok_or_else(|| PelError::InvalidArgument("no such PEL".to_string()))?;
        std::fs::read(&entry.path).map_err(PelError::from)
    }

    /// `GetPELIdFromBMCLogId` / `GetBMCLogIdFromPELId`.
    pub fn translate_id(&self, id: LogId) -> Result<Entry> {
        self.manager
            .repository()
            .find(id)
            .ok_or_else(|| PelError::InvalidArgument("no such PEL".to_string()))
    }

    pub fn entry_properties(&self, obmc_id: u32) -> Result<EntryProperties> {
        self.translate_id(LogId::from_obmc_id(obmc_id)).map(|e| (&e).into())
    }

    /// `ManagementSystemAck` bus property setter.
    pub fn management_system_ack(&self, obmc_id: u32) -> Result<()> {
        self.manager.repository().set_hmc_trans_state(
            LogId::from_obmc_id(obmc_id),
            crate::sections::user_header::TransmissionState::Acked,
        )?;
        self.broadcast_event(PelEvent::PelPropertyChanged {
            obmc_id,
            property: "ManagementSystemAck".to_string(),
        });
        Ok(())
    }

    /// `HostAck`: marks the PEL as acked and, if it is the
    /// notifier's currently in-flight command, completes that command.
    pub async fn host_ack(&self, pel_id: u32) -> Result<()> {
        let entry = self.translate_id(LogId::from_pel_id(pel_id))?;
        self.manager.repository().set_host_trans_state(
            LogId::from_pel_id(pel_id),
            crate::sections::user_header::TransmissionState::Acked,
        )?;
        if let Some(instance_id) = self.host_notifier.current_instance_id().await {
            self.host_notifier.deliver_response(instance_id, HostResponse::Success).await;
        }
        self.broadcast_event(PelEvent::PelPropertyChanged {
            obmc_id: entry.obmc_id,
            property: "HostTransmissionState".to_string(),
        });
        Ok(())
    }

    /// `HostReject`.
    pub async fn host_reject(&self, pel_id: u32, reason: RejectReason) -> Result<()> {
        let _entry = self.translate_id(LogId::from_pel_id(pel_id))?;
        if let Some(instance_id) = self.host_notifier.current_instance_id().await {
            self.host_notifier.deliver_response(instance_id, HostResponse::Rejected(reason)).await;
        }
        Ok(())
    }

    /// `GetPELJSON`.
    pub fn get_pel_json(&self, obmc_id: u32) -> Result<String> {
        let bytes = self.get_pel_from_obmc_id(obmc_id)?;
        (self.formatter)(&bytes).ok_or_else(|| PelError::Internal("PEL formatter produced no output".to_string()))
    }

    /// `HardwarePresent`.
    pub fn hardware_present(&self, location_code: &str) -> Result<usize> {
        let cleared = self.manager.hardware_present(location_code)?;
        if cleared > 0 {
            self.broadcast_event(PelEvent::PelPropertyChanged {
                obmc_id: 0,
                property: format!("Deconfig cleared for {location_code} ({cleared} entries)"),
            });
        }
        Ok(cleared)
    }

    pub fn all_entries(&self) -> Vec<EntryProperties> {
        self.manager.repository().all_entries().iter().map(EntryProperties::from).collect()
    }

    /// Starts the background watcher that reconciles PEL files deleted
    /// out from under the repository by something other than this
    /// daemon. Runs for the lifetime of the process; failures to set up
    /// the watch are logged, not fatal, since the repository still
    /// functions without it.
    pub fn spawn_deletion_watcher(&self) {
        let service = self.clone();
        let log_dir = self.manager.repository().log_dir().to_path_buf();
        tokio::task::spawn_blocking(move || run_deletion_watcher(service, log_dir));
    }
}

fn run_deletion_watcher(service: PelService, log_dir: PathBuf) {
    use notify::Event;
    use std::sync::mpsc::channel;

    let (tx, rx) = channel::<notify::Result<Event>>();
    let mut watcher = match RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "could not create repository filesystem watcher");
            return;
        }
    };
    if let Err(e) = watcher.watch(&log_dir, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %e, path = %log_dir.display(), "could not watch PEL log directory");
        return;
    }

    for res in rx {
        let event = match res {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "filesystem watcher error");
                continue;
            }
        };
        if !matches!(event.kind, notify::EventKind::Remove(_)) {
            continue;
        }
        let names: Vec<String> = event
            .paths
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect();
        if names.is_empty() {
            continue;
        }
        let removed = service.manager.repository().reconcile_external_deletions(&names);
        for obmc_id in removed {
            tracing::info!(obmc_id, "reconciled externally deleted PEL");
            if let Err(e) = service.event_log.delete(obmc_id) {
                tracing::warn!(obmc_id, error = %e, "failed to delete event-log entry for reconciled PEL");
            }
            service.broadcast_event(PelEvent::PelDeleted { obmc_id, pel_id: 0 });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::device_callouts::DeviceCalloutMap;
    use crate::event_log::MockEventLogSink;
    use crate::extensions::ExtensionRegistry;
    use crate::host_notifier::{HostNotifier, InstanceIdPool, LoggingHostTransport};
    use crate::log_id::LogIdGenerator;
    use crate::pel_values::Severity;
    use crate::registry::{Documentation, Entry as RegEntry, SeverityChoice, SrcMeta};
    use crate::repository::Repository;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_registry() -> crate::registry::Registry {
        let entry = RegEntry {
            name: "xyz.test.Error.Foo".to_string(),
            component_id: None,
            subsystem: "bmc_firmware".to_string(),
            severity: Some(SeverityChoice::Single("unrecoverable".to_string())),
            mfg_severity: None,
            action_flags: vec![],
            mfg_action_flags: vec![],
            event_type: None,
            event_scope: None,
            src: SrcMeta {
                src_type: "BD".to_string(),
                reason_code: "0x1000".to_string(),
                hex_word_fields: StdHashMap::new(),
                symptom_id_words: vec![],
                deconfigure: false,
                checkstop: false,
            },
            documentation: Documentation {
                description: "Test failure".to_string(),
                message: "Test failure".to_string(),
                message_args_sources: vec![],
            },
            callouts: None,
            journal_capture: None,
        };
        crate::registry::Registry::from_entries(vec![entry])
    }

    async fn test_service() -> (PelService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DaemonConfig {
            extension_persist_dir: dir.path().to_string_lossy().to_string(),
            dont_send_pels_to_host: true,
            ..DaemonConfig::default()
        };
        let repository =
            Repository::new(config.log_path(), config.archive_path(), config.max_repo_size, config.max_num_pels)
                .unwrap();
        let pel_ids = LogIdGenerator::load(config.pel_id_path()).unwrap();
        let event_log = Arc::new(MockEventLogSink::default());
        let manager = Manager::new(
            test_registry(),
            repository,
            Arc::new(crate::data_interface::LocalDataInterface::default()),
            DeviceCalloutMap::from_json_str("{}").unwrap(),
            pel_ids,
            ExtensionRegistry::new(),
            event_log.clone(),
            config.clone(),
        );
        let notifier = HostNotifier::new(
            Arc::new(LoggingHostTransport),
            Arc::new(InstanceIdPool::default()),
            Duration::from_secs(1),
            true,
        );
        (PelService::new(manager, notifier, event_log, config), dir)
    }

    #[tokio::test]
    async fn create_then_fetch_round_trips_through_the_service() {
        let (service, _dir) = test_service().await;
        let (obmc_id, pel_id) = service
            .create_pel_with_ffdc(
                "xyz.test.Error.Foo".to_string(),
                Severity::Unrecoverable,
                std::collections::HashMap::new(),
                Vec::new(),
            )
            .await
            .unwrap();

        let props = service.entry_properties(obmc_id).unwrap();
        assert_eq!(props.pel_id, pel_id);

        let bytes = service.get_pel(pel_id).unwrap();
        assert!(!bytes.is_empty());

        let json = service.get_pel_json(obmc_id).unwrap();
        assert!(json.contains("0x1000") || json.contains("src"));
    }

    #[tokio::test]
    async fn management_system_ack_flips_hmc_state_and_broadcasts() {
        let (service, _dir) = test_service().await;
        let (obmc_id, _) = service
            .create_pel_with_ffdc(
                "xyz.test.Error.Foo".to_string(),
                Severity::Unrecoverable,
                std::collections::HashMap::new(),
                Vec::new(),
            )
            .await
            .unwrap();

        let mut rx = service.subscribe();
        service.management_system_ack(obmc_id).unwrap();
        let props = service.entry_properties(obmc_id).unwrap();
        assert!(props.management_system_ack);

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, PelEvent::PelPropertyChanged { .. }));
    }

    #[tokio::test]
    async fn unknown_obmc_id_is_invalid_argument() {
        let (service, _dir) = test_service().await;
        assert!(matches!(service.entry_properties(99), Err(PelError::InvalidArgument(_))));
    }
}
