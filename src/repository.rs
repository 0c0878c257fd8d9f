//! Durable PEL store: per-category size accounting, pruning, attribute
//! index, archive, external-deletion reconciliation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::bcd::BcdTime;
use crate::error::{PelError, Result};
use crate::pel::Pel;
use crate::pel_values::Severity;
use crate::sections::user_header::TransmissionState;

/// Either component of `LogID` may be set; equality matches on
/// whichever is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogId {
    pub pel_id: Option<u32>,
    pub obmc_id: Option<u32>,
}

impl LogId {
    pub fn from_pel_id(id: u32) -> Self {
        Self { pel_id: Some(id), obmc_id: None }
    }

    pub fn from_obmc_id(id: u32) -> Self {
        Self { pel_id: None, obmc_id: Some(id) }
    }

    fn matches(&self, other: &LogId) -> bool {
        let pel_match = match (self.pel_id, other.pel_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        let obmc_match = match (self.obmc_id, other.obmc_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        pel_match || obmc_match
    }
}

/// Repository attribute record kept in memory per PEL.
#[derive(Debug, Clone)]
pub struct Entry {
    pub pel_id: u32,
    pub obmc_id: u32,
    pub path: PathBuf,
    pub size: u64,
    pub creator_id: u8,
    pub subsystem: u8,
    pub severity: u8,
    pub action_flags: u16,
    pub host_trans_state: TransmissionState,
    pub hmc_trans_state: TransmissionState,
    pub plid: u32,
    pub deconfig: bool,
    pub guard: bool,
    pub commit_time: BcdTime,
}

impl Entry {
    /// Whether the creator subsystem is the BMC itself, exposed for the HTTP property surface.
    pub fn is_bmc(&self) -> bool {
        self.creator_id == crate::pel_values::CREATOR_BMC
    }

    /// The `Hidden` bus property: derived from the per-entry
    /// action-flags bit rather than stored redundantly.
    pub fn hidden(&self) -> bool {
        self.action_flags & 0x0002 != 0
    }

    pub fn is_serviceable(&self) -> bool {
        Severity::from_u8(self.severity)
            .map(|s| s.is_serviceable(self.hidden()))
            .unwrap_or(false)
    }
}

/// Running size totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sizes {
    pub total: u64,
    pub bmc: u64,
    pub bmc_serviceable: u64,
    pub bmc_info: u64,
    pub non_bmc: u64,
    pub non_bmc_serviceable: u64,
    pub non_bmc_info: u64,
}

impl Sizes {
    fn apply(&mut self, entry: &Entry, sign: i64) {
        let delta = entry.size as i64 * sign;
        self.total = (self.total as i64 + delta) as u64;
        if entry.is_bmc() {
            self.bmc = (self.bmc as i64 + delta) as u64;
            if entry.is_serviceable() {
                self.bmc_serviceable = (self.bmc_serviceable as i64 + delta) as u64;
            } else {
                self.bmc_info = (self.bmc_info as i64 + delta) as u64;
            }
        } else {
            self.non_bmc = (self.non_bmc as i64 + delta) as u64;
            if entry.is_serviceable() {
                self.non_bmc_serviceable = (self.non_bmc_serviceable as i64 + delta) as u64;
            } else {
                self.non_bmc_info = (self.non_bmc_info as i64 + delta) as u64;
            }
        }
    }
}

type AddCallback = Box<dyn Fn(&Entry) + Send + Sync>;
type DeleteCallback = Box<dyn Fn(&Entry) + Send + Sync>;

struct State {
    entries: Vec<Entry>,
    sizes: Sizes,
}

/// The repository itself: log directory, archive directory, in-memory
/// index, and registered callbacks.
pub struct Repository {
    log_dir: PathBuf,
    archive_dir: PathBuf,
    max_repo_size: u64,
    max_num_pels: usize,
    state: RwLock<State>,
    add_callbacks: RwLock<Vec<AddCallback>>,
    delete_callbacks: RwLock<Vec<DeleteCallback>>,
}

const PRUNE_TRIGGER_FRACTION: f64 = 0.95;
const PRUNE_TARGET_FRACTION: f64 = 0.80;

const BUCKET_INFO_BMC_CAP: f64 = 0.15;
const BUCKET_SERVICEABLE_BMC_CAP: f64 = 0.30;
const BUCKET_INFO_NON_BMC_CAP: f64 = 0.15;
const BUCKET_SERVICEABLE_NON_BMC_CAP: f64 = 0.30;

impl Repository {
    pub fn new(log_dir: PathBuf, archive_dir: PathBuf, max_repo_size: u64, max_num_pels: usize) -> Result<Self> {
        std::fs::create_dir_all(&log_dir)?;
        std::fs::create_dir_all(&archive_dir)?;
        Ok(Self {
            log_dir,
            archive_dir,
            max_repo_size,
            max_num_pels,
            state: RwLock::new(State { entries: Vec::new(), sizes: Sizes::default() }),
            add_callbacks: RwLock::new(Vec::new()),
            delete_callbacks: RwLock::new(Vec::new()),
        })
    }

    pub fn register_add_callback(&self, cb: AddCallback) {
        self.add_callbacks.write().expect("lock poisoned").push(cb);
    }

    pub fn register_delete_callback(&self, cb: DeleteCallback) {
        self.delete_callbacks.write().expect("lock poisoned").push(cb);
    }

    pub fn sizes(&self) -> Sizes {
        self.state.read().expect("lock poisoned").sizes
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filename(commit_time: &BcdTime, pel_id: u32) -> String {
        format!("{}_{:08X}", commit_time.as_filename_prefix(), pel_id)
    }

    /// Writes the PEL bytes atomically, indexes it, updates sizes,
    /// calls add-callbacks.
    pub fn add(&self, pel: &Pel) -> Result<Entry> {
        let ph = pel.private_header();
        let uh = pel.user_header();
        let filename = Self::filename(&ph.commit_timestamp, ph.id);
        let path = self.log_dir.join(&filename);
        let bytes = pel.flatten();

        if let Err(e) = write_atomically(&path, &bytes) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        let entry = Entry {
            pel_id: ph.id,
            obmc_id: ph.obmc_id,
            path,
            size: bytes.len() as u64,
            creator_id: ph.creator_id,
            subsystem: uh.subsystem,
            severity: uh.severity,
            action_flags: uh.action_flags,
            host_trans_state: uh.host_trans_state,
            hmc_trans_state: uh.hmc_trans_state,
            plid: ph.plid,
            deconfig: pel
                .primary_src()
                .map(|s| s.hex_word(5) & crate::sections::HW5_DECONFIGURED != 0)
                .unwrap_or(false),
            guard: pel
                .primary_src()
                .map(|s| s.hex_word(5) & crate::sections::HW5_GUARDED != 0)
                .unwrap_or(false),
            commit_time: ph.commit_timestamp,
        };

        {
            let mut state = self.state.write().expect("lock poisoned");
            state.sizes.apply(&entry, 1);
            state.entries.push(entry.clone());
        }

        for cb in self.add_callbacks.read().expect("lock poisoned").iter() {
            cb(&entry);
        }

        Ok(entry)
    }

    /// Moves the file to archive, erases its attributes, updates
    /// sizes, calls delete-callbacks.
    pub fn remove(&self, id: LogId) -> Result<()> {
        let entry = {
            let mut state = self.state.write().expect("lock poisoned");
            let idx = state
                .entries
                .iter()
                .position(|e| id.matches(&LogId { pel_id: Some(e.pel_id), obmc_id: Some(e.obmc_id) }))
                .ok_or_else(|| PelError::InvalidArgument("no such PEL".to_string()))?;
            let entry = state.entries.remove(idx);
            state.sizes.apply(&entry, -1);
            entry
        };

        if entry.path.exists() {
            let dest = self.archive_dir.join(entry.path.file_name().expect("path has a filename"));
            std::fs::rename(&entry.path, dest)?;
        }

        for cb in self.delete_callbacks.read().expect("lock poisoned").iter() {
            cb(&entry);
        }

        Ok(())
    }

    pub fn find(&self, id: LogId) -> Option<Entry> {
        self.state
            .read()
            .expect("lock poisoned")
            .entries
            .iter()
            .find(|e| id.matches(&LogId { pel_id: Some(e.pel_id), obmc_id: Some(e.obmc_id) }))
            .cloned()
    }

    pub fn all_entries(&self) -> Vec<Entry> {
        self.state.read().expect("lock poisoned").entries.clone()
    }

    /// Rewrites the file's PEL if `updater` mutated it, then refreshes
    /// host/hmc state and deconfig from the updated PEL.
    pub fn update_pel(&self, id: LogId, updater: impl FnOnce(&mut Pel) -> bool) -> Result<()> {
        let path = {
            let state = self.state.read().expect("lock poisoned");
            let entry = state
                .entries
                .iter()
                .find(|e| id.matches(&LogId { pel_id: Some(e.pel_id), obmc_id: Some(e.obmc_id) }))
                .ok_or_else(|| PelError::InvalidArgument("no such PEL".to_string()))?;
            entry.path.clone()
        };

        let bytes = std::fs::read(&path)?;
        let mut pel = Pel::from_bytes(bytes, None)?;
        if !updater(&mut pel) {
            return Ok(());
        }

        write_atomically(&path, &pel.flatten())?;

        let mut state = self.state.write().expect("lock poisoned");
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| id.matches(&LogId { pel_id: Some(e.pel_id), obmc_id: Some(e.obmc_id) }))
        {
            entry.host_trans_state = pel.user_header().host_trans_state;
            entry.hmc_trans_state = pel.user_header().hmc_trans_state;
            entry.deconfig = pel
                .primary_src()
                .map(|s| s.hex_word(5) & crate::sections::HW5_DECONFIGURED != 0)
                .unwrap_or(false);
        }
        Ok(())
    }

    /// Idempotent: only rewrites the file on the first call.
    pub fn set_host_trans_state(&self, id: LogId, state: TransmissionState) -> Result<()> {
        self.update_pel(id, |pel| {
            if pel.user_header().host_trans_state == state {
                return false;
            }
            if let Some(uh) = user_header_mut(pel) {
                uh.host_trans_state = state;
            }
            true
        })
    }

    pub fn set_hmc_trans_state(&self, id: LogId, state: TransmissionState) -> Result<()> {
        self.update_pel(id, |pel| {
            if pel.user_header().hmc_trans_state == state {
                return false;
            }
            if let Some(uh) = user_header_mut(pel) {
                uh.hmc_trans_state = state;
            }
            true
        })
    }

    /// Enforces bounded retention via pruning. `isolated_ids` is the
    /// caller-provided hardware-isolation set (never pruned). Returns the
    /// obmc-ids of removed PELs.
    pub fn prune_if_needed(&self, isolated_ids: &[u32]) -> Result<Vec<u32>> {
        let (total, count) = {
            let state = self.state.read().expect("lock poisoned");
            (state.sizes.total, state.entries.len())
        };
        let trigger =
            total as f64 > self.max_repo_size as f64 * PRUNE_TRIGGER_FRACTION || count > self.max_num_pels;
        if !trigger {
            return Ok(Vec::new());
        }
        self.prune(isolated_ids)
    }

    fn prune(&self, isolated_ids: &[u32]) -> Result<Vec<u32>> {
        let mut removed_obmc_ids = Vec::new();

        // Each bucket cap is a byte budget against max_repo_size (the
        // running totals already tracked in Sizes), not an entry count.
        let buckets: [(fn(&Entry) -> bool, fn(&Sizes) -> u64, f64); 4] = [
            (|e: &Entry| e.is_bmc() && !e.is_serviceable(), |s: &Sizes| s.bmc_info, BUCKET_INFO_BMC_CAP),
            (
                |e: &Entry| e.is_bmc() && e.is_serviceable(),
                |s: &Sizes| s.bmc_serviceable,
                BUCKET_SERVICEABLE_BMC_CAP,
            ),
            (
                |e: &Entry| !e.is_bmc() && !e.is_serviceable(),
                |s: &Sizes| s.non_bmc_info,
                BUCKET_INFO_NON_BMC_CAP,
            ),
            (
                |e: &Entry| !e.is_bmc() && e.is_serviceable(),
                |s: &Sizes| s.non_bmc_serviceable,
                BUCKET_SERVICEABLE_NON_BMC_CAP,
            ),
        ];

        for (predicate, size_fn, cap_fraction) in buckets {
            let cap_bytes = (self.max_repo_size as f64 * cap_fraction) as u64;
            self.remove_while(
                predicate,
                || size_fn(&self.sizes()) > cap_bytes,
                isolated_ids,
                &mut removed_obmc_ids,
            )?;
        }

        // After the bucket passes, if there are still too many PELs overall
        // (can happen depending on PEL sizes), bring the count down to 80%
        // of the max, considering every PEL regardless of category.
        if self.len() > self.max_num_pels {
            let target_count = (self.max_num_pels as f64 * PRUNE_TARGET_FRACTION) as usize;
            self.remove_while(|_: &Entry| true, || self.len() > target_count, isolated_ids, &mut removed_obmc_ids)?;
        }

        Ok(removed_obmc_ids)
    }

    /// Removes oldest-first PELs matching `predicate`, escalating through
    /// the four transmission-state passes (hmc-acked, host-acked,
    /// host-sent, any), until `is_over_limit()` goes false or there is
    /// nothing left to remove in this pass. Never removes an isolated id.
    fn remove_while(
        &self,
        predicate: fn(&Entry) -> bool,
        is_over_limit: impl Fn() -> bool,
        isolated_ids: &[u32],
        removed_obmc_ids: &mut Vec<u32>,
    ) -> Result<()> {
        if !is_over_limit() {
            return Ok(());
        }

        let mut sorted_ids: Vec<u32> = {
            let state = self.state.read().expect("lock poisoned");
            let mut matching: Vec<&Entry> = state.entries.iter().filter(|e| predicate(e)).collect();
            matching.sort_by_key(|e| e.commit_time.as_filename_prefix());
            matching.into_iter().map(|e| e.pel_id).collect()
        };

        for pass in 0..4 {
            let mut i = 0;
            while i < sorted_ids.len() {
                if !is_over_limit() {
                    return Ok(());
                }
                let pel_id = sorted_ids[i];
                if isolated_ids.contains(&pel_id) {
                    i += 1;
                    continue;
                }
                let id = LogId::from_pel_id(pel_id);
                let entry = match self.find(id) {
                    Some(e) => e,
                    None => {
                        sorted_ids.remove(i);
                        continue;
                    }
                };
                if !pass_allows(pass, &entry) {
                    i += 1;
                    continue;
                }
                self.remove(id)?;
                removed_obmc_ids.push(entry.obmc_id);
                sorted_ids.remove(i);
            }
        }

        Ok(())
    }

    /// Enforces the archive size cap: empties the archive if it pushes
    /// the total (archive + live) past the warning threshold.
    pub fn enforce_archive_cap(&self) -> Result<()> {
        let live = self.sizes().total;
        let archive_size = dir_size(&self.archive_dir)?;
        if live + archive_size > self.max_repo_size {
            for entry in std::fs::read_dir(&self.archive_dir)? {
                let entry = entry?;
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// External-deletion reconciliation: given a set of filenames
    /// reported deleted by the `notify` watcher, removes the
    /// corresponding index entries. Returns the obmc-ids removed.
    pub fn reconcile_external_deletions(&self, deleted_filenames: &[String]) -> Vec<u32> {
        let mut removed = Vec::new();
        for filename in deleted_filenames {
            let pel_id = match parse_pel_id_from_filename(filename) {
                Some(id) => id,
                None => {
                    tracing::warn!(%filename, "could not parse PEL id from deleted filename");
                    continue;
                }
            };
            let mut state = self.state.write().expect("lock poisoned");
            if let Some(idx) = state.entries.iter().position(|e| e.pel_id == pel_id) {
                let entry = state.entries.remove(idx);
                state.sizes.apply(&entry, -1);
                removed.push(entry.obmc_id);
                drop(state);
                for cb in self.delete_callbacks.read().expect("lock poisoned").iter() {
                    cb(&entry);
                }
            }
        }
        removed
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

fn user_header_mut(pel: &mut Pel) -> Option<&mut crate::sections::UserHeader> {
    pel.sections_mut().iter_mut().find_map(|s| match s {
        crate::sections::PelSection::UserHeader(uh) => Some(uh),
        _ => None,
    })
}

fn pass_allows(pass: u32, entry: &Entry) -> bool {
    use TransmissionState::*;
    match pass {
        0 => entry.hmc_trans_state == Acked,
        1 => entry.host_trans_state == Acked,
        2 => entry.host_trans_state == Sent,
        _ => true,
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    let mut f = std::fs::File::create(path)?;
    f.write_all(bytes)?;
    f.flush()?;
    Ok(())
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        total += entry.metadata()?.len();
    }
    Ok(total)
}

/// Filenames are `<16-hex-BCD><_><8-hex-id>`.
fn parse_pel_id_from_filename(filename: &str) -> Option<u32> {
    let id_part = filename.rsplit('_').next()?;
    u32::from_str_radix(id_part, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pel::Pel;
    use crate::registry::Registry;
    use crate::data_interface::MockDataInterface;
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn build_test_pel(obmc_id: u32, pel_id: u32, ts_offset_secs: i64) -> Pel {
        let json = r#"[{
            "Name": "xyz.openbmc_project.Error.Test",
            "Subsystem": "bmc_firmware",
            "SRC": {"Type": "BD", "ReasonCode": "0x2030"},
            "Documentation": {"Description": "d", "Message": "m"}
        }]"#;
        let registry = Registry::from_json_str(json).unwrap();
        let entry = registry.lookup_by_name("xyz.openbmc_project.Error.Test").unwrap();
        let data = MockDataInterface::default();
        let ts = BcdTime::from_datetime(Utc::now() + chrono::Duration::seconds(ts_offset_secs));
        Pel::from_registry(
            entry,
            obmc_id,
            pel_id,
            ts,
            Severity::Informational,
            &HashMap::new(),
            &[],
            &data,
            &[],
            16 * 1024,
        )
        .unwrap()
    }

    #[test]
    fn add_then_remove_restores_sizes() {
        let dir = tempdir().unwrap();
        let repo =
            Repository::new(dir.path().join("logs"), dir.path().join("logs/archive"), 1024 * 1024, 3000)
                .unwrap();
        let pel = build_test_pel(1, 0x5000_0001, 0);
        repo.add(&pel).unwrap();
        let before_removal_is_zero = repo.sizes() == Sizes::default();
        assert!(!before_removal_is_zero);

        repo.remove(LogId::from_pel_id(0x5000_0001)).unwrap();
        assert_eq!(repo.sizes(), Sizes::default());
    }

    #[test]
    fn host_ack_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo =
            Repository::new(dir.path().join("logs"), dir.path().join("logs/archive"), 1024 * 1024, 3000)
                .unwrap();
        let pel = build_test_pel(1, 0x5000_0001, 0);
        repo.add(&pel).unwrap();
        let id = LogId::from_pel_id(0x5000_0001);

        repo.set_host_trans_state(id, TransmissionState::Acked).unwrap();
        let mtime_after_first = std::fs::metadata(repo.find(id).unwrap().path).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        repo.set_host_trans_state(id, TransmissionState::Acked).unwrap();
        let mtime_after_second = std::fs::metadata(repo.find(id).unwrap().path).unwrap().modified().unwrap();

        assert_eq!(mtime_after_first, mtime_after_second);
    }

    #[test]
    fn s6_bounded_retention_prunes_on_24th_insert() {
        let dir = tempdir().unwrap();
        let repo = Repository::new(
            dir.path().join("logs"),
            dir.path().join("logs/archive"),
            100 * 1024,
            3000,
        )
        .unwrap();

        for i in 0..23u32 {
            let pel_id = 0x5000_0001 + i;
            let pel = build_test_pel(i, pel_id, i as i64);
            repo.add(&pel).unwrap();
            repo.prune_if_needed(&[]).unwrap();
        }
        assert_eq!(repo.len(), 23);

        let pel24 = build_test_pel(23, 0x5000_0001 + 23, 23);
        repo.add(&pel24).unwrap();
        repo.prune_if_needed(&[]).unwrap();
        assert!(repo.len() < 23);
    }

    #[test]
    fn pruning_never_removes_isolated_ids() {
        let dir = tempdir().unwrap();
        let repo =
            Repository::new(dir.path().join("logs"), dir.path().join("logs/archive"), 8 * 1024, 3)
                .unwrap();
        let isolated_id = 0x5000_0001;
        for i in 0..5u32 {
            let pel = build_test_pel(i, 0x5000_0001 + i, i as i64);
            repo.add(&pel).unwrap();
        }
        repo.prune_if_needed(&[isolated_id]).unwrap();
        assert!(repo.find(LogId::from_pel_id(isolated_id)).is_some());
    }

    #[test]
    fn external_deletion_is_reconciled() {
        let dir = tempdir().unwrap();
        let repo =
            Repository::new(dir.path().join("logs"), dir.path().join("logs/archive"), 1024 * 1024, 3000)
                .unwrap();
        let pel = build_test_pel(7, 0x5000_0001, 0);
        let entry = repo.add(&pel).unwrap();
        let filename = entry.path.file_name().unwrap().to_string_lossy().to_string();

        let removed = repo.reconcile_external_deletions(&[filename]);
        assert_eq!(removed, vec![7]);
        assert!(repo.find(LogId::from_pel_id(0x5000_0001)).is_none());
    }
}
