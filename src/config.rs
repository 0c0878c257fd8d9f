//! Daemon configuration, loaded from environment variables with
//! sensible defaults for standalone operation.

use serde::Serialize;
use utoipa::ToSchema;

pub const DEFAULT_MAX_REPO_SIZE: u64 = 20 * 1024 * 1024; // 20 MiB
pub const DEFAULT_MAX_NUM_PELS: usize = 3000;
pub const DEFAULT_MAX_PEL_SIZE: usize = 16 * 1024; // 16 KiB
pub const DEFAULT_HOST_RESPONSE_TIMEOUT_SECS: u64 = 10;

/// Shipped message-registry location.
pub const DEFAULT_REGISTRY_PATH: &str = "/usr/share/phosphor-logging/message_registry.json";
/// Overrides [`DEFAULT_REGISTRY_PATH`] when present.
pub const DEBUG_REGISTRY_PATH: &str = "/etc/phosphor-logging/message_registry.json";

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Base directory for PEL storage and the PEL-id file
    /// (`EXTENSION_PERSIST_DIR`).
    pub extension_persist_dir: String,

    /// Base directory for companion event-log persistence
    /// (`ERRLOG_PERSIST_PATH`).
    pub errlog_persist_path: String,

    /// Compile-time-equivalent feature flag for hostboot FFDC handling
    /// (`PEL_ENABLE_PHAL`).
    pub phal_enabled: bool,

    /// Disables the host notifier entirely (`DONT_SEND_PELS_TO_HOST`).
    pub dont_send_pels_to_host: bool,

    /// Maximum total bytes the repository may hold before pruning.
    pub max_repo_size: u64,

    /// Maximum number of PEL entries the repository may hold.
    pub max_num_pels: usize,

    /// Maximum flattened size of a single PEL.
    pub max_pel_size: usize,

    /// Host-notifier response timeout, in seconds.
    pub host_response_timeout_secs: u64,

    /// HTTP bind address for the bus object surface.
    pub bind_addr: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            extension_persist_dir: "/var/lib/phosphor-logging/pels".to_string(),
            errlog_persist_path: "/var/lib/phosphor-logging/errlog".to_string(),
            phal_enabled: false,
            dont_send_pels_to_host: false,
            max_repo_size: DEFAULT_MAX_REPO_SIZE,
            max_num_pels: DEFAULT_MAX_NUM_PELS,
            max_pel_size: DEFAULT_MAX_PEL_SIZE,
            host_response_timeout_secs: DEFAULT_HOST_RESPONSE_TIMEOUT_SECS,
            bind_addr: "127.0.0.1:8851".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Build configuration from the environment, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("EXTENSION_PERSIST_DIR") {
            config.extension_persist_dir = dir;
        }

        if let Ok(dir) = std::env::var("ERRLOG_PERSIST_PATH") {
            config.errlog_persist_path = dir;
        }

        if let Ok(v) = std::env::var("PEL_ENABLE_PHAL") {
            config.phal_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }

        if let Ok(v) = std::env::var("DONT_SEND_PELS_TO_HOST") {
            config.dont_send_pels_to_host = v == "1" || v.eq_ignore_ascii_case("true");
        }

        if let Ok(v) = std::env::var("PEL_MAX_REPO_SIZE") {
            if let Ok(val) = v.parse() {
                config.max_repo_size = val;
            }
        }

        if let Ok(v) = std::env::var("PEL_MAX_NUM_PELS") {
            if let Ok(val) = v.parse() {
                config.max_num_pels = val;
            }
        }

        if let Ok(v) = std::env::var("PEL_BIND") {
            config.bind_addr = v;
        }

        config
    }

    pub fn log_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.extension_persist_dir).join("logs")
    }

    pub fn archive_path(&self) -> std::path::PathBuf {
        self.log_path().join("archive")
    }

    pub fn bad_pel_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.extension_persist_dir).join("badPEL")
    }

    pub fn pel_id_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.extension_persist_dir).join("pelid")
    }

    pub fn device_callouts_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.extension_persist_dir).join("device_callouts.json")
    }

    /// Resolves the message-registry path: `PEL_MESSAGE_REGISTRY` env
    /// override, else the debug path if it exists on disk, else the
    /// shipped default.
    pub fn registry_path(&self) -> std::path::PathBuf {
        if let Ok(p) = std::env::var("PEL_MESSAGE_REGISTRY") {
            return std::path::PathBuf::from(p);
        }
        let debug = std::path::Path::new(DEBUG_REGISTRY_PATH);
        if debug.exists() {
            return debug.to_path_buf();
        }
        std::path::PathBuf::from(DEFAULT_REGISTRY_PATH)
    }
}
