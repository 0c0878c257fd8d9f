//! `EventLogSink`: the interface shape of the companion event-log entry
//! object the Manager syncs PEL attributes back into.

use std::sync::Mutex;

use crate::bcd::BcdTime;
use crate::error::Result;

/// The subset of the event-log entry's fields a successful
/// `createPEL`/`addPEL` writes back.
#[derive(Debug, Clone, PartialEq)]
pub struct PelAttributes {
    pub path: String,
    pub severity: u8,
    pub service_provider_notify: bool,
    pub event_id: String,
    pub resolution: String,
    pub hidden: bool,
    pub subsystem_name: String,
    pub plid: u32,
    pub deconfig: bool,
    pub guard: bool,
    pub creation_time: BcdTime,
}

/// Seam to the event-log collaborator.
pub trait EventLogSink: Send + Sync {
    fn sync_pel_attributes(&self, obmc_id: u32, attrs: &PelAttributes) -> Result<()>;

    /// Deletes the originating event-log entry.
    fn delete(&self, obmc_id: u32) -> Result<()>;

    /// Raises a fresh system-level error event, used when a PEL could
    /// not be constructed at all.
    fn create_system_error(&self, name: &str, message: &str) -> Result<()>;

    /// Quiesces the system.
    fn quiesce(&self) -> Result<()>;
}

/// Stand-in for the event-log collaborator when this daemon runs
/// standalone. Every operation
/// is a structured log line rather than a write into a real companion
/// entry; nothing here is persisted because there is no bus object to
/// persist it into.
#[derive(Debug, Default)]
pub struct LoggingEventLogSink;

impl EventLogSink for LoggingEventLogSink {
    fn sync_pel_attributes(&self, obmc_id: u32, attrs: &PelAttributes) -> Result<()> {
        tracing::info!(obmc_id, event_id = %attrs.event_id, severity = attrs.severity, "would sync PEL attributes to event-log entry");
        Ok(())
    }

    fn delete(&self, obmc_id: u32) -> Result<()> {
        tracing::info!(obmc_id, "would delete event-log entry");
        Ok(())
    }

    fn create_system_error(&self, name: &str, message: &str) -> Result<()> {
        tracing::warn!(name, message, "would raise system error event");
        Ok(())
    }

    fn quiesce(&self) -> Result<()> {
        tracing::error!("would quiesce system (critical termination + HW callout + quiesce-on-error)");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    SyncAttributes(u32, PelAttributes),
    Delete(u32),
    SystemError(String, String),
    Quiesce,
}

/// Records every call for assertions in Manager tests.
#[derive(Default)]
pub struct MockEventLogSink {
    pub calls: Mutex<Vec<MockCall>>,
}

impl EventLogSink for MockEventLogSink {
    fn sync_pel_attributes(&self, obmc_id: u32, attrs: &PelAttributes) -> Result<()> {
        self.calls.lock().expect("lock poisoned").push(MockCall::SyncAttributes(obmc_id, attrs.clone()));
        Ok(())
    }

    fn delete(&self, obmc_id: u32) -> Result<()> {
        self.calls.lock().expect("lock poisoned").push(MockCall::Delete(obmc_id));
        Ok(())
    }

    fn create_system_error(&self, name: &str, message: &str) -> Result<()> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(MockCall::SystemError(name.to_string(), message.to_string()));
        Ok(())
    }

    fn quiesce(&self) -> Result<()> {
        self.calls.lock().expect("lock poisoned").push(MockCall::Quiesce);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_calls_in_order() {
        let sink = MockEventLogSink::default();
        sink.delete(5).unwrap();
        sink.quiesce().unwrap();
        let calls = sink.calls.lock().unwrap();
        assert_eq!(*calls, vec![MockCall::Delete(5), MockCall::Quiesce]);
    }
}
