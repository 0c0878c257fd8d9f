//! Asynchronous host-notification protocol: single-in-flight request,
//! instance-id allocation, timeout, and host-full/bad-PEL rejection
//! handling.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::error::{PelError, Result};

const INSTANCE_ID_POOL_SIZE: u8 = 0xFF;

/// Process-wide instance-id resource . Allocation is a plain bitset guarded by a mutex; there
/// is exactly one pool per daemon.
pub struct InstanceIdPool {
    used: std::sync::Mutex<HashSet<u8>>,
}

impl Default for InstanceIdPool {
    fn default() -> Self {
        Self { used: std::sync::Mutex::new(HashSet::new()) }
    }
}

impl InstanceIdPool {
    pub fn allocate(&self) -> Option<u8> {
        let mut used = self.used.lock().expect("lock poisoned");
        for id in 1..=INSTANCE_ID_POOL_SIZE {
            if used.insert(id) {
                return Some(id);
            }
        }
        None
    }

    pub fn free(&self, id: u8) {
        self.used.lock().expect("lock poisoned").remove(&id);
    }
}

/// The wire-level transport the notifier speaks over - opaque here
/// since the actual message-bus transport is out of scope;
/// only the shape the notifier needs is specified.
pub trait HostTransport: Send + Sync {
    /// Encodes and submits a "new file available" message
    /// (type = PEL-file, instance id, pel id, size).
    fn send_new_file_available(&self, instance_id: u8, pel_id: u32, size: u64) -> Result<()>;
}

/// Stand-in transport when this daemon runs without a real host message
/// bus.
/// The message is logged rather than sent; since nothing ever replies,
/// a command submitted through it runs to its response timeout unless
/// `deliver_response` is driven externally (e.g. by a test harness or a
/// real transport wired in later).
#[derive(Debug, Default)]
pub struct LoggingHostTransport;

impl HostTransport for LoggingHostTransport {
    fn send_new_file_available(&self, instance_id: u8, pel_id: u32, size: u64) -> Result<()> {
        tracing::info!(instance_id, pel_id, size, "would notify host of new PEL file");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BadPel,
    HostFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostResponse {
    Success,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifierState {
    Idle,
    AllocatingInstance,
    Sending,
    AwaitingResponse { instance_id: u8 },
    Done,
    Failed,
}

struct Inner {
    state: NotifierState,
    response_tx: Option<oneshot::Sender<HostResponse>>,
}

/// State machine: `Idle -> AllocatingInstance -> Sending ->
/// AwaitingResponse -> Done | Failed`. Only one command is ever in
/// flight.
pub struct HostNotifier {
    transport: Arc<dyn HostTransport>,
    instance_pool: Arc<InstanceIdPool>,
    inner: Mutex<Inner>,
    response_timeout: Duration,
    disabled: bool,
}

impl HostNotifier {
    pub fn new(transport: Arc<dyn HostTransport>, instance_pool: Arc<InstanceIdPool>, response_timeout: Duration, disabled: bool) -> Self {
        Self {
            transport,
            instance_pool,
            inner: Mutex::new(Inner { state: NotifierState::Idle, response_tx: None }),
            response_timeout,
            disabled,
        }
    }

    /// Reserves an instance id, opens the transport, submits the
    /// message, arms the response timer. Returns once a response
    /// arrives, the timer expires, or `cancel_cmd` fires.
    pub async fn send_new_log_cmd(&self, pel_id: u32, size: u64) -> Result<()> {
        if self.disabled {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        let instance_id = {
            let mut inner = self.inner.lock().await;
            if inner.state != NotifierState::Idle {
                return Err(PelError::Internal(
                    "host notifier already has a command in flight".to_string(),
                ));
            }
            inner.state = NotifierState::AllocatingInstance;
            let id = self.instance_pool.allocate().ok_or_else(|| {
                inner.state = NotifierState::Idle;
                PelError::Internal("no free host-notifier instance id".to_string())
            })?;

            inner.state = NotifierState::Sending;
            if let Err(e) = self.transport.send_new_file_available(id, pel_id, size) {
                self.instance_pool.free(id);
                inner.state = NotifierState::Failed;
                return Err(e);
            }

            inner.state = NotifierState::AwaitingResponse { instance_id: id };
            inner.response_tx = Some(tx);
            id
        };

        let result = tokio::time::timeout(self.response_timeout, rx).await;
        let mut inner = self.inner.lock().await;
        inner.response_tx = None;

        match result {
            Ok(Ok(HostResponse::Success)) => {
                self.instance_pool.free(instance_id);
                inner.state = NotifierState::Done;
                Ok(())
            }
            Ok(Ok(HostResponse::Rejected(reason))) => {
                self.instance_pool.free(instance_id);
                inner.state = NotifierState::Failed;
                Err(PelError::Protocol(format!("{:?}", reason)))
            }
            Ok(Err(_)) => {
                // Sender dropped without a response; treat like cancel.
                self.instance_pool.free(instance_id);
                inner.state = NotifierState::Idle;
                Err(PelError::Internal("host notifier response channel closed".to_string()))
            }
            Err(_elapsed) => {
                // Keep the instance id held; the host never saw the reply.
                inner.state = NotifierState::Idle;
                Err(PelError::Timeout)
            }
        }
    }

    /// The instance id of the currently outstanding request, if any
    /// (used by callers that only know the PEL id and must correlate it
    /// to the notifier's single in-flight command).
    pub async fn current_instance_id(&self) -> Option<u8> {
        match self.inner.lock().await.state {
            NotifierState::AwaitingResponse { instance_id } => Some(instance_id),
            _ => None,
        }
    }

    /// Delivers a response correlated to the outstanding request. A
    /// response with a mismatched instance id (stale or looped-back) is
    /// silently ignored.
    pub async fn deliver_response(&self, instance_id: u8, response: HostResponse) {
        let mut inner = self.inner.lock().await;
        if let NotifierState::AwaitingResponse { instance_id: expected } = inner.state {
            if expected == instance_id {
                if let Some(tx) = inner.response_tx.take() {
                    let _ = tx.send(response);
                }
            }
        }
    }

    /// Synchronous and idempotent. Frees the instance id (if one was
    /// held) and leaves the notifier `Idle`.
    pub async fn cancel_cmd(&self) {
        let mut inner = self.inner.lock().await;
        if let NotifierState::AwaitingResponse { instance_id } = inner.state {
            self.instance_pool.free(instance_id);
        }
        inner.response_tx = None;
        inner.state = NotifierState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockTransport {
        fail_send: AtomicBool,
    }

    impl HostTransport for MockTransport {
        fn send_new_file_available(&self, _instance_id: u8, _pel_id: u32, _size: u64) -> Result<()> {
            if self.fail_send.load(Ordering::SeqCst) {
                Err(PelError::Internal("transport unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn notifier() -> (Arc<HostNotifier>, Arc<InstanceIdPool>) {
        let pool = Arc::new(InstanceIdPool::default());
        let transport = Arc::new(MockTransport { fail_send: AtomicBool::new(false) });
        let notifier = Arc::new(HostNotifier::new(
            transport,
            pool.clone(),
            Duration::from_millis(200),
            false,
        ));
        (notifier, pool)
    }

    #[tokio::test]
    async fn success_response_completes_the_command() {
        let (notifier, _pool) = notifier();
        let n2 = notifier.clone();
        let handle = tokio::spawn(async move { n2.send_new_log_cmd(0x5000_0001, 4096).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.deliver_response(1, HostResponse::Success).await;

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn host_full_rejection_surfaces_as_protocol_error() {
        let (notifier, _pool) = notifier();
        let n2 = notifier.clone();
        let handle = tokio::spawn(async move { n2.send_new_log_cmd(0x5000_0002, 4096).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.deliver_response(1, HostResponse::Rejected(RejectReason::HostFull)).await;

        assert!(matches!(handle.await.unwrap(), Err(PelError::Protocol(_))));
    }

    #[tokio::test]
    async fn timeout_frees_command_slot_but_keeps_instance_id_held() {
        let pool = Arc::new(InstanceIdPool::default());
        let transport = Arc::new(MockTransport { fail_send: AtomicBool::new(false) });
        let notifier =
            HostNotifier::new(transport, pool.clone(), Duration::from_millis(20), false);

        let result = notifier.send_new_log_cmd(0x5000_0003, 4096).await;
        assert!(matches!(result, Err(PelError::Timeout)));

        // A second command can now be submitted (state returned to Idle).
        let result2 = notifier.send_new_log_cmd(0x5000_0004, 4096).await;
        assert!(matches!(result2, Err(PelError::Timeout)));
    }

    #[tokio::test]
    async fn disabled_notifier_completes_immediately() {
        let pool = Arc::new(InstanceIdPool::default());
        let transport = Arc::new(MockTransport { fail_send: AtomicBool::new(false) });
        let notifier = HostNotifier::new(transport, pool, Duration::from_secs(10), true);
        assert!(notifier.send_new_log_cmd(1, 10).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_cmd_is_synchronous_and_idempotent() {
        let (notifier, pool) = notifier();
        let n2 = notifier.clone();
        let handle = tokio::spawn(async move { n2.send_new_log_cmd(0x5000_0005, 4096).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        notifier.cancel_cmd().await;
        notifier.cancel_cmd().await; // idempotent

        // The in-flight future never got a response; it will time out on
        // its own, but the instance id was already freed by cancel.
        assert_eq!(pool.allocate(), Some(1));
        let _ = handle.abort();
    }

    #[test]
    fn instance_pool_allocates_and_frees() {
        let pool = InstanceIdPool::default();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        pool.free(a);
        assert_eq!(pool.allocate(), Some(a));
    }
}
