//! Extension hook registry.
//!
//! A real phosphor-logging extension (a guard record writer, a
//! hardware-isolation tracker, ...) lives outside this crate's scope;
//! what's modeled here is the seam a `Manager` calls through, and the
//! registration API those extensions would use.

use std::sync::RwLock;

use crate::pel::Pel;
use crate::repository::{Entry, LogId};

type StartupHook = Box<dyn Fn() + Send + Sync>;
type PostCreateHook = Box<dyn Fn(&Entry, &Pel) + Send + Sync>;
type PostDeleteHook = Box<dyn Fn(&Entry) + Send + Sync>;
type DeleteProhibitionQuery = Box<dyn Fn(LogId) -> bool + Send + Sync>;
type ListIsolatedLogIdsHook = Box<dyn Fn() -> Vec<u32> + Send + Sync>;

/// Registered hooks plus the one daemon-wide behavior flag they can
/// influence.
#[derive(Default)]
pub struct ExtensionRegistry {
    startup: RwLock<Vec<StartupHook>>,
    post_create: RwLock<Vec<PostCreateHook>>,
    post_delete: RwLock<Vec<PostDeleteHook>>,
    delete_prohibition: RwLock<Vec<DeleteProhibitionQuery>>,
    list_isolated: RwLock<Vec<ListIsolatedLogIdsHook>>,
    disable_default_log_caps: RwLock<bool>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_startup(&self, hook: StartupHook) {
        self.startup.write().expect("lock poisoned").push(hook);
    }

    pub fn register_post_create(&self, hook: PostCreateHook) {
        self.post_create.write().expect("lock poisoned").push(hook);
    }

    pub fn register_post_delete(&self, hook: PostDeleteHook) {
        self.post_delete.write().expect("lock poisoned").push(hook);
    }

    pub fn register_delete_prohibition_query(&self, hook: DeleteProhibitionQuery) {
        self.delete_prohibition.write().expect("lock poisoned").push(hook);
    }

    pub fn register_list_isolated_log_ids(&self, hook: ListIsolatedLogIdsHook) {
        self.list_isolated.write().expect("lock poisoned").push(hook);
    }

    /// An extension may ask the daemon to stop applying its own
    /// capacity-based pruning, presumably because the extension tracks
    /// retention (e.g. hardware-isolation lifetime) itself.
    pub fn set_disable_default_log_caps(&self, disabled: bool) {
        *self.disable_default_log_caps.write().expect("lock poisoned") = disabled;
    }

    pub fn default_log_caps_disabled(&self) -> bool {
        *self.disable_default_log_caps.read().expect("lock poisoned")
    }

    pub fn run_startup(&self) {
        for hook in self.startup.read().expect("lock poisoned").iter() {
            hook();
        }
    }

    pub fn run_post_create(&self, entry: &Entry, pel: &Pel) {
        for hook in self.post_create.read().expect("lock poisoned").iter() {
            hook(entry, pel);
        }
    }

    pub fn run_post_delete(&self, entry: &Entry) {
        for hook in self.post_delete.read().expect("lock poisoned").iter() {
            hook(entry);
        }
    }

    /// Deletion of a PEL is prohibited if ANY registered query answers
    /// `true` (e.g. "isolation is still using this log").
    pub fn deletion_prohibited(&self, id: LogId) -> bool {
        self.delete_prohibition.read().expect("lock poisoned").iter().any(|q| q(id))
    }

    /// Union of every registered extension's isolated-id set, used by
    /// the repository's pruning pass to exclude ids in active use.
    pub fn list_isolated_log_ids(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        for hook in self.list_isolated.read().expect("lock poisoned").iter() {
            ids.extend(hook());
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Test helper: drops every registration and resets the flag, so
    /// tests that build their own registry never see another test's
    /// leftover hooks. Only meaningful because registration here is
    /// explicit rather than global - there is nothing process-wide to
    /// reset.
    #[cfg(test)]
    pub fn clear(&self) {
        self.startup.write().expect("lock poisoned").clear();
        self.post_create.write().expect("lock poisoned").clear();
        self.post_delete.write().expect("lock poisoned").clear();
        self.delete_prohibition.write().expect("lock poisoned").clear();
        self.list_isolated.write().expect("lock poisoned").clear();
        *self.disable_default_log_caps.write().expect("lock poisoned") = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn startup_hooks_all_run_in_registration_order() {
        let registry = ExtensionRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        registry.register_startup(Box::new(move || o1.lock().unwrap().push(1)));
        registry.register_startup(Box::new(move || o2.lock().unwrap().push(2)));
        registry.run_startup();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn deletion_prohibited_if_any_query_says_so() {
        let registry = ExtensionRegistry::new();
        registry.register_delete_prohibition_query(Box::new(|_id| false));
        registry.register_delete_prohibition_query(Box::new(|id| id.pel_id == Some(0x5000_0001)));
        assert!(registry.deletion_prohibited(LogId::from_pel_id(0x5000_0001)));
        assert!(!registry.deletion_prohibited(LogId::from_pel_id(0x5000_0002)));
    }

    #[test]
    fn list_isolated_log_ids_is_deduplicated_union() {
        let registry = ExtensionRegistry::new();
        registry.register_list_isolated_log_ids(Box::new(|| vec![1, 2]));
        registry.register_list_isolated_log_ids(Box::new(|| vec![2, 3]));
        assert_eq!(registry.list_isolated_log_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn default_log_caps_flag_round_trips() {
        let registry = ExtensionRegistry::new();
        assert!(!registry.default_log_caps_disabled());
        registry.set_disable_default_log_caps(true);
        assert!(registry.default_log_caps_disabled());
    }

    #[test]
    fn clear_resets_every_hook_list_and_flag() {
        let registry = ExtensionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        registry.register_startup(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        registry.set_disable_default_log_caps(true);

        registry.clear();
        registry.run_startup();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!registry.default_log_caps_disabled());
    }
}
