//! Host callback: receives the runtime's domain-manager notification.
//!
//! When the extension assembly declares a domain manager, the runtime reports
//! the manager object for each new domain through the host control. The
//! callback keeps the most recent notification so the bridge can use that
//! object as its entry instance instead of instantiating the entry type.

use parking_lot::Mutex;
use std::sync::Arc;

/// Captured `(domain id, manager object)` notification. Clones share the slot.
pub struct HostCallback<T> {
    slot: Arc<Mutex<Option<(u32, T)>>>,
}

impl<T> HostCallback<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Record the manager the runtime created for `domain_id`. Later calls replace earlier ones.
    pub fn record(&self, domain_id: u32, manager: T) {
        tracing::debug!(domain_id, "Host callback captured domain manager");
        *self.slot.lock() = Some((domain_id, manager));
    }

    /// Take the captured manager, leaving the slot empty.
    pub fn take(&self) -> Option<(u32, T)> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T> Clone for HostCallback<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for HostCallback<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for HostCallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCallback")
            .field("captured", &!self.is_empty())
            .finish()
    }
}
