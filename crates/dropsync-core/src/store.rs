//! Single-owner store for the current device model

use std::sync::Arc;
use tokio::sync::watch;

use crate::device::DeviceModel;

/// Holds the current device model, or none before the first load.
///
/// The store has exactly one writer (the sync reactor); readers take
/// snapshots via [`DeviceStore::get`] or follow changes through
/// [`DeviceStore::subscribe`]. Last write wins; there is no merge.
#[derive(Debug)]
pub struct DeviceStore {
    tx: watch::Sender<Option<Arc<DeviceModel>>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Snapshot of the current device
    pub fn get(&self) -> Option<Arc<DeviceModel>> {
        self.tx.borrow().clone()
    }

    /// Replace the current device. Returns whether the committed value
    /// differs from the previous one; setting an identical model
    /// reports no change.
    pub fn set(&self, model: Option<Arc<DeviceModel>>) -> bool {
        let changed = {
            let current = self.tx.borrow();
            match (current.as_deref(), model.as_deref()) {
                (None, None) => false,
                (Some(old), Some(new)) => old != new,
                _ => true,
            }
        };
        // Notify on every committed set, changed or not
        self.tx.send_replace(model);
        changed
    }

    /// Follow committed sets; receivers see the latest value only
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DeviceModel>>> {
        self.tx.subscribe()
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}
