use log::debug;
use serde::Serialize;
use tokio::sync::watch;

use super::error::VaultError;
use crate::model::*;

/// Everything the UI renders about the vault for one session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VaultState {
    pub snapshot: Option<Snapshot>,
    pub is_busy: bool,
    #[serde(skip)]
    pub last_error: Option<VaultError>,
    pub phase: Option<OperationPhase>,
}

/// Session-owned cache of the last fetched snapshot plus in-flight status.
///
/// State is published through a watch channel so any number of views can
/// subscribe; only this crate's components mutate it.
pub struct VaultStateStore {
    state: watch::Sender<VaultState>,
}

impl VaultStateStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(VaultState::default());
        Self { state }
    }

    pub fn state(&self) -> VaultState {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.state.borrow().snapshot.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state.borrow().is_busy
    }

    pub fn last_error(&self) -> Option<VaultError> {
        self.state.borrow().last_error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VaultState> {
        self.state.subscribe()
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.last_error.take().is_some());
    }

    /// Marks the store busy, or returns `Busy` if something else already holds it.
    pub(crate) fn try_begin(&self) -> Result<BusyGuard<'_>, VaultError> {
        let acquired = self.state.send_if_modified(|state| {
            if state.is_busy {
                false
            } else {
                state.is_busy = true;
                true
            }
        });
        if acquired {
            Ok(BusyGuard { store: self })
        } else {
            Err(VaultError::Busy)
        }
    }

    pub(crate) fn set_phase(&self, phase: OperationPhase) {
        self.state.send_modify(|state| state.phase = Some(phase));
    }

    /// Replaces the whole snapshot triple and clears the last error.
    pub(crate) fn commit(&self, snapshot: Snapshot) {
        debug!(
            "💾 Committing snapshot with {} strategies",
            snapshot.strategies.len()
        );
        self.state.send_modify(|state| {
            state.snapshot = Some(snapshot);
            state.last_error = None;
        });
    }

    pub(crate) fn record_error(&self, error: VaultError) {
        self.state.send_modify(|state| state.last_error = Some(error));
    }

    fn finish(&self) {
        self.state.send_modify(|state| {
            state.is_busy = false;
            state.phase = None;
        });
    }
}

impl Default for VaultStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds `is_busy` for its lifetime; dropping it releases the flag on every exit path.
pub(crate) struct BusyGuard<'a> {
    store: &'a VaultStateStore,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.store.finish();
    }
}
