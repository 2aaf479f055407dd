//! Per-form session state: dirty tracking, undo history, crash recovery and
//! a single optimistic transaction.
//!
//! The manager owns the live form values. Hosts feed it edits and lifecycle
//! events and call [`FormHistoryManager::tick`] from their timer loop so the
//! debounced dirty check can run.

use catalog_core::{Clock, Snapshot, SnapshotId};
use catalog_storage::{KeyValueStore, RecoveryChannel};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::debounce::Debounce;
use crate::error::EngineError;
use crate::history::History;

pub const PAGE_HIDDEN_LABEL: &str = "Auto-saved when page was hidden";
pub const UNLOAD_LABEL: &str = "Auto-saved before unload";
pub const NAVIGATION_LABEL: &str = "Saved before leaving";
pub const UNDONE_EDITS_LABEL: &str = "Edits before undo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    pub debounce_ms: u64,
    pub max_history: usize,
    /// Write saved states through to the recovery store.
    pub persist: bool,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_history: 10,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormStatus {
    Clean,
    DirtyUnsaved,
    /// A submit is in flight.
    DirtyPendingSave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Undo,
    Redo,
}

impl Shortcut {
    /// Map a key press to a history shortcut. `ctrl_or_meta` is Ctrl on
    /// Linux/Windows and Cmd on macOS.
    pub fn from_keys(key: &str, ctrl_or_meta: bool, shift: bool) -> Option<Self> {
        if !ctrl_or_meta {
            return None;
        }
        match (key.to_ascii_lowercase().as_str(), shift) {
            ("z", false) => Some(Self::Undo),
            ("z", true) | ("y", false) => Some(Self::Redo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    PageHidden,
    NavigateAway,
    BeforeUnload,
    Shortcut(Shortcut),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Nothing to do.
    Ignored,
    /// Navigation or unload may go ahead.
    Proceed,
    AutoSaved(SnapshotId),
    /// Navigation is on hold until [`FormHistoryManager::resolve_navigation`].
    NavigationBlocked,
    /// State was saved; the host should show its leave-page prompt.
    ConfirmUnload(SnapshotId),
    Undone,
    Redone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationChoice {
    Save,
    Discard,
    Cancel,
}

/// One row of the history panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: SnapshotId,
    pub description: Option<String>,
    pub taken_at_ms: u64,
    pub is_current: bool,
}

struct PendingUpdate<T> {
    snapshot: Snapshot<T>,
    revert: Box<dyn FnOnce()>,
}

pub struct FormHistoryManager<T, S, C> {
    session_id: String,
    values: T,
    saved: Snapshot<T>,
    status: FormStatus,
    history: History<T>,
    debounce: Debounce,
    recovery: RecoveryChannel<S>,
    recovered: Option<Snapshot<T>>,
    pending: Option<PendingUpdate<T>>,
    navigation_blocked: bool,
    config: FormConfig,
    clock: C,
}

impl<T, S, C> FormHistoryManager<T, S, C>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned,
    S: KeyValueStore,
    C: Clock,
{
    /// Mount a form with `defaults` as its saved values.
    ///
    /// A persisted state that differs from `defaults` is kept aside as
    /// recoverable; one that equals them is cleared. Store failures are
    /// logged and the form mounts clean.
    pub fn mount(
        session_id: impl Into<String>,
        defaults: T,
        recovery: RecoveryChannel<S>,
        clock: C,
        config: FormConfig,
    ) -> Self {
        let session_id = session_id.into();
        let saved = Snapshot::capture_at(&defaults, Some("Initial values"), &clock);
        let mut form = Self {
            session_id,
            values: defaults,
            saved,
            status: FormStatus::Clean,
            history: History::new(config.max_history),
            debounce: Debounce::new(config.debounce_ms),
            recovery,
            recovered: None,
            pending: None,
            navigation_blocked: false,
            config,
            clock,
        };
        form.load_recovery();
        form
    }

    fn load_recovery(&mut self) {
        match self.recovery.load::<T>(&self.session_id) {
            Ok(Some(snapshot)) if snapshot.state() != &self.values => {
                tracing::debug!(session = %self.session_id, "found recoverable form state");
                self.recovered = Some(snapshot);
            }
            Ok(Some(_)) => {
                if let Err(err) = self.recovery.clear(&self.session_id) {
                    tracing::warn!(session = %self.session_id, error = %err, "failed to clear recovery state");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(session = %self.session_id, error = %err, "failed to load recovery state");
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn values(&self) -> &T {
        &self.values
    }

    pub fn saved_values(&self) -> &T {
        self.saved.state()
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn recovery(&self) -> &RecoveryChannel<S> {
        &self.recovery
    }

    // ========================================================================
    // Editing and dirty tracking
    // ========================================================================

    /// Change the live values. The dirty check runs once the debounce
    /// window passes without further edits.
    pub fn edit(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.values);
        self.debounce.schedule(self.clock.now_ms());
    }

    pub fn set_values(&mut self, values: T) {
        self.edit(|v| *v = values);
    }

    /// Run the dirty check if its debounce deadline has passed. Returns
    /// whether it ran.
    pub fn tick(&mut self) -> bool {
        if self.debounce.fire(self.clock.now_ms()) {
            self.check_dirty();
            true
        } else {
            false
        }
    }

    /// Run a pending dirty check now.
    pub fn flush_dirty_check(&mut self) {
        if self.debounce.cancel() {
            self.check_dirty();
        }
    }

    fn check_dirty(&mut self) {
        let differs = &self.values != self.saved.state();
        self.status = match (self.status, differs) {
            (FormStatus::Clean, true) => FormStatus::DirtyUnsaved,
            (FormStatus::DirtyUnsaved, false) => FormStatus::Clean,
            (status, _) => status,
        };
    }

    pub fn status(&self) -> FormStatus {
        self.status
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.status != FormStatus::Clean
    }

    pub fn is_dirty_check_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    // ========================================================================
    // Save lifecycle
    // ========================================================================

    /// Record the current values as saved and drop any persisted recovery
    /// state.
    pub fn mark_saved(&mut self) -> Result<(), EngineError> {
        self.saved = Snapshot::capture_at(&self.values, Some("Saved"), &self.clock);
        self.status = FormStatus::Clean;
        self.debounce.cancel();
        self.navigation_blocked = false;
        self.recovery.clear(&self.session_id)?;
        Ok(())
    }

    /// Forget the dirty flag. Values are left alone.
    pub fn reset_unsaved_changes(&mut self) {
        self.debounce.cancel();
        self.status = FormStatus::Clean;
    }

    pub fn begin_submit(&mut self) {
        self.debounce.cancel();
        self.status = FormStatus::DirtyPendingSave;
    }

    pub fn submit_failed(&mut self) {
        if self.status == FormStatus::DirtyPendingSave {
            self.status = FormStatus::DirtyUnsaved;
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Append the current values to history and persist them for recovery.
    pub fn save_state(&mut self, description: Option<&str>) -> Result<SnapshotId, EngineError> {
        let snapshot = Snapshot::capture_at(&self.values, description, &self.clock);
        if self.config.persist {
            self.recovery.save(&self.session_id, &snapshot)?;
        }
        let id = snapshot.id();
        self.history.push(snapshot);
        tracing::debug!(session = %self.session_id, %id, entries = self.history.len(), "saved form state");
        Ok(id)
    }

    /// Step back one history entry. Edits made since the current entry are
    /// first recorded as the redo tip, so a following redo brings them back.
    pub fn undo(&mut self) -> bool {
        if self.has_unrecorded_edits() {
            let tip = Snapshot::capture_at(&self.values, Some(UNDONE_EDITS_LABEL), &self.clock);
            self.history.push(tip);
        }
        let Some(snapshot) = self.history.undo() else {
            return false;
        };
        self.values = snapshot.restore();
        self.debounce.schedule(self.clock.now_ms());
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.history.redo() else {
            return false;
        };
        self.values = snapshot.restore();
        self.debounce.schedule(self.clock.now_ms());
        true
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo() || self.has_unrecorded_edits()
    }

    fn has_unrecorded_edits(&self) -> bool {
        self.history
            .current()
            .is_some_and(|current| current.state() != &self.values)
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        let current = self.history.current_index();
        self.history
            .entries()
            .enumerate()
            .map(|(i, s)| HistoryEntry {
                id: s.id(),
                description: s.description().map(str::to_string),
                taken_at_ms: s.taken_at_ms(),
                is_current: current == Some(i),
            })
            .collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    pub fn is_recovered(&self) -> bool {
        self.recovered.is_some()
    }

    pub fn recovered_state(&self) -> Option<&T> {
        self.recovered.as_ref().map(Snapshot::state)
    }

    /// Replace the live values with the recovered state. The persisted copy
    /// stays until the form is saved.
    pub fn accept_recovery(&mut self) -> bool {
        let Some(snapshot) = self.recovered.take() else {
            return false;
        };
        self.values = snapshot.restore();
        self.history.push(snapshot);
        self.debounce.cancel();
        self.check_dirty();
        true
    }

    pub fn discard_recovery(&mut self) -> Result<(), EngineError> {
        self.recovered = None;
        self.recovery.clear(&self.session_id)?;
        Ok(())
    }

    // ========================================================================
    // Optimistic transaction
    // ========================================================================

    /// Apply `update` to the live values, remembering how to undo it.
    /// `revert` runs on rollback for side effects outside the form.
    pub fn create_optimistic_update(
        &mut self,
        update: impl FnOnce(&mut T),
        revert: impl FnOnce() + 'static,
        description: Option<&str>,
    ) -> Result<SnapshotId, EngineError> {
        if self.pending.is_some() {
            return Err(EngineError::TransactionPending);
        }
        let snapshot = Snapshot::capture_at(&self.values, description, &self.clock);
        let id = snapshot.id();
        update(&mut self.values);
        self.pending = Some(PendingUpdate {
            snapshot,
            revert: Box::new(revert),
        });
        self.debounce.schedule(self.clock.now_ms());
        Ok(id)
    }

    pub fn has_pending_transaction(&self) -> bool {
        self.pending.is_some()
    }

    pub fn commit_optimistic(&mut self) -> Result<(), EngineError> {
        self.pending.take().ok_or(EngineError::NoPendingTransaction)?;
        self.mark_saved()
    }

    pub fn rollback_optimistic(&mut self) -> Result<(), EngineError> {
        let pending = self.pending.take().ok_or(EngineError::NoPendingTransaction)?;
        tracing::debug!(
            session = %self.session_id,
            description = ?pending.snapshot.description(),
            "rolling back optimistic form update"
        );
        self.values = pending.snapshot.into_state();
        (pending.revert)();
        self.debounce.cancel();
        self.check_dirty();
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn handle(&mut self, event: LifecycleEvent) -> Result<LifecycleAction, EngineError> {
        match event {
            LifecycleEvent::PageHidden => {
                self.flush_dirty_check();
                if !self.has_unsaved_changes() {
                    return Ok(LifecycleAction::Ignored);
                }
                self.save_state(Some(PAGE_HIDDEN_LABEL))
                    .map(LifecycleAction::AutoSaved)
            }
            LifecycleEvent::NavigateAway => {
                self.flush_dirty_check();
                if !self.has_unsaved_changes() {
                    return Ok(LifecycleAction::Proceed);
                }
                self.navigation_blocked = true;
                Ok(LifecycleAction::NavigationBlocked)
            }
            LifecycleEvent::BeforeUnload => {
                self.flush_dirty_check();
                if !self.has_unsaved_changes() {
                    return Ok(LifecycleAction::Proceed);
                }
                self.save_state(Some(UNLOAD_LABEL))
                    .map(LifecycleAction::ConfirmUnload)
            }
            LifecycleEvent::Shortcut(Shortcut::Undo) => Ok(if self.undo() {
                LifecycleAction::Undone
            } else {
                LifecycleAction::Ignored
            }),
            LifecycleEvent::Shortcut(Shortcut::Redo) => Ok(if self.redo() {
                LifecycleAction::Redone
            } else {
                LifecycleAction::Ignored
            }),
        }
    }

    pub fn is_navigation_blocked(&self) -> bool {
        self.navigation_blocked
    }

    /// Answer a blocked navigation. Returns whether the host may navigate.
    ///
    /// `Save` persists the values for recovery, `Discard` restores the saved
    /// values and drops persisted state, `Cancel` stays on the page.
    pub fn resolve_navigation(&mut self, choice: NavigationChoice) -> Result<bool, EngineError> {
        if !self.navigation_blocked {
            return Ok(true);
        }
        match choice {
            NavigationChoice::Save => {
                self.save_state(Some(NAVIGATION_LABEL))?;
            }
            NavigationChoice::Discard => {
                self.values = self.saved.restore();
                self.debounce.cancel();
                self.status = FormStatus::Clean;
                self.recovery.clear(&self.session_id)?;
            }
            NavigationChoice::Cancel => {
                self.navigation_blocked = false;
                return Ok(false);
            }
        }
        self.navigation_blocked = false;
        Ok(true)
    }

    /// Release the debounce timer. Later ticks do nothing until the next
    /// edit.
    pub fn teardown(&mut self) {
        if self.debounce.cancel() {
            tracing::debug!(session = %self.session_id, "dropped pending dirty check");
        }
    }
}
