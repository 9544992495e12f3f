use crate::{SessionState, X25519PublicKey};
use std::collections::VecDeque;

/// Per-address container of the current session state and a bounded archive of
/// superseded ones.
///
/// Archived states stay decryptable so messages sent under an older handshake still
/// arrive, but new messages are only ever encrypted with the current state.
#[derive(Clone, Default)]
pub struct SessionRecord {
    pub(crate) current_state: Option<SessionState>,
    // Newest first.
    pub(crate) previous_states: VecDeque<SessionState>,
    pub(crate) is_fresh: bool,
    pub(crate) user_record: Vec<u8>,
}

impl SessionRecord {
    /// An empty record that has never been persisted.
    pub fn new_fresh() -> Self {
        Self {
            is_fresh: true,
            ..Self::default()
        }
    }

    /// A record holding `state` as its current state.
    pub fn new(state: SessionState) -> Self {
        Self {
            current_state: Some(state),
            ..Self::default()
        }
    }

    /// Whether the record was created locally rather than loaded from storage.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh
    }

    /// State used for encryption.
    pub fn session_state(&self) -> Option<&SessionState> {
        self.current_state.as_ref()
    }

    pub(crate) fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current_state.as_mut()
    }

    /// Archived states, newest first.
    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous_states.iter()
    }

    /// Whether the current or an archived state was created by the handshake identified by
    /// `version` and `base_key`.
    pub fn has_session_state(&self, version: u8, base_key: &X25519PublicKey) -> bool {
        self.current_state
            .iter()
            .chain(self.previous_states.iter())
            .any(|state| state.session_version() == version && state.base_key() == *base_key)
    }

    /// Archives the current state (if any) and installs `state` in its place.
    ///
    /// The archive never holds more than `max_previous_states`; the oldest states are dropped.
    pub fn promote_state(&mut self, state: SessionState, max_previous_states: usize) {
        self.archive_current_state(max_previous_states);
        self.current_state = Some(state);
    }

    /// Moves the current state into the archive, leaving the record without a current state.
    pub fn archive_current_state(&mut self, max_previous_states: usize) {
        if let Some(current) = self.current_state.take() {
            self.previous_states.push_front(current);
        }
        self.previous_states.truncate(max_previous_states);
    }

    /// Opaque host data persisted along with the record.
    pub fn user_record(&self) -> &[u8] {
        &self.user_record
    }

    /// Replaces the opaque host data.
    pub fn set_user_record(&mut self, user_record: Vec<u8>) {
        self.user_record = user_record;
    }
}
