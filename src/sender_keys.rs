use crate::{ChainKey, Error, MessageKeys};
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::collections::VecDeque;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Sender key states kept per record; adding another drops the oldest.
pub const MAX_SENDER_KEY_STATES: usize = 5;

/// Skipped message keys kept per sender key state.
pub const MAX_SENDER_MESSAGE_KEYS: usize = 2000;

/// One generation of a group sender key: a symmetric chain plus the key that signs its
/// messages.
#[derive(Clone)]
pub struct SenderKeyState {
    pub(crate) key_id: u32,
    pub(crate) chain_key: ChainKey,
    pub(crate) signing_public: VerifyingKey,
    // Only present for our own sender keys.
    pub(crate) signing_private: Option<Box<SigningKey>>,
    pub(crate) message_keys: VecDeque<MessageKeys>,
}

impl SenderKeyState {
    /// Creates a state starting at `chain_key`.
    pub fn new(
        key_id: u32,
        chain_key: ChainKey,
        signing_public: VerifyingKey,
        signing_private: Option<SigningKey>,
    ) -> Self {
        Self {
            key_id,
            chain_key,
            signing_public,
            signing_private: signing_private.map(Box::new),
            message_keys: VecDeque::new(),
        }
    }

    /// Key id announced to group members.
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// Current chain key.
    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }

    /// Replaces the chain key after sending or receiving.
    pub fn set_chain_key(&mut self, chain_key: ChainKey) {
        self.chain_key = chain_key;
    }

    /// Key that verifies the sender's group messages.
    pub fn signing_key_public(&self) -> &VerifyingKey {
        &self.signing_public
    }

    /// Key that signs our own group messages.
    pub fn signing_key_private(&self) -> Option<&SigningKey> {
        self.signing_private.as_deref()
    }

    /// Whether keys for `iteration` were cached.
    pub fn has_message_keys(&self, iteration: u32) -> bool {
        self.message_keys
            .iter()
            .any(|keys| keys.counter() == iteration)
    }

    /// Caches keys for a skipped iteration, evicting the oldest past the bound.
    pub fn add_message_keys(&mut self, keys: MessageKeys) {
        self.message_keys.push_back(keys);
        while self.message_keys.len() > MAX_SENDER_MESSAGE_KEYS {
            self.message_keys.pop_front();
        }
    }

    /// Takes the cached keys for `iteration`.
    pub fn remove_message_keys(&mut self, iteration: u32) -> Option<MessageKeys> {
        let position = self
            .message_keys
            .iter()
            .position(|keys| keys.counter() == iteration)?;
        self.message_keys.remove(position)
    }
}

impl Zeroize for SenderKeyState {
    fn zeroize(&mut self) {
        self.chain_key.zeroize();
        self.signing_private = None;
        self.message_keys.clear();
    }
}

impl Drop for SenderKeyState {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for SenderKeyState {}

/// Sender key states for one (group, sender) pair, newest first.
#[derive(Clone, Default)]
pub struct SenderKeyRecord {
    pub(crate) states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the record holds no state.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The newest state.
    pub fn sender_key_state(&self) -> Result<&SenderKeyState, Error> {
        self.states
            .front()
            .ok_or_else(|| Error::InvalidArgument("Sender key record is empty".to_string()))
    }

    /// The state with `key_id`.
    pub fn sender_key_state_by_id(&mut self, key_id: u32) -> Result<&mut SenderKeyState, Error> {
        self.states
            .iter_mut()
            .find(|state| state.key_id == key_id)
            .ok_or(Error::InvalidKeyId(key_id))
    }

    /// Adds `state` as the newest, dropping the oldest past [`MAX_SENDER_KEY_STATES`].
    pub fn add_sender_key_state(&mut self, state: SenderKeyState) {
        self.states.push_front(state);
        self.states.truncate(MAX_SENDER_KEY_STATES);
    }

    /// Replaces every state with `state`.
    pub fn set_sender_key_state(&mut self, state: SenderKeyState) {
        self.states.clear();
        self.states.push_front(state);
    }
}
