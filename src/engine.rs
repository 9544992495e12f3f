use crate::key_helper::{self, PRE_KEY_MEDIUM_MAX_VALUE};
use crate::{
    CiphertextMessage, CryptoProvider, DefaultCryptoProvider, Error, IdentityKey, PreKeyBundle,
    PreKeyRecord, PreKeySignalMessage, ProtocolAddress, ProtocolStore, SessionBuilder,
    SessionCipher, SessionConfig, SessionPhase, SignalMessage, SignedPreKeyRecord,
};
use crate::session::{duration_millis, millis_since_epoch};
use std::time::SystemTime;

/// Entry point for one local account: builds sessions and encrypts or decrypts messages
/// against the host's stores.
///
/// Every operation takes `&mut self`, so calls are serialized by construction. Hosts that
/// share an engine between threads wrap it in a `Mutex`; one lock guards the whole
/// engine and store path.
pub struct SessionEngine<S, C = DefaultCryptoProvider> {
    store: S,
    crypto: C,
    config: SessionConfig,
}

impl<S: ProtocolStore> SessionEngine<S> {
    /// Creates an engine with the default crypto provider.
    ///
    /// If no configuration is provided, default values are used.
    pub fn new(store: S, config: Option<SessionConfig>) -> Self {
        Self::with_crypto(store, DefaultCryptoProvider, config.unwrap_or_default())
    }
}

impl<S: ProtocolStore, C: CryptoProvider> SessionEngine<S, C> {
    /// Creates an engine with a custom crypto provider.
    pub fn with_crypto(store: S, crypto: C, config: SessionConfig) -> Self {
        Self {
            store,
            crypto,
            config,
        }
    }

    /// Returns the configuration for this engine.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the crypto provider.
    pub fn crypto(&self) -> &C {
        &self.crypto
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the underlying store for direct changes.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consumes the engine, returning its store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Starts a session with `address` from its published bundle.
    pub fn process_pre_key_bundle(
        &mut self,
        address: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), Error> {
        SessionBuilder::new(&mut self.store, &self.crypto, &self.config, address)
            .process_pre_key_bundle(bundle)
    }

    /// Encrypts `plaintext` for `address`.
    pub fn encrypt(
        &mut self,
        address: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, Error> {
        SessionCipher::new(&mut self.store, &self.crypto, &self.config, address).encrypt(plaintext)
    }

    /// Decrypts either kind of message from `address`.
    pub fn decrypt(
        &mut self,
        address: &ProtocolAddress,
        message: &CiphertextMessage,
    ) -> Result<Vec<u8>, Error> {
        match message {
            CiphertextMessage::Signal(message) => self.decrypt_signal_message(address, message),
            CiphertextMessage::PreKey(message) => self.decrypt_pre_key_message(address, message),
        }
    }

    /// Decrypts a message on an existing session with `address`.
    pub fn decrypt_signal_message(
        &mut self,
        address: &ProtocolAddress,
        message: &SignalMessage,
    ) -> Result<Vec<u8>, Error> {
        SessionCipher::new(&mut self.store, &self.crypto, &self.config, address)
            .decrypt_signal_message(message)
    }

    /// Decrypts a message that may start a new session with `address`.
    pub fn decrypt_pre_key_message(
        &mut self,
        address: &ProtocolAddress,
        message: &PreKeySignalMessage,
    ) -> Result<Vec<u8>, Error> {
        SessionCipher::new(&mut self.store, &self.crypto, &self.config, address)
            .decrypt_pre_key_message(message)
    }

    /// Phase of the current session with `address`, or `None` without one.
    pub fn session_phase(&self, address: &ProtocolAddress) -> Result<Option<SessionPhase>, Error> {
        Ok(self
            .store
            .load_session(address)?
            .and_then(|record| record.session_state().map(|state| state.phase())))
    }

    /// Registration id the remote install announced when the current session was built.
    pub fn remote_registration_id(&self, address: &ProtocolAddress) -> Result<u32, Error> {
        self.store
            .load_session(address)?
            .and_then(|record| {
                record
                    .session_state()
                    .map(|state| state.remote_registration_id())
            })
            .ok_or_else(|| Error::NoSession(address.clone()))
    }

    /// Identity last recorded for `address`, if any.
    pub fn remote_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error> {
        self.store.get_identity(address)
    }

    /// Compares what the server reports for `address` with the current session and marks
    /// the session stale if the device was reinstalled or changed identity.
    ///
    /// Returns whether the session was marked.
    pub fn observe_remote_device(
        &mut self,
        address: &ProtocolAddress,
        registration_id: u32,
        identity: &IdentityKey,
    ) -> Result<bool, Error> {
        let Some(mut record) = self.store.load_session(address)? else {
            return Ok(false);
        };
        let Some(state) = record.session_state_mut() else {
            return Ok(false);
        };

        if state.needs_refresh()
            || (state.remote_registration_id() == registration_id
                && state.remote_identity() == identity)
        {
            return Ok(false);
        }

        state.mark_needs_refresh();
        self.store.store_session(address, &record)?;

        tracing::info!(target: "engine", %address, registration_id, "remote device changed; session needs refresh");

        Ok(true)
    }

    /// Moves the current session with `address` into the archive. Late messages still
    /// decrypt, but the next send needs a new handshake.
    pub fn archive_session(&mut self, address: &ProtocolAddress) -> Result<(), Error> {
        if let Some(mut record) = self.store.load_session(address)? {
            record.archive_current_state(self.config.max_previous_states);
            self.store.store_session(address, &record)?;
        }
        Ok(())
    }

    /// Deletes the session with `address`.
    pub fn delete_session(&mut self, address: &ProtocolAddress) -> Result<(), Error> {
        self.store.delete_session(address)
    }

    /// Deletes the sessions with every device of account `name`.
    pub fn delete_all_sessions(&mut self, name: &str) -> Result<(), Error> {
        self.store.delete_all_sessions(name)
    }

    /// Device ids of account `name` with a session.
    pub fn device_ids(&self, name: &str) -> Result<Vec<u32>, Error> {
        self.store.device_ids(name)
    }

    /// Assembles the bundle this device publishes, from keys already in the store.
    pub fn local_pre_key_bundle(
        &self,
        device_id: u32,
        signed_pre_key_id: u32,
        pre_key_id: Option<u32>,
    ) -> Result<PreKeyBundle, Error> {
        let identity = self.store.identity_key_pair()?;
        let registration_id = self.store.local_registration_id()?;

        let signed_pre_key = self
            .store
            .load_signed_pre_key(signed_pre_key_id)?
            .ok_or(Error::InvalidKeyId(signed_pre_key_id))?;
        let pre_key = match pre_key_id {
            Some(id) => {
                let record = self.store.load_pre_key(id)?.ok_or(Error::InvalidKeyId(id))?;
                Some((record.id(), record.public_key()))
            }
            None => None,
        };

        Ok(PreKeyBundle::new(
            registration_id,
            device_id,
            pre_key,
            signed_pre_key.id(),
            signed_pre_key.public_key(),
            signed_pre_key.signature(),
            identity.identity_key(),
        ))
    }

    /// Generates `count` one-time pre-keys starting at id `start` and stores them.
    ///
    /// Either every key is stored or none is.
    pub fn generate_pre_keys(&mut self, start: u32, count: u32) -> Result<Vec<PreKeyRecord>, Error> {
        let pre_keys = key_helper::generate_pre_keys(&self.crypto, start, count)?;

        for (stored, pre_key) in pre_keys.iter().enumerate() {
            if let Err(err) = self.store.store_pre_key(pre_key) {
                for pre_key in &pre_keys[..stored] {
                    if let Err(err) = self.store.remove_pre_key(pre_key.id()) {
                        tracing::error!(target: "engine", pre_key_id = pre_key.id(), %err, "failed to roll back pre-key");
                    }
                }
                return Err(err);
            }
        }

        tracing::debug!(target: "engine", start, count, "generated pre-keys");

        Ok(pre_keys)
    }

    /// Replaces the current signed pre-key once the rotation interval has passed.
    ///
    /// Superseded signed pre-keys older than the maximum age are deleted; younger ones stay
    /// so in-flight handshakes still complete. Returns the new key, or `None` if no rotation
    /// was due.
    pub fn rotate_signed_pre_key(
        &mut self,
        now: SystemTime,
    ) -> Result<Option<SignedPreKeyRecord>, Error> {
        let now_ms = millis_since_epoch(now);
        let rotation_interval = duration_millis(self.config.signed_pre_key_rotation_interval);
        let max_age = duration_millis(self.config.signed_pre_key_max_age);

        let current_id = self.store.current_signed_pre_key_id()?;
        if let Some(id) = current_id {
            if let Some(current) = self.store.load_signed_pre_key(id)? {
                if now_ms.saturating_sub(current.timestamp()) < rotation_interval {
                    return Ok(None);
                }
            }
        }

        let id = current_id.map_or(1, |id| id % (PRE_KEY_MEDIUM_MAX_VALUE - 1) + 1);
        let identity = self.store.identity_key_pair()?;
        let signed_pre_key =
            key_helper::generate_signed_pre_key(&self.crypto, &identity, id, now_ms)?;

        self.store.store_signed_pre_key(&signed_pre_key)?;
        if let Err(err) = self.store.set_current_signed_pre_key_id(id) {
            if let Err(err) = self.store.remove_signed_pre_key(id) {
                tracing::error!(target: "engine", signed_pre_key_id = id, %err, "failed to roll back signed pre-key");
            }
            return Err(err);
        }

        // The new key is live from here on; pruning is best effort.
        if let Err(err) = self.prune_signed_pre_keys(id, now_ms, max_age) {
            tracing::warn!(target: "engine", signed_pre_key_id = id, %err, "failed to prune expired signed pre-keys");
        }

        tracing::info!(target: "engine", signed_pre_key_id = id, "rotated signed pre-key");

        Ok(Some(signed_pre_key))
    }

    fn prune_signed_pre_keys(&mut self, current_id: u32, now_ms: u64, max_age: u64) -> Result<(), Error> {
        for old_id in self.store.signed_pre_key_ids()? {
            if old_id == current_id {
                continue;
            }
            let Some(old) = self.store.load_signed_pre_key(old_id)? else {
                continue;
            };
            if now_ms.saturating_sub(old.timestamp()) <= max_age {
                continue;
            }
            match self.store.remove_signed_pre_key(old_id) {
                Ok(()) => {
                    tracing::debug!(target: "engine", signed_pre_key_id = old_id, "pruned expired signed pre-key");
                }
                Err(err) => {
                    tracing::warn!(target: "engine", signed_pre_key_id = old_id, %err, "failed to prune signed pre-key");
                }
            }
        }

        Ok(())
    }
}
