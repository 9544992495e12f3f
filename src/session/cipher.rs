use crate::padding::{pad_message_body, unpad_message_body};
use crate::session::{duration_millis, now_millis, restore_session};
use crate::{
    CiphertextMessage, CryptoProvider, Direction, Error, PreKeySignalMessage, ProtocolAddress,
    ProtocolStore, SessionBuilder, SessionConfig, SessionPhase, SessionRecord, SessionState,
    SignalMessage,
};
use std::borrow::Cow;

/// Encrypts and decrypts messages for one remote address.
///
/// Every operation works on a copy of the stored record and writes it back only once the
/// whole operation succeeded, so a failure leaves the store as it was.
pub struct SessionCipher<'a, S, C> {
    store: &'a mut S,
    crypto: &'a C,
    config: &'a SessionConfig,
    address: &'a ProtocolAddress,
}

impl<'a, S: ProtocolStore, C: CryptoProvider> SessionCipher<'a, S, C> {
    /// Creates a cipher for messages exchanged with `address`.
    pub fn new(
        store: &'a mut S,
        crypto: &'a C,
        config: &'a SessionConfig,
        address: &'a ProtocolAddress,
    ) -> Self {
        Self {
            store,
            crypto,
            config,
            address,
        }
    }

    fn no_session(&self) -> Error {
        Error::NoSession(self.address.clone())
    }

    /// Encrypts `plaintext` with the current session state.
    ///
    /// Returns a [`CiphertextMessage::PreKey`] while the handshake is unacknowledged.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<CiphertextMessage, Error> {
        let mut record = self
            .store
            .load_session(self.address)?
            .ok_or_else(|| self.no_session())?;
        let state = record
            .session_state_mut()
            .ok_or_else(|| self.no_session())?;

        match state.phase() {
            SessionPhase::Stale => {
                tracing::warn!(target: "session", address = %self.address, "refusing to encrypt on a stale session");
                return Err(self.no_session());
            }
            SessionPhase::HandshakePending => {
                let max_age = duration_millis(self.config.max_unacknowledged_session_age);
                let started = state.pending_pre_key().map_or(0, |pending| pending.timestamp());
                if now_millis().saturating_sub(started) > max_age {
                    tracing::warn!(target: "session", address = %self.address, "pending key exchange expired");
                    return Err(Error::StaleKeyExchange);
                }
            }
            SessionPhase::Established => {}
        }

        if !self
            .store
            .is_trusted_identity(self.address, state.remote_identity(), Direction::Sending)?
        {
            tracing::warn!(target: "session", address = %self.address, "untrusted identity on encrypt");
            return Err(Error::UntrustedIdentity(self.address.clone()));
        }

        let (ratchet_key, message_keys) = {
            let sender_chain = state.ensure_sender_chain(self.crypto)?;
            let (message_keys, next) = sender_chain.chain_key.advance(self.crypto)?;
            sender_chain.chain_key = next;
            (sender_chain.ratchet_key(), message_keys)
        };

        let body = if self.config.pad_messages {
            Cow::Owned(pad_message_body(plaintext))
        } else {
            Cow::Borrowed(plaintext)
        };
        let ciphertext =
            self.crypto
                .encrypt(message_keys.cipher_key(), message_keys.iv(), &body)?;
        let message = SignalMessage::new(
            self.crypto,
            message_keys.mac_key(),
            ratchet_key,
            message_keys.counter(),
            state.previous_counter(),
            ciphertext,
            state.local_identity(),
            state.remote_identity(),
        )?;

        let message = match state.pending_pre_key() {
            Some(pending) => CiphertextMessage::PreKey(PreKeySignalMessage::new(
                state.local_registration_id(),
                pending.pre_key_id(),
                pending.signed_pre_key_id(),
                pending.base_key(),
                *state.local_identity(),
                message,
            )?),
            None => CiphertextMessage::Signal(message),
        };

        self.store.store_session(self.address, &record)?;

        Ok(message)
    }

    /// Decrypts a message on an existing session.
    pub fn decrypt_signal_message(&mut self, message: &SignalMessage) -> Result<Vec<u8>, Error> {
        let mut record = self
            .store
            .load_session(self.address)?
            .ok_or_else(|| self.no_session())?;

        let plaintext = self.decrypt_with_record(&mut record, message)?;

        if let Some(state) = record.session_state() {
            if !self.store.is_trusted_identity(
                self.address,
                state.remote_identity(),
                Direction::Receiving,
            )? {
                tracing::warn!(target: "session", address = %self.address, "untrusted identity on decrypt");
                return Err(Error::UntrustedIdentity(self.address.clone()));
            }
        }

        self.store.store_session(self.address, &record)?;

        Ok(plaintext)
    }

    /// Decrypts a message that may start a new session.
    ///
    /// Commits in order: session record, one-time pre-key removal, remote identity. A failed
    /// step rolls back the steps before it.
    pub fn decrypt_pre_key_message(
        &mut self,
        message: &PreKeySignalMessage,
    ) -> Result<Vec<u8>, Error> {
        let their_identity = message.identity_key();
        if !self
            .store
            .is_trusted_identity(self.address, their_identity, Direction::Receiving)?
        {
            tracing::warn!(target: "session", address = %self.address, "untrusted identity in pre-key message");
            return Err(Error::UntrustedIdentity(self.address.clone()));
        }

        let previous = self.store.load_session(self.address)?;
        let mut record = previous.clone().unwrap_or_else(SessionRecord::new_fresh);

        let used_pre_key =
            SessionBuilder::new(&mut *self.store, self.crypto, self.config, self.address)
                .process_pre_key_message(&mut record, message)?;
        let plaintext = self.decrypt_with_record(&mut record, message.message())?;

        self.store.store_session(self.address, &record)?;

        if let Some(pre_key) = used_pre_key.as_ref() {
            if let Err(err) = self.store.remove_pre_key(pre_key.id()) {
                restore_session(self.store, self.address, previous.as_ref());
                return Err(err);
            }
        }

        if let Err(err) = self.store.save_identity(self.address, their_identity) {
            if let Some(pre_key) = used_pre_key.as_ref() {
                if let Err(restore_err) = self.store.store_pre_key(pre_key) {
                    tracing::error!(
                        target: "session",
                        address = %self.address,
                        pre_key_id = pre_key.id(),
                        err = %restore_err,
                        "failed to restore consumed pre-key"
                    );
                }
            }
            restore_session(self.store, self.address, previous.as_ref());
            return Err(err);
        }

        Ok(plaintext)
    }

    /// Tries the current state, then every archived state, each on a scratch copy.
    ///
    /// The first state that decrypts is written back in place; archived states are not
    /// promoted. If none does, a MAC failure on a known chain wins over a skip-bound
    /// violation, which wins over `NoSession`.
    fn decrypt_with_record(
        &self,
        record: &mut SessionRecord,
        message: &SignalMessage,
    ) -> Result<Vec<u8>, Error> {
        let mut failure = None;

        if let Some(current) = record.session_state() {
            let mut candidate = current.clone();
            if let Some(plaintext) = self.try_state(&mut candidate, message, &mut failure)? {
                record.current_state = Some(candidate);
                return Ok(plaintext);
            }
        }

        for index in 0..record.previous_states.len() {
            let mut candidate = record.previous_states[index].clone();
            if let Some(plaintext) = self.try_state(&mut candidate, message, &mut failure)? {
                tracing::debug!(target: "session", address = %self.address, index, "decrypted with archived state");
                record.previous_states[index] = candidate;
                return Ok(plaintext);
            }
        }

        let err = failure.unwrap_or_else(|| self.no_session());
        tracing::warn!(target: "session", address = %self.address, %err, "no session state could decrypt message");
        Err(err)
    }

    /// `Ok(None)` means the state did not match and the next one should be tried.
    fn try_state(
        &self,
        state: &mut SessionState,
        message: &SignalMessage,
        failure: &mut Option<Error>,
    ) -> Result<Option<Vec<u8>>, Error> {
        let known_chain = state
            .receiver_chain_position(message.sender_ratchet_key())
            .is_some();

        match self.decrypt_with_state(state, message) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(Error::InvalidMac) if known_chain => {
                *failure = Some(Error::InvalidMac);
                Ok(None)
            }
            Err(err @ (Error::DuplicateMessage { .. } | Error::ResourceExhausted(_)))
                if known_chain =>
            {
                tracing::warn!(target: "session", address = %self.address, %err, "rejected message on known chain");
                Err(err)
            }
            // A speculative ratchet step on a state the message was never meant for.
            Err(err @ Error::ResourceExhausted(_)) => {
                if failure.is_none() {
                    *failure = Some(err);
                }
                Ok(None)
            }
            Err(Error::InvalidMac | Error::InvalidKey(_) | Error::InvalidMessage(_))
                if !known_chain =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn decrypt_with_state(
        &self,
        state: &mut SessionState,
        message: &SignalMessage,
    ) -> Result<Vec<u8>, Error> {
        if message.message_version() != state.session_version() {
            return Err(Error::InvalidMessage(format!(
                "message version {} does not match session version {}",
                message.message_version(),
                state.session_version()
            )));
        }

        let their_ratchet_key = message.sender_ratchet_key();
        let position = match state.receiver_chain_position(their_ratchet_key) {
            Some(position) => position,
            None => {
                state.ratchet_receive(self.crypto, their_ratchet_key, self.config)?;
                0
            }
        };

        let message_keys = state.receiver_chains[position].take_message_keys(
            self.crypto,
            message.counter(),
            self.config,
        )?;

        if !message.verify_mac(
            self.crypto,
            state.remote_identity(),
            state.local_identity(),
            message_keys.mac_key(),
        )? {
            return Err(Error::InvalidMac);
        }

        let mut plaintext =
            self.crypto
                .decrypt(message_keys.cipher_key(), message_keys.iv(), message.body())?;
        if self.config.pad_messages {
            let len = unpad_message_body(&plaintext).len();
            plaintext.truncate(len);
        }

        // Any answer from the peer acknowledges the handshake.
        state.pending_pre_key = None;

        Ok(plaintext)
    }
}
