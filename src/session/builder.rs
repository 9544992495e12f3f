use crate::session::{now_millis, restore_session};
use crate::{
    CURRENT_VERSION, CryptoProvider, Direction, Error, PendingPreKey, PreKeyBundle, PreKeyRecord,
    PreKeySignalMessage, ProtocolAddress, ProtocolStore, ReceiverChain, SenderChain,
    SessionConfig, SessionRecord, SessionState, X3DH,
};
use std::collections::VecDeque;

/// Builds session states from a remote bundle (initiator) or an incoming pre-key message
/// (responder).
pub struct SessionBuilder<'a, S, C> {
    store: &'a mut S,
    crypto: &'a C,
    config: &'a SessionConfig,
    address: &'a ProtocolAddress,
}

impl<'a, S: ProtocolStore, C: CryptoProvider> SessionBuilder<'a, S, C> {
    /// Creates a builder for sessions with `address`.
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

    /// Initiator side of the handshake.
    ///
    /// Verifies the bundle, runs X3DH, and installs a new current state that keeps sending
    /// pre-key messages until the responder answers. Any older state is archived.
    pub fn process_pre_key_bundle(&mut self, bundle: &PreKeyBundle) -> Result<(), Error> {
        bundle.verify()?;

        let their_identity = bundle.identity_key();
        if !self
            .store
            .is_trusted_identity(self.address, their_identity, Direction::Sending)?
        {
            tracing::warn!(target: "session", address = %self.address, "untrusted identity in pre-key bundle");
            return Err(Error::UntrustedIdentity(self.address.clone()));
        }

        let our_identity = self.store.identity_key_pair()?;
        let local_registration_id = self.store.local_registration_id()?;

        let base_key = self.crypto.generate_key_pair()?;
        let (root_key, chain_key) = X3DH::new(self.crypto, &self.config.protocol_info)
            .initiate(&our_identity, &base_key, bundle)?
            .into_parts();

        // The responder's signed pre-key doubles as its first ratchet key.
        let their_ratchet_key = bundle.signed_pre_key();
        let ratchet_key = self.crypto.generate_key_pair()?;
        let (root_key, sending_chain_key) =
            root_key.create_chain(self.crypto, &their_ratchet_key, ratchet_key.secret())?;

        let mut receiver_chains = VecDeque::with_capacity(1);
        receiver_chains.push_front(ReceiverChain::new(their_ratchet_key, chain_key));

        let state = SessionState {
            session_version: CURRENT_VERSION,
            local_identity: our_identity.identity_key(),
            remote_identity: *their_identity,
            root_key,
            local_ratchet_key: ratchet_key.clone(),
            previous_counter: 0,
            sender_chain: Some(SenderChain {
                ratchet_key,
                chain_key: sending_chain_key,
            }),
            receiver_chains,
            pending_pre_key: Some(PendingPreKey {
                pre_key_id: bundle.pre_key().map(|(id, _)| id),
                signed_pre_key_id: bundle.signed_pre_key_id(),
                base_key: base_key.public_key(),
                timestamp: now_millis(),
            }),
            remote_registration_id: bundle.registration_id(),
            local_registration_id,
            needs_refresh: false,
            base_key: base_key.public_key(),
        };

        let previous = self.store.load_session(self.address)?;
        let mut record = previous.clone().unwrap_or_else(SessionRecord::new_fresh);
        record.promote_state(state, self.config.max_previous_states);

        self.store.store_session(self.address, &record)?;
        if let Err(err) = self.store.save_identity(self.address, their_identity) {
            restore_session(self.store, self.address, previous.as_ref());
            return Err(err);
        }

        tracing::debug!(
            target: "session",
            address = %self.address,
            one_time_pre_key = bundle.pre_key().is_some(),
            archived = record.previous_states.len(),
            "built initiator session"
        );

        Ok(())
    }

    /// Responder side of the handshake.
    ///
    /// Installs the new state into `record` and returns the one-time pre-key that was used;
    /// the caller deletes it once the whole operation commits. A message whose handshake is
    /// already present in `record` installs nothing.
    pub(crate) fn process_pre_key_message(
        &mut self,
        record: &mut SessionRecord,
        message: &PreKeySignalMessage,
    ) -> Result<Option<PreKeyRecord>, Error> {
        if record.has_session_state(message.message_version(), message.base_key()) {
            tracing::debug!(target: "session", address = %self.address, "pre-key message for an existing session");
            return Ok(None);
        }

        let signed_pre_key_id = message.signed_pre_key_id();
        let signed_pre_key = self
            .store
            .load_signed_pre_key(signed_pre_key_id)?
            .ok_or(Error::InvalidKeyId(signed_pre_key_id))?;
        let one_time_pre_key = match message.pre_key_id() {
            Some(id) => Some(self.store.load_pre_key(id)?.ok_or(Error::InvalidKeyId(id))?),
            None => None,
        };

        let our_identity = self.store.identity_key_pair()?;
        let local_registration_id = self.store.local_registration_id()?;

        let (root_key, chain_key) = X3DH::new(self.crypto, &self.config.protocol_info)
            .respond(
                &our_identity,
                signed_pre_key.key_pair(),
                one_time_pre_key.as_ref().map(PreKeyRecord::key_pair),
                message.identity_key(),
                message.base_key(),
            )?
            .into_parts();

        let mut state = SessionState {
            session_version: message.message_version(),
            local_identity: our_identity.identity_key(),
            remote_identity: *message.identity_key(),
            root_key,
            local_ratchet_key: signed_pre_key.key_pair().clone(),
            previous_counter: 0,
            sender_chain: Some(SenderChain {
                ratchet_key: signed_pre_key.key_pair().clone(),
                chain_key,
            }),
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            remote_registration_id: message.registration_id(),
            local_registration_id,
            needs_refresh: false,
            base_key: *message.base_key(),
        };
        state.ratchet_receive(
            self.crypto,
            message.message().sender_ratchet_key(),
            self.config,
        )?;

        record.promote_state(state, self.config.max_previous_states);

        tracing::debug!(
            target: "session",
            address = %self.address,
            signed_pre_key_id,
            pre_key_id = ?message.pre_key_id(),
            "built responder session"
        );

        Ok(one_time_pre_key)
    }
}
