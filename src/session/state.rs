use crate::{
    ChainKey, CryptoProvider, Error, IdentityKey, KeyPair, ReceiverChain, RootKey,
    SessionConfig, X25519PublicKey,
};
use std::collections::VecDeque;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Lifecycle phase of a session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Built as initiator; the peer has not answered yet, so every outgoing message carries
    /// the handshake material.
    HandshakePending,
    /// Fully usable for sending and receiving.
    Established,
    /// The peer's registration or identity changed; fetch a new bundle before sending.
    Stale,
}

/// The local ratchet key pair together with the chain that sends under it.
#[derive(Clone)]
pub struct SenderChain {
    pub(crate) ratchet_key: KeyPair,
    pub(crate) chain_key: ChainKey,
}

impl SenderChain {
    /// Ratchet key announced in outgoing message headers.
    pub fn ratchet_key(&self) -> X25519PublicKey {
        self.ratchet_key.public_key()
    }

    /// Current sending chain key.
    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }
}

/// Handshake data an initiator repeats in every message until the responder answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPreKey {
    pub(crate) pre_key_id: Option<u32>,
    pub(crate) signed_pre_key_id: u32,
    pub(crate) base_key: X25519PublicKey,
    /// Milliseconds since the Unix epoch.
    pub(crate) timestamp: u64,
}

impl PendingPreKey {
    /// One-time pre-key used by the handshake, if any.
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    /// Signed pre-key used by the handshake.
    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    /// Public base key sent to the responder.
    pub fn base_key(&self) -> X25519PublicKey {
        self.base_key
    }

    /// When the handshake was started, in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Live cryptographic state between this device and one remote device.
///
/// Holds at most one sender chain and a bounded list of receiver chains, newest first.
#[derive(Clone)]
pub struct SessionState {
    pub(crate) session_version: u8,
    pub(crate) local_identity: IdentityKey,
    pub(crate) remote_identity: IdentityKey,
    pub(crate) root_key: RootKey,
    // Private key for the next receive-side agreement; the sender chain's key once one exists.
    pub(crate) local_ratchet_key: KeyPair,
    pub(crate) previous_counter: u32,
    pub(crate) sender_chain: Option<SenderChain>,
    pub(crate) receiver_chains: VecDeque<ReceiverChain>,
    pub(crate) pending_pre_key: Option<PendingPreKey>,
    pub(crate) remote_registration_id: u32,
    pub(crate) local_registration_id: u32,
    pub(crate) needs_refresh: bool,
    pub(crate) base_key: X25519PublicKey,
}

impl SessionState {
    /// Protocol version the state was negotiated with.
    pub fn session_version(&self) -> u8 {
        self.session_version
    }

    /// Phase derived from the pending handshake and refresh flag.
    pub fn phase(&self) -> SessionPhase {
        if self.needs_refresh {
            SessionPhase::Stale
        } else if self.pending_pre_key.is_some() {
            SessionPhase::HandshakePending
        } else {
            SessionPhase::Established
        }
    }

    /// Local identity at the time of the handshake.
    pub fn local_identity(&self) -> &IdentityKey {
        &self.local_identity
    }

    /// Remote identity at the time of the handshake.
    pub fn remote_identity(&self) -> &IdentityKey {
        &self.remote_identity
    }

    /// Current root key.
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    /// Current sender chain, if one has been created since the last ratchet step.
    pub fn sender_chain(&self) -> Option<&SenderChain> {
        self.sender_chain.as_ref()
    }

    /// Receiver chains, newest first.
    pub fn receiver_chains(&self) -> &VecDeque<ReceiverChain> {
        &self.receiver_chains
    }

    /// Unacknowledged handshake data, for initiator states.
    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    /// Length of the previous sending chain, echoed in message headers.
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Registration id of the remote install.
    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    /// Registration id of the local install.
    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    /// Whether the remote device changed since this state was built.
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    /// Flags the state as stale.
    pub fn mark_needs_refresh(&mut self) {
        self.needs_refresh = true;
    }

    /// Initiator base key identifying the handshake that created this state.
    pub fn base_key(&self) -> X25519PublicKey {
        self.base_key
    }

    pub(crate) fn receiver_chain_position(&self, sender_ratchet_key: &X25519PublicKey) -> Option<usize> {
        self.receiver_chains
            .iter()
            .position(|chain| chain.sender_ratchet_key() == sender_ratchet_key)
    }

    pub(crate) fn add_receiver_chain(&mut self, chain: ReceiverChain, max_receiver_chains: usize) {
        self.receiver_chains.push_front(chain);
        while self.receiver_chains.len() > max_receiver_chains.max(1) {
            self.receiver_chains.pop_back();
        }
    }

    /// DH ratchet step for a new peer ratchet key.
    ///
    /// Derives a receiver chain from the current root key and the local ratchet key, puts
    /// it in front, and drops the sender chain so the next send rotates the local ratchet key.
    pub(crate) fn ratchet_receive<C: CryptoProvider>(
        &mut self,
        crypto: &C,
        their_ratchet_key: &X25519PublicKey,
        config: &SessionConfig,
    ) -> Result<(), Error> {
        let (root_key, chain_key) =
            self.root_key
                .create_chain(crypto, their_ratchet_key, self.local_ratchet_key.secret())?;

        self.root_key = root_key;
        self.add_receiver_chain(
            ReceiverChain::new(*their_ratchet_key, chain_key),
            config.max_receiver_chains,
        );
        if let Some(sender_chain) = self.sender_chain.take() {
            self.previous_counter = sender_chain.chain_key.index();
        }

        Ok(())
    }

    /// Returns the sender chain, generating a fresh local ratchet key and chain if the last
    /// ratchet step dropped it.
    pub(crate) fn ensure_sender_chain<C: CryptoProvider>(
        &mut self,
        crypto: &C,
    ) -> Result<&mut SenderChain, Error> {
        let sender_chain = match self.sender_chain.take() {
            Some(sender_chain) => sender_chain,
            None => self.create_sender_chain(crypto)?,
        };

        Ok(self.sender_chain.insert(sender_chain))
    }

    fn create_sender_chain<C: CryptoProvider>(&mut self, crypto: &C) -> Result<SenderChain, Error> {
        let their_ratchet_key = *self
            .receiver_chains
            .front()
            .ok_or_else(|| Error::InvalidMessage("session has no peer ratchet key".to_string()))?
            .sender_ratchet_key();

        let ratchet_key = crypto.generate_key_pair()?;
        let (root_key, chain_key) =
            self.root_key
                .create_chain(crypto, &their_ratchet_key, ratchet_key.secret())?;

        self.root_key = root_key;
        self.local_ratchet_key = ratchet_key.clone();

        Ok(SenderChain {
            ratchet_key,
            chain_key,
        })
    }
}

impl Zeroize for SessionState {
    fn zeroize(&mut self) {
        self.root_key.zeroize();
        self.local_ratchet_key.zeroize();
        if let Some(sender_chain) = self.sender_chain.as_mut() {
            sender_chain.ratchet_key.zeroize();
            sender_chain.chain_key.zeroize();
        }
        for chain in self.receiver_chains.iter_mut() {
            chain.zeroize();
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for SessionState {}

/// A state with a fixed root key and a sender chain but no receiver chains.
#[cfg(test)]
pub(crate) fn detached_state<C: CryptoProvider>(crypto: &C) -> SessionState {
    use crate::{CURRENT_VERSION, IdentityKeyPair};

    let identity = IdentityKeyPair::generate(crypto).unwrap().identity_key();
    let ratchet_key = crypto.generate_key_pair().unwrap();
    SessionState {
        session_version: CURRENT_VERSION,
        local_identity: identity,
        remote_identity: identity,
        root_key: RootKey::new(Box::new([1u8; 32])),
        local_ratchet_key: ratchet_key.clone(),
        previous_counter: 0,
        sender_chain: Some(SenderChain {
            ratchet_key,
            chain_key: ChainKey::new(Box::new([2u8; 32]), 0),
        }),
        receiver_chains: VecDeque::new(),
        pending_pre_key: None,
        remote_registration_id: 1,
        local_registration_id: 2,
        needs_refresh: false,
        base_key: crypto.generate_key_pair().unwrap().public_key(),
    }
}
