use crate::ratchet::{ChainKey, MESSAGE_KEYS_INFO, RATCHET_INFO};
use crate::{CryptoProvider, Error, X25519PublicKey, X25519Secret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Single-use keys for one message: cipher key, MAC key and nonce.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: Box<[u8; 32]>,
    mac_key: Box<[u8; 32]>,
    iv: [u8; 12],
    counter: u32,
}

impl MessageKeys {
    /// Expands a message key seed into its cipher key, MAC key and nonce.
    pub(crate) fn derive<C: CryptoProvider>(
        crypto: &C,
        seed: &[u8; 32],
        counter: u32,
    ) -> Result<Self, Error> {
        let mut okm = [0u8; 76];
        crypto.hkdf(None, seed, MESSAGE_KEYS_INFO, &mut okm)?;

        let mut cipher_key = Box::new([0u8; 32]);
        let mut mac_key = Box::new([0u8; 32]);
        let mut iv = [0u8; 12];
        cipher_key.copy_from_slice(&okm[0..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..76]);
        okm.zeroize();

        Ok(Self {
            cipher_key,
            mac_key,
            iv,
            counter,
        })
    }

    pub(crate) fn from_parts(
        cipher_key: Box<[u8; 32]>,
        mac_key: Box<[u8; 32]>,
        iv: [u8; 12],
        counter: u32,
    ) -> Self {
        Self {
            cipher_key,
            mac_key,
            iv,
            counter,
        }
    }

    /// Key for the message body cipher.
    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    /// Key for the message authentication code.
    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    /// Nonce for the message body cipher.
    pub fn iv(&self) -> &[u8; 12] {
        &self.iv
    }

    /// Chain index these keys were derived at.
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// Root key of a session; every DH ratchet step replaces it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey(Box<[u8; 32]>);

impl RootKey {
    /// Wraps raw root key bytes.
    pub fn new(key: Box<[u8; 32]>) -> Self {
        Self(key)
    }

    /// Raw root key bytes.
    pub fn key(&self) -> &[u8; 32] {
        &self.0
    }

    /// Mixes `DH(our_ratchet_key, their_ratchet_key)` into the root key, yielding the next
    /// root key and a fresh chain starting at index zero.
    pub fn create_chain<C: CryptoProvider>(
        &self,
        crypto: &C,
        their_ratchet_key: &X25519PublicKey,
        our_ratchet_key: &X25519Secret,
    ) -> Result<(RootKey, ChainKey), Error> {
        let shared = crypto.agree(our_ratchet_key, their_ratchet_key)?;

        let mut okm = [0u8; 64];
        crypto.hkdf(Some(self.0.as_slice()), shared.as_bytes(), RATCHET_INFO, &mut okm)?;

        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);
        root_key.copy_from_slice(&okm[0..32]);
        chain_key.copy_from_slice(&okm[32..64]);
        okm.zeroize();

        Ok((RootKey(root_key), ChainKey::new(chain_key, 0)))
    }
}
