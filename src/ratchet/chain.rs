use crate::ratchet::{CHAIN_KEY_SEED, MESSAGE_KEY_SEED, MessageKeys};
use crate::{CryptoProvider, Error};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric chain key: a 32-byte seed plus the index of the next message key it yields.
///
/// Stepping is one-way. A chain never hands out the same index twice because every step
/// produces a new `ChainKey` with `index + 1`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: Box<[u8; 32]>,
    index: u32,
}

impl ChainKey {
    /// Creates a chain key positioned at `index`.
    pub fn new(key: Box<[u8; 32]>, index: u32) -> Self {
        Self { key, index }
    }

    /// Index of the next message key this chain yields.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Raw chain key bytes.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Derives the message keys for the current index without moving the chain.
    pub fn message_keys<C: CryptoProvider>(&self, crypto: &C) -> Result<MessageKeys, Error> {
        let mut seed = crypto.hmac_sha256(self.key.as_slice(), &[&[MESSAGE_KEY_SEED]])?;
        let keys = MessageKeys::derive(crypto, &seed, self.index);
        seed.zeroize();
        keys
    }

    /// Returns the chain key for the next index.
    pub fn next_chain_key<C: CryptoProvider>(&self, crypto: &C) -> Result<ChainKey, Error> {
        let index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::ResourceExhausted("Chain index overflow".to_string()))?;
        let next = crypto.hmac_sha256(self.key.as_slice(), &[&[CHAIN_KEY_SEED]])?;

        Ok(ChainKey::new(Box::new(next), index))
    }

    /// Advances the chain once, yielding the current message keys and the next chain key.
    pub fn advance<C: CryptoProvider>(&self, crypto: &C) -> Result<(MessageKeys, ChainKey), Error> {
        Ok((self.message_keys(crypto)?, self.next_chain_key(crypto)?))
    }
}
