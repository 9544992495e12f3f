use crate::{ChainKey, CryptoProvider, Error, MessageKeys, SessionConfig, X25519PublicKey};
use std::collections::VecDeque;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A receiving chain for one of the peer's ratchet keys, with its cache of skipped keys.
#[derive(Clone)]
pub struct ReceiverChain {
    sender_ratchet_key: X25519PublicKey,
    chain_key: ChainKey,
    // Oldest first.
    message_keys: VecDeque<MessageKeys>,
}

impl ReceiverChain {
    /// Starts a receiving chain for `sender_ratchet_key`.
    pub fn new(sender_ratchet_key: X25519PublicKey, chain_key: ChainKey) -> Self {
        Self {
            sender_ratchet_key,
            chain_key,
            message_keys: VecDeque::new(),
        }
    }

    pub(crate) fn with_message_keys(
        sender_ratchet_key: X25519PublicKey,
        chain_key: ChainKey,
        message_keys: VecDeque<MessageKeys>,
    ) -> Self {
        Self {
            sender_ratchet_key,
            chain_key,
            message_keys,
        }
    }

    /// The peer ratchet key this chain belongs to.
    pub fn sender_ratchet_key(&self) -> &X25519PublicKey {
        &self.sender_ratchet_key
    }

    /// Current chain key.
    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }

    /// Cached keys for skipped messages, oldest first.
    pub fn message_keys(&self) -> &VecDeque<MessageKeys> {
        &self.message_keys
    }

    /// Returns the message keys for `counter`, consuming them.
    ///
    /// Counters ahead of the chain derive and cache every intermediate key, bounded by
    /// `config.max_skip`. Counters behind the chain must be found in the cache; a miss means
    /// the key was already consumed or evicted.
    pub fn take_message_keys<C: CryptoProvider>(
        &mut self,
        crypto: &C,
        counter: u32,
        config: &SessionConfig,
    ) -> Result<MessageKeys, Error> {
        let chain_index = self.chain_key.index();

        if counter < chain_index {
            let position = self
                .message_keys
                .iter()
                .position(|keys| keys.counter() == counter);

            return match position.and_then(|position| self.message_keys.remove(position)) {
                Some(keys) => Ok(keys),
                None => Err(Error::DuplicateMessage {
                    chain_index,
                    counter,
                }),
            };
        }

        let jump = counter - chain_index;
        if jump > config.max_skip {
            return Err(Error::ResourceExhausted(format!(
                "Message counter {counter} is {jump} ahead of chain index {chain_index} (max skip {})",
                config.max_skip
            )));
        }

        let mut chain_key = self.chain_key.clone();
        while chain_key.index() < counter {
            let (keys, next) = chain_key.advance(crypto)?;
            self.cache_message_keys(keys, config.max_message_keys);
            chain_key = next;
        }

        let (keys, next) = chain_key.advance(crypto)?;
        self.chain_key = next;

        Ok(keys)
    }

    fn cache_message_keys(&mut self, keys: MessageKeys, max_message_keys: usize) {
        self.message_keys.push_back(keys);
        while self.message_keys.len() > max_message_keys {
            self.message_keys.pop_front();
        }
    }
}

impl Zeroize for ReceiverChain {
    fn zeroize(&mut self) {
        self.chain_key.zeroize();
        for keys in self.message_keys.iter_mut() {
            keys.zeroize();
        }
        self.message_keys.clear();
    }
}

impl Drop for ReceiverChain {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for ReceiverChain {}
