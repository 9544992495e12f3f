mod chain;
mod keys;
mod receiver;

pub use chain::ChainKey;
pub use keys::{MessageKeys, RootKey};
pub use receiver::ReceiverChain;

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

const MESSAGE_KEYS_INFO: &[u8] = b"Tandem-E2E-MessageKeys";
const RATCHET_INFO: &[u8] = b"Tandem-E2E-Ratchet";
