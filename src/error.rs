use crate::ProtocolAddress;

/// Errors that can occur while building sessions or encrypting/decrypting messages.
///
/// Cryptographic and format errors are always surfaced to the caller; the engine never
/// recovers from them silently. `InvalidMac` and `DuplicateMessage` should be handled like a
/// dropped message, while `NoSession` and `InvalidKeyId` on receive mean the peer needs a
/// fresh handshake.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// An argument was outside of its valid range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A key was malformed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A referenced pre-key or signed pre-key does not exist (or was already consumed).
    #[error("Unknown key id {0}")]
    InvalidKeyId(u32),

    /// A signed pre-key signature did not verify against the identity key.
    #[error("Signature verification failed")]
    InvalidSignature,

    /// Message authentication failed.
    #[error("Message authentication failed")]
    InvalidMac,

    /// A message could not be parsed or violates the protocol.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A message carries a version newer than this implementation understands.
    #[error("Unsupported message version {0}")]
    InvalidVersion(u8),

    /// A message carries a version older than this implementation accepts.
    #[error("Legacy message version {0}")]
    LegacyMessage(u8),

    /// No usable session state exists for the address.
    #[error("No usable session for {0}")]
    NoSession(ProtocolAddress),

    /// The message key for this counter was already consumed or evicted.
    #[error("Duplicate message: counter {counter}, chain already at {chain_index}")]
    DuplicateMessage {
        /// Index the receiving chain had reached.
        chain_index: u32,
        /// Counter carried by the message.
        counter: u32,
    },

    /// The identity store's trust policy rejected the remote identity.
    #[error("Untrusted identity for {0}")]
    UntrustedIdentity(ProtocolAddress),

    /// The pending handshake is too old to be completed.
    #[error("Pending key exchange is stale")]
    StaleKeyExchange,

    /// A bound on memory or derivation work would be exceeded.
    #[error("Resource limit exceeded: {0}")]
    ResourceExhausted(String),

    /// The host store failed to read or write.
    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// A cryptographic primitive failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Self::Serde(value.to_string())
    }
}
