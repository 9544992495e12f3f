use crate::{CryptoProvider, Error, IdentityKey, IdentityKeyPair, KeyPair, X25519PublicKey};
use ed25519_dalek::Signature;

/// A one-time pre-key. Consumed (deleted from the store) by the first handshake that uses it.
#[derive(Clone)]
pub struct PreKeyRecord {
    id: u32,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    /// Wraps an existing key pair.
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    /// Creates a new one-time pre-key with the given ID.
    pub fn generate<C: CryptoProvider>(crypto: &C, id: u32) -> Result<Self, Error> {
        Ok(Self::new(id, crypto.generate_key_pair()?))
    }

    /// Returns the unique identifier for this pre-key.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the public component of this pre-key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.key_pair.public_key()
    }

    /// Returns the key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

/// A medium-term signed pre-key.
///
/// Signed with the identity key so initiators can authenticate it, and stamped with its
/// creation time (milliseconds since the Unix epoch) so superseded keys can be pruned.
#[derive(Clone)]
pub struct SignedPreKeyRecord {
    id: u32,
    key_pair: KeyPair,
    signature: Signature,
    timestamp: u64,
}

impl SignedPreKeyRecord {
    /// Assembles a record from its parts.
    pub fn new(id: u32, key_pair: KeyPair, signature: Signature, timestamp: u64) -> Self {
        Self {
            id,
            key_pair,
            signature,
            timestamp,
        }
    }

    /// Generates a key pair and signs its public key with `identity`.
    pub fn generate<C: CryptoProvider>(
        crypto: &C,
        identity: &IdentityKeyPair,
        id: u32,
        timestamp: u64,
    ) -> Result<Self, Error> {
        let key_pair = crypto.generate_key_pair()?;
        let signature = identity.sign(key_pair.public_key().as_bytes());

        Ok(Self::new(id, key_pair, signature, timestamp))
    }

    /// Returns the unique identifier for this signed pre-key.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the public component of this signed pre-key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.key_pair.public_key()
    }

    /// Returns the key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Signature over the public key by the identity key.
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Checks the signature against `identity`.
    pub fn verify(&self, identity: &IdentityKey) -> Result<(), Error> {
        identity.verify(self.public_key().as_bytes(), &self.signature)
    }
}
