use crate::{CryptoProvider, Error, X25519PublicKey, X25519Secret};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use zeroize::Zeroize;

/// Public identity of a device: the X25519 agreement key plus the Ed25519 key that signs
/// its pre-keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityKey {
    dh_key: X25519PublicKey,
    signing_key: VerifyingKey,
}

impl IdentityKey {
    /// Pairs an agreement key with its signing key.
    pub fn new(dh_key: X25519PublicKey, signing_key: VerifyingKey) -> Self {
        Self {
            dh_key,
            signing_key,
        }
    }

    /// Public X25519 key for Diffie-Hellman operations.
    pub fn dh_key(&self) -> &X25519PublicKey {
        &self.dh_key
    }

    /// Public Ed25519 key for signature verification.
    pub fn signing_key(&self) -> &VerifyingKey {
        &self.signing_key
    }

    /// Verifies `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Error> {
        self.signing_key
            .verify_strict(message, signature)
            .map_err(|_| Error::InvalidSignature)
    }

    /// Serializes to 64 bytes: X25519 key then Ed25519 key.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.dh_key.as_bytes());
        bytes[32..64].copy_from_slice(self.signing_key.as_bytes());
        bytes
    }

    /// Parses the 64-byte form produced by [`IdentityKey::to_bytes`].
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 64 {
            return Err(Error::InvalidKey(format!(
                "identity key must be 64 bytes, got {}",
                bytes.len()
            )));
        }

        let dh_key = X25519PublicKey::try_from(&bytes[0..32])?;
        let mut signing_bytes = [0u8; 32];
        signing_bytes.copy_from_slice(&bytes[32..64]);
        let signing_key = VerifyingKey::from_bytes(&signing_bytes)
            .map_err(|err| Error::InvalidKey(err.to_string()))?;

        Ok(Self::new(dh_key, signing_key))
    }
}

/// Long-term identity key pair of the local device.
///
/// Combines an Ed25519 signing key (authenticates signed pre-keys) and an X25519 key (takes
/// part in the X3DH agreement).
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl IdentityKeyPair {
    /// Creates a new identity with randomly generated components.
    pub fn generate<C: CryptoProvider>(crypto: &C) -> Result<Self, Error> {
        let mut signing_seed = Box::new([0u8; 32]);
        crypto.random_bytes(signing_seed.as_mut_slice())?;
        let signing_key = Box::new(SigningKey::from_bytes(&signing_seed));
        signing_seed.zeroize();

        let dh_key = crypto.generate_key_pair()?.secret().clone();

        Ok(Self {
            signing_key,
            dh_key,
        })
    }

    /// Public half of this identity.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.dh_key.public_key(), self.signing_key.verifying_key())
    }

    /// Signs a message using the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Private X25519 key for agreements.
    pub(crate) fn dh_secret(&self) -> &X25519Secret {
        &self.dh_key
    }

    /// Serializes the identity key to a 64-byte array.
    ///
    /// The first 32 bytes contain the Ed25519 private key,
    /// and the last 32 bytes contain the X25519 private key.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.signing_key.as_bytes().as_slice());
        bytes[32..64].copy_from_slice(self.dh_key.as_bytes());

        bytes
    }
}

impl From<[u8; 64]> for IdentityKeyPair {
    /// Deserializes an identity key from a 64-byte array.
    fn from(mut bytes: [u8; 64]) -> Self {
        let mut private_sk_bytes = Box::new([0u8; 32]);
        private_sk_bytes.copy_from_slice(&bytes[0..32]);
        let signing_key = Box::new(SigningKey::from_bytes(&private_sk_bytes));
        private_sk_bytes.zeroize();

        let mut private_dh_bytes = Box::new([0u8; 32]);
        private_dh_bytes.copy_from_slice(&bytes[32..64]);
        let dh_key = X25519Secret::from(private_dh_bytes);
        bytes.zeroize();

        Self {
            signing_key,
            dh_key,
        }
    }
}

impl Zeroize for IdentityKeyPair {
    fn zeroize(&mut self) {
        self.dh_key.zeroize();
    }
}
