use crate::{Error, KeyPair, X25519PublicKey, X25519Secret};
use aes_gcm_siv::aead::{Aead, Payload};
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Output of a Diffie-Hellman agreement.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedKey(Box<[u8; 32]>);

impl SharedKey {
    /// Wraps raw agreement output.
    pub fn new(bytes: Box<[u8; 32]>) -> Self {
        Self(bytes)
    }

    /// Borrows the 32 agreed bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Cryptographic primitives the session engine is built on.
///
/// The engine never calls a backend directly; everything goes through this trait so a host
/// can swap in a hardware-backed or audited implementation.
pub trait CryptoProvider {
    /// Fills `buf` from a cryptographically secure source.
    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), Error>;

    /// Generates a fresh X25519 key pair.
    fn generate_key_pair(&self) -> Result<KeyPair, Error> {
        let mut seed = Box::new([0u8; 32]);
        self.random_bytes(seed.as_mut_slice())?;
        Ok(KeyPair::from_secret(X25519Secret::from(seed)))
    }

    /// X25519 agreement between a local secret and a remote public key.
    fn agree(&self, secret: &X25519Secret, public: &X25519PublicKey) -> Result<SharedKey, Error>;

    /// HKDF-SHA256 extract-and-expand into `okm`.
    fn hkdf(&self, salt: Option<&[u8]>, ikm: &[u8], info: &[u8], okm: &mut [u8])
    -> Result<(), Error>;

    /// HMAC-SHA256 over the concatenation of `parts`.
    fn hmac_sha256(&self, key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], Error>;

    /// Symmetric encryption of a message body.
    fn encrypt(&self, key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8])
    -> Result<Vec<u8>, Error>;

    /// Symmetric decryption of a message body.
    fn decrypt(&self, key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8])
    -> Result<Vec<u8>, Error>;

    /// Compares two byte strings in time independent of their contents.
    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool;
}

/// Provider backed by x25519-dalek, RustCrypto HKDF/HMAC/SHA-256 and AES-256-GCM-SIV.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), Error> {
        OsRng.try_fill_bytes(buf).map_err(|_| Error::Random)
    }

    fn agree(&self, secret: &X25519Secret, public: &X25519PublicKey) -> Result<SharedKey, Error> {
        let shared = secret.dh(public);
        if !shared.was_contributory() {
            return Err(Error::InvalidKey(
                "Agreement with a low-order public key".to_string(),
            ));
        }

        Ok(SharedKey(Box::new(shared.to_bytes())))
    }

    fn hkdf(
        &self,
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        okm: &mut [u8],
    ) -> Result<(), Error> {
        Hkdf::<Sha256>::new(salt, ikm)
            .expand(info, okm)
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))
    }

    fn hmac_sha256(&self, key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], Error> {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))?;
        for part in parts {
            mac.update(part);
        }

        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn encrypt(
        &self,
        key: &[u8; 32],
        nonce: &[u8; 12],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = Aes256GcmSiv::new(aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key));
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| Error::Crypto("Message encryption failed".to_string()))
    }

    fn decrypt(
        &self,
        key: &[u8; 32],
        nonce: &[u8; 12],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = Aes256GcmSiv::new(aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| Error::InvalidMac)
    }

    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool {
        a.ct_eq(b).into()
    }
}
