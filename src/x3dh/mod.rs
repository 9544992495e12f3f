mod identity_key;
pub use identity_key::*;
mod pre_key;
pub use pre_key::*;

use crate::{ChainKey, CryptoProvider, Error, KeyPair, RootKey, SharedKey, X25519PublicKey};
use ed25519_dalek::Signature;
use zeroize::Zeroize;

const DISCONTINUITY: [u8; 32] = [0xFF; 32];
const SALT: [u8; 32] = [0u8; 32];

/// Public key material published by a remote device so sessions can be started while it
/// is offline.
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    registration_id: u32,
    device_id: u32,
    pre_key: Option<(u32, X25519PublicKey)>,
    signed_pre_key_id: u32,
    signed_pre_key: X25519PublicKey,
    signed_pre_key_signature: Signature,
    identity_key: IdentityKey,
}

impl PreKeyBundle {
    /// Creates a new pre-key bundle from the provided keys.
    pub fn new(
        registration_id: u32,
        device_id: u32,
        pre_key: Option<(u32, X25519PublicKey)>,
        signed_pre_key_id: u32,
        signed_pre_key: X25519PublicKey,
        signed_pre_key_signature: Signature,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key,
            signed_pre_key_id,
            signed_pre_key,
            signed_pre_key_signature,
            identity_key,
        }
    }

    /// Verifies that the signed pre-key was signed by the bundle's identity key.
    pub fn verify(&self) -> Result<(), Error> {
        self.identity_key.verify(
            self.signed_pre_key.as_bytes(),
            &self.signed_pre_key_signature,
        )
    }

    /// Registration id of the remote install.
    #[inline]
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Device id the bundle belongs to.
    #[inline]
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Optional one-time pre-key with its id.
    #[inline]
    pub fn pre_key(&self) -> Option<(u32, X25519PublicKey)> {
        self.pre_key
    }

    /// Id of the signed pre-key.
    #[inline]
    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    /// Public signed pre-key.
    #[inline]
    pub fn signed_pre_key(&self) -> X25519PublicKey {
        self.signed_pre_key
    }

    /// Signature over the signed pre-key.
    #[inline]
    pub fn signed_pre_key_signature(&self) -> Signature {
        self.signed_pre_key_signature
    }

    /// Identity of the remote device.
    #[inline]
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }
}

/// Root key and first chain key produced by an X3DH agreement.
pub struct X3DHOutput {
    root_key: RootKey,
    chain_key: ChainKey,
}

impl X3DHOutput {
    /// Initial root key.
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    /// Splits the output into its root key and chain key.
    pub fn into_parts(self) -> (RootKey, ChainKey) {
        (self.root_key, self.chain_key)
    }

    /// Initial chain key, for the chain keyed by the responder's signed pre-key.
    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }
}

/// Implementation of the X3DH (Extended Triple Diffie-Hellman) key agreement protocol.
///
/// X3DH enables two parties to establish a shared secret asynchronously, even if one
/// party is offline. Both roles perform the same four agreements in the same order, so
/// given matching key material they derive bit-identical root and chain keys.
pub struct X3DH<'a, C> {
    crypto: &'a C,
    info: &'a [u8],
}

impl<'a, C: CryptoProvider> X3DH<'a, C> {
    /// Creates a new X3DH protocol instance with the specified application info.
    ///
    /// The info parameter is used as context for the HKDF key derivation, ensuring
    /// that keys derived in different contexts will be different even if the same
    /// key material is used.
    pub fn new(crypto: &'a C, info: &'a [u8]) -> Self {
        Self { crypto, info }
    }

    /// Initiator side: agreement against a verified remote bundle.
    pub fn initiate(
        &self,
        our_identity: &IdentityKeyPair,
        our_base_key: &KeyPair,
        bundle: &PreKeyBundle,
    ) -> Result<X3DHOutput, Error> {
        bundle.verify()?;

        let their_signed_pre_key = bundle.signed_pre_key();

        // DH1 = DH(IKa, SPKb)
        let dh1 = self
            .crypto
            .agree(our_identity.dh_secret(), &their_signed_pre_key)?;
        // DH2 = DH(EKa, IKb)
        let dh2 = self
            .crypto
            .agree(our_base_key.secret(), bundle.identity_key().dh_key())?;
        // DH3 = DH(EKa, SPKb)
        let dh3 = self
            .crypto
            .agree(our_base_key.secret(), &their_signed_pre_key)?;
        // DH4 = DH(EKa, OPKb)
        let dh4 = match bundle.pre_key() {
            Some((_, one_time)) => Some(self.crypto.agree(our_base_key.secret(), &one_time)?),
            None => None,
        };

        self.derive(
            [dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()],
            dh4.as_ref().map(SharedKey::as_bytes),
        )
    }

    /// Responder side: mirrors [`X3DH::initiate`] with the local private keys.
    pub fn respond(
        &self,
        our_identity: &IdentityKeyPair,
        our_signed_pre_key: &KeyPair,
        our_one_time_pre_key: Option<&KeyPair>,
        their_identity: &IdentityKey,
        their_base_key: &X25519PublicKey,
    ) -> Result<X3DHOutput, Error> {
        // DH1 = DH(SPKb, IKa)
        let dh1 = self
            .crypto
            .agree(our_signed_pre_key.secret(), their_identity.dh_key())?;
        // DH2 = DH(IKb, EKa)
        let dh2 = self.crypto.agree(our_identity.dh_secret(), their_base_key)?;
        // DH3 = DH(SPKb, EKa)
        let dh3 = self
            .crypto
            .agree(our_signed_pre_key.secret(), their_base_key)?;
        // DH4 = DH(OPKb, EKa)
        let dh4 = match our_one_time_pre_key {
            Some(one_time) => Some(self.crypto.agree(one_time.secret(), their_base_key)?),
            None => None,
        };

        self.derive(
            [dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()],
            dh4.as_ref().map(SharedKey::as_bytes),
        )
    }

    fn derive(
        &self,
        agreements: [&[u8; 32]; 3],
        one_time: Option<&[u8; 32]>,
    ) -> Result<X3DHOutput, Error> {
        // IKM = 0xFF * 32 || DH1 || DH2 || DH3 || DH4 (if available)
        let mut key_material = Vec::with_capacity(32 * 5);
        key_material.extend_from_slice(&DISCONTINUITY);
        for agreement in agreements {
            key_material.extend_from_slice(agreement.as_slice());
        }
        if let Some(dh4) = one_time {
            key_material.extend_from_slice(dh4);
        }

        let mut okm = [0u8; 64];
        let result = self
            .crypto
            .hkdf(Some(SALT.as_slice()), &key_material, self.info, &mut okm);
        key_material.zeroize();
        result?;

        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);
        root_key.copy_from_slice(&okm[0..32]);
        chain_key.copy_from_slice(&okm[32..64]);
        okm.zeroize();

        Ok(X3DHOutput {
            root_key: RootKey::new(root_key),
            chain_key: ChainKey::new(chain_key, 0),
        })
    }
}
