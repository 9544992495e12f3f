use crate::{CryptoProvider, Error, IdentityKeyPair, PreKeyRecord, SignedPreKeyRecord};

/// Largest registration id handed out; ids are in `1..=MAX_REGISTRATION_ID`.
pub const MAX_REGISTRATION_ID: u32 = 16380;

/// Pre-key ids stay below this value and wrap around to 1.
pub const PRE_KEY_MEDIUM_MAX_VALUE: u32 = 0xFF_FFFF;

/// Generates a random registration id for a fresh install.
pub fn generate_registration_id<C: CryptoProvider>(crypto: &C) -> Result<u32, Error> {
    let mut bytes = [0u8; 4];
    crypto.random_bytes(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes) % MAX_REGISTRATION_ID + 1)
}

/// Generates a long-term identity key pair.
pub fn generate_identity_key_pair<C: CryptoProvider>(crypto: &C) -> Result<IdentityKeyPair, Error> {
    IdentityKeyPair::generate(crypto)
}

/// Id of the `offset`-th pre-key of a batch starting at `start`, wrapping within
/// `1..PRE_KEY_MEDIUM_MAX_VALUE`.
fn pre_key_id(start: u32, offset: u32) -> u32 {
    let base = u64::from(start.saturating_sub(1)) + u64::from(offset);
    let wrapped = base % u64::from(PRE_KEY_MEDIUM_MAX_VALUE - 1);
    // Below PRE_KEY_MEDIUM_MAX_VALUE, so it fits.
    u32::try_from(wrapped).unwrap_or(0) + 1
}

/// Generates `count` one-time pre-keys with consecutive ids starting at `start`.
pub fn generate_pre_keys<C: CryptoProvider>(
    crypto: &C,
    start: u32,
    count: u32,
) -> Result<Vec<PreKeyRecord>, Error> {
    (0..count)
        .map(|offset| PreKeyRecord::generate(crypto, pre_key_id(start, offset)))
        .collect()
}

/// Generates a signed pre-key; `timestamp` is in milliseconds since the Unix epoch.
pub fn generate_signed_pre_key<C: CryptoProvider>(
    crypto: &C,
    identity: &IdentityKeyPair,
    id: u32,
    timestamp: u64,
) -> Result<SignedPreKeyRecord, Error> {
    SignedPreKeyRecord::generate(crypto, identity, id, timestamp)
}
