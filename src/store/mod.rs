mod memory;
pub use memory::InMemoryStore;

use crate::{
    Error, IdentityKey, IdentityKeyPair, PreKeyRecord, ProtocolAddress, SenderKeyRecord,
    SessionRecord, SignedPreKeyRecord,
};

/// Which way a message travels when the identity store is asked for trust.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Encrypting to the remote identity.
    Sending,
    /// Decrypting from the remote identity.
    Receiving,
}

/// Identifies one sender's key within a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SenderKeyName {
    group_id: String,
    sender: ProtocolAddress,
}

impl SenderKeyName {
    /// Creates the name for `sender`'s key in `group_id`.
    pub fn new(group_id: impl Into<String>, sender: ProtocolAddress) -> Self {
        Self {
            group_id: group_id.into(),
            sender,
        }
    }

    /// Group the key belongs to.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Device that owns the key.
    pub fn sender(&self) -> &ProtocolAddress {
        &self.sender
    }
}

/// Durable storage of session records, keyed by remote address.
///
/// Backend failures are reported as [`Error::StoreFailure`].
pub trait SessionStore {
    /// Loads the record for `address`, if one exists.
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, Error>;

    /// Creates or replaces the record for `address`.
    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord)
    -> Result<(), Error>;

    /// Whether a record exists for `address`.
    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, Error>;

    /// Deletes the record for `address`. Deleting a missing record is not an error.
    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<(), Error>;

    /// Deletes the records of every device of account `name`.
    fn delete_all_sessions(&mut self, name: &str) -> Result<(), Error>;

    /// Device ids of account `name` that have a record.
    fn device_ids(&self, name: &str) -> Result<Vec<u32>, Error>;
}

/// Storage of the local one-time pre-keys.
pub trait PreKeyStore {
    /// Loads pre-key `id`, if it has not been consumed.
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, Error>;

    /// Stores pre-key `record` under its id.
    fn store_pre_key(&mut self, record: &PreKeyRecord) -> Result<(), Error>;

    /// Whether pre-key `id` is present.
    fn contains_pre_key(&self, id: u32) -> Result<bool, Error>;

    /// Deletes pre-key `id`.
    fn remove_pre_key(&mut self, id: u32) -> Result<(), Error>;
}

/// Storage of the local signed pre-keys.
pub trait SignedPreKeyStore {
    /// Loads signed pre-key `id`.
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, Error>;

    /// Stores signed pre-key `record` under its id.
    fn store_signed_pre_key(&mut self, record: &SignedPreKeyRecord) -> Result<(), Error>;

    /// Whether signed pre-key `id` is present.
    fn contains_signed_pre_key(&self, id: u32) -> Result<bool, Error>;

    /// Deletes signed pre-key `id`.
    fn remove_signed_pre_key(&mut self, id: u32) -> Result<(), Error>;

    /// Ids of all stored signed pre-keys.
    fn signed_pre_key_ids(&self) -> Result<Vec<u32>, Error>;

    /// Id of the signed pre-key currently published, if one was set.
    fn current_signed_pre_key_id(&self) -> Result<Option<u32>, Error>;

    /// Marks signed pre-key `id` as the one currently published.
    fn set_current_signed_pre_key_id(&mut self, id: u32) -> Result<(), Error>;
}

/// Local identity plus the remote identities seen so far.
pub trait IdentityKeyStore {
    /// The local identity key pair.
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, Error>;

    /// The local registration id.
    fn local_registration_id(&self) -> Result<u32, Error>;

    /// Records `identity` for `address`. Returns `true` if it replaced a different key.
    fn save_identity(&mut self, address: &ProtocolAddress, identity: &IdentityKey)
    -> Result<bool, Error>;

    /// The identity last saved for `address`.
    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error>;

    /// Trust policy hook, consulted before a session is built or used.
    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool, Error>;
}

/// Storage of group sender keys.
pub trait SenderKeyStore {
    /// Creates or replaces the record for `name`.
    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord)
    -> Result<(), Error>;

    /// Loads the record for `name`.
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>, Error>;

    /// Whether a record exists for `name`.
    fn contains_sender_key(&self, name: &SenderKeyName) -> Result<bool, Error>;
}

/// Everything the session engine needs from the host.
pub trait ProtocolStore:
    SessionStore + PreKeyStore + SignedPreKeyStore + IdentityKeyStore + SenderKeyStore
{
}

impl<T> ProtocolStore for T where
    T: SessionStore + PreKeyStore + SignedPreKeyStore + IdentityKeyStore + SenderKeyStore
{
}
