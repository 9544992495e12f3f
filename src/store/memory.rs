use crate::store::{
    Direction, IdentityKeyStore, PreKeyStore, SenderKeyName, SenderKeyStore, SessionStore,
    SignedPreKeyStore,
};
use crate::{
    Error, IdentityKey, IdentityKeyPair, PreKeyRecord, ProtocolAddress, SenderKeyRecord,
    SessionRecord, SignedPreKeyRecord,
};
use std::collections::{BTreeMap, HashMap};

/// Volatile implementation of every store trait, for tests and prototyping.
///
/// Remote identities follow trust-on-first-use: an unknown identity is trusted, a known one
/// only if it matches the saved key.
#[derive(Clone)]
pub struct InMemoryStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    identities: HashMap<ProtocolAddress, IdentityKey>,
    sessions: HashMap<ProtocolAddress, SessionRecord>,
    pre_keys: BTreeMap<u32, PreKeyRecord>,
    signed_pre_keys: BTreeMap<u32, SignedPreKeyRecord>,
    current_signed_pre_key_id: Option<u32>,
    sender_keys: HashMap<SenderKeyName, SenderKeyRecord>,
}

impl InMemoryStore {
    /// Creates an empty store for the local identity.
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            identities: HashMap::new(),
            sessions: HashMap::new(),
            pre_keys: BTreeMap::new(),
            signed_pre_keys: BTreeMap::new(),
            current_signed_pre_key_id: None,
            sender_keys: HashMap::new(),
        }
    }
}

impl SessionStore for InMemoryStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, Error> {
        Ok(self.sessions.get(address).cloned())
    }

    fn store_session(
        &mut self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), Error> {
        let mut record = record.clone();
        record.is_fresh = false;
        self.sessions.insert(address.clone(), record);
        Ok(())
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, Error> {
        Ok(self.sessions.contains_key(address))
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<(), Error> {
        self.sessions.remove(address);
        Ok(())
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<(), Error> {
        self.sessions.retain(|address, _| address.name() != name);
        Ok(())
    }

    fn device_ids(&self, name: &str) -> Result<Vec<u32>, Error> {
        let mut ids: Vec<u32> = self
            .sessions
            .keys()
            .filter(|address| address.name() == name)
            .map(ProtocolAddress::device_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

impl PreKeyStore for InMemoryStore {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, Error> {
        Ok(self.pre_keys.get(&id).cloned())
    }

    fn store_pre_key(&mut self, record: &PreKeyRecord) -> Result<(), Error> {
        self.pre_keys.insert(record.id(), record.clone());
        Ok(())
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool, Error> {
        Ok(self.pre_keys.contains_key(&id))
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<(), Error> {
        self.pre_keys.remove(&id);
        Ok(())
    }
}

impl SignedPreKeyStore for InMemoryStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, Error> {
        Ok(self.signed_pre_keys.get(&id).cloned())
    }

    fn store_signed_pre_key(&mut self, record: &SignedPreKeyRecord) -> Result<(), Error> {
        self.signed_pre_keys.insert(record.id(), record.clone());
        Ok(())
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool, Error> {
        Ok(self.signed_pre_keys.contains_key(&id))
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<(), Error> {
        self.signed_pre_keys.remove(&id);
        Ok(())
    }

    fn signed_pre_key_ids(&self) -> Result<Vec<u32>, Error> {
        Ok(self.signed_pre_keys.keys().copied().collect())
    }

    fn current_signed_pre_key_id(&self) -> Result<Option<u32>, Error> {
        Ok(self.current_signed_pre_key_id)
    }

    fn set_current_signed_pre_key_id(&mut self, id: u32) -> Result<(), Error> {
        self.current_signed_pre_key_id = Some(id);
        Ok(())
    }
}

impl IdentityKeyStore for InMemoryStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, Error> {
        Ok(self.identity_key_pair.clone())
    }

    fn local_registration_id(&self) -> Result<u32, Error> {
        Ok(self.registration_id)
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool, Error> {
        let previous = self.identities.insert(address.clone(), *identity);
        Ok(previous.is_some_and(|previous| previous != *identity))
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error> {
        Ok(self.identities.get(address).copied())
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        _direction: Direction,
    ) -> Result<bool, Error> {
        Ok(self
            .identities
            .get(address)
            .is_none_or(|known| known == identity))
    }
}

impl SenderKeyStore for InMemoryStore {
    fn store_sender_key(
        &mut self,
        name: &SenderKeyName,
        record: &SenderKeyRecord,
    ) -> Result<(), Error> {
        self.sender_keys.insert(name.clone(), record.clone());
        Ok(())
    }

    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>, Error> {
        Ok(self.sender_keys.get(name).cloned())
    }

    fn contains_sender_key(&self, name: &SenderKeyName) -> Result<bool, Error> {
        Ok(self.sender_keys.contains_key(name))
    }
}
