use crate::{
    ChainKey, Error, IdentityKey, KeyPair, MessageKeys, PendingPreKey, PreKeyRecord,
    ReceiverChain, RootKey, SenderChain, SenderKeyRecord, SenderKeyState, SessionRecord,
    SessionState, SignedPreKeyRecord, X25519PublicKey, X25519Secret,
};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use prost::Message;
use zeroize::Zeroize;

// Current schema version of every persisted record.
const RECORD_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Message)]
pub(crate) struct SignalMessageProto {
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) ratchet_key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub(crate) counter: u32,
    #[prost(uint32, tag = "3")]
    pub(crate) previous_counter: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub(crate) ciphertext: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct PreKeySignalMessageProto {
    #[prost(uint32, optional, tag = "1")]
    pub(crate) pre_key_id: Option<u32>,
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) base_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub(crate) identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub(crate) message: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub(crate) registration_id: u32,
    #[prost(uint32, tag = "6")]
    pub(crate) signed_pre_key_id: u32,
}

#[derive(Clone, PartialEq, Message)]
struct ChainKeyProto {
    #[prost(bytes = "vec", tag = "1")]
    key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    index: u32,
}

#[derive(Clone, PartialEq, Message)]
struct MessageKeysProto {
    #[prost(bytes = "vec", tag = "1")]
    cipher_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    mac_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    iv: Vec<u8>,
    #[prost(uint32, tag = "4")]
    counter: u32,
}

#[derive(Clone, PartialEq, Message)]
struct SenderChainProto {
    #[prost(bytes = "vec", tag = "1")]
    ratchet_private: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    chain_key: Option<ChainKeyProto>,
}

#[derive(Clone, PartialEq, Message)]
struct ReceiverChainProto {
    #[prost(bytes = "vec", tag = "1")]
    sender_ratchet_key: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    chain_key: Option<ChainKeyProto>,
    #[prost(message, repeated, tag = "3")]
    message_keys: Vec<MessageKeysProto>,
}

#[derive(Clone, PartialEq, Message)]
struct PendingPreKeyProto {
    #[prost(uint32, optional, tag = "1")]
    pre_key_id: Option<u32>,
    #[prost(uint32, tag = "2")]
    signed_pre_key_id: u32,
    #[prost(bytes = "vec", tag = "3")]
    base_key: Vec<u8>,
    #[prost(uint64, tag = "4")]
    timestamp: u64,
}

#[derive(Clone, PartialEq, Message)]
struct SessionStateProto {
    #[prost(uint32, tag = "1")]
    session_version: u32,
    #[prost(bytes = "vec", tag = "2")]
    local_identity: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    remote_identity: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    root_key: Vec<u8>,
    #[prost(uint32, tag = "5")]
    previous_counter: u32,
    #[prost(bytes = "vec", tag = "6")]
    local_ratchet_private: Vec<u8>,
    #[prost(message, optional, tag = "7")]
    sender_chain: Option<SenderChainProto>,
    #[prost(message, repeated, tag = "8")]
    receiver_chains: Vec<ReceiverChainProto>,
    #[prost(message, optional, tag = "9")]
    pending_pre_key: Option<PendingPreKeyProto>,
    #[prost(uint32, tag = "10")]
    remote_registration_id: u32,
    #[prost(uint32, tag = "11")]
    local_registration_id: u32,
    #[prost(bool, tag = "12")]
    needs_refresh: bool,
    #[prost(bytes = "vec", tag = "13")]
    base_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
struct SessionRecordProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(message, optional, tag = "2")]
    current_state: Option<SessionStateProto>,
    #[prost(message, repeated, tag = "3")]
    previous_states: Vec<SessionStateProto>,
    #[prost(bytes = "vec", tag = "4")]
    user_record: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
struct PreKeyRecordProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(uint32, tag = "2")]
    id: u32,
    #[prost(bytes = "vec", tag = "3")]
    private_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
struct SignedPreKeyRecordProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(uint32, tag = "2")]
    id: u32,
    #[prost(bytes = "vec", tag = "3")]
    private_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    signature: Vec<u8>,
    #[prost(uint64, tag = "5")]
    timestamp: u64,
}

#[derive(Clone, PartialEq, Message)]
struct SenderKeyStateProto {
    #[prost(uint32, tag = "1")]
    key_id: u32,
    #[prost(message, optional, tag = "2")]
    chain_key: Option<ChainKeyProto>,
    #[prost(bytes = "vec", tag = "3")]
    signing_public: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "4")]
    signing_private: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "5")]
    message_keys: Vec<MessageKeysProto>,
}

#[derive(Clone, PartialEq, Message)]
struct SenderKeyRecordProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(message, repeated, tag = "2")]
    states: Vec<SenderKeyStateProto>,
}

fn check_version(version: u32, what: &str) -> Result<(), Error> {
    if version != RECORD_VERSION {
        return Err(Error::Serde(format!(
            "Unsupported {what} schema version: {version}"
        )));
    }
    Ok(())
}

fn key_bytes(bytes: &[u8], what: &str) -> Result<Box<[u8; 32]>, Error> {
    if bytes.len() != 32 {
        return Err(Error::Serde(format!(
            "Invalid {what} length: expected 32, got {}",
            bytes.len()
        )));
    }

    let mut key = Box::new([0u8; 32]);
    key.copy_from_slice(bytes);
    Ok(key)
}

fn key_pair(private_key: &[u8]) -> Result<KeyPair, Error> {
    Ok(KeyPair::from_secret(X25519Secret::from(key_bytes(
        private_key,
        "private key",
    )?)))
}

fn public_key(bytes: &[u8]) -> Result<X25519PublicKey, Error> {
    X25519PublicKey::try_from(bytes).map_err(|err| Error::Serde(err.to_string()))
}

fn identity_key(bytes: &[u8]) -> Result<IdentityKey, Error> {
    IdentityKey::decode(bytes).map_err(|err| Error::Serde(err.to_string()))
}

impl From<&ChainKey> for ChainKeyProto {
    fn from(chain_key: &ChainKey) -> Self {
        Self {
            key: chain_key.key().to_vec(),
            index: chain_key.index(),
        }
    }
}

impl TryFrom<Option<ChainKeyProto>> for ChainKey {
    type Error = Error;

    fn try_from(proto: Option<ChainKeyProto>) -> Result<Self, Self::Error> {
        let mut proto = proto.ok_or_else(|| Error::Serde("Missing chain key".to_string()))?;
        let key = key_bytes(&proto.key, "chain key")?;
        proto.key.zeroize();
        Ok(ChainKey::new(key, proto.index))
    }
}

impl From<&MessageKeys> for MessageKeysProto {
    fn from(keys: &MessageKeys) -> Self {
        Self {
            cipher_key: keys.cipher_key().to_vec(),
            mac_key: keys.mac_key().to_vec(),
            iv: keys.iv().to_vec(),
            counter: keys.counter(),
        }
    }
}

impl TryFrom<MessageKeysProto> for MessageKeys {
    type Error = Error;

    fn try_from(mut proto: MessageKeysProto) -> Result<Self, Self::Error> {
        let iv: [u8; 12] = proto
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| Error::Serde(format!("Invalid iv length: {}", proto.iv.len())))?;
        let keys = MessageKeys::from_parts(
            key_bytes(&proto.cipher_key, "cipher key")?,
            key_bytes(&proto.mac_key, "mac key")?,
            iv,
            proto.counter,
        );
        proto.cipher_key.zeroize();
        proto.mac_key.zeroize();
        Ok(keys)
    }
}

impl From<&SessionState> for SessionStateProto {
    fn from(state: &SessionState) -> Self {
        Self {
            session_version: u32::from(state.session_version),
            local_identity: state.local_identity.to_bytes().to_vec(),
            remote_identity: state.remote_identity.to_bytes().to_vec(),
            root_key: state.root_key.key().to_vec(),
            previous_counter: state.previous_counter,
            local_ratchet_private: state.local_ratchet_key.secret().as_bytes().to_vec(),
            sender_chain: state.sender_chain.as_ref().map(|chain| SenderChainProto {
                ratchet_private: chain.ratchet_key.secret().as_bytes().to_vec(),
                chain_key: Some(ChainKeyProto::from(&chain.chain_key)),
            }),
            receiver_chains: state
                .receiver_chains
                .iter()
                .map(|chain| ReceiverChainProto {
                    sender_ratchet_key: chain.sender_ratchet_key().to_bytes().to_vec(),
                    chain_key: Some(ChainKeyProto::from(chain.chain_key())),
                    message_keys: chain.message_keys().iter().map(MessageKeysProto::from).collect(),
                })
                .collect(),
            pending_pre_key: state
                .pending_pre_key
                .as_ref()
                .map(|pending| PendingPreKeyProto {
                    pre_key_id: pending.pre_key_id,
                    signed_pre_key_id: pending.signed_pre_key_id,
                    base_key: pending.base_key.to_bytes().to_vec(),
                    timestamp: pending.timestamp,
                }),
            remote_registration_id: state.remote_registration_id,
            local_registration_id: state.local_registration_id,
            needs_refresh: state.needs_refresh,
            base_key: state.base_key.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<SessionStateProto> for SessionState {
    type Error = Error;

    fn try_from(mut proto: SessionStateProto) -> Result<Self, Self::Error> {
        let session_version = u8::try_from(proto.session_version)
            .map_err(|_| Error::Serde(format!("Invalid session version {}", proto.session_version)))?;

        let sender_chain = match proto.sender_chain.take() {
            Some(mut chain) => {
                let ratchet_key = key_pair(&chain.ratchet_private)?;
                chain.ratchet_private.zeroize();
                Some(SenderChain {
                    ratchet_key,
                    chain_key: ChainKey::try_from(chain.chain_key.take())?,
                })
            }
            None => None,
        };

        let receiver_chains = proto
            .receiver_chains
            .drain(..)
            .map(|chain| {
                let message_keys = chain
                    .message_keys
                    .into_iter()
                    .map(MessageKeys::try_from)
                    .collect::<Result<_, _>>()?;
                Ok(ReceiverChain::with_message_keys(
                    public_key(&chain.sender_ratchet_key)?,
                    ChainKey::try_from(chain.chain_key)?,
                    message_keys,
                ))
            })
            .collect::<Result<_, Error>>()?;

        let pending_pre_key = match proto.pending_pre_key.take() {
            Some(pending) => Some(PendingPreKey {
                pre_key_id: pending.pre_key_id,
                signed_pre_key_id: pending.signed_pre_key_id,
                base_key: public_key(&pending.base_key)?,
                timestamp: pending.timestamp,
            }),
            None => None,
        };

        let state = SessionState {
            session_version,
            local_identity: identity_key(&proto.local_identity)?,
            remote_identity: identity_key(&proto.remote_identity)?,
            root_key: RootKey::new(key_bytes(&proto.root_key, "root key")?),
            local_ratchet_key: key_pair(&proto.local_ratchet_private)?,
            previous_counter: proto.previous_counter,
            sender_chain,
            receiver_chains,
            pending_pre_key,
            remote_registration_id: proto.remote_registration_id,
            local_registration_id: proto.local_registration_id,
            needs_refresh: proto.needs_refresh,
            base_key: public_key(&proto.base_key)?,
        };
        proto.root_key.zeroize();
        proto.local_ratchet_private.zeroize();

        Ok(state)
    }
}

impl SessionRecord {
    /// Serializes the record for a [`crate::SessionStore`].
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let proto = SessionRecordProto {
            version: RECORD_VERSION,
            current_state: self.current_state.as_ref().map(SessionStateProto::from),
            previous_states: self
                .previous_states
                .iter()
                .map(SessionStateProto::from)
                .collect(),
            user_record: self.user_record.clone(),
        };

        Ok(proto.encode_to_vec())
    }

    /// Restores a record produced by [`SessionRecord::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = SessionRecordProto::decode(bytes)?;
        check_version(proto.version, "session record")?;

        let current_state = proto
            .current_state
            .map(SessionState::try_from)
            .transpose()?;
        let previous_states = proto
            .previous_states
            .into_iter()
            .map(SessionState::try_from)
            .collect::<Result<_, _>>()?;

        Ok(Self {
            current_state,
            previous_states,
            is_fresh: false,
            user_record: proto.user_record,
        })
    }
}

impl PreKeyRecord {
    /// Serializes the pre-key for a [`crate::PreKeyStore`].
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut proto = PreKeyRecordProto {
            version: RECORD_VERSION,
            id: self.id(),
            private_key: self.key_pair().secret().as_bytes().to_vec(),
        };
        let bytes = proto.encode_to_vec();
        proto.private_key.zeroize();

        Ok(bytes)
    }

    /// Restores a pre-key produced by [`PreKeyRecord::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = PreKeyRecordProto::decode(bytes)?;
        check_version(proto.version, "pre-key")?;

        let key_pair = key_pair(&proto.private_key)?;
        proto.private_key.zeroize();

        Ok(PreKeyRecord::new(proto.id, key_pair))
    }
}

impl SignedPreKeyRecord {
    /// Serializes the signed pre-key for a [`crate::SignedPreKeyStore`].
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut proto = SignedPreKeyRecordProto {
            version: RECORD_VERSION,
            id: self.id(),
            private_key: self.key_pair().secret().as_bytes().to_vec(),
            signature: self.signature().to_bytes().to_vec(),
            timestamp: self.timestamp(),
        };
        let bytes = proto.encode_to_vec();
        proto.private_key.zeroize();

        Ok(bytes)
    }

    /// Restores a signed pre-key produced by [`SignedPreKeyRecord::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = SignedPreKeyRecordProto::decode(bytes)?;
        check_version(proto.version, "signed pre-key")?;

        let key_pair = key_pair(&proto.private_key)?;
        proto.private_key.zeroize();
        let signature = Signature::from_slice(&proto.signature)
            .map_err(|err| Error::Serde(format!("Invalid signature: {err}")))?;

        Ok(SignedPreKeyRecord::new(
            proto.id,
            key_pair,
            signature,
            proto.timestamp,
        ))
    }
}

impl SenderKeyRecord {
    /// Serializes the record for a [`crate::SenderKeyStore`].
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let states = self
            .states
            .iter()
            .map(|state| SenderKeyStateProto {
                key_id: state.key_id,
                chain_key: Some(ChainKeyProto::from(&state.chain_key)),
                signing_public: state.signing_public.as_bytes().to_vec(),
                signing_private: state
                    .signing_private
                    .as_ref()
                    .map(|key| key.to_bytes().to_vec()),
                message_keys: state.message_keys.iter().map(MessageKeysProto::from).collect(),
            })
            .collect();

        Ok(SenderKeyRecordProto {
            version: RECORD_VERSION,
            states,
        }
        .encode_to_vec())
    }

    /// Restores a record produced by [`SenderKeyRecord::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = SenderKeyRecordProto::decode(bytes)?;
        check_version(proto.version, "sender key record")?;

        let states = proto
            .states
            .into_iter()
            .map(|state| {
                let signing_public = VerifyingKey::from_bytes(&*key_bytes(
                    &state.signing_public,
                    "signing key",
                )?)
                .map_err(|err| Error::Serde(format!("Invalid signing key: {err}")))?;
                let signing_private = match state.signing_private {
                    Some(mut bytes) => {
                        let mut key = key_bytes(&bytes, "signing key")?;
                        let signing_key = SigningKey::from_bytes(&key);
                        key.zeroize();
                        bytes.zeroize();
                        Some(Box::new(signing_key))
                    }
                    None => None,
                };

                Ok(SenderKeyState {
                    key_id: state.key_id,
                    chain_key: ChainKey::try_from(state.chain_key)?,
                    signing_public,
                    signing_private,
                    message_keys: state
                        .message_keys
                        .into_iter()
                        .map(MessageKeys::try_from)
                        .collect::<Result<_, _>>()?,
                })
            })
            .collect::<Result<_, Error>>()?;

        Ok(Self { states })
    }
}
