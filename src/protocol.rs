use crate::proto::{PreKeySignalMessageProto, SignalMessageProto};
use crate::{CryptoProvider, Error, IdentityKey, X25519PublicKey};
use prost::Message;

/// Message version produced and accepted by this implementation.
pub const CURRENT_VERSION: u8 = 3;

/// Length of the truncated MAC appended to every [`SignalMessage`].
pub const MAC_LENGTH: usize = 8;

/// Wire type tag carried next to a serialized message by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CiphertextMessageType {
    /// A [`SignalMessage`].
    Whisper = 2,
    /// A [`PreKeySignalMessage`].
    PreKey = 3,
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Whisper),
            3 => Ok(Self::PreKey),
            other => Err(Error::InvalidMessage(format!(
                "Unknown message type {other}"
            ))),
        }
    }
}

fn version_byte() -> u8 {
    (CURRENT_VERSION << 4) | CURRENT_VERSION
}

fn check_version(byte: u8) -> Result<u8, Error> {
    let version = byte >> 4;
    if version < CURRENT_VERSION {
        return Err(Error::LegacyMessage(version));
    }
    if version > CURRENT_VERSION {
        return Err(Error::InvalidVersion(version));
    }
    Ok(version)
}

/// A Double Ratchet message: `[version][protobuf body][8-byte MAC]`.
///
/// The MAC covers both identity keys and everything before it, so it is checked before the
/// body is decrypted.
#[derive(Clone, Debug)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: X25519PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new<C: CryptoProvider>(
        crypto: &C,
        mac_key: &[u8; 32],
        sender_ratchet_key: X25519PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
    ) -> Result<Self, Error> {
        let body = SignalMessageProto {
            ratchet_key: sender_ratchet_key.to_bytes().to_vec(),
            counter,
            previous_counter,
            ciphertext,
        };

        let mut serialized = Vec::with_capacity(1 + body.encoded_len() + MAC_LENGTH);
        serialized.push(version_byte());
        body.encode(&mut serialized)
            .map_err(|err| Error::Serde(format!("Failed to encode message: {err}")))?;
        let mac = compute_mac(crypto, mac_key, sender_identity, receiver_identity, &serialized)?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version: CURRENT_VERSION,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: body.ciphertext,
            serialized,
        })
    }

    /// Protocol version of the message.
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    /// Ratchet key of the sending chain.
    pub fn sender_ratchet_key(&self) -> &X25519PublicKey {
        &self.sender_ratchet_key
    }

    /// Index of the message within its sending chain.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Length of the sender's previous sending chain.
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Encrypted body.
    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Checks the trailing MAC in constant time.
    pub fn verify_mac<C: CryptoProvider>(
        &self,
        crypto: &C,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8; 32],
    ) -> Result<bool, Error> {
        let (content, their_mac) = self
            .serialized
            .split_at(self.serialized.len() - MAC_LENGTH);
        let our_mac = compute_mac(crypto, mac_key, sender_identity, receiver_identity, content)?;

        Ok(crypto.constant_time_eq(&our_mac, their_mac))
    }
}

fn compute_mac<C: CryptoProvider>(
    crypto: &C,
    mac_key: &[u8; 32],
    sender_identity: &IdentityKey,
    receiver_identity: &IdentityKey,
    content: &[u8],
) -> Result<[u8; MAC_LENGTH], Error> {
    let sender = sender_identity.to_bytes();
    let receiver = receiver_identity.to_bytes();
    let full = crypto.hmac_sha256(mac_key, &[sender.as_slice(), receiver.as_slice(), content])?;

    let mut mac = [0u8; MAC_LENGTH];
    mac.copy_from_slice(&full[..MAC_LENGTH]);
    Ok(mac)
}

impl TryFrom<&[u8]> for SignalMessage {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < 1 + MAC_LENGTH {
            return Err(Error::InvalidMessage(format!(
                "Signal message too short: {} bytes",
                bytes.len()
            )));
        }

        let message_version = check_version(bytes[0])?;
        let body = SignalMessageProto::decode(&bytes[1..bytes.len() - MAC_LENGTH])?;
        let sender_ratchet_key = X25519PublicKey::try_from(body.ratchet_key.as_slice())
            .map_err(|_| Error::InvalidMessage("Invalid sender ratchet key".to_string()))?;

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter: body.counter,
            previous_counter: body.previous_counter,
            ciphertext: body.ciphertext,
            serialized: bytes.to_vec(),
        })
    }
}

/// First message(s) of an initiator: the handshake material plus an embedded
/// [`SignalMessage`]. Format: `[version][protobuf body]`.
#[derive(Clone, Debug)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: X25519PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Vec<u8>,
}

impl PreKeySignalMessage {
    pub(crate) fn new(
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: X25519PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Result<Self, Error> {
        let body = PreKeySignalMessageProto {
            pre_key_id,
            base_key: base_key.to_bytes().to_vec(),
            identity_key: identity_key.to_bytes().to_vec(),
            message: message.serialized().to_vec(),
            registration_id,
            signed_pre_key_id,
        };

        let mut serialized = Vec::with_capacity(1 + body.encoded_len());
        serialized.push(version_byte());
        body.encode(&mut serialized)
            .map_err(|err| Error::Serde(format!("Failed to encode pre-key message: {err}")))?;

        Ok(Self {
            message_version: CURRENT_VERSION,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized,
        })
    }

    /// Protocol version of the message.
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    /// Registration id of the initiator.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// One-time pre-key the initiator used, if any.
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    /// Signed pre-key the initiator used.
    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    /// Initiator's base key.
    pub fn base_key(&self) -> &X25519PublicKey {
        &self.base_key
    }

    /// Initiator's identity.
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Embedded ratchet message.
    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl TryFrom<&[u8]> for PreKeySignalMessage {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let (&first, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::InvalidMessage("Empty pre-key message".to_string()))?;

        let message_version = check_version(first)?;
        let body = PreKeySignalMessageProto::decode(rest)?;
        let base_key = X25519PublicKey::try_from(body.base_key.as_slice())
            .map_err(|_| Error::InvalidMessage("Invalid base key".to_string()))?;
        let identity_key = IdentityKey::decode(&body.identity_key)
            .map_err(|_| Error::InvalidMessage("Invalid identity key".to_string()))?;
        let message = SignalMessage::try_from(body.message.as_slice())?;

        Ok(Self {
            message_version,
            registration_id: body.registration_id,
            pre_key_id: body.pre_key_id,
            signed_pre_key_id: body.signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized: bytes.to_vec(),
        })
    }
}

/// Output of an encryption: a plain ratchet message or one that still carries the handshake.
#[derive(Clone, Debug)]
pub enum CiphertextMessage {
    /// Ratchet message on an acknowledged session.
    Signal(SignalMessage),
    /// Ratchet message wrapped with the initiator's handshake material.
    PreKey(PreKeySignalMessage),
}

impl CiphertextMessage {
    /// Wire type tag.
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            Self::Signal(_) => CiphertextMessageType::Whisper,
            Self::PreKey(_) => CiphertextMessageType::PreKey,
        }
    }

    /// Wire bytes.
    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::Signal(message) => message.serialized(),
            Self::PreKey(message) => message.serialized(),
        }
    }

    /// Parses wire bytes received with tag `message_type`.
    pub fn deserialize(message_type: CiphertextMessageType, bytes: &[u8]) -> Result<Self, Error> {
        match message_type {
            CiphertextMessageType::Whisper => SignalMessage::try_from(bytes).map(Self::Signal),
            CiphertextMessageType::PreKey => {
                PreKeySignalMessage::try_from(bytes).map(Self::PreKey)
            }
        }
    }
}
