#[macro_use]
extern crate afl;
use std::time::SystemTime;
use tandem::{
    CiphertextMessage, CiphertextMessageType, DefaultCryptoProvider, InMemoryStore,
    ProtocolAddress, SessionEngine, key_helper,
};

fn engine() -> SessionEngine<InMemoryStore> {
    let crypto = DefaultCryptoProvider;
    let identity = key_helper::generate_identity_key_pair(&crypto).expect("identity");
    let registration_id = key_helper::generate_registration_id(&crypto).expect("registration id");
    let mut engine = SessionEngine::new(InMemoryStore::new(identity, registration_id), None);
    engine
        .rotate_signed_pre_key(SystemTime::now())
        .expect("signed pre-key");
    engine.generate_pre_keys(1, 100).expect("pre-keys");
    engine
}

fn main() {
    // The victim, with an established session to the attacker.
    let mut victim = engine();
    let mut attacker = engine();
    let victim_address = ProtocolAddress::new("victim", 1);
    let attacker_address = ProtocolAddress::new("attacker", 1);

    let bundle = victim
        .local_pre_key_bundle(1, 1, Some(1))
        .expect("bundle");
    attacker
        .process_pre_key_bundle(&victim_address, &bundle)
        .expect("setup failed");
    let hello = attacker.encrypt(&victim_address, b"hello").expect("encrypt");
    victim.decrypt(&attacker_address, &hello).expect("decrypt");

    fuzz!(|data: &[u8]| {
        if let Some((&tag, bytes)) = data.split_first() {
            let message = CiphertextMessageType::try_from(tag)
                .and_then(|message_type| CiphertextMessage::deserialize(message_type, bytes));
            if let Ok(message) = message {
                let _ = victim.decrypt(&attacker_address, &message);
            }
        }
    });
}
