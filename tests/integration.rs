#[cfg(test)]
mod integration_tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tandem::{
        CiphertextMessage, CiphertextMessageType, DefaultCryptoProvider, Direction, Error,
        IdentityKey, IdentityKeyPair, IdentityKeyStore, InMemoryStore, PreKeyBundle,
        PreKeyRecord, PreKeyStore, ProtocolAddress, ProtocolStore, SenderKeyName, SenderKeyRecord,
        SenderKeyStore, SessionConfig, SessionEngine, SessionPhase, SessionRecord, SessionStore,
        SignedPreKeyRecord, SignedPreKeyStore, key_helper, padding,
    };

    fn test_config() -> SessionConfig {
        SessionConfig {
            max_skip: 50,
            max_message_keys: 50,
            max_receiver_chains: 3,
            max_previous_states: 3,
            ..SessionConfig::default()
        }
    }

    fn new_store() -> InMemoryStore {
        let crypto = DefaultCryptoProvider;
        let identity = key_helper::generate_identity_key_pair(&crypto).unwrap();
        let registration_id = key_helper::generate_registration_id(&crypto).unwrap();
        InMemoryStore::new(identity, registration_id)
    }

    /// Engine with a signed pre-key (id 1) and ten one-time pre-keys (ids 1..=10).
    fn new_engine<S: ProtocolStore>(store: S, config: SessionConfig) -> SessionEngine<S> {
        let mut engine = SessionEngine::new(store, Some(config));
        let signed = engine.rotate_signed_pre_key(SystemTime::now()).unwrap();
        assert_eq!(signed.map(|key| key.id()), Some(1));
        engine.generate_pre_keys(1, 10).unwrap();
        engine
    }

    fn bundle<S: ProtocolStore>(
        engine: &SessionEngine<S>,
        pre_key_id: Option<u32>,
    ) -> PreKeyBundle {
        engine.local_pre_key_bundle(1, 1, pre_key_id).unwrap()
    }

    /// Sends the message through its wire form, like a transport would.
    fn transmit(message: &CiphertextMessage) -> CiphertextMessage {
        let wire_type = message.message_type() as u8;
        let bytes = message.serialize().to_vec();
        CiphertextMessage::deserialize(CiphertextMessageType::try_from(wire_type).unwrap(), &bytes)
            .unwrap()
    }

    const AEAD_TAG_LEN: usize = 16;

    fn ciphertext_len(message: &CiphertextMessage) -> usize {
        match message {
            CiphertextMessage::Signal(message) => message.body().len(),
            CiphertextMessage::PreKey(message) => message.message().body().len(),
        }
    }

    struct Pair {
        alice: SessionEngine<InMemoryStore>,
        bob: SessionEngine<InMemoryStore>,
        alice_address: ProtocolAddress,
        bob_address: ProtocolAddress,
    }

    /// Alice starts a session with Bob and both sides exchange one message.
    fn established_pair(config: SessionConfig) -> Pair {
        let mut alice = new_engine(new_store(), config.clone());
        let mut bob = new_engine(new_store(), config);
        let alice_address = ProtocolAddress::new("alice", 1);
        let bob_address = ProtocolAddress::new("bob", 1);

        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, Some(1)))
            .unwrap();
        let hello = alice.encrypt(&bob_address, b"hello").unwrap();
        assert_eq!(bob.decrypt(&alice_address, &transmit(&hello)).unwrap(), b"hello");
        let reply = bob.encrypt(&alice_address, b"hi").unwrap();
        assert_eq!(alice.decrypt(&bob_address, &transmit(&reply)).unwrap(), b"hi");

        Pair {
            alice,
            bob,
            alice_address,
            bob_address,
        }
    }

    #[test]
    fn test_full_protocol_flow() {
        let mut alice = new_engine(new_store(), test_config());
        let mut bob = new_engine(new_store(), test_config());
        let alice_address = ProtocolAddress::new("alice", 1);
        let bob_address = ProtocolAddress::new("bob", 1);

        println!("Step 1: Alice processes Bob's bundle...");
        let bob_bundle = bundle(&bob, Some(1));
        assert!(bob_bundle.verify().is_ok());
        alice
            .process_pre_key_bundle(&bob_address, &bob_bundle)
            .unwrap();
        assert_eq!(
            alice.session_phase(&bob_address).unwrap(),
            Some(SessionPhase::HandshakePending)
        );
        assert_eq!(
            alice.remote_registration_id(&bob_address).unwrap(),
            bob.store().local_registration_id().unwrap()
        );

        println!("Step 2: Alice sends pre-key messages until Bob answers...");
        let first = alice.encrypt(&bob_address, b"first").unwrap();
        let second = alice.encrypt(&bob_address, b"second").unwrap();
        assert_eq!(first.message_type(), CiphertextMessageType::PreKey);
        assert_eq!(second.message_type(), CiphertextMessageType::PreKey);

        println!("Step 3: Bob decrypts them out of order...");
        assert_eq!(bob.decrypt(&alice_address, &transmit(&second)).unwrap(), b"second");
        assert_eq!(bob.decrypt(&alice_address, &transmit(&first)).unwrap(), b"first");
        assert!(!bob.store().contains_pre_key(1).unwrap());
        assert_eq!(
            bob.session_phase(&alice_address).unwrap(),
            Some(SessionPhase::Established)
        );
        assert_eq!(
            bob.remote_registration_id(&alice_address).unwrap(),
            alice.store().local_registration_id().unwrap()
        );

        println!("Step 4: Bob replies and Alice's session is acknowledged...");
        let reply = bob.encrypt(&alice_address, b"reply").unwrap();
        assert_eq!(reply.message_type(), CiphertextMessageType::Whisper);
        assert_eq!(alice.decrypt(&bob_address, &transmit(&reply)).unwrap(), b"reply");
        assert_eq!(
            alice.session_phase(&bob_address).unwrap(),
            Some(SessionPhase::Established)
        );

        println!("Step 5: Several ratchet turns with bursts in both directions...");
        for round in 0..5u8 {
            for burst in 0..=round {
                let text = [round, burst];
                let message = alice.encrypt(&bob_address, &text).unwrap();
                assert_eq!(message.message_type(), CiphertextMessageType::Whisper);
                assert_eq!(bob.decrypt(&alice_address, &transmit(&message)).unwrap(), text);
            }
            let text = [0xB0, round];
            let message = bob.encrypt(&alice_address, &text).unwrap();
            assert_eq!(alice.decrypt(&bob_address, &transmit(&message)).unwrap(), text);
        }

        println!("Step 6: Empty and large payloads...");
        let empty = alice.encrypt(&bob_address, b"").unwrap();
        assert!(bob.decrypt(&alice_address, &transmit(&empty)).unwrap().is_empty());
        let large = vec![0x5Au8; 1 << 20];
        let message = bob.encrypt(&alice_address, &large).unwrap();
        assert_eq!(alice.decrypt(&bob_address, &transmit(&message)).unwrap(), large);

        println!("Step 7: Bodies are padded to whole blocks on the wire...");
        let block = padding::PADDING_BLOCK_SIZE;
        for (len, padded_len) in [(0, block), (block - 1, block), (block, 2 * block)] {
            let text = vec![0x80u8; len];
            let message = alice.encrypt(&bob_address, &text).unwrap();
            assert_eq!(ciphertext_len(&message), padded_len + AEAD_TAG_LEN);
            assert_eq!(bob.decrypt(&alice_address, &transmit(&message)).unwrap(), text);
        }
        let trailing_zeros = b"ends in zeros\0\0";
        let message = alice.encrypt(&bob_address, trailing_zeros).unwrap();
        assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), trailing_zeros);
    }

    #[test]
    fn test_unpadded_sessions() {
        let config = SessionConfig {
            pad_messages: false,
            ..test_config()
        };
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(config);

        for len in [0, 1, padding::PADDING_BLOCK_SIZE - 1] {
            let text = vec![7u8; len];
            let message = alice.encrypt(&bob_address, &text).unwrap();
            assert_eq!(ciphertext_len(&message), len + AEAD_TAG_LEN);
            assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), text);
        }

        // A body that looks padded comes back untouched.
        let padded_looking = padding::pad_message_body(b"raw");
        let message = alice.encrypt(&bob_address, &padded_looking).unwrap();
        assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), padded_looking);
    }

    #[test]
    fn test_session_without_one_time_pre_key() {
        let mut alice = new_engine(new_store(), test_config());
        let mut bob = new_engine(new_store(), test_config());
        let alice_address = ProtocolAddress::new("alice", 1);
        let bob_address = ProtocolAddress::new("bob", 1);

        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, None))
            .unwrap();
        let message = alice.encrypt(&bob_address, b"no one-time key").unwrap();
        assert_eq!(
            bob.decrypt(&alice_address, &transmit(&message)).unwrap(),
            b"no one-time key"
        );
        for id in 1..=10 {
            assert!(bob.store().contains_pre_key(id).unwrap());
        }
    }

    #[test]
    fn test_out_of_order_across_ratchet_steps() {
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());

        let first_chain: Vec<_> = (0..10u8)
            .map(|i| (i, alice.encrypt(&bob_address, &[i]).unwrap()))
            .collect();

        // Bob answers one of them, which moves Alice to a new sending chain.
        let (_, answered) = &first_chain[9];
        assert_eq!(bob.decrypt(&alice_address, answered).unwrap(), [9]);
        let reply = bob.encrypt(&alice_address, b"ack").unwrap();
        assert_eq!(alice.decrypt(&bob_address, &reply).unwrap(), b"ack");

        let second_chain: Vec<_> = (10..15u8)
            .map(|i| (i, alice.encrypt(&bob_address, &[i]).unwrap()))
            .collect();

        for index in [3, 1, 0] {
            let (i, message) = &second_chain[index];
            assert_eq!(bob.decrypt(&alice_address, message).unwrap(), [*i]);
        }
        for index in [4, 0, 8, 2, 6, 1, 5, 3, 7] {
            let (i, message) = &first_chain[index];
            assert_eq!(bob.decrypt(&alice_address, message).unwrap(), [*i]);
        }
        for index in [4, 2] {
            let (i, message) = &second_chain[index];
            assert_eq!(bob.decrypt(&alice_address, message).unwrap(), [*i]);
        }
    }

    #[test]
    fn test_replay_is_rejected() {
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());

        let message = alice.encrypt(&bob_address, b"once").unwrap();
        assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), b"once");
        assert!(matches!(
            bob.decrypt(&alice_address, &message),
            Err(Error::DuplicateMessage { counter: 0, .. })
        ));

        // A skipped key is also single use.
        let skipped = alice.encrypt(&bob_address, b"skipped").unwrap();
        let later = alice.encrypt(&bob_address, b"later").unwrap();
        assert_eq!(bob.decrypt(&alice_address, &later).unwrap(), b"later");
        assert_eq!(bob.decrypt(&alice_address, &skipped).unwrap(), b"skipped");
        assert!(matches!(
            bob.decrypt(&alice_address, &skipped),
            Err(Error::DuplicateMessage { .. })
        ));
    }

    #[test]
    fn test_replayed_pre_key_message_is_rejected() {
        let mut alice = new_engine(new_store(), test_config());
        let mut bob = new_engine(new_store(), test_config());
        let alice_address = ProtocolAddress::new("alice", 1);
        let bob_address = ProtocolAddress::new("bob", 1);

        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, Some(2)))
            .unwrap();
        let message = alice.encrypt(&bob_address, b"hello").unwrap();
        assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), b"hello");
        assert!(matches!(
            bob.decrypt(&alice_address, &message),
            Err(Error::DuplicateMessage { .. })
        ));
    }

    #[test]
    fn test_skip_bound() {
        for max_skip in [0u32, 3, 20] {
            let config = SessionConfig {
                max_skip,
                ..test_config()
            };
            let Pair {
                mut alice,
                mut bob,
                alice_address,
                bob_address,
            } = established_pair(config);

            let messages: Vec<_> = (0..=max_skip + 1)
                .map(|_| alice.encrypt(&bob_address, b"skip").unwrap())
                .collect();

            // Counter max_skip + 1 on a new chain needs one skip too many.
            let too_far = &messages[messages.len() - 1];
            assert!(matches!(
                bob.decrypt(&alice_address, too_far),
                Err(Error::ResourceExhausted(_))
            ));

            let within = &messages[messages.len() - 2];
            assert_eq!(bob.decrypt(&alice_address, within).unwrap(), b"skip");
            assert_eq!(bob.decrypt(&alice_address, too_far).unwrap(), b"skip");
        }
    }

    #[test]
    fn test_one_time_pre_key_is_single_use() {
        let mut bob = new_engine(new_store(), test_config());
        let mut alice = new_engine(new_store(), test_config());
        let mut carol = new_engine(new_store(), test_config());
        let bob_address = ProtocolAddress::new("bob", 1);
        let alice_address = ProtocolAddress::new("alice", 1);
        let carol_address = ProtocolAddress::new("carol", 1);

        let shared_bundle = bundle(&bob, Some(4));
        alice
            .process_pre_key_bundle(&bob_address, &shared_bundle)
            .unwrap();
        carol
            .process_pre_key_bundle(&bob_address, &shared_bundle)
            .unwrap();

        let from_alice = alice.encrypt(&bob_address, b"alice").unwrap();
        let from_carol = carol.encrypt(&bob_address, b"carol").unwrap();

        assert_eq!(bob.decrypt(&alice_address, &from_alice).unwrap(), b"alice");
        assert!(!bob.store().contains_pre_key(4).unwrap());
        assert_eq!(
            bob.decrypt(&carol_address, &from_carol),
            Err(Error::InvalidKeyId(4))
        );
        assert!(!bob.store().contains_session(&carol_address).unwrap());
    }

    #[test]
    fn test_unknown_signed_pre_key() {
        let mut alice = new_engine(new_store(), test_config());
        let mut bob = new_engine(new_store(), test_config());
        let bob_address = ProtocolAddress::new("bob", 1);

        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, None))
            .unwrap();
        let message = alice.encrypt(&bob_address, b"hello").unwrap();

        bob.store_mut().remove_signed_pre_key(1).unwrap();
        assert_eq!(
            bob.decrypt(&ProtocolAddress::new("alice", 1), &message),
            Err(Error::InvalidKeyId(1))
        );
    }

    #[test]
    fn test_archived_state_decrypts_until_evicted() {
        let config = test_config();
        let max_previous_states = config.max_previous_states;

        for rehandshakes in [max_previous_states, max_previous_states + 1] {
            let Pair {
                mut alice,
                mut bob,
                alice_address,
                bob_address,
            } = established_pair(config.clone());

            let late = alice.encrypt(&bob_address, b"late").unwrap();

            for _ in 0..rehandshakes {
                alice
                    .process_pre_key_bundle(&bob_address, &bundle(&bob, None))
                    .unwrap();
                let message = alice.encrypt(&bob_address, b"again").unwrap();
                assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), b"again");
            }

            let record = bob.store().load_session(&alice_address).unwrap().unwrap();
            assert!(record.previous_session_states().count() <= max_previous_states);

            let result = bob.decrypt(&alice_address, &late);
            if rehandshakes <= max_previous_states {
                assert_eq!(result.unwrap(), b"late");
            } else {
                assert_eq!(result, Err(Error::NoSession(alice_address.clone())));
            }
        }
    }

    /// Flips a bit of the trailing MAC.
    fn tamper_mac(message: &CiphertextMessage) -> CiphertextMessage {
        let mut bytes = message.serialize().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        CiphertextMessage::deserialize(CiphertextMessageType::Whisper, &bytes).unwrap()
    }

    fn stored_record(engine: &SessionEngine<InMemoryStore>, address: &ProtocolAddress) -> Vec<u8> {
        engine
            .store()
            .load_session(address)
            .unwrap()
            .unwrap()
            .serialize()
            .unwrap()
    }

    #[test]
    fn test_tampered_message_on_known_chain() {
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());

        // Open Alice's new chain on Bob's side first.
        let opener = alice.encrypt(&bob_address, b"opener").unwrap();
        assert_eq!(bob.decrypt(&alice_address, &opener).unwrap(), b"opener");

        let message = alice.encrypt(&bob_address, b"intact").unwrap();
        assert_eq!(message.message_type(), CiphertextMessageType::Whisper);
        let tampered = tamper_mac(&message);

        let before = stored_record(&bob, &alice_address);
        assert_eq!(bob.decrypt(&alice_address, &tampered), Err(Error::InvalidMac));
        assert_eq!(before, stored_record(&bob, &alice_address));

        assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), b"intact");
    }

    #[test]
    fn test_tampered_message_on_new_ratchet_key() {
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());

        // Alice just received Bob's reply, so this message announces a new ratchet key.
        let message = alice.encrypt(&bob_address, b"intact").unwrap();
        let tampered = tamper_mac(&message);

        let before = stored_record(&bob, &alice_address);
        assert_eq!(
            bob.decrypt(&alice_address, &tampered),
            Err(Error::NoSession(alice_address.clone()))
        );
        assert_eq!(before, stored_record(&bob, &alice_address));

        assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), b"intact");
    }

    #[test]
    fn test_no_session() {
        let mut alice = new_engine(new_store(), test_config());
        let bob_address = ProtocolAddress::new("bob", 1);

        assert_eq!(
            alice.encrypt(&bob_address, b"nobody home").err(),
            Some(Error::NoSession(bob_address.clone()))
        );
        assert_eq!(alice.session_phase(&bob_address).unwrap(), None);
        assert_eq!(
            alice.remote_registration_id(&bob_address),
            Err(Error::NoSession(bob_address.clone()))
        );

        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());
        let message = alice.encrypt(&bob_address, b"orphan").unwrap();
        bob.delete_session(&alice_address).unwrap();
        assert_eq!(
            bob.decrypt(&alice_address, &message),
            Err(Error::NoSession(alice_address.clone()))
        );
    }

    #[test]
    fn test_invalid_bundle_signature() {
        let mut alice = new_engine(new_store(), test_config());
        let bob = new_engine(new_store(), test_config());
        let bob_address = ProtocolAddress::new("bob", 1);

        let genuine = bundle(&bob, Some(1));
        let mallory = IdentityKeyPair::generate(&DefaultCryptoProvider).unwrap();
        let forged = PreKeyBundle::new(
            genuine.registration_id(),
            genuine.device_id(),
            genuine.pre_key(),
            genuine.signed_pre_key_id(),
            genuine.signed_pre_key(),
            mallory.sign(genuine.signed_pre_key().as_bytes()),
            *genuine.identity_key(),
        );

        assert_eq!(
            alice.process_pre_key_bundle(&bob_address, &forged),
            Err(Error::InvalidSignature)
        );
        assert!(!alice.store().contains_session(&bob_address).unwrap());
    }

    #[test]
    fn test_untrusted_identity() {
        let Pair {
            mut alice,
            bob_address,
            ..
        } = established_pair(test_config());

        // Bob's address now publishes a bundle under a different identity.
        let impostor = new_engine(new_store(), test_config());
        assert_eq!(
            alice.process_pre_key_bundle(&bob_address, &bundle(&impostor, None)),
            Err(Error::UntrustedIdentity(bob_address.clone()))
        );

        // Inbound: a pre-key message from a different identity at Alice's address.
        let Pair {
            mut bob,
            alice_address,
            ..
        } = established_pair(test_config());
        let mut impostor = new_engine(new_store(), test_config());
        impostor
            .process_pre_key_bundle(&ProtocolAddress::new("bob", 1), &bundle(&bob, None))
            .unwrap();
        let message = impostor
            .encrypt(&ProtocolAddress::new("bob", 1), b"trust me")
            .unwrap();
        assert_eq!(
            bob.decrypt(&alice_address, &message),
            Err(Error::UntrustedIdentity(alice_address.clone()))
        );
    }

    #[test]
    fn test_stale_session() {
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());

        let late = bob.encrypt(&alice_address, b"late").unwrap();
        let bob_identity: IdentityKey = bob.store().identity_key_pair().unwrap().identity_key();
        let registration_id = bob.store().local_registration_id().unwrap();
        assert_eq!(alice.remote_identity(&bob_address).unwrap(), Some(bob_identity));
        assert_eq!(
            alice
                .remote_identity(&ProtocolAddress::new("carol", 1))
                .unwrap(),
            None
        );

        assert!(!alice
            .observe_remote_device(&bob_address, registration_id, &bob_identity)
            .unwrap());
        assert!(alice
            .observe_remote_device(&bob_address, registration_id + 1, &bob_identity)
            .unwrap());
        assert_eq!(
            alice.session_phase(&bob_address).unwrap(),
            Some(SessionPhase::Stale)
        );
        assert_eq!(
            alice.encrypt(&bob_address, b"refused").err(),
            Some(Error::NoSession(bob_address.clone()))
        );

        // Late messages still decrypt on a stale session.
        assert_eq!(alice.decrypt(&bob_address, &late).unwrap(), b"late");

        // A new handshake replaces the stale state.
        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, None))
            .unwrap();
        assert_eq!(
            alice.session_phase(&bob_address).unwrap(),
            Some(SessionPhase::HandshakePending)
        );
    }

    #[test]
    fn test_stale_key_exchange() {
        let config = SessionConfig {
            max_unacknowledged_session_age: Duration::ZERO,
            ..test_config()
        };
        let mut alice = new_engine(new_store(), config);
        let bob = new_engine(new_store(), test_config());
        let bob_address = ProtocolAddress::new("bob", 1);

        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, None))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(
            alice.encrypt(&bob_address, b"too late").err(),
            Some(Error::StaleKeyExchange)
        );
    }

    #[test]
    fn test_archive_and_delete_sessions() {
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());

        let late = bob.encrypt(&alice_address, b"after archive").unwrap();
        alice.archive_session(&bob_address).unwrap();
        assert_eq!(alice.session_phase(&bob_address).unwrap(), None);
        assert_eq!(
            alice.encrypt(&bob_address, b"refused").err(),
            Some(Error::NoSession(bob_address.clone()))
        );
        assert_eq!(alice.decrypt(&bob_address, &late).unwrap(), b"after archive");

        let other = new_engine(new_store(), test_config());
        let bob_tablet = ProtocolAddress::new("bob", 2);
        alice
            .process_pre_key_bundle(&bob_tablet, &bundle(&other, None))
            .unwrap();
        assert_eq!(alice.device_ids("bob").unwrap(), vec![1, 2]);

        alice.delete_session(&bob_tablet).unwrap();
        assert_eq!(alice.device_ids("bob").unwrap(), vec![1]);
        alice.delete_all_sessions("bob").unwrap();
        assert!(alice.device_ids("bob").unwrap().is_empty());
    }

    #[test]
    fn test_session_record_persistence() {
        let Pair {
            mut alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(test_config());

        let pending: Vec<_> = (0..3u8)
            .map(|i| alice.encrypt(&bob_address, &[i]).unwrap())
            .collect();
        assert_eq!(bob.decrypt(&alice_address, &pending[2]).unwrap(), [2]);

        // Round-trip both records through their serialized form.
        for (engine, address) in [(&mut alice, &bob_address), (&mut bob, &alice_address)] {
            let bytes = engine
                .store()
                .load_session(address)
                .unwrap()
                .unwrap()
                .serialize()
                .unwrap();
            let restored = SessionRecord::deserialize(&bytes).unwrap();
            assert!(!restored.is_fresh());
            engine.store_mut().store_session(address, &restored).unwrap();
        }

        // Skipped keys survived.
        assert_eq!(bob.decrypt(&alice_address, &pending[0]).unwrap(), [0]);
        assert_eq!(bob.decrypt(&alice_address, &pending[1]).unwrap(), [1]);

        let reply = bob.encrypt(&alice_address, b"restored").unwrap();
        assert_eq!(alice.decrypt(&bob_address, &reply).unwrap(), b"restored");
        let next = alice.encrypt(&bob_address, b"still going").unwrap();
        assert_eq!(bob.decrypt(&alice_address, &next).unwrap(), b"still going");
    }

    #[test]
    fn test_signed_pre_key_rotation() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let day = Duration::from_secs(24 * 60 * 60);
        let mut engine = SessionEngine::new(new_store(), Some(test_config()));

        let first = engine.rotate_signed_pre_key(t0).unwrap().unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(engine.store().current_signed_pre_key_id().unwrap(), Some(1));

        assert!(engine.rotate_signed_pre_key(t0 + day).unwrap().is_none());

        let second = engine.rotate_signed_pre_key(t0 + day * 8).unwrap().unwrap();
        assert_eq!(second.id(), 2);
        assert_eq!(engine.store().signed_pre_key_ids().unwrap(), vec![1, 2]);

        let third = engine.rotate_signed_pre_key(t0 + day * 35).unwrap().unwrap();
        assert_eq!(third.id(), 3);
        assert_eq!(engine.store().signed_pre_key_ids().unwrap(), vec![2, 3]);
        assert_eq!(engine.store().current_signed_pre_key_id().unwrap(), Some(3));

        let identity = engine.store().identity_key_pair().unwrap().identity_key();
        assert!(third.verify(&identity).is_ok());
        let bundle = engine.local_pre_key_bundle(1, 3, None).unwrap();
        assert!(bundle.verify().is_ok());
        assert_eq!(
            engine.local_pre_key_bundle(1, 1, None).err(),
            Some(Error::InvalidKeyId(1))
        );
    }

    #[test]
    fn test_shared_engine_behind_mutex() {
        let Pair {
            alice,
            mut bob,
            alice_address,
            bob_address,
        } = established_pair(SessionConfig::default());

        let alice = Arc::new(Mutex::new(alice));
        let handles: Vec<_> = (0..4u8)
            .map(|worker| {
                let alice = Arc::clone(&alice);
                let bob_address = bob_address.clone();
                thread::spawn(move || {
                    (0..5u8)
                        .map(|i| {
                            let mut engine = alice.lock().unwrap();
                            let text = vec![worker, i];
                            (text.clone(), engine.encrypt(&bob_address, &text).unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut messages = Vec::new();
        for handle in handles {
            messages.extend(handle.join().unwrap());
        }
        messages.reverse();

        for (text, message) in &messages {
            assert_eq!(&bob.decrypt(&alice_address, message).unwrap(), text);
        }
    }

    /// Wraps [`InMemoryStore`] and fails selected writes.
    struct FailingStore {
        inner: InMemoryStore,
        fail_store_session: bool,
        fail_remove_pre_key: bool,
        fail_save_identity: bool,
        fail_remove_signed_pre_key: bool,
    }

    impl FailingStore {
        fn new() -> Self {
            Self {
                inner: new_store(),
                fail_store_session: false,
                fail_remove_pre_key: false,
                fail_save_identity: false,
                fail_remove_signed_pre_key: false,
            }
        }
    }

    fn injected() -> Error {
        Error::StoreFailure("injected failure".to_string())
    }

    impl SessionStore for FailingStore {
        fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, Error> {
            self.inner.load_session(address)
        }

        fn store_session(
            &mut self,
            address: &ProtocolAddress,
            record: &SessionRecord,
        ) -> Result<(), Error> {
            if self.fail_store_session {
                return Err(injected());
            }
            self.inner.store_session(address, record)
        }

        fn contains_session(&self, address: &ProtocolAddress) -> Result<bool, Error> {
            self.inner.contains_session(address)
        }

        fn delete_session(&mut self, address: &ProtocolAddress) -> Result<(), Error> {
            self.inner.delete_session(address)
        }

        fn delete_all_sessions(&mut self, name: &str) -> Result<(), Error> {
            self.inner.delete_all_sessions(name)
        }

        fn device_ids(&self, name: &str) -> Result<Vec<u32>, Error> {
            self.inner.device_ids(name)
        }
    }

    impl PreKeyStore for FailingStore {
        fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, Error> {
            self.inner.load_pre_key(id)
        }

        fn store_pre_key(&mut self, record: &PreKeyRecord) -> Result<(), Error> {
            self.inner.store_pre_key(record)
        }

        fn contains_pre_key(&self, id: u32) -> Result<bool, Error> {
            self.inner.contains_pre_key(id)
        }

        fn remove_pre_key(&mut self, id: u32) -> Result<(), Error> {
            if self.fail_remove_pre_key {
                return Err(injected());
            }
            self.inner.remove_pre_key(id)
        }
    }

    impl SignedPreKeyStore for FailingStore {
        fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, Error> {
            self.inner.load_signed_pre_key(id)
        }

        fn store_signed_pre_key(&mut self, record: &SignedPreKeyRecord) -> Result<(), Error> {
            self.inner.store_signed_pre_key(record)
        }

        fn contains_signed_pre_key(&self, id: u32) -> Result<bool, Error> {
            self.inner.contains_signed_pre_key(id)
        }

        fn remove_signed_pre_key(&mut self, id: u32) -> Result<(), Error> {
            if self.fail_remove_signed_pre_key {
                return Err(injected());
            }
            self.inner.remove_signed_pre_key(id)
        }

        fn signed_pre_key_ids(&self) -> Result<Vec<u32>, Error> {
            self.inner.signed_pre_key_ids()
        }

        fn current_signed_pre_key_id(&self) -> Result<Option<u32>, Error> {
            self.inner.current_signed_pre_key_id()
        }

        fn set_current_signed_pre_key_id(&mut self, id: u32) -> Result<(), Error> {
            self.inner.set_current_signed_pre_key_id(id)
        }
    }

    impl IdentityKeyStore for FailingStore {
        fn identity_key_pair(&self) -> Result<IdentityKeyPair, Error> {
            self.inner.identity_key_pair()
        }

        fn local_registration_id(&self) -> Result<u32, Error> {
            self.inner.local_registration_id()
        }

        fn save_identity(
            &mut self,
            address: &ProtocolAddress,
            identity: &IdentityKey,
        ) -> Result<bool, Error> {
            if self.fail_save_identity {
                return Err(injected());
            }
            self.inner.save_identity(address, identity)
        }

        fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>, Error> {
            self.inner.get_identity(address)
        }

        fn is_trusted_identity(
            &self,
            address: &ProtocolAddress,
            identity: &IdentityKey,
            direction: Direction,
        ) -> Result<bool, Error> {
            self.inner.is_trusted_identity(address, identity, direction)
        }
    }

    impl SenderKeyStore for FailingStore {
        fn store_sender_key(
            &mut self,
            name: &SenderKeyName,
            record: &SenderKeyRecord,
        ) -> Result<(), Error> {
            self.inner.store_sender_key(name, record)
        }

        fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>, Error> {
            self.inner.load_sender_key(name)
        }

        fn contains_sender_key(&self, name: &SenderKeyName) -> Result<bool, Error> {
            self.inner.contains_sender_key(name)
        }
    }

    #[test]
    fn test_failed_encrypt_leaves_store_unchanged() {
        let mut alice = new_engine(FailingStore::new(), test_config());
        let bob = new_engine(new_store(), test_config());
        let bob_address = ProtocolAddress::new("bob", 1);

        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, Some(1)))
            .unwrap();
        let before = alice
            .store()
            .load_session(&bob_address)
            .unwrap()
            .unwrap()
            .serialize()
            .unwrap();

        alice.store_mut().fail_store_session = true;
        assert_eq!(alice.encrypt(&bob_address, b"lost").err(), Some(injected()));

        let after = alice
            .store()
            .load_session(&bob_address)
            .unwrap()
            .unwrap()
            .serialize()
            .unwrap();
        assert_eq!(before, after);

        alice.store_mut().fail_store_session = false;
        assert!(alice.encrypt(&bob_address, b"kept").is_ok());
    }

    #[test]
    fn test_failed_bundle_processing_is_rolled_back() {
        let mut alice = new_engine(FailingStore::new(), test_config());
        let bob = new_engine(new_store(), test_config());
        let bob_address = ProtocolAddress::new("bob", 1);

        alice.store_mut().fail_save_identity = true;
        assert_eq!(
            alice.process_pre_key_bundle(&bob_address, &bundle(&bob, Some(1))),
            Err(injected())
        );
        assert!(!alice.store().contains_session(&bob_address).unwrap());
        assert!(alice.store().get_identity(&bob_address).unwrap().is_none());
    }

    #[test]
    fn test_failed_pre_key_decrypt_is_rolled_back() {
        let mut alice = new_engine(new_store(), test_config());
        let mut bob = new_engine(FailingStore::new(), test_config());
        let alice_address = ProtocolAddress::new("alice", 1);
        let bob_address = ProtocolAddress::new("bob", 1);

        alice
            .process_pre_key_bundle(&bob_address, &bundle(&bob, Some(3)))
            .unwrap();
        let message = alice.encrypt(&bob_address, b"atomic").unwrap();

        bob.store_mut().fail_remove_pre_key = true;
        assert_eq!(bob.decrypt(&alice_address, &message), Err(injected()));
        assert!(!bob.store().contains_session(&alice_address).unwrap());
        assert!(bob.store().contains_pre_key(3).unwrap());
        assert!(bob.store().get_identity(&alice_address).unwrap().is_none());
        bob.store_mut().fail_remove_pre_key = false;

        bob.store_mut().fail_save_identity = true;
        assert_eq!(bob.decrypt(&alice_address, &message), Err(injected()));
        assert!(!bob.store().contains_session(&alice_address).unwrap());
        assert!(bob.store().contains_pre_key(3).unwrap());
        bob.store_mut().fail_save_identity = false;

        bob.store_mut().fail_store_session = true;
        assert_eq!(bob.decrypt(&alice_address, &message), Err(injected()));
        assert!(bob.store().contains_pre_key(3).unwrap());
        bob.store_mut().fail_store_session = false;

        assert_eq!(bob.decrypt(&alice_address, &message).unwrap(), b"atomic");
        assert!(!bob.store().contains_pre_key(3).unwrap());
        assert!(bob.store().get_identity(&alice_address).unwrap().is_some());
    }

    #[test]
    fn test_rotation_survives_failed_pruning() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let day = Duration::from_secs(24 * 60 * 60);
        let mut engine = SessionEngine::new(FailingStore::new(), Some(test_config()));

        assert_eq!(engine.rotate_signed_pre_key(t0).unwrap().map(|key| key.id()), Some(1));

        engine.store_mut().fail_remove_signed_pre_key = true;
        let rotated = engine.rotate_signed_pre_key(t0 + day * 35).unwrap();
        assert_eq!(rotated.map(|key| key.id()), Some(2));
        assert_eq!(engine.store().current_signed_pre_key_id().unwrap(), Some(2));
        assert_eq!(engine.store().signed_pre_key_ids().unwrap(), vec![1, 2]);

        engine.store_mut().fail_remove_signed_pre_key = false;
        let rotated = engine.rotate_signed_pre_key(t0 + day * 43).unwrap();
        assert_eq!(rotated.map(|key| key.id()), Some(3));
        assert_eq!(engine.store().signed_pre_key_ids().unwrap(), vec![2, 3]);
    }
}
