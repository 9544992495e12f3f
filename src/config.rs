use std::time::Duration;

/// Policy bounds and protocol constants used by the session engine.
///
/// The defaults follow the published Signal protocol limits. Tests usually shrink them.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Largest forward jump allowed inside one receiving chain.
    pub max_skip: u32,
    /// Skipped message keys cached per receiving chain; the oldest are evicted first.
    pub max_message_keys: usize,
    /// Receiving chains kept per session state.
    pub max_receiver_chains: usize,
    /// Superseded session states archived per record.
    pub max_previous_states: usize,
    /// A handshake that is still unacknowledged after this long can no longer be used to send.
    pub max_unacknowledged_session_age: Duration,
    /// How often the local signed pre-key should be replaced.
    pub signed_pre_key_rotation_interval: Duration,
    /// Superseded signed pre-keys older than this are deleted on rotation.
    pub signed_pre_key_max_age: Duration,
    /// Info string for the X3DH key derivation.
    pub protocol_info: Vec<u8>,
    /// Pad plaintexts to a multiple of [`crate::padding::PADDING_BLOCK_SIZE`] before
    /// encryption and strip the padding after decryption. Both peers must agree.
    pub pad_messages: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_skip: 2000,
            max_message_keys: 2000,
            max_receiver_chains: 5,
            max_previous_states: 40,
            max_unacknowledged_session_age: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            signed_pre_key_rotation_interval: Duration::from_secs(7 * 24 * 60 * 60), // 1 week
            signed_pre_key_max_age: Duration::from_secs(30 * 24 * 60 * 60),
            protocol_info: b"Tandem-E2E-WhisperText".to_vec(),
            pad_messages: true,
        }
    }
}
