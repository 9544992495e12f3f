/// Padded message bodies are a multiple of this many bytes.
pub const PADDING_BLOCK_SIZE: usize = 160;

const TERMINATOR: u8 = 0x80;

/// Appends a `0x80` terminator and zeros up to the next multiple of [`PADDING_BLOCK_SIZE`],
/// hiding the exact plaintext length.
pub fn pad_message_body(body: &[u8]) -> Vec<u8> {
    let padded_len = (body.len() + 1).div_ceil(PADDING_BLOCK_SIZE) * PADDING_BLOCK_SIZE;

    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(body);
    padded.push(TERMINATOR);
    padded.resize(padded_len, 0);
    padded
}

/// Strips padding added by [`pad_message_body`].
///
/// Input without a terminator after its trailing zeros is returned unchanged.
pub fn unpad_message_body(padded: &[u8]) -> &[u8] {
    match padded.iter().rposition(|&byte| byte != 0) {
        Some(position) if padded[position] == TERMINATOR => &padded[..position],
        _ => padded,
    }
}
