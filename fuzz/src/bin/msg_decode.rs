#[macro_use]
extern crate afl;
use tandem::{CiphertextMessage, CiphertextMessageType};

fn main() {
    fuzz!(|data: &[u8]| {
        if let Some((&tag, bytes)) = data.split_first() {
            if let Ok(message_type) = CiphertextMessageType::try_from(tag) {
                let _ = CiphertextMessage::deserialize(message_type, bytes);
            }
        }
    });
}
