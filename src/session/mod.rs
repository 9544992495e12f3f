mod builder;
pub use builder::SessionBuilder;
mod cipher;
pub use cipher::SessionCipher;
mod record;
pub use record::SessionRecord;
mod state;
pub use state::*;

use crate::{ProtocolAddress, SessionStore};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch; clocks before 1970 read as zero.
pub(crate) fn millis_since_epoch(time: SystemTime) -> u64 {
    duration_millis(time.duration_since(UNIX_EPOCH).unwrap_or_default())
}

pub(crate) fn now_millis() -> u64 {
    millis_since_epoch(SystemTime::now())
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Puts `previous` back after a later write of the same operation failed.
pub(crate) fn restore_session<S: SessionStore>(
    store: &mut S,
    address: &ProtocolAddress,
    previous: Option<&SessionRecord>,
) {
    let result = match previous {
        Some(record) => store.store_session(address, record),
        None => store.delete_session(address),
    };

    if let Err(err) = result {
        tracing::error!(target: "session", %address, %err, "failed to roll back session record");
    }
}
