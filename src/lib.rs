mod address;
pub use address::ProtocolAddress;

mod config;
pub use config::SessionConfig;

mod crypto;
pub use crypto::*;

mod engine;
pub use engine::SessionEngine;

mod error;
pub use error::Error;

pub mod key_helper;

pub mod padding;

mod proto;

mod protocol;
pub use protocol::*;

mod ratchet;
pub use ratchet::*;

mod sender_keys;
pub use sender_keys::*;

mod session;
pub use session::*;

mod store;
pub use store::*;

mod types;
pub use types::*;

mod x3dh;
pub use x3dh::*;
