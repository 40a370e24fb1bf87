pub mod http_client;
pub mod scripted;
pub mod session;

/// Re-export commonly used types from adapters
pub use http_client::ReqwestTransport;
pub use scripted::{ScriptedReply, ScriptedTransport};
pub use session::{NoToken, SessionSlot, StaticToken};
