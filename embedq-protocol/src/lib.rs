pub mod frame;
pub mod info;
pub mod message;
pub mod errors;
pub mod subject;
mod op;

// Public re-exports for easy access
pub use errors::ProtocolError;
pub use info::{ConnectInfo, ServerInfo, DEFAULT_MAX_PAYLOAD, PROTOCOL_VERSION};
pub use message::Message;
pub use op::{ClientOp, ServerOp};
