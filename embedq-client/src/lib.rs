pub mod client;

pub use client::EmbedqClient;
pub use embedq_protocol::{ConnectInfo, Message, ServerInfo};
