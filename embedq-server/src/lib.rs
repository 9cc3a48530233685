pub mod broker;
pub mod config;
pub mod lifecycle;
pub mod server;

pub use broker::{Broker, BrokerAddr, BrokerError, EmbeddedBroker};
pub use config::BrokerConfig;
pub use lifecycle::{
    BrokerLifecycle, LifecycleError, LifecycleState, ListenEndpoint, ShutdownSignal, SignalBridge,
};
