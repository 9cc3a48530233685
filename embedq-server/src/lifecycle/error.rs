use std::io;
use std::time::Duration;
use thiserror::Error;

use super::LifecycleState;
use crate::broker::{BrokerAddr, BrokerError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to start embedded broker: {0}")]
    Startup(#[from] BrokerError),

    #[error("embedded broker was not ready for connections after {waited:?}")]
    ReadinessTimeout { waited: Duration },

    #[error("embedded broker reported a listen address that is not a network endpoint: {addr}")]
    AddressResolution { addr: BrokerAddr },

    #[error("cannot register termination signal handlers: {0}")]
    SignalRegistration(#[source] io::Error),

    #[error("broker lifecycle can only start once (currently {state})")]
    AlreadyStarted { state: LifecycleState },

    #[error("embedded broker is not ready (currently {state})")]
    NotReady { state: LifecycleState },
}
