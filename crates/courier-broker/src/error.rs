use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Queue {0} already has a consumer")]
    AlreadyConsumed(String),

    #[error("Queue {0} is closed")]
    Closed(String),
}

/// Failure of a correlated request/response call.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Broker unreachable: {0}")]
    Unreachable(#[from] BrokerError),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}
